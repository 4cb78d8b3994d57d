//! End-to-end audio path: RTP in, backend-rate PCM in the middle, RTP out.

use std::sync::{Arc, Mutex};

use voice_bridge::audio::{self, BACKEND_RATE, SAMPLES_PER_FRAME, TELEPHONY_RATE};
use voice_bridge::rtp::{self, PT_PCMU, RtpFramer};
use voice_bridge::transport::{G711Encoding, PacketizedTransport, Transport};

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn tone_8k(frames: usize) -> Vec<i16> {
    let total = frames * SAMPLES_PER_FRAME as usize;
    (0..total)
        .map(|i| {
            let t = i as f64 / TELEPHONY_RATE as f64;
            (8000.0 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as i16
        })
        .collect()
}

#[test]
fn mulaw_stream_preserves_packet_count() {
    init_tracing();
    const FRAMES: usize = 50; // one second of audio

    let (transport, mut outbound) = PacketizedTransport::new(G711Encoding::Mulaw);

    // Inbound leg: collect what would be sent to the backend, at 24 kHz.
    let backend_audio = Arc::new(Mutex::new(Vec::<i16>::new()));
    let sink = backend_audio.clone();
    transport.on_inbound_audio(Arc::new(move |pcm, rate_hz| {
        assert_eq!(rate_hz, TELEPHONY_RATE);
        sink.lock()
            .unwrap()
            .extend(audio::resample(pcm, rate_hz, BACKEND_RATE));
    }));

    let source = tone_8k(FRAMES);
    let mut framer = RtpFramer::new();
    for chunk in source.chunks(SAMPLES_PER_FRAME as usize) {
        let payload = audio::encode_mulaw(chunk);
        transport.handle_packet(&framer.build(&payload, PT_PCMU, false));
    }

    let backend_audio = backend_audio.lock().unwrap();
    assert_eq!(backend_audio.len(), FRAMES * 480);

    // Outbound leg: push the backend audio back, as one delta per 20 ms.
    for delta in backend_audio.chunks(480) {
        transport.send_outbound_audio(delta, BACKEND_RATE).unwrap();
    }

    let mut packets = Vec::new();
    while let Ok(packet) = outbound.try_recv() {
        packets.push(packet);
    }
    assert!((packets.len() as i64 - FRAMES as i64).abs() <= 1);

    // Every packet is well-formed PCMU with a full frame.
    let mut prev_seq: Option<u16> = None;
    for bytes in &packets {
        assert_eq!(bytes[0], 0x80);
        let packet = rtp::parse(bytes).unwrap();
        assert_eq!(packet.payload_type, PT_PCMU);
        assert_eq!(packet.payload.len(), SAMPLES_PER_FRAME as usize);
        if let Some(prev) = prev_seq {
            assert_eq!(packet.sequence_number, prev.wrapping_add(1));
        }
        prev_seq = Some(packet.sequence_number);
    }
}

#[test]
fn round_tripped_audio_stays_close() {
    let source = tone_8k(10);

    let decoded = audio::decode_mulaw(&audio::encode_mulaw(&source));
    let up = audio::resample(&decoded, TELEPHONY_RATE, BACKEND_RATE);
    let down = audio::resample(&up, BACKEND_RATE, TELEPHONY_RATE);
    let wire = audio::decode_mulaw(&audio::encode_mulaw(&down));

    assert_eq!(wire.len(), source.len());

    // Companding plus two linear resamples stay within a few percent of
    // full scale on a 440 Hz tone.
    let tolerance = (0.06 * 32768.0) as i32;
    for (a, b) in source.iter().zip(wire.iter()) {
        assert!(((*a as i32) - (*b as i32)).abs() < tolerance);
    }
}

#[test]
fn media_envelope_and_packet_paths_agree() {
    use base64::Engine as _;

    let samples = vec![1234i16; SAMPLES_PER_FRAME as usize];
    let payload = audio::encode_mulaw(&samples);

    let (transport, _outbound) = PacketizedTransport::new(G711Encoding::Mulaw);
    let frames = Arc::new(Mutex::new(Vec::<Vec<i16>>::new()));
    let sink = frames.clone();
    transport.on_inbound_audio(Arc::new(move |pcm, _| {
        sink.lock().unwrap().push(pcm.to_vec());
    }));

    let mut framer = RtpFramer::new();
    transport.handle_packet(&framer.build(&payload, PT_PCMU, false));

    let b64 = base64::engine::general_purpose::STANDARD.encode(&payload);
    transport.handle_message(&format!(r#"{{"event":"media","payload":"{b64}"}}"#));

    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], frames[1]);
}
