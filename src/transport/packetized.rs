//! Packetized transport: RTP datagrams in, RTP datagrams out, with a JSON
//! signaling envelope on the side.

use std::sync::Mutex;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audio::{self, SAMPLES_PER_FRAME, TELEPHONY_RATE};
use crate::error::BridgeError;
use crate::rtp::{self, PT_PCMA, PT_PCMU, RtpFramer};

use super::{InboundAudioCallback, SignalCallback, TelephonyEvent, Transport, TransportSignal};

/// Wire encoding negotiated for the telephony leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Encoding {
    Mulaw,
    Alaw,
}

impl G711Encoding {
    pub fn payload_type(self) -> u8 {
        match self {
            G711Encoding::Mulaw => PT_PCMU,
            G711Encoding::Alaw => PT_PCMA,
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Vec<i16> {
        match self {
            G711Encoding::Mulaw => audio::decode_mulaw(bytes),
            G711Encoding::Alaw => audio::decode_alaw(bytes),
        }
    }

    pub fn encode(self, samples: &[i16]) -> Vec<u8> {
        match self {
            G711Encoding::Mulaw => audio::encode_mulaw(samples),
            G711Encoding::Alaw => audio::encode_alaw(samples),
        }
    }
}

/// Transport over RTP bytes. The network layer feeds `handle_packet` /
/// `handle_message` and drains the outbound receiver.
pub struct PacketizedTransport {
    encoding: G711Encoding,
    framer: Mutex<RtpFramer>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound_audio: Mutex<Option<InboundAudioCallback>>,
    signal: Mutex<Option<SignalCallback>>,
}

impl PacketizedTransport {
    /// Returns the transport and the receiver the network layer drains for
    /// outbound RTP datagrams.
    pub fn new(encoding: G711Encoding) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            encoding,
            framer: Mutex::new(RtpFramer::new()),
            outbound: tx,
            inbound_audio: Mutex::new(None),
            signal: Mutex::new(None),
        };
        (transport, rx)
    }

    /// Feed one inbound RTP datagram.
    pub fn handle_packet(&self, data: &[u8]) {
        let Some(packet) = rtp::parse(data) else {
            debug!(len = data.len(), "dropping malformed RTP packet");
            return;
        };

        let pcm = match packet.payload_type {
            PT_PCMU => audio::decode_mulaw(&packet.payload),
            PT_PCMA => audio::decode_alaw(&packet.payload),
            pt => {
                warn!(
                    payload_type = pt,
                    codec = %rtp::codec_name_for_payload_type(pt),
                    "dropping unsupported payload type"
                );
                return;
            }
        };
        self.deliver_inbound(&pcm);
    }

    /// Feed one inbound JSON signaling message.
    pub fn handle_message(&self, text: &str) {
        let event: TelephonyEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping unparseable signaling message");
                return;
            }
        };

        match event {
            TelephonyEvent::Media { payload, .. } => {
                let bytes = match BASE64.decode(&payload) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "dropping media payload with bad base64");
                        return;
                    }
                };
                let pcm = self.encoding.decode(&bytes);
                self.deliver_inbound(&pcm);
            }
            TelephonyEvent::Start {
                call_id,
                provider_call_id,
                ..
            } => self.emit(TransportSignal::Started {
                call_id,
                provider_call_id,
            }),
            TelephonyEvent::Mark { name, queue } => match queue.or(name) {
                Some(queue) => self.emit(TransportSignal::WarmTransfer { queue }),
                None => debug!("ignoring mark event with no target"),
            },
            TelephonyEvent::Stop { reason } => self.emit(TransportSignal::Stopped { reason }),
            TelephonyEvent::Transcription { text, is_final } => {
                self.emit(TransportSignal::Transcription { text, is_final })
            }
            TelephonyEvent::Ignored => debug!("ignoring unknown signaling event"),
        }
    }

    /// The peer hung up the byte stream.
    pub fn handle_disconnect(&self) {
        self.emit(TransportSignal::Disconnected);
    }

    fn deliver_inbound(&self, pcm: &[i16]) {
        let callback = self.inbound_audio.lock().ok().and_then(|g| g.clone());
        if let Some(callback) = callback {
            callback(pcm, TELEPHONY_RATE);
        }
    }

    fn emit(&self, signal: TransportSignal) {
        let callback = self.signal.lock().ok().and_then(|g| g.clone());
        if let Some(callback) = callback {
            callback(signal);
        }
    }
}

impl Transport for PacketizedTransport {
    fn on_inbound_audio(&self, callback: InboundAudioCallback) {
        if let Ok(mut slot) = self.inbound_audio.lock() {
            *slot = Some(callback);
        }
    }

    fn on_signal(&self, callback: SignalCallback) {
        if let Ok(mut slot) = self.signal.lock() {
            *slot = Some(callback);
        }
    }

    fn send_outbound_audio(&self, pcm: &[i16], rate_hz: u32) -> Result<(), BridgeError> {
        let pcm8k = audio::resample(pcm, rate_hz, TELEPHONY_RATE);
        let mut framer = self
            .framer
            .lock()
            .map_err(|_| BridgeError::Transport("framer lock poisoned".to_string()))?;

        for chunk in pcm8k.chunks(SAMPLES_PER_FRAME as usize) {
            let encoded = self.encoding.encode(chunk);
            let packet = framer.build(&encoded, self.encoding.payload_type(), false);
            self.outbound.send(packet).map_err(|_| BridgeError::Closed)?;
        }
        Ok(())
    }

    fn preferred_rate(&self) -> u32 {
        TELEPHONY_RATE
    }
}
