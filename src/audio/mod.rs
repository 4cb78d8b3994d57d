pub mod codec;
pub mod resample;

pub use codec::{decode_alaw, decode_mulaw, encode_alaw, encode_mulaw};
pub use resample::resample;

/// Telephony leg rate (G.711).
pub const TELEPHONY_RATE: u32 = 8_000;
/// Canonical internal rate for the speech backend leg.
pub const BACKEND_RATE: u32 = 24_000;
/// Media-track leg rate (WebRTC-style).
pub const TRACK_RATE: u32 = 48_000;

pub const FRAME_DURATION_MS: u32 = 20;
/// Samples per 20 ms frame at 8 kHz.
pub const SAMPLES_PER_FRAME: u32 = TELEPHONY_RATE / 1000 * FRAME_DURATION_MS;

/// A batch of mono PCM16 samples at a known rate.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub rate_hz: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, rate_hz: u32) -> Self {
        Self { samples, rate_hz }
    }

    /// Duration represented by this frame in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 * 1000.0 / self.rate_hz as f64
    }

    /// Same audio at a different rate.
    pub fn at_rate(&self, to_hz: u32) -> AudioFrame {
        AudioFrame::new(resample(&self.samples, self.rate_hz, to_hz), to_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration() {
        let frame = AudioFrame::new(vec![0; 160], TELEPHONY_RATE);
        assert_eq!(frame.duration_ms(), 20.0);
    }

    #[test]
    fn frame_rate_conversion() {
        let frame = AudioFrame::new(vec![100; 160], TELEPHONY_RATE);
        let up = frame.at_rate(BACKEND_RATE);
        assert_eq!(up.rate_hz, BACKEND_RATE);
        assert_eq!(up.samples.len(), 480);
    }
}
