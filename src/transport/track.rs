//! Media-track transport: the WebRTC stack lives behind two trait seams
//! and hands this crate already-decoded PCM.

use std::sync::{Arc, Mutex};

use crate::audio::{self, TRACK_RATE};
use crate::error::BridgeError;

use super::{InboundAudioCallback, SignalCallback, Transport, TransportSignal};

/// Inbound seam: the track binding pushes decoded PCM batches here.
pub trait MediaTrackSink: Send + Sync {
    fn on_samples(&self, pcm: &[i16], rate_hz: u32);
    fn on_closed(&self);
}

/// Outbound seam: a synthetic local track the bridge writes PCM into.
pub trait MediaTrackSource: Send + Sync {
    fn write_samples(&self, pcm: &[i16]) -> Result<(), BridgeError>;

    fn rate_hz(&self) -> u32 {
        TRACK_RATE
    }
}

/// Transport over a media-track pair.
pub struct TrackTransport {
    source: Arc<dyn MediaTrackSource>,
    inbound_audio: Mutex<Option<InboundAudioCallback>>,
    signal: Mutex<Option<SignalCallback>>,
}

impl TrackTransport {
    pub fn new(source: Arc<dyn MediaTrackSource>) -> Self {
        Self {
            source,
            inbound_audio: Mutex::new(None),
            signal: Mutex::new(None),
        }
    }
}

impl MediaTrackSink for TrackTransport {
    fn on_samples(&self, pcm: &[i16], rate_hz: u32) {
        let callback = self.inbound_audio.lock().ok().and_then(|g| g.clone());
        if let Some(callback) = callback {
            callback(pcm, rate_hz);
        }
    }

    fn on_closed(&self) {
        let callback = self.signal.lock().ok().and_then(|g| g.clone());
        if let Some(callback) = callback {
            callback(TransportSignal::Disconnected);
        }
    }
}

impl Transport for TrackTransport {
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
        let track_pcm = audio::resample(pcm, rate_hz, self.source.rate_hz());
        self.source.write_samples(&track_pcm)
    }

    fn preferred_rate(&self) -> u32 {
        self.source.rate_hz()
    }
}
