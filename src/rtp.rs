//! RTP packet parsing and framing.
//!
//! Covers the 12-byte fixed header plus CSRC list, extension header, and
//! self-described padding. Malformed input parses to `None`, never a panic.

use byteorder::{BigEndian, ByteOrder};

use crate::audio::SAMPLES_PER_FRAME;

pub const RTP_HEADER_LEN: usize = 12;
pub const RTP_VERSION: u8 = 2;

/// Payload types this bridge can decode.
pub const PT_PCMU: u8 = 0;
pub const PT_PCMA: u8 = 8;

/// A parsed RTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

/// Human-readable codec name for a payload type.
pub fn codec_name_for_payload_type(pt: u8) -> String {
    match pt {
        0 => "PCMU".to_string(),
        8 => "PCMA".to_string(),
        9 => "G722".to_string(),
        96..=100 => "dynamic/Opus".to_string(),
        101 => "telephone-event".to_string(),
        other => format!("Unknown({other})"),
    }
}

/// Parse an RTP datagram. Returns `None` for anything structurally invalid.
pub fn parse(data: &[u8]) -> Option<RtpPacket> {
    if data.len() < RTP_HEADER_LEN {
        return None;
    }

    let b0 = data[0];
    let b1 = data[1];
    let version = b0 >> 6;
    let padding = b0 & 0x20 != 0;
    let extension = b0 & 0x10 != 0;
    let csrc_count = (b0 & 0x0F) as usize;
    let marker = b1 & 0x80 != 0;
    let payload_type = b1 & 0x7F;

    let sequence_number = BigEndian::read_u16(&data[2..4]);
    let timestamp = BigEndian::read_u32(&data[4..8]);
    let ssrc = BigEndian::read_u32(&data[8..12]);

    let mut offset = RTP_HEADER_LEN + csrc_count * 4;
    if offset > data.len() {
        return None;
    }

    if extension {
        if offset + 4 > data.len() {
            return None;
        }
        let ext_words = BigEndian::read_u16(&data[offset + 2..offset + 4]) as usize;
        offset += 4 + ext_words * 4;
        if offset > data.len() {
            return None;
        }
    }

    let mut end = data.len();
    if padding {
        let pad_len = data[end - 1] as usize;
        if pad_len == 0 || pad_len > end - offset {
            return None;
        }
        end -= pad_len;
    }

    Some(RtpPacket {
        version,
        padding,
        extension,
        marker,
        payload_type,
        sequence_number,
        timestamp,
        ssrc,
        payload: data[offset..end].to_vec(),
    })
}

/// Builds outbound RTP packets with a per-session SSRC and wrapping
/// sequence/timestamp counters.
#[derive(Debug)]
pub struct RtpFramer {
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    samples_per_frame: u32,
}

impl RtpFramer {
    pub fn new() -> Self {
        Self::with_samples_per_frame(SAMPLES_PER_FRAME)
    }

    pub fn with_samples_per_frame(samples_per_frame: u32) -> Self {
        Self {
            sequence: rand::random(),
            timestamp: rand::random(),
            ssrc: rand::random(),
            samples_per_frame,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Build one packet around `payload` and advance the counters.
    pub fn build(&mut self, payload: &[u8], payload_type: u8, marker: bool) -> Vec<u8> {
        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
        packet.push(RTP_VERSION << 6);
        packet.push((marker as u8) << 7 | (payload_type & 0x7F));

        let mut header = [0u8; 10];
        BigEndian::write_u16(&mut header[0..2], self.sequence);
        BigEndian::write_u32(&mut header[2..6], self.timestamp);
        BigEndian::write_u32(&mut header[6..10], self.ssrc);
        packet.extend_from_slice(&header);
        packet.extend_from_slice(payload);

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.samples_per_frame);
        packet
    }

    /// Reinitialize counters and SSRC, as for a new media stream.
    pub fn reset(&mut self) {
        self.sequence = rand::random();
        self.timestamp = rand::random();
        self.ssrc = rand::random();
    }
}

impl Default for RtpFramer {
    fn default() -> Self {
        Self::new()
    }
}
