//! G.711 mu-law and A-law companding.
//!
//! Byte-to-sample mapping is 1:1 in both directions. All functions accept
//! any input, including empty slices, and never panic.

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;

const SEG_SHIFT: u32 = 4;
const QUANT_MASK: u8 = 0x0F;
const SIGN_BIT: u8 = 0x80;

/// Decode one mu-law byte to a PCM16 sample.
pub fn decode_mulaw_sample(byte: u8) -> i16 {
    let u = !byte;
    let exponent = ((u >> SEG_SHIFT) & 0x07) as i32;
    let mantissa = (u & QUANT_MASK) as i32;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if u & SIGN_BIT != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode one PCM16 sample to a mu-law byte.
pub fn encode_mulaw_sample(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        SIGN_BIT
    } else {
        0
    };
    if pcm > MULAW_CLIP {
        pcm = MULAW_CLIP;
    }
    pcm += MULAW_BIAS;

    let exponent = segment_for(pcm, 0xFF);
    let mantissa = ((pcm >> (exponent + 3)) & QUANT_MASK as i32) as u8;
    !(sign | ((exponent as u8) << SEG_SHIFT) | mantissa)
}

/// Decode one A-law byte to a PCM16 sample.
pub fn decode_alaw_sample(byte: u8) -> i16 {
    let a = byte ^ 0x55;
    let exponent = ((a >> SEG_SHIFT) & 0x07) as i32;
    let mantissa = (a & QUANT_MASK) as i32;

    let magnitude = match exponent {
        0 => (mantissa << 4) + 8,
        _ => ((mantissa << 4) + 0x108) << (exponent - 1),
    };

    // Sign bit set means positive in A-law.
    if a & SIGN_BIT != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

/// Encode one PCM16 sample to an A-law byte.
pub fn encode_alaw_sample(sample: i16) -> u8 {
    // A-law quantizes in a 13-bit domain.
    let mut pcm = (sample as i32) >> 3;
    let mask = if pcm >= 0 {
        0xD5
    } else {
        pcm = -pcm - 1;
        0x55
    };

    let exponent = segment_for(pcm, 0x1F);
    let mantissa = if exponent < 2 {
        (pcm >> 1) & QUANT_MASK as i32
    } else {
        (pcm >> exponent) & QUANT_MASK as i32
    };
    let aval = ((exponent as u8) << SEG_SHIFT) | mantissa as u8;
    aval ^ mask
}

/// Segment index for a magnitude, given the end of the second segment.
fn segment_for(pcm: i32, seg1_end: i32) -> i32 {
    let mut seg = 0;
    let mut end = seg1_end;
    while seg < 7 && pcm > end {
        seg += 1;
        end = (end << 1) | 1;
    }
    seg
}

/// Decode a mu-law byte stream to PCM16.
pub fn decode_mulaw(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decode_mulaw_sample(b)).collect()
}

/// Encode PCM16 samples as mu-law bytes.
pub fn encode_mulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_mulaw_sample(s)).collect()
}

/// Decode an A-law byte stream to PCM16.
pub fn decode_alaw(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decode_alaw_sample(b)).collect()
}

/// Encode PCM16 samples as A-law bytes.
pub fn encode_alaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_alaw_sample(s)).collect()
}
