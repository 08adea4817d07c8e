//! Conversions between float samples, 16-bit PCM and the base64 text that
//! travels inside JSON messages.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::error::{LifelineError, Result};

/// A decoded block of interleaved samples ready to be scheduled on an output sink.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PlayableBuffer {
    /// Number of sample frames (one sample per channel).
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Playback length in seconds.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

/// Clamp float samples to [-1, 1] and scale them to signed 16-bit.
#[must_use]
pub fn encode(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            (clamped * f32::from(i16::MAX)) as i16
        })
        .collect()
}

/// Base64 of the little-endian byte representation of `samples`.
#[must_use]
pub fn to_wire_bytes(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    encode_bytes(&bytes)
}

/// Base64 of arbitrary raw bytes.
#[must_use]
pub fn encode_bytes(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Inverse of [`encode_bytes`] / [`to_wire_bytes`].
pub fn from_wire_bytes(text: &str) -> Result<Vec<u8>> {
    B64.decode(text)
        .map_err(|e| LifelineError::Decode(format!("invalid base64 audio payload: {e}")))
}

/// Interpret little-endian 16-bit PCM as a playable buffer.
pub fn decode(raw: &[u8], sample_rate: u32, channels: u16) -> Result<PlayableBuffer> {
    if channels == 0 || sample_rate == 0 {
        return Err(LifelineError::Decode(format!(
            "unsupported format: {sample_rate} Hz, {channels} channels"
        )));
    }

    if raw.is_empty() {
        return Err(LifelineError::Decode("empty audio chunk".to_string()));
    }

    let frame_bytes = 2 * usize::from(channels);
    if raw.len() % frame_bytes != 0 {
        return Err(LifelineError::Decode(format!(
            "{} bytes is not a whole number of {channels}-channel 16-bit frames",
            raw.len()
        )));
    }

    let samples = raw
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    Ok(PlayableBuffer {
        samples,
        sample_rate,
        channels,
    })
}
