//! PCM16 wire codec.
//!
//! Converts between normalized `f32` samples and the base64 little-endian
//! PCM16 text that crosses the duplex channel. Shared by the live session and
//! the one-shot TTS path; has no knowledge of audio devices.

use crate::error::DecodeError;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

/// Microphone capture rate (what the service expects from us).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Synthesized speech rate (what the service sends back).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const PCM16_SCALE: f32 = 32768.0;

/// Which way a frame travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Microphone to service, 16 kHz.
    Inbound,
    /// Service to speaker, 24 kHz.
    Outbound,
}

impl Direction {
    pub fn sample_rate(self) -> u32 {
        match self {
            Direction::Inbound => INPUT_SAMPLE_RATE,
            Direction::Outbound => OUTPUT_SAMPLE_RATE,
        }
    }
}

/// Mono PCM samples normalized to -1.0..1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub direction: Direction,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, direction: Direction) -> Self {
        Self { samples, direction }
    }

    pub fn sample_rate(&self) -> u32 {
        self.direction.sample_rate()
    }

    pub fn encode(&self) -> EncodedFrame {
        encode(&self.samples, self.sample_rate())
    }
}

/// Base64 PCM16 plus its format tag. The only thing that crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedFrame {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

impl EncodedFrame {
    pub fn new(sample_rate: u32, data: impl Into<String>) -> Self {
        Self {
            mime_type: pcm_mime_type(sample_rate),
            data: data.into(),
        }
    }

    /// Rate parsed from the `rate=` parameter of the mime type.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }
}

/// `audio/pcm;rate=16000` style mime type.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Scale, truncate to i16, pack little-endian and base64 encode.
///
/// Samples at or beyond ±1.0 saturate to the i16 range.
pub fn encode(samples: &[f32], sample_rate: u32) -> EncodedFrame {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * PCM16_SCALE) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    EncodedFrame::new(sample_rate, general_purpose::STANDARD.encode(bytes))
}

/// Decode a tagged frame back to normalized samples.
pub fn decode(frame: &EncodedFrame) -> Result<Vec<f32>, DecodeError> {
    decode_base64(&frame.data)
}

/// Decode raw base64 PCM16 (inbound chunks carry no tag).
pub fn decode_base64(data: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    pcm16_to_f32(&bytes)
}

/// Reinterpret little-endian PCM16 bytes as normalized samples.
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect())
}
