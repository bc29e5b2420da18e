//! Microphone format conversion using rubato
//!
//! Input hardware rarely offers 16 kHz mono. The device is opened at whatever
//! it supports; every callback is downmixed to mono here and streamed
//! through a fixed-input rubato resampler to the session's input rate.

use crate::error::CaptureError;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::{debug, warn};

/// Streaming converter from interleaved device samples to mono at `to_rate`.
pub struct InputResampler {
    channels: usize,
    from_rate: u32,
    to_rate: u32,
    mono: Vec<f32>,
    /// Mono samples waiting for a full resampler chunk.
    pending: Vec<f32>,
    resampler: Option<FastFixedIn<f32>>,
    chunk: usize,
}

impl InputResampler {
    pub fn new(channels: u16, from_rate: u32, to_rate: u32) -> Result<Self, CaptureError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(CaptureError::Stream(format!(
                "invalid resample {} Hz -> {} Hz",
                from_rate, to_rate
            )));
        }

        // 10 ms of device audio per resampler call.
        let chunk = (from_rate as usize / 100).max(1);
        let resampler = if from_rate == to_rate {
            None
        } else {
            debug!("Resampling microphone from {}Hz to {}Hz", from_rate, to_rate);
            let resampler = FastFixedIn::<f32>::new(
                to_rate as f64 / from_rate as f64,
                1.0,
                PolynomialDegree::Cubic,
                chunk,
                1,
            )
            .map_err(|e| CaptureError::Stream(format!("Failed to create resampler: {}", e)))?;
            Some(resampler)
        };

        Ok(Self {
            channels: channels.max(1) as usize,
            from_rate,
            to_rate,
            mono: Vec::new(),
            pending: Vec::with_capacity(chunk * 2),
            resampler,
            chunk,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Convert one device callback; `emit` receives mono samples at `to_rate`.
    pub fn push(&mut self, interleaved: &[f32], mut emit: impl FnMut(&[f32])) {
        downmix(interleaved, self.channels, &mut self.mono);

        let Some(resampler) = self.resampler.as_mut() else {
            if !self.mono.is_empty() {
                emit(&self.mono);
            }
            return;
        };

        self.pending.extend_from_slice(&self.mono);
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.chunk {
            let input = [&self.pending[consumed..consumed + self.chunk]];
            match resampler.process(&input[..], None) {
                Ok(output) => {
                    if let Some(channel) = output.first() {
                        emit(channel);
                    }
                }
                Err(e) => warn!("Resampling dropped {} samples: {}", self.chunk, e),
            }
            consumed += self.chunk;
        }
        self.pending.drain(..consumed);
    }
}

/// Average interleaved frames into `out` (cleared first). A partial trailing
/// frame is ignored.
pub fn downmix(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_averages_channels() {
        let mut out = Vec::new();
        downmix(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0, 0.3], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);

        downmix(&[0.1, 0.2], 1, &mut out);
        assert_eq!(out, vec![0.1, 0.2]);
    }

    #[test]
    fn test_same_rate_mono_passes_through() {
        let mut resampler = InputResampler::new(1, 16_000, 16_000).unwrap();
        let mut got = Vec::new();
        resampler.push(&[0.1, 0.2, 0.3], |s| got.extend_from_slice(s));
        assert_eq!(got, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_48k_stereo_becomes_16k_mono() {
        let mut resampler = InputResampler::new(2, 48_000, 16_000).unwrap();
        let mut total = 0;
        // One second of stereo audio in odd-sized callbacks.
        let second = vec![0.25_f32; 48_000 * 2];
        for block in second.chunks(1_234) {
            resampler.push(block, |s| total += s.len());
        }
        assert!((15_000..=16_500).contains(&total), "got {} samples", total);
    }

    #[test]
    fn test_rejects_zero_rate() {
        assert!(matches!(
            InputResampler::new(1, 0, 16_000),
            Err(CaptureError::Stream(_))
        ));
    }
}
