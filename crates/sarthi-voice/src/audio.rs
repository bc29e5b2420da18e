//! Audio devices using CPAL and Rodio
//!
//! Capture goes straight through a CPAL input stream. Playback goes through a
//! single rodio output stream that plays an endless [`TimelineMixer`]; the
//! mixer's rendered frame count is the output clock the scheduler reads.

use crate::capture::{CaptureErrorCallback, InputDevice, SampleCallback};
use crate::error::{CaptureError, VoiceError, VoiceResult};
use crate::playback::{duration_to_frames, frames_to_duration, OutputDevice, SourceId};
use crate::resample::InputResampler;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfig, SupportedStreamConfigRange,
};
use rodio::{OutputStream, OutputStreamHandle, Source};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

/// Frames rendered per mixer lock (20 ms at 24 kHz).
const MIX_BLOCK: usize = 480;

/// Opens the two devices a session needs.
pub trait AudioBackend {
    /// Open the microphone. Permission problems surface here.
    fn open_input(&mut self, sample_rate: u32) -> Result<Box<dyn InputDevice>, CaptureError>;

    /// Open the speaker with its own output clock.
    fn open_output(&mut self, sample_rate: u32) -> VoiceResult<Box<dyn OutputDevice>>;
}

/// Default host devices: CPAL microphone, rodio speaker.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceBackend;

impl AudioBackend for DeviceBackend {
    fn open_input(&mut self, sample_rate: u32) -> Result<Box<dyn InputDevice>, CaptureError> {
        Ok(Box::new(CpalMicrophone::open(sample_rate)?))
    }

    fn open_output(&mut self, sample_rate: u32) -> VoiceResult<Box<dyn OutputDevice>> {
        Ok(Box::new(RodioOutput::open(sample_rate)?))
    }
}

/// Default microphone via CPAL.
///
/// The device is opened in a format it actually supports; callbacks are
/// downmixed and resampled to the requested rate before they reach capture.
pub struct CpalMicrophone {
    device: Device,
    stream_config: StreamConfig,
    sample_format: SampleFormat,
    target_rate: u32,
    stream: Option<Stream>,
}

impl CpalMicrophone {
    pub fn open(sample_rate: u32) -> Result<Self, CaptureError> {
        info!("🎤 Initializing audio capture ({}Hz, mono)", sample_rate);

        let device = cpal::default_host()
            .default_input_device()
            .ok_or(CaptureError::NoDevice)?;

        info!(
            "📱 Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        // Querying configs is where a denied permission shows up.
        let supported = match device.supported_input_configs() {
            Ok(ranges) => pick_input_config(ranges, sample_rate),
            Err(e) => {
                warn!("Could not list input configs: {}. Using the default.", e);
                None
            }
        };
        let supported = match supported {
            Some(config) => config,
            None => device.default_input_config()?,
        };

        let sample_format = supported.sample_format();
        let stream_config = supported.config();
        info!(
            "🎛️ Input stream: {} Hz, {} ch, {:?}",
            stream_config.sample_rate.0, stream_config.channels, sample_format
        );

        Ok(Self {
            device,
            stream_config,
            sample_format,
            target_rate: sample_rate,
            stream: None,
        })
    }

    /// List available input devices
    pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }
}

/// Choose the input format closest to `target_rate` mono.
///
/// Rate distance decides first, then mono over multichannel, then f32 over
/// i16. Formats capture cannot convert are skipped.
pub fn pick_input_config(
    ranges: impl IntoIterator<Item = SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfig> {
    ranges
        .into_iter()
        .filter(|range| matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .map(|range| {
            let rate = target_rate.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
            let key = (
                rate.abs_diff(target_rate),
                range.channels() != 1,
                range.channels(),
                range.sample_format() != SampleFormat::F32,
            );
            (key, range.with_sample_rate(cpal::SampleRate(rate)))
        })
        .min_by_key(|(key, _)| *key)
        .map(|(_, config)| config)
}

impl InputDevice for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.target_rate
    }

    fn start(
        &mut self,
        mut on_samples: SampleCallback,
        mut on_error: CaptureErrorCallback,
    ) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut converter = InputResampler::new(
            self.stream_config.channels,
            self.stream_config.sample_rate.0,
            self.target_rate,
        )?;
        let error_callback = move |err: cpal::StreamError| on_error(err.into());

        let stream = match self.sample_format {
            SampleFormat::I16 => {
                let mut scratch = Vec::new();
                self.device.build_input_stream(
                    &self.stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        scratch.clear();
                        scratch.extend(data.iter().map(|&s| s as f32 / 32768.0));
                        converter.push(&scratch, |mono| on_samples(mono));
                    },
                    error_callback,
                    None,
                )?
            }
            SampleFormat::F32 => self.device.build_input_stream(
                &self.stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    converter.push(data, |mono| on_samples(mono));
                },
                error_callback,
                None,
            )?,
            other => {
                return Err(CaptureError::Stream(format!(
                    "unsupported input sample format {:?}",
                    other
                )))
            }
        };

        stream.play()?;
        self.stream = Some(stream);
        info!("✅ Audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Pausing input stream failed: {}", e);
            }
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Shared state between the scheduler side and the audio thread.
#[derive(Default)]
struct Timeline {
    /// Frames rendered so far; the output clock.
    frame: u64,
    next_id: u64,
    voices: Vec<Voice>,
}

impl Timeline {
    /// Add a voice at `start_frame`, or at the render position if that has
    /// already passed. Returns the frame it will actually start on.
    fn place(&mut self, samples: Arc<[f32]>, start_frame: u64) -> (SourceId, u64) {
        self.next_id += 1;
        let id = SourceId(self.next_id);
        let start_frame = start_frame.max(self.frame);
        self.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
        (id, start_frame)
    }

    fn render(&mut self, block: &mut [f32]) {
        block.fill(0.0);
        let block_start = self.frame;
        let block_end = block_start + block.len() as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for frame in from..to {
                let out = (frame - block_start) as usize;
                let src = (frame - voice.start_frame) as usize;
                block[out] += voice.samples[src];
            }
        }
        for sample in block.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.frame = block_end;
        self.voices.retain(|voice| voice.end_frame() > block_end);
    }
}

fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Endless mono source that mixes whatever is on the timeline (silence otherwise).
pub struct TimelineMixer {
    timeline: Arc<Mutex<Timeline>>,
    sample_rate: u32,
    block: Vec<f32>,
    pos: usize,
}

impl Iterator for TimelineMixer {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos == self.block.len() {
            lock(&self.timeline).render(&mut self.block);
            self.pos = 0;
        }
        let sample = self.block[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl Source for TimelineMixer {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Default speaker via rodio, clocked by the mixer.
pub struct RodioOutput {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    timeline: Arc<Mutex<Timeline>>,
    sample_rate: u32,
}

impl RodioOutput {
    pub fn open(sample_rate: u32) -> VoiceResult<Self> {
        info!("🔊 Initializing audio playback ({}Hz)", sample_rate);

        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;

        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let mixer = TimelineMixer {
            timeline: Arc::clone(&timeline),
            sample_rate,
            block: vec![0.0; MIX_BLOCK],
            pos: MIX_BLOCK,
        };
        stream_handle
            .play_raw(mixer)
            .map_err(|e| VoiceError::Playback(e.to_string()))?;

        info!("✅ Audio playback initialized");

        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            timeline,
            sample_rate,
        })
    }
}

impl OutputDevice for RodioOutput {
    fn now(&self) -> Duration {
        frames_to_duration(lock(&self.timeline).frame, self.sample_rate)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_at(
        &mut self,
        samples: Arc<[f32]>,
        start: Duration,
    ) -> VoiceResult<(SourceId, Duration)> {
        let requested = duration_to_frames(start, self.sample_rate);
        let (id, start_frame) = lock(&self.timeline).place(samples, requested);
        Ok((id, frames_to_duration(start_frame, self.sample_rate)))
    }

    fn stop(&mut self, id: SourceId) {
        lock(&self.timeline).voices.retain(|voice| voice.id != id);
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        lock(&self.timeline).voices.clear();
        info!("⏹️ Audio playback released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: u64, start_frame: u64, samples: Vec<f32>) -> Voice {
        Voice {
            id: SourceId(id),
            start_frame,
            samples: samples.into(),
        }
    }

    #[test]
    fn timeline_plays_voices_at_their_start_frame() {
        let mut timeline = Timeline::default();
        timeline.voices.push(voice(1, 2, vec![0.5; 3]));
        timeline.voices.push(voice(2, 5, vec![0.25; 2]));

        let mut block = vec![9.0; 4];
        timeline.render(&mut block);
        assert_eq!(block, vec![0.0, 0.0, 0.5, 0.5]);
        assert_eq!(timeline.frame, 4);

        timeline.render(&mut block);
        assert_eq!(block, vec![0.5, 0.25, 0.25, 0.0]);
        assert!(timeline.voices.is_empty());
    }

    #[test]
    fn placement_behind_the_render_position_is_pushed_forward() {
        let mut timeline = Timeline::default();
        let mut block = vec![0.0; 480];
        timeline.render(&mut block);

        // The caller read the clock at frame 0; a block went out since.
        let (first, at) = timeline.place(vec![0.1; 2400].into(), 0);
        assert_eq!(at, 480);
        let (second, at2) = timeline.place(vec![0.1; 2400].into(), at + 2400);
        assert_eq!(at2, 2880);
        assert_ne!(first, second);
    }

    #[test]
    fn mixer_is_silent_when_idle() {
        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let mut mixer = TimelineMixer {
            timeline: Arc::clone(&timeline),
            sample_rate: 24_000,
            block: vec![0.0; 8],
            pos: 8,
        };
        let rendered: Vec<f32> = mixer.by_ref().take(16).collect();
        assert!(rendered.iter().all(|&s| s == 0.0));
        assert_eq!(lock(&timeline).frame, 16);
    }

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            cpal::SampleRate(min),
            cpal::SampleRate(max),
            cpal::SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_input_config_prefers_native_16k_mono() {
        let picked = pick_input_config(
            vec![
                range(2, 48_000, 48_000, SampleFormat::F32),
                range(1, 8_000, 48_000, SampleFormat::I16),
            ],
            16_000,
        )
        .unwrap();
        assert_eq!(picked.sample_rate().0, 16_000);
        assert_eq!(picked.channels(), 1);
    }

    #[test]
    fn test_input_config_falls_back_to_nearest_hardware_rate() {
        let picked = pick_input_config(
            vec![
                range(2, 48_000, 48_000, SampleFormat::F32),
                range(2, 44_100, 44_100, SampleFormat::I16),
                range(1, 44_100, 44_100, SampleFormat::U8),
            ],
            16_000,
        )
        .unwrap();
        assert_eq!(picked.sample_rate().0, 44_100);
        assert_eq!(picked.channels(), 2);
        assert_eq!(picked.sample_format(), SampleFormat::I16);

        assert!(pick_input_config(vec![range(1, 16_000, 16_000, SampleFormat::U8)], 16_000).is_none());
    }

    #[test]
    fn test_list_devices() {
        // This might fail in CI environments without audio devices
        if let Ok(devices) = CpalMicrophone::list_input_devices() {
            println!("Available input devices: {:?}", devices);
        }
    }
}
