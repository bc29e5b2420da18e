//! Gapless playback of streamed speech chunks.
//!
//! Every inbound chunk is decoded and placed on the output clock at
//! `max(cursor, now)`, then the cursor moves to the end of that chunk. The
//! cursor never decreases while playing, so chunks play strictly in arrival
//! order and never overlap. A barge-in calls [`PlaybackScheduler::reset`],
//! which silences everything still queued and pulls the cursor back to "now".

use crate::codec::{self, EncodedFrame};
use crate::error::{VoiceError, VoiceResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cancel handle for one buffer handed to an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// An output device with its own sample clock.
///
/// Implemented by [`crate::audio::RodioOutput`] for real playback and by
/// in-memory fakes in tests.
pub trait OutputDevice {
    /// Current position of the output clock.
    fn now(&self) -> Duration;

    /// Fixed rate the device plays buffers at.
    fn sample_rate(&self) -> u32;

    /// Queue `samples` to begin at `start` on the output clock.
    ///
    /// Returns the start actually used. It is never earlier than `start`, and
    /// later when the clock has already moved past it.
    fn start_at(
        &mut self,
        samples: Arc<[f32]>,
        start: Duration,
    ) -> VoiceResult<(SourceId, Duration)>;

    /// Silence a source immediately, however much of it has played.
    fn stop(&mut self, id: SourceId);
}

/// Decoded mono samples ready for the output device.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(self.samples.len() as u64, self.sample_rate)
    }
}

/// Exact conversion from a frame count to clock time.
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

/// Clock time to the first frame at or after it.
pub fn duration_to_frames(at: Duration, sample_rate: u32) -> u64 {
    let scaled = at.as_nanos() * sample_rate as u128;
    scaled.div_ceil(1_000_000_000) as u64
}

/// One in-flight chunk: where it sits on the output clock and how to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledSource {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Owns the output device, the scheduling cursor and the set of active sources.
pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    cursor: Duration,
    active: Vec<ScheduledSource>,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        let cursor = device.now();
        info!(
            "🔊 Playback scheduler ready ({} Hz output clock)",
            device.sample_rate()
        );
        Self {
            device,
            cursor,
            active: Vec::new(),
        }
    }

    /// Decode and schedule one inbound chunk right after the previous one.
    ///
    /// A chunk that fails to decode is rejected with the cursor untouched.
    pub fn on_chunk(&mut self, frame: &EncodedFrame) -> VoiceResult<ScheduledSource> {
        let samples = codec::decode(frame)?;
        if let Some(rate) = frame.sample_rate() {
            if rate != self.device.sample_rate() {
                warn!(
                    frame_rate = rate,
                    output_rate = self.device.sample_rate(),
                    "chunk tagged with a different rate; playing at the output rate"
                );
            }
        }
        self.schedule(PlaybackBuffer::new(samples, self.device.sample_rate()))
    }

    /// Schedule already-decoded samples.
    pub fn schedule(&mut self, buffer: PlaybackBuffer) -> VoiceResult<ScheduledSource> {
        let now = self.device.now();
        self.prune(now);

        let requested = self.cursor.max(now);
        let duration = buffer.duration();
        // The device may have rendered past `requested` since `now` was read.
        let (id, start) = self.device.start_at(buffer.samples, requested)?;
        let start = start.max(requested);
        self.cursor = start + duration;

        let source = ScheduledSource { id, start, duration };
        self.active.push(source);
        debug!(
            start_ms = start.as_millis() as u64,
            duration_ms = duration.as_millis() as u64,
            active = self.active.len(),
            "scheduled chunk"
        );
        Ok(source)
    }

    /// Stop every pending source and restart the timeline at "now".
    pub fn reset(&mut self) {
        let stopped = self.active.len();
        for source in self.active.drain(..) {
            self.device.stop(source.id);
        }
        self.cursor = self.device.now();
        info!(stopped, "⏹️ Playback reset");
    }

    /// Earliest time the next chunk may start.
    pub fn cursor(&self) -> Duration {
        self.cursor
    }

    pub fn now(&self) -> Duration {
        self.device.now()
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.device.sample_rate()
    }

    /// Sources that have not finished playing yet.
    pub fn active_sources(&mut self) -> &[ScheduledSource] {
        let now = self.device.now();
        self.prune(now);
        &self.active
    }

    pub fn active_count(&mut self) -> usize {
        self.active_sources().len()
    }

    /// Buffered playback still ahead of the output clock.
    pub fn queued(&self) -> Duration {
        self.cursor.saturating_sub(self.device.now())
    }

    pub fn is_playing(&mut self) -> bool {
        self.active_count() > 0
    }

    fn prune(&mut self, now: Duration) {
        self.active.retain(|source| source.end() > now);
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        for source in self.active.drain(..) {
            self.device.stop(source.id);
        }
    }
}
