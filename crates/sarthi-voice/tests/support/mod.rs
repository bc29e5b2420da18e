//! In-memory devices and channel for driving a session without hardware.

#![allow(dead_code)]

use sarthi_voice::capture::{CaptureErrorCallback, SampleCallback};
use sarthi_voice::{
    encode, AudioBackend, CaptureError, ChannelEvent, ChannelEventSender, DuplexChannel,
    EncodedFrame, FrameSender, InputDevice, OutputDevice, SourceId, SpeechSynthesizer,
    SynthesisError, VoiceError, VoiceResult, VoiceSession, OUTPUT_SAMPLE_RATE,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything the fakes observed, plus knobs to make them misbehave.
#[derive(Default)]
pub struct Rig {
    pub input_opens: usize,
    pub input_releases: usize,
    pub capture_starts: usize,
    pub capture_stops: usize,
    pub output_opens: usize,
    pub output_releases: usize,
    pub connects: usize,
    pub closes: usize,

    pub started: Vec<(SourceId, Duration, usize)>,
    pub stopped: Vec<SourceId>,
    pub now: Duration,
    /// Advance the output clock by this much on every read.
    pub auto_advance: Option<Duration>,
    /// Advance the output clock while a source is being placed.
    pub render_during_start: Option<Duration>,

    pub on_samples: Option<SampleCallback>,
    pub on_error: Option<CaptureErrorCallback>,
    pub events_tx: Option<ChannelEventSender>,
    pub frames_rx: Option<mpsc::UnboundedReceiver<EncodedFrame>>,

    pub fail_input: Option<CaptureError>,
    pub fail_output: bool,
    next_id: u64,
}

pub type Shared = Arc<Mutex<Rig>>;

pub fn rig() -> Shared {
    Arc::new(Mutex::new(Rig::default()))
}

pub struct FakeMic(Shared);

impl InputDevice for FakeMic {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn start(
        &mut self,
        on_samples: SampleCallback,
        on_error: CaptureErrorCallback,
    ) -> Result<(), CaptureError> {
        let mut p = self.0.lock().unwrap();
        p.capture_starts += 1;
        p.on_samples = Some(on_samples);
        p.on_error = Some(on_error);
        Ok(())
    }

    fn stop(&mut self) {
        let mut p = self.0.lock().unwrap();
        p.capture_stops += 1;
        p.on_samples = None;
        p.on_error = None;
    }
}

impl Drop for FakeMic {
    fn drop(&mut self) {
        self.0.lock().unwrap().input_releases += 1;
    }
}

pub struct FakeSpeaker(Shared);

impl OutputDevice for FakeSpeaker {
    fn now(&self) -> Duration {
        let mut p = self.0.lock().unwrap();
        if let Some(step) = p.auto_advance {
            p.now += step;
        }
        p.now
    }

    fn sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }

    fn start_at(
        &mut self,
        samples: Arc<[f32]>,
        start: Duration,
    ) -> VoiceResult<(SourceId, Duration)> {
        let mut p = self.0.lock().unwrap();
        p.next_id += 1;
        let id = SourceId(p.next_id);
        // The mixer never places a source behind what it has rendered.
        if let Some(step) = p.render_during_start {
            p.now += step;
        }
        let start = start.max(p.now);
        p.started.push((id, start, samples.len()));
        Ok((id, start))
    }

    fn stop(&mut self, id: SourceId) {
        self.0.lock().unwrap().stopped.push(id);
    }
}

impl Drop for FakeSpeaker {
    fn drop(&mut self) {
        self.0.lock().unwrap().output_releases += 1;
    }
}

pub struct FakeBackend(pub Shared);

impl AudioBackend for FakeBackend {
    fn open_input(&mut self, _sample_rate: u32) -> Result<Box<dyn InputDevice>, CaptureError> {
        let mut p = self.0.lock().unwrap();
        if let Some(err) = p.fail_input.clone() {
            return Err(err);
        }
        p.input_opens += 1;
        Ok(Box::new(FakeMic(Arc::clone(&self.0))))
    }

    fn open_output(&mut self, _sample_rate: u32) -> VoiceResult<Box<dyn OutputDevice>> {
        let mut p = self.0.lock().unwrap();
        if p.fail_output {
            return Err(VoiceError::Playback("no speaker".into()));
        }
        p.output_opens += 1;
        Ok(Box::new(FakeSpeaker(Arc::clone(&self.0))))
    }
}

pub struct FakeChannel {
    rig: Shared,
    frames: Option<mpsc::UnboundedSender<EncodedFrame>>,
}

impl FakeChannel {
    pub fn new(rig: Shared) -> Self {
        Self { rig, frames: None }
    }
}

impl DuplexChannel for FakeChannel {
    fn connect(&mut self, events: ChannelEventSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.frames = Some(tx);
        let mut p = self.rig.lock().unwrap();
        p.connects += 1;
        p.events_tx = Some(events);
        p.frames_rx = Some(rx);
    }

    fn frame_sender(&self) -> FrameSender {
        let tx = self
            .frames
            .clone()
            .unwrap_or_else(|| mpsc::unbounded_channel().0);
        FrameSender::new(tx)
    }

    fn close(&mut self) {
        self.frames = None;
        self.rig.lock().unwrap().closes += 1;
    }
}

/// Synthesizer returning a fixed answer.
pub struct CannedTts(pub Result<Option<EncodedFrame>, SynthesisError>);

impl SpeechSynthesizer for CannedTts {
    fn synthesize(&self, _text: &str) -> Result<Option<EncodedFrame>, SynthesisError> {
        self.0.clone()
    }
}

pub type TestSession = VoiceSession<FakeChannel, FakeBackend>;

pub fn session(rig: &Shared) -> TestSession {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    VoiceSession::new(
        Default::default(),
        FakeChannel::new(Arc::clone(rig)),
        FakeBackend(Arc::clone(rig)),
    )
}

/// Push an event through the channel side and let the session handle it.
pub async fn deliver(session: &mut TestSession, rig: &Shared, event: ChannelEvent) {
    let tx = rig
        .lock()
        .unwrap()
        .events_tx
        .clone()
        .expect("channel connected");
    tx.send(event).expect("session queue open");
    let received = session.next_event().await.expect("event delivered");
    session.handle_event(received);
}

/// Start a session and open its channel.
pub async fn active_session(rig: &Shared) -> TestSession {
    let mut session = session(rig);
    session.start().expect("start");
    deliver(&mut session, rig, ChannelEvent::Open).await;
    session
}

/// Run the microphone callback as the audio thread would.
pub fn feed_mic(rig: &Shared, samples: &[f32]) {
    let mut callback = rig
        .lock()
        .unwrap()
        .on_samples
        .take()
        .expect("capture running");
    callback(samples);
    rig.lock().unwrap().on_samples = Some(callback);
}

/// Report a device failure as the audio thread would.
pub fn break_mic(rig: &Shared, err: CaptureError) {
    let mut callback = rig
        .lock()
        .unwrap()
        .on_error
        .take()
        .expect("capture running");
    callback(err);
    rig.lock().unwrap().on_error = Some(callback);
}

pub fn drain_frames(rig: &Shared) -> Vec<EncodedFrame> {
    let mut p = rig.lock().unwrap();
    let mut frames = Vec::new();
    if let Some(rx) = p.frames_rx.as_mut() {
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
    }
    frames
}

/// Base64 PCM16 chunk of `ms` milliseconds at the output rate.
pub fn chunk_ms(ms: u64) -> String {
    let frames = (OUTPUT_SAMPLE_RATE as u64 * ms / 1000) as usize;
    encode(&vec![0.1; frames], OUTPUT_SAMPLE_RATE).data
}

pub fn starts(rig: &Shared) -> Vec<Duration> {
    rig.lock().unwrap().started.iter().map(|(_, s, _)| *s).collect()
}

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}
