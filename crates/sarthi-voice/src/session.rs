//! Voice session lifecycle - the coordination layer
//!
//! ```text
//! Idle --start()--> Connecting --Open--> Active --stop()/Closed--> Closing --> Closed
//! Connecting|Active --Error--> Failed(reason)
//! ```
//!
//! The session owns both audio devices, the capture source and the playback
//! scheduler. Capture is only wired once the channel reports `Open`, so no
//! frame is ever produced before there is somewhere to send it. Every exit
//! path goes through a single teardown that releases each resource once.
//!
//! Channel and capture events arrive on one queue and are handled one at a
//! time through [`VoiceSession::handle_event`]; nothing else mutates session
//! or playback state.

use crate::audio::AudioBackend;
use crate::capture::{AudioCaptureSource, InputDevice};
use crate::channel::{ChannelEvent, DuplexChannel, ServerEvent};
use crate::codec::{EncodedFrame, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::config::VoiceConfig;
use crate::error::{CaptureError, VoiceError, VoiceResult};
use crate::interruption::InterruptionController;
use crate::playback::PlaybackScheduler;
use crate::tts::{
    drain_deadline, next_wait, play_frame, queue_frame, synthesize_frame, SpeakOutcome,
    SpeechSynthesizer,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    Failed(String),
}

impl SessionState {
    /// Closed or Failed: only a new `start()` leaves these.
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

/// Everything that can happen to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Channel(ChannelEvent),
    Capture(CaptureError),
}

/// Audio parameters of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            capture_window: crate::capture::DEFAULT_WINDOW,
        }
    }
}

impl From<&VoiceConfig> for SessionConfig {
    fn from(config: &VoiceConfig) -> Self {
        Self {
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
            capture_window: config.capture_window,
        }
    }
}

/// Devices and running components, released together exactly once.
#[derive(Default)]
struct SessionResources {
    /// The microphone until capture takes it over on `Open`.
    input: Option<Box<dyn InputDevice>>,
    capture: Option<AudioCaptureSource>,
    scheduler: Option<PlaybackScheduler>,
    connected: bool,
}

struct EventQueue {
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    channel_done: bool,
    capture_tx: Option<mpsc::UnboundedSender<CaptureError>>,
    capture_rx: mpsc::UnboundedReceiver<CaptureError>,
}

/// A duplex voice conversation over `C`, playing and recording through `B`.
pub struct VoiceSession<C: DuplexChannel, B: AudioBackend> {
    config: SessionConfig,
    channel: C,
    backend: B,
    state: SessionState,
    resources: Option<SessionResources>,
    events: Option<EventQueue>,
    interruption: InterruptionController,
    opened_at: Option<DateTime<Utc>>,
    dropped_chunks: u64,
}

impl<C: DuplexChannel, B: AudioBackend> VoiceSession<C, B> {
    pub fn new(config: SessionConfig, channel: C, backend: B) -> Self {
        Self {
            config,
            channel,
            backend,
            state: SessionState::Idle,
            resources: None,
            events: None,
            interruption: InterruptionController::new(),
            opened_at: None,
            dropped_chunks: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Acquire both devices and begin connecting.
    ///
    /// Allowed from Idle, or after a previous run ended (Closed/Failed). A
    /// setup failure releases whatever was acquired and leaves the session
    /// Failed.
    pub fn start(&mut self) -> VoiceResult<()> {
        match self.state {
            SessionState::Idle | SessionState::Closed | SessionState::Failed(_) => {}
            ref other => {
                return Err(VoiceError::InvalidState(format!(
                    "start() while {:?}",
                    other
                )))
            }
        }

        info!("🚀 Starting voice session");
        self.state = SessionState::Connecting;
        self.opened_at = None;
        self.dropped_chunks = 0;
        self.resources = Some(SessionResources::default());

        let input = match self.backend.open_input(self.config.input_sample_rate) {
            Ok(input) => input,
            Err(e) => {
                self.fail(format!("microphone unavailable: {}", e));
                return Err(e.into());
            }
        };
        if let Some(res) = self.resources.as_mut() {
            res.input = Some(input);
        }

        let output = match self.backend.open_output(self.config.output_sample_rate) {
            Ok(output) => output,
            Err(e) => {
                self.fail(format!("speaker unavailable: {}", e));
                return Err(e);
            }
        };
        if let Some(res) = self.resources.as_mut() {
            res.scheduler = Some(PlaybackScheduler::new(output));
            res.connected = true;
        }

        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        self.events = Some(EventQueue {
            channel_rx,
            channel_done: false,
            capture_tx: Some(capture_tx),
            capture_rx,
        });

        self.channel.connect(channel_tx);
        info!("📡 Connecting...");
        Ok(())
    }

    /// Wait for the next channel or capture event. `None` once the session
    /// has nothing left to report.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let queue = self.events.as_mut()?;
        tokio::select! {
            ev = queue.channel_rx.recv(), if !queue.channel_done => match ev {
                Some(ev) => Some(SessionEvent::Channel(ev)),
                None => {
                    // The transport went away without saying so.
                    queue.channel_done = true;
                    Some(SessionEvent::Channel(ChannelEvent::Closed))
                }
            },
            Some(err) = queue.capture_rx.recv() => Some(SessionEvent::Capture(err)),
            else => None,
        }
    }

    /// Apply one event.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Channel(ChannelEvent::Open) => self.on_open(),
            SessionEvent::Channel(ChannelEvent::Message(msg)) => self.on_message(msg),
            SessionEvent::Channel(ChannelEvent::Closed) => match self.state {
                SessionState::Active => {
                    info!("📴 Channel closed by remote");
                    self.teardown(SessionState::Closed);
                }
                SessionState::Connecting => self.fail("channel closed before open".to_string()),
                _ => debug!(state = ?self.state, "late close ignored"),
            },
            SessionEvent::Channel(ChannelEvent::Error(e)) => {
                if self.state.is_live() {
                    self.fail(format!("channel: {}", e));
                } else {
                    debug!(state = ?self.state, "late channel error ignored: {}", e);
                }
            }
            SessionEvent::Capture(e) => {
                if self.state.is_live() {
                    self.fail(format!("capture: {}", e));
                } else {
                    debug!(state = ?self.state, "late capture error ignored: {}", e);
                }
            }
        }
    }

    /// Drive events until the session is Closed or Failed.
    pub async fn run_until_finished(&mut self) -> &SessionState {
        while !self.is_finished() {
            match self.next_event().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
        &self.state
    }

    /// Tear everything down and end Closed. Idempotent: a no-op from Idle,
    /// Closed or Failed.
    pub fn stop(&mut self) {
        if self.state.is_live() {
            self.teardown(SessionState::Closed);
        } else {
            debug!(state = ?self.state, "stop() ignored");
        }
    }

    /// Speak `text` once: on the live scheduler while Active, otherwise on a
    /// fresh output device that is released once playback has drained.
    ///
    /// Synthesis runs on the blocking pool, so blocking HTTP clients are safe
    /// to use as `synth`.
    pub async fn speak(&mut self, text: &str, synth: Arc<dyn SpeechSynthesizer>) -> SpeakOutcome {
        let owned = text.to_string();
        let synthesis = tokio::task::spawn_blocking(move || synthesize_frame(&owned, synth.as_ref()));
        let frame = match synthesis.await {
            Ok(Some(frame)) => frame,
            Ok(None) => return SpeakOutcome::TextOnly,
            Err(e) => {
                warn!("TTS task failed, falling back to text: {}", e);
                return SpeakOutcome::TextOnly;
            }
        };

        if self.state == SessionState::Active {
            if let Some(scheduler) = self.scheduler_mut() {
                return queue_frame(&frame, scheduler);
            }
        }

        let Some((mut scheduler, duration)) =
            play_frame(&frame, &mut self.backend, self.config.output_sample_rate)
        else {
            return SpeakOutcome::TextOnly;
        };
        let deadline = Instant::now() + drain_deadline(duration);
        while let Some(wait) = next_wait(&mut scheduler, deadline) {
            tokio::time::sleep(wait).await;
        }
        SpeakOutcome::Played(duration)
    }

    /// Interruptions acted on since construction.
    pub fn interruptions(&self) -> u64 {
        self.interruption.handled()
    }

    /// Inbound chunks dropped as undecodable in the current run.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks
    }

    /// Sources still playing, if there is a scheduler.
    pub fn active_sources(&mut self) -> Option<usize> {
        self.scheduler_mut().map(|s| s.active_count())
    }

    /// Earliest start of the next inbound chunk, if there is a scheduler.
    pub fn playback_cursor(&self) -> Option<Duration> {
        self.resources
            .as_ref()
            .and_then(|r| r.scheduler.as_ref())
            .map(|s| s.cursor())
    }

    /// Buffered playback still ahead of the output clock.
    pub fn queued_playback(&self) -> Option<Duration> {
        self.resources
            .as_ref()
            .and_then(|r| r.scheduler.as_ref())
            .map(|s| s.queued())
    }

    fn scheduler_mut(&mut self) -> Option<&mut PlaybackScheduler> {
        self.resources.as_mut().and_then(|r| r.scheduler.as_mut())
    }

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            debug!(state = ?self.state, "open ignored");
            return;
        }

        let capture_tx = self.events.as_mut().and_then(|q| q.capture_tx.take());
        let input = self.resources.as_mut().and_then(|r| r.input.take());
        let (Some(capture_tx), Some(input)) = (capture_tx, input) else {
            self.fail("session resources missing at open".to_string());
            return;
        };

        let sender = self.channel.frame_sender();
        let started = AudioCaptureSource::start(
            input,
            self.config.capture_window,
            move |frame: EncodedFrame| sender.send(frame),
            move |err: CaptureError| {
                let _ = capture_tx.send(err);
            },
        );

        match started {
            Ok(capture) => {
                if let Some(res) = self.resources.as_mut() {
                    res.capture = Some(capture);
                }
                self.state = SessionState::Active;
                self.opened_at = Some(Utc::now());
                info!("✅ Voice session active");
            }
            Err((e, input)) => {
                if let Some(res) = self.resources.as_mut() {
                    res.input = Some(input);
                }
                self.fail(format!("capture: {}", e));
            }
        }
    }

    fn on_message(&mut self, msg: ServerEvent) {
        if self.state != SessionState::Active {
            debug!(state = ?self.state, "message ignored outside an active session");
            return;
        }
        let output_rate = self.config.output_sample_rate;
        match msg {
            ServerEvent::AudioChunk { data } => {
                let Some(scheduler) = self.scheduler_mut() else {
                    return;
                };
                if let Err(e) = scheduler.on_chunk(&EncodedFrame::new(output_rate, data)) {
                    self.dropped_chunks += 1;
                    warn!(dropped = self.dropped_chunks, "Inbound chunk dropped: {}", e);
                }
            }
            ServerEvent::Interrupted => {
                let Some(scheduler) = self.resources.as_mut().and_then(|r| r.scheduler.as_mut())
                else {
                    return;
                };
                self.interruption.on_interrupted(&self.state, scheduler);
            }
            ServerEvent::TurnComplete => {
                debug!("turn complete");
            }
        }
    }

    fn fail(&mut self, reason: String) {
        error!("❌ Voice session failed: {}", reason);
        self.teardown(SessionState::Failed(reason));
    }

    fn teardown(&mut self, final_state: SessionState) {
        let Some(mut res) = self.resources.take() else {
            self.state = final_state;
            return;
        };
        if final_state == SessionState::Closed {
            self.state = SessionState::Closing;
            info!("🛑 Closing voice session");
        }

        // Capture first so no frame races the close request.
        if let Some(capture) = res.capture.take() {
            drop(capture.stop());
        }
        if res.connected {
            self.channel.close();
        }
        drop(res.input.take());
        drop(res.scheduler.take());
        self.events = None;

        if let Some(opened_at) = self.opened_at.take() {
            let secs = (Utc::now() - opened_at).num_seconds();
            info!(
                duration_secs = secs,
                interruptions = self.interruption.handled(),
                dropped_chunks = self.dropped_chunks,
                "Session ended"
            );
        }
        self.state = final_state;
        info!(state = ?self.state, "✅ Voice session torn down");
    }
}

impl<C: DuplexChannel, B: AudioBackend> Drop for VoiceSession<C, B> {
    fn drop(&mut self) {
        if self.resources.is_some() {
            self.teardown(SessionState::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_states() {
        assert!(SessionState::Closed.is_finished());
        assert!(SessionState::Failed("x".into()).is_finished());
        assert!(!SessionState::Closing.is_finished());
        assert!(!SessionState::Idle.is_finished());
    }

    #[test]
    fn session_config_follows_voice_config() {
        let voice = VoiceConfig {
            capture_window: 1024,
            ..Default::default()
        };
        let cfg = SessionConfig::from(&voice);
        assert_eq!(cfg.capture_window, 1024);
        assert_eq!(cfg.input_sample_rate, 16_000);
        assert_eq!(cfg.output_sample_rate, 24_000);
    }
}
