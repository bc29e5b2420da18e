//! **One-shot TTS**: one request, one audio frame, one playback.
//!
//! Shares the codec and the playback scheduler with the live session. Any
//! failure is contained here: the caller gets [`SpeakOutcome::TextOnly`] and
//! shows the text instead.

use crate::audio::AudioBackend;
use crate::codec::{pcm_mime_type, EncodedFrame, OUTPUT_SAMPLE_RATE};
use crate::config::VoiceConfig;
use crate::error::SynthesisError;
use crate::gemini_live::SpeechConfig;
use crate::playback::PlaybackScheduler;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Backend that turns text into a single PCM16 frame.
pub trait SpeechSynthesizer: Send + Sync {
    /// `Ok(None)` means the service answered without audio.
    fn synthesize(&self, text: &str) -> Result<Option<EncodedFrame>, SynthesisError>;
}

/// Placeholder TTS: never returns audio, so callers always fall back to text.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

impl SpeechSynthesizer for PlaceholderTts {
    fn synthesize(&self, _text: &str) -> Result<Option<EncodedFrame>, SynthesisError> {
        Ok(None)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsRequest<'a> {
    contents: [TtsContent<'a>; 1],
    generation_config: TtsGenerationConfig,
}

#[derive(Serialize)]
struct TtsContent<'a> {
    parts: [TtsText<'a>; 1],
}

#[derive(Serialize)]
struct TtsText<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsGenerationConfig {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig,
}

/// Request timeout for one synthesis call.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Gemini `generateContent` with audio output.
///
/// Holds settings only, so it can be built and dropped anywhere. The HTTP
/// client lives for one [`SpeechSynthesizer::synthesize`] call, which blocks
/// and must run off the async runtime (e.g. in `spawn_blocking`).
#[derive(Debug, Clone)]
pub struct GeminiTts {
    /// Base URL without trailing slash (e.g. https://generativelanguage.googleapis.com/v1beta).
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub timeout: Duration,
}

impl GeminiTts {
    /// Build from a loaded [`VoiceConfig`].
    pub fn from_config(config: &VoiceConfig) -> Result<Self, SynthesisError> {
        let api_key = config
            .require_api_key()
            .map_err(|e| SynthesisError::Config(e.to_string()))?;
        Ok(Self::new(
            config.tts_base_url.clone(),
            api_key,
            config.tts_model.clone(),
            config.voice_name.clone(),
        ))
    }

    /// Create with explicit settings (e.g. for tests or non-config wiring).
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            timeout: TTS_TIMEOUT,
        }
    }

    /// Set a different prebuilt voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    fn request_body<'a>(&self, text: &'a str) -> TtsRequest<'a> {
        TtsRequest {
            contents: [TtsContent {
                parts: [TtsText { text }],
            }],
            generation_config: TtsGenerationConfig {
                response_modalities: ["AUDIO"],
                speech_config: SpeechConfig::prebuilt(&self.voice),
            },
        }
    }
}

/// Pull the first inline audio part out of a `generateContent` response.
pub fn extract_audio(response: &serde_json::Value) -> Option<EncodedFrame> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())?;
    parts.iter().find_map(|part| {
        let inline = part.get("inlineData")?;
        let data = inline.get("data")?.as_str()?;
        if data.is_empty() {
            return None;
        }
        let mime_type = inline
            .get("mimeType")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| pcm_mime_type(OUTPUT_SAMPLE_RATE));
        Some(EncodedFrame {
            mime_type,
            data: data.to_string(),
        })
    })
}

impl SpeechSynthesizer for GeminiTts {
    fn synthesize(&self, text: &str) -> Result<Option<EncodedFrame>, SynthesisError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| SynthesisError::Request(e.to_string()))?;
        let res = client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(text))
            .send()
            .map_err(|e| SynthesisError::Request(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().unwrap_or_default();
            return Err(SynthesisError::Api { status, body });
        }
        let json: serde_json::Value = res
            .json()
            .map_err(|e| SynthesisError::Request(e.to_string()))?;
        Ok(extract_audio(&json))
    }
}

/// What a one-shot request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Audio of this length was played (or queued on a live scheduler).
    Played(Duration),
    /// No usable audio; show the text instead.
    TextOnly,
}

/// Extra time a one-shot playback may overrun before the wait gives up on a
/// stalled output clock.
const STALL_GRACE: Duration = Duration::from_millis(250);

/// Longest wait for `duration` of audio to drain.
pub(crate) fn drain_deadline(duration: Duration) -> Duration {
    duration * 2 + STALL_GRACE
}

pub(crate) fn synthesize_frame(text: &str, synth: &dyn SpeechSynthesizer) -> Option<EncodedFrame> {
    match synth.synthesize(text) {
        Ok(Some(frame)) => Some(frame),
        Ok(None) => {
            debug!("TTS returned no audio; falling back to text");
            None
        }
        Err(e) => {
            warn!("TTS failed, falling back to text: {}", e);
            None
        }
    }
}

pub(crate) fn queue_frame(frame: &EncodedFrame, scheduler: &mut PlaybackScheduler) -> SpeakOutcome {
    match scheduler.on_chunk(frame) {
        Ok(source) => {
            info!(duration_ms = source.duration.as_millis() as u64, "🗣️ Speaking");
            SpeakOutcome::Played(source.duration)
        }
        Err(e) => {
            warn!("TTS audio unplayable, falling back to text: {}", e);
            SpeakOutcome::TextOnly
        }
    }
}

/// Open a speaker and queue `frame` on it. The scheduler owns the device.
pub(crate) fn play_frame(
    frame: &EncodedFrame,
    backend: &mut dyn AudioBackend,
    output_sample_rate: u32,
) -> Option<(PlaybackScheduler, Duration)> {
    let device = match backend.open_output(output_sample_rate) {
        Ok(device) => device,
        Err(e) => {
            warn!("No output device for TTS, falling back to text: {}", e);
            return None;
        }
    };
    let mut scheduler = PlaybackScheduler::new(device);
    match queue_frame(frame, &mut scheduler) {
        SpeakOutcome::Played(duration) => Some((scheduler, duration)),
        SpeakOutcome::TextOnly => None,
    }
}

/// How long to sleep before checking playback again; `None` once it has
/// drained or `deadline` has passed.
pub(crate) fn next_wait(scheduler: &mut PlaybackScheduler, deadline: Instant) -> Option<Duration> {
    if !scheduler.is_playing() {
        return None;
    }
    let now = Instant::now();
    if now >= deadline {
        warn!(
            queued_ms = scheduler.queued().as_millis() as u64,
            "Output clock stalled; releasing the speaker"
        );
        return None;
    }
    Some(scheduler.queued().max(Duration::from_millis(10)).min(deadline - now))
}

/// Synthesize and queue on an existing scheduler without waiting for playback.
pub fn speak_on(
    text: &str,
    synth: &dyn SpeechSynthesizer,
    scheduler: &mut PlaybackScheduler,
) -> SpeakOutcome {
    match synthesize_frame(text, synth) {
        Some(frame) => queue_frame(&frame, scheduler),
        None => SpeakOutcome::TextOnly,
    }
}

/// Synthesize, play on a freshly opened output device, block until it has
/// finished, then release the device. Nothing is retained afterwards.
///
/// Blocks the calling thread; from async code use `spawn_blocking` or
/// [`VoiceSession::speak`](crate::VoiceSession::speak).
pub fn speak_once(
    text: &str,
    synth: &dyn SpeechSynthesizer,
    backend: &mut dyn AudioBackend,
    output_sample_rate: u32,
) -> SpeakOutcome {
    let Some(frame) = synthesize_frame(text, synth) else {
        return SpeakOutcome::TextOnly;
    };
    let Some((mut scheduler, duration)) = play_frame(&frame, backend, output_sample_rate) else {
        return SpeakOutcome::TextOnly;
    };
    let deadline = Instant::now() + drain_deadline(duration);
    while let Some(wait) = next_wait(&mut scheduler, deadline) {
        std::thread::sleep(wait);
    }
    SpeakOutcome::Played(duration)
}
