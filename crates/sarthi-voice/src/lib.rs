//! # Sarthi Voice - live duplex voice for the Dak-Sarthi assistant
//!
//! Streams the microphone to a conversational inference service and plays
//! its synthesized replies back gaplessly, cutting them off the moment the
//! user talks over them (barge-in). A one-shot TTS path shares the same
//! codec and playback primitives.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         VoiceSession                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐     │
//! │  │   Mic In     │ → │  PCM Codec   │ → │  DuplexChannel   │     │
//! │  │   (cpal)     │   │  (base64)    │   │  (Gemini Live)   │     │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘     │
//! │                                              ↓ AudioChunk        │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐     │
//! │  │  Speaker     │ ← │  Playback    │ ← │  PCM Codec       │     │
//! │  │  (rodio)     │   │  Scheduler   │   │                  │     │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘     │
//! │                           ↑ reset()         ↓ Interrupted        │
//! │                     ┌──────────────────────────┐                 │
//! │                     │  InterruptionController  │                 │
//! │                     └──────────────────────────┘                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod capture;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod gemini_live;
pub mod interruption;
pub mod playback;
pub mod resample;
pub mod session;
pub mod tts;

pub use audio::{AudioBackend, CpalMicrophone, DeviceBackend, RodioOutput, TimelineMixer};
pub use capture::{AudioCaptureSource, InputDevice, Windower, DEFAULT_WINDOW};
pub use channel::{ChannelEvent, ChannelEventSender, DuplexChannel, FrameSender, ServerEvent};
pub use codec::{
    decode, decode_base64, encode, AudioFrame, Direction, EncodedFrame, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE,
};
pub use config::VoiceConfig;
pub use error::{
    CaptureError, ChannelError, DecodeError, SynthesisError, VoiceError, VoiceResult,
};
pub use gemini_live::GeminiLiveChannel;
pub use interruption::InterruptionController;
pub use playback::{OutputDevice, PlaybackBuffer, PlaybackScheduler, ScheduledSource, SourceId};
pub use resample::InputResampler;
pub use session::{SessionConfig, SessionEvent, SessionState, VoiceSession};
pub use tts::{speak_on, speak_once, GeminiTts, PlaceholderTts, SpeakOutcome, SpeechSynthesizer};
