//! Error types for the Sarthi voice session

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Microphone failures. Fatal to a live session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("No input device available")]
    NoDevice,

    #[error("Input stream error: {0}")]
    Stream(String),

    #[error("Input device lost: {0}")]
    DeviceLost(String),
}

/// Transport failures reported by the duplex channel. Fatal to a live session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Session setup failed: {0}")]
    Handshake(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error: {0}")]
    Protocol(String),
}

/// A malformed inbound chunk. The chunk is dropped, the session continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid base64 payload: {0}")]
    Base64(String),

    #[error("Truncated PCM16 payload ({0} bytes)")]
    OddLength(usize),

    #[error("Empty audio payload")]
    Empty,
}

/// One-shot synthesis failures. The caller falls back to text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("TTS request failed: {0}")]
    Request(String),

    #[error("TTS API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("TTS returned no audio")]
    NoAudio,

    #[error("TTS configuration error: {0}")]
    Config(String),
}

/// Errors that can occur in the voice session
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Whether this error must end a live session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VoiceError::Capture(_) | VoiceError::Channel(_))
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

impl From<cpal::DevicesError> for CaptureError {
    fn from(err: cpal::DevicesError) -> Self {
        CaptureError::Stream(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for CaptureError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                CaptureError::DeviceLost(err.to_string())
            }
            cpal::DefaultStreamConfigError::BackendSpecific { err } if mentions_permission(&err) => {
                CaptureError::PermissionDenied(err.to_string())
            }
            other => CaptureError::Stream(other.to_string()),
        }
    }
}

/// Backends report a refused microphone only through their message text.
fn mentions_permission(err: &cpal::BackendSpecificError) -> bool {
    let text = err.description.to_lowercase();
    text.contains("permission") || text.contains("denied") || text.contains("not authorized")
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceLost(err.to_string()),
            other => CaptureError::Stream(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(err: cpal::PlayStreamError) -> Self {
        CaptureError::Stream(err.to_string())
    }
}

impl From<cpal::StreamError> for CaptureError {
    fn from(err: cpal::StreamError) -> Self {
        CaptureError::DeviceLost(err.to_string())
    }
}
