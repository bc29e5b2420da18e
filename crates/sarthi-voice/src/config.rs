//! Session configuration.
//!
//! Precedence: env `SARTHI_*` (separator `__`) > file at `SARTHI_CONFIG`
//! (default `config/sarthi.toml`, optional) > defaults. The API key also falls
//! back to `GEMINI_API_KEY` and `API_KEY`.

use crate::capture::DEFAULT_WINDOW;
use crate::codec::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::error::{VoiceError, VoiceResult};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_VOICE: &str = "Zephyr";
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_TTS_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Dak-Sarthi, a real-time voice assistant for India Post. Help users with their grievances naturally.";

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// Key for the Gemini endpoints. Empty means "not configured".
    #[serde(default)]
    pub api_key: String,
    pub live_model: String,
    pub tts_model: String,
    /// Prebuilt voice used for both live replies and one-shot TTS.
    pub voice_name: String,
    pub system_instruction: String,
    pub live_url: String,
    pub tts_base_url: String,
    /// Samples per captured frame.
    pub capture_window: usize,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            voice_name: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            live_url: DEFAULT_LIVE_URL.to_string(),
            tts_base_url: DEFAULT_TTS_BASE_URL.to_string(),
            capture_window: DEFAULT_WINDOW,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }
}

impl VoiceConfig {
    /// Load config from file and environment.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("SARTHI_CONFIG").unwrap_or_else(|_| "config/sarthi.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Same as [`VoiceConfig::load`] with an explicit file path.
    pub fn load_from(path: &Path) -> VoiceResult<Self> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("api_key", defaults.api_key)?
            .set_default("live_model", defaults.live_model)?
            .set_default("tts_model", defaults.tts_model)?
            .set_default("voice_name", defaults.voice_name)?
            .set_default("system_instruction", defaults.system_instruction)?
            .set_default("live_url", defaults.live_url)?
            .set_default("tts_base_url", defaults.tts_base_url)?
            .set_default("capture_window", defaults.capture_window as i64)?
            .set_default("input_sample_rate", defaults.input_sample_rate as i64)?
            .set_default("output_sample_rate", defaults.output_sample_rate as i64)?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("SARTHI").separator("__"))
            .build()?;

        let mut cfg: Self = built.try_deserialize()?;
        if cfg.api_key.trim().is_empty() {
            cfg.api_key = std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("API_KEY"))
                .unwrap_or_default();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> VoiceResult<()> {
        if self.capture_window == 0 {
            return Err(VoiceError::Config("capture_window must be > 0".to_string()));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(VoiceError::Config("sample rates must be > 0".to_string()));
        }
        Ok(())
    }

    /// The key, or a configuration error naming where to set it.
    pub fn require_api_key(&self) -> VoiceResult<&str> {
        let key = self.api_key.trim();
        if key.is_empty() {
            return Err(VoiceError::Config(
                "Gemini requires SARTHI__API_KEY, GEMINI_API_KEY, or API_KEY".to_string(),
            ));
        }
        Ok(key)
    }
}
