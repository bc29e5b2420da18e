//! Sarthi voice front end
//!
//! `sarthi live` holds a duplex voice conversation with Dak-Sarthi until
//! Ctrl-C or the server hangs up. `sarthi speak <TEXT>` reads one reply aloud.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sarthi_voice::{
    speak_once, DeviceBackend, GeminiLiveChannel, GeminiTts, SessionEvent, SessionState,
    SpeakOutcome, VoiceConfig, VoiceSession,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sarthi")]
#[command(about = "Live voice assistant for India Post grievances")]
#[command(version)]
struct Args {
    /// Config file (overrides SARTHI_CONFIG)
    #[arg(short, long, env = "SARTHI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Talk to the assistant through the microphone and speakers
    Live,
    /// Synthesize one line of speech and play it
    Speak {
        text: String,
        /// Prebuilt voice to use instead of the configured one
        #[arg(long)]
        voice: Option<String>,
    },
}

enum Action {
    Event(Option<SessionEvent>),
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[sarthi] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => VoiceConfig::load_from(path),
        None => VoiceConfig::load(),
    }
    .context("Failed to load voice config")?;

    match args.command {
        Command::Live => live(config).await,
        Command::Speak { text, voice } => speak(config, text, voice).await,
    }
}

async fn live(config: VoiceConfig) -> Result<()> {
    config.require_api_key()?;

    let mut session = VoiceSession::new(
        (&config).into(),
        GeminiLiveChannel::new(config.clone()),
        DeviceBackend,
    );
    session.start().context("Failed to start voice session")?;
    tracing::info!("Press Ctrl-C to end the conversation");

    loop {
        let action = tokio::select! {
            event = session.next_event() => Action::Event(event),
            _ = tokio::signal::ctrl_c() => Action::Shutdown,
        };
        match action {
            Action::Event(Some(event)) => {
                session.handle_event(event);
                if session.is_finished() {
                    break;
                }
            }
            Action::Event(None) => break,
            Action::Shutdown => {
                tracing::info!("CTRL-C received; ending session");
                session.stop();
                break;
            }
        }
    }

    match session.state() {
        SessionState::Failed(reason) => anyhow::bail!("voice session failed: {}", reason),
        state => {
            tracing::info!(
                ?state,
                interruptions = session.interruptions(),
                "Voice session over"
            );
            Ok(())
        }
    }
}

async fn speak(config: VoiceConfig, text: String, voice: Option<String>) -> Result<()> {
    let mut tts = GeminiTts::from_config(&config)?;
    if let Some(voice) = voice {
        tts = tts.with_voice(voice);
    }
    let rate = config.output_sample_rate;

    // Synthesis and playback both block.
    let spoken = text.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut backend = DeviceBackend;
        speak_once(&spoken, &tts, &mut backend, rate)
    })
    .await
    .context("TTS task panicked")?;

    match outcome {
        SpeakOutcome::Played(duration) => {
            tracing::info!(duration_ms = duration.as_millis() as u64, "Done speaking");
        }
        SpeakOutcome::TextOnly => println!("{}", text),
    }
    Ok(())
}
