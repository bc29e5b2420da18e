//! Gemini Live websocket as a [`DuplexChannel`].
//!
//! 1. **Connect**: open the `BidiGenerateContent` websocket.
//! 2. **Setup**: send model, audio modality, voice and system instruction;
//!    `Open` is reported only after `setupComplete`.
//! 3. **Stream**: frames go out as `realtimeInput.mediaChunks`; `serverContent`
//!    comes back as audio chunks, `interrupted` and `turnComplete`.
//! 4. **Close**: a close frame on request, `Closed` when the server hangs up.
//!
//! Gemini may send JSON inside binary frames, so both frame kinds are parsed.

use crate::channel::{ChannelEvent, ChannelEventSender, DuplexChannel, FrameSender, ServerEvent};
use crate::codec::EncodedFrame;
use crate::config::VoiceConfig;
use crate::error::ChannelError;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

// ── Setup message ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceSelection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSelection {
    pub prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoice {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

impl SpeechConfig {
    pub fn prebuilt(voice_name: &str) -> Self {
        Self {
            voice_config: VoiceSelection {
                prebuilt_voice_config: PrebuiltVoice {
                    voice_name: voice_name.to_string(),
                },
            },
        }
    }
}

pub fn build_setup_message(config: &VoiceConfig) -> SetupMessage {
    let instruction = config.system_instruction.trim();
    SetupMessage {
        setup: SetupPayload {
            model: format!("models/{}", config.live_model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig::prebuilt(&config.voice_name),
            },
            system_instruction: (!instruction.is_empty()).then(|| SystemInstruction {
                parts: vec![TextPart {
                    text: instruction.to_string(),
                }],
            }),
        },
    }
}

// ── Realtime input ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage<'a> {
    pub realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput<'a> {
    pub media_chunks: [&'a EncodedFrame; 1],
}

pub fn build_audio_message(frame: &EncodedFrame) -> RealtimeInputMessage<'_> {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [frame],
        },
    }
}

// ── Server messages ────────────────────────────────────────────────

/// What one server frame carried.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub setup_complete: bool,
    pub events: Vec<ServerEvent>,
    pub error: Option<String>,
}

/// Parse a JSON server frame. Interruption is reported before any audio in
/// the same frame so stale audio never outlives the barge-in. A frame that
/// is not JSON is logged and yields nothing.
pub fn parse_server_message(json_text: &str) -> ParsedMessage {
    let mut parsed = ParsedMessage::default();

    let value: serde_json::Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Skipping unparseable server message ({} bytes): {}", json_text.len(), e);
            return parsed;
        }
    };

    if value.get("setupComplete").is_some() {
        parsed.setup_complete = true;
    }

    if let Some(content) = value.get("serverContent") {
        if content.get("interrupted").and_then(|v| v.as_bool()) == Some(true) {
            parsed.events.push(ServerEvent::Interrupted);
        }
        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(|v| v.as_array()) {
            for part in parts {
                if let Some(data) = part.pointer("/inlineData/data").and_then(|v| v.as_str()) {
                    parsed.events.push(ServerEvent::AudioChunk {
                        data: data.to_string(),
                    });
                }
            }
        }
        if content.get("turnComplete").and_then(|v| v.as_bool()) == Some(true) {
            parsed.events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown server error");
        parsed.error = Some(message.to_string());
    }

    parsed
}

fn frame_text(msg: &WsMessage) -> Option<&str> {
    match msg {
        WsMessage::Text(text) => Some(text.as_str()),
        WsMessage::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

// ── Channel ────────────────────────────────────────────────────────

/// Gemini Live connection. Must be used inside a tokio runtime.
pub struct GeminiLiveChannel {
    config: VoiceConfig,
    frames: Option<mpsc::UnboundedSender<EncodedFrame>>,
    close_tx: Option<oneshot::Sender<()>>,
}

impl GeminiLiveChannel {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            frames: None,
            close_tx: None,
        }
    }
}

impl DuplexChannel for GeminiLiveChannel {
    fn connect(&mut self, events: ChannelEventSender) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        self.frames = Some(frame_tx);
        self.close_tx = Some(close_tx);

        let url = format!("{}?key={}", self.config.live_url, self.config.api_key.trim());
        let setup = build_setup_message(&self.config);
        info!(model = %self.config.live_model, voice = %self.config.voice_name, "Connecting to Gemini Live");

        tokio::spawn(async move {
            if let Err(err) = run_connection(url, setup, frame_rx, close_rx, events.clone()).await {
                error!("Gemini Live: {}", err);
                let _ = events.send(ChannelEvent::Error(err));
            }
        });
    }

    fn frame_sender(&self) -> FrameSender {
        match &self.frames {
            Some(tx) => FrameSender::new(tx.clone()),
            None => {
                // Not connected: frames go nowhere.
                let (tx, _rx) = mpsc::unbounded_channel();
                FrameSender::new(tx)
            }
        }
    }

    fn close(&mut self) {
        self.frames = None;
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
    }
}

async fn run_connection(
    url: String,
    setup: SetupMessage,
    mut frame_rx: mpsc::UnboundedReceiver<EncodedFrame>,
    mut close_rx: oneshot::Receiver<()>,
    events: ChannelEventSender,
) -> Result<(), ChannelError> {
    let (mut ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| ChannelError::Connect(e.to_string()))?;

    let setup_json =
        serde_json::to_string(&setup).map_err(|e| ChannelError::Handshake(e.to_string()))?;
    ws_stream
        .send(WsMessage::Text(setup_json))
        .await
        .map_err(|e| ChannelError::Handshake(e.to_string()))?;

    // Wait for setupComplete before declaring the channel open.
    loop {
        let msg = tokio::select! {
            msg = ws_stream.next() => msg,
            _ = &mut close_rx => {
                let _ = ws_stream.close(None).await;
                let _ = events.send(ChannelEvent::Closed);
                return Ok(());
            }
        };
        match msg {
            Some(Ok(WsMessage::Close(frame))) => {
                return Err(ChannelError::Handshake(format!(
                    "closed before setupComplete: {frame:?}"
                )));
            }
            Some(Ok(other)) => {
                if let Some(text) = frame_text(&other) {
                    let parsed = parse_server_message(text);
                    if let Some(message) = parsed.error {
                        return Err(ChannelError::Protocol(message));
                    }
                    if parsed.setup_complete {
                        break;
                    }
                }
            }
            Some(Err(e)) => return Err(ChannelError::Handshake(e.to_string())),
            None => return Err(ChannelError::Handshake("stream ended before setupComplete".into())),
        }
    }

    info!("✅ Gemini Live setup complete, streaming");
    if events.send(ChannelEvent::Open).is_err() {
        return Ok(());
    }

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut frames_open = true;

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                debug!("Gemini Live: close requested");
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                let _ = events.send(ChannelEvent::Closed);
                return Ok(());
            }
            frame = frame_rx.recv(), if frames_open => {
                let Some(frame) = frame else {
                    // every sender is gone; keep receiving until close
                    frames_open = false;
                    continue;
                };
                let json = serde_json::to_string(&build_audio_message(&frame))
                    .map_err(|e| ChannelError::Protocol(e.to_string()))?;
                ws_sender
                    .send(WsMessage::Text(json))
                    .await
                    .map_err(|e| ChannelError::Transport(e.to_string()))?;
            }
            msg = ws_receiver.next() => match msg {
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(close_frame = ?frame, "Gemini Live connection closed");
                    let _ = events.send(ChannelEvent::Closed);
                    return Ok(());
                }
                Some(Ok(other)) => {
                    let Some(text) = frame_text(&other) else {
                        if let WsMessage::Binary(data) = &other {
                            warn!(len = data.len(), "Unexpected non-JSON binary frame; skipping");
                        }
                        continue;
                    };
                    let parsed = parse_server_message(text);
                    for event in parsed.events {
                        if events.send(ChannelEvent::Message(event)).is_err() {
                            return Ok(());
                        }
                    }
                    if let Some(message) = parsed.error {
                        return Err(ChannelError::Protocol(message));
                    }
                }
                Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
                None => {
                    let _ = events.send(ChannelEvent::Closed);
                    return Ok(());
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::INPUT_SAMPLE_RATE;

    #[test]
    fn setup_message_requests_audio_with_voice() {
        let config = VoiceConfig::default();
        let json = serde_json::to_value(build_setup_message(&config)).unwrap();

        assert_eq!(
            json["setup"]["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert!(json["setup"]["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Dak-Sarthi"));
    }

    #[test]
    fn audio_message_wraps_frame() {
        let frame = EncodedFrame::new(INPUT_SAMPLE_RATE, "AAA=");
        let json = serde_json::to_value(build_audio_message(&frame)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "realtimeInput": {
                    "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "AAA=" }]
                }
            })
        );
    }

    #[test]
    fn parses_audio_interrupt_and_turn_complete() {
        let msg = r#"{"serverContent":{"interrupted":true,"turnComplete":true,
            "modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#;
        let parsed = parse_server_message(msg);
        assert_eq!(
            parsed.events,
            vec![
                ServerEvent::Interrupted,
                ServerEvent::AudioChunk { data: "AAAA".into() },
                ServerEvent::TurnComplete,
            ]
        );
        assert!(!parsed.setup_complete);
    }

    #[test]
    fn parses_setup_complete_and_errors() {
        assert!(parse_server_message(r#"{"setupComplete":{}}"#).setup_complete);
        let parsed = parse_server_message(r#"{"error":{"message":"quota"}}"#);
        assert_eq!(parsed.error.as_deref(), Some("quota"));
    }

    #[test]
    fn non_json_frames_are_skipped() {
        assert_eq!(parse_server_message("not json"), ParsedMessage::default());
        assert_eq!(parse_server_message("{\"serverCont"), ParsedMessage::default());
    }

    #[test]
    fn binary_json_frames_are_read_as_text() {
        let msg = WsMessage::Binary(br#"{"setupComplete":{}}"#.to_vec());
        assert_eq!(frame_text(&msg), Some(r#"{"setupComplete":{}}"#));
        assert_eq!(frame_text(&WsMessage::Binary(vec![0, 1, 2])), None);
    }
}
