//! Client for the upstream voice-agent service.
//!
//! One logical WebSocket per call: a setup message configures model, voice,
//! system instructions, and activity detection; after that the bridge sends
//! base64 PCM16 audio and consumes a stream of server messages classified
//! into [`UpstreamEvent`] variants.

use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::audio;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Per-call connection parameters for the upstream service.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub service_url: String,
    pub model: String,
    pub voice: String,
    pub system_instructions: String,
    /// Sample rate of the PCM16 audio the bridge will send, in Hz
    pub input_sample_rate: u32,
    pub vad_silence_ms: u32,
    pub vad_prefix_ms: u32,
}

/// A received upstream message, classified up front so the outbound pump
/// only branches on variants.
#[derive(Debug, PartialEq)]
pub enum UpstreamEvent {
    /// Session setup acknowledged; audio may flow
    SetupComplete,
    /// Barge-in: the caller started speaking or the agent turn was cut off
    Interrupted,
    /// PCM16 little-endian audio at the upstream output rate
    AudioChunk(Vec<u8>),
    /// Anything else (transcriptions, turn markers, keep-alives)
    Other,
}

/// Owns the upstream WebSocket until split into sender and receiver halves.
pub struct UpstreamClient {
    ws: WsStream,
    input_sample_rate: u32,
}

impl UpstreamClient {
    /// Connect and send the session setup message. Failure here is fatal to
    /// the call and propagates to teardown.
    pub async fn connect(config: UpstreamConfig) -> Result<Self> {
        let (mut ws, _) = connect_async(config.service_url.as_str()).await?;

        let setup = json!({
            "setup": {
                "model": config.model,
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": config.voice }
                        }
                    }
                },
                "systemInstruction": {
                    "parts": [{ "text": config.system_instructions }]
                },
                "realtimeInputConfig": {
                    "automaticActivityDetection": {
                        "silenceDurationMs": config.vad_silence_ms,
                        "prefixPaddingMs": config.vad_prefix_ms
                    },
                    "activityHandling": "START_OF_ACTIVITY_INTERRUPTS"
                }
            }
        });
        ws.send(Message::Text(setup.to_string().into())).await?;

        Ok(Self {
            ws,
            input_sample_rate: config.input_sample_rate,
        })
    }

    /// Split into independently owned halves so the two pumps can run
    /// concurrently without sharing the socket.
    pub fn split(self) -> (UpstreamSender, UpstreamReceiver) {
        let (sink, stream) = self.ws.split();
        (
            UpstreamSender {
                sink,
                input_sample_rate: self.input_sample_rate,
            },
            UpstreamReceiver { stream },
        )
    }
}

/// Write half: audio out and the single close in teardown.
pub struct UpstreamSender {
    sink: SplitSink<WsStream, Message>,
    input_sample_rate: u32,
}

impl UpstreamSender {
    /// Send one chunk of PCM16 samples, already at the upstream input rate.
    pub async fn send_audio(&mut self, samples: &[i16]) -> Result<()> {
        let data = BASE64.encode(audio::samples_to_le_bytes(samples));
        let msg = json!({
            "realtimeInput": {
                "mediaChunks": [{
                    "mimeType": format!("audio/pcm;rate={}", self.input_sample_rate),
                    "data": data
                }]
            }
        });
        self.sink.send(Message::Text(msg.to_string().into())).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

/// Read half: a lazy sequence of classified events.
pub struct UpstreamReceiver {
    stream: SplitStream<WsStream>,
}

impl UpstreamReceiver {
    /// Next classified event; `None` once the stream has terminated.
    pub async fn next_event(&mut self) -> Option<Result<UpstreamEvent>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(classify(&text))),
                // the service also delivers JSON in binary frames
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => return Some(Ok(classify(text))),
                    Err(_) => return Some(Ok(UpstreamEvent::Other)),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "upstream closed connection");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Classify one raw upstream message.
fn classify(text: &str) -> UpstreamEvent {
    let Ok(msg) = serde_json::from_str::<Value>(text) else {
        return UpstreamEvent::Other;
    };
    if msg.get("setupComplete").is_some() {
        return UpstreamEvent::SetupComplete;
    }
    let server_content = msg.get("serverContent");
    if server_content
        .and_then(|c| c.get("interrupted"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return UpstreamEvent::Interrupted;
    }
    let inline = server_content
        .and_then(|c| c.get("modelTurn"))
        .and_then(|t| t.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|p| p.get("inlineData"))
        .and_then(|d| d.get("data"))
        .and_then(Value::as_str);
    if let Some(encoded) = inline
        && let Ok(bytes) = BASE64.decode(encoded)
    {
        return UpstreamEvent::AudioChunk(bytes);
    }
    UpstreamEvent::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_setup_complete() {
        assert_eq!(classify(r#"{"setupComplete":{}}"#), UpstreamEvent::SetupComplete);
    }

    #[test]
    fn classify_interrupted() {
        let raw = r#"{"serverContent":{"interrupted":true}}"#;
        assert_eq!(classify(raw), UpstreamEvent::Interrupted);
    }

    #[test]
    fn interrupted_false_is_not_a_barge_in() {
        let raw = r#"{"serverContent":{"interrupted":false}}"#;
        assert_eq!(classify(raw), UpstreamEvent::Other);
    }

    #[test]
    fn classify_inline_audio() {
        let pcm = audio::samples_to_le_bytes(&[100i16, -200, 300]);
        let raw = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm","data":"{}"}}}}]}}}}}}"#,
            BASE64.encode(&pcm)
        );
        match classify(&raw) {
            UpstreamEvent::AudioChunk(bytes) => assert_eq!(bytes, pcm),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn classify_empty_parts_is_other() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[]}}}"#;
        assert_eq!(classify(raw), UpstreamEvent::Other);
    }

    #[test]
    fn classify_invalid_base64_is_other() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"@@not-base64@@"}}]}}}"#;
        assert_eq!(classify(raw), UpstreamEvent::Other);
    }

    #[test]
    fn classify_garbage_is_other() {
        assert_eq!(classify("not json at all"), UpstreamEvent::Other);
        assert_eq!(classify(r#"{"turnComplete":true}"#), UpstreamEvent::Other);
    }
}
