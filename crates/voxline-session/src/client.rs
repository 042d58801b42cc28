use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::types::{AudioPayload, OutboundMessage, ServerEvent};

const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// The remote conversational session as the pipeline sees it. Ingress and
/// egress each hold a shared handle; tests substitute a scripted mock.
#[async_trait]
pub trait LiveSession: Send + Sync {
    /// Put one message on the wire. Fallible per message: the caller
    /// decides whether a failure is worth aborting over.
    async fn send(&self, msg: OutboundMessage) -> Result<(), SessionError>;

    /// Next inbound event. `Ok(None)` means the server closed the stream.
    async fn receive(&self) -> Result<Option<ServerEvent>, SessionError>;

    /// Best-effort close of the underlying connection.
    async fn close(&self) -> Result<(), SessionError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client speaking the bidirectional generate-content protocol.
/// The writer and reader halves are independently locked so sends and
/// receives never serialize against each other.
pub struct LiveClient {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<SplitStream<WsStream>>,
    media_type: &'static str,
}

/// Connect, send the setup message, and wait for the server's setup
/// acknowledgment before handing the session over.
pub async fn connect(config: &SessionConfig) -> Result<LiveClient, SessionError> {
    let mut request = config.endpoint().into_client_request()?;
    if let Some(auth) = config.auth_header() {
        let value = HeaderValue::from_str(&auth)
            .map_err(|e| SessionError::Connect(format!("invalid authorization header: {}", e)))?;
        request.headers_mut().insert("authorization", value);
    }

    let (ws, _response) = connect_async(request).await?;
    let (writer, reader) = ws.split();
    let client = LiveClient {
        writer: Mutex::new(writer),
        reader: Mutex::new(reader),
        media_type: config.media_type(),
    };

    client
        .writer
        .lock()
        .await
        .send(Message::Text(setup_message(config)))
        .await?;

    tokio::time::timeout(SETUP_TIMEOUT, async {
        loop {
            match client.receive().await? {
                Some(event) if event.setup_complete => return Ok(()),
                Some(_) => continue,
                None => return Err(SessionError::Closed),
            }
        }
    })
    .await
    .map_err(|_| SessionError::Connect("setup acknowledgment timed out".to_string()))??;

    tracing::info!(model = %config.model, mode = ?config.mode, "Live session established");
    Ok(client)
}

#[async_trait]
impl LiveSession for LiveClient {
    async fn send(&self, msg: OutboundMessage) -> Result<(), SessionError> {
        let payload = encode_outbound(&msg, self.media_type);
        self.writer
            .lock()
            .await
            .send(Message::Text(payload))
            .await
            .map_err(Into::into)
    }

    async fn receive(&self) -> Result<Option<ServerEvent>, SessionError> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => return decode_server_message(&text).map(Some),
                Some(Ok(Message::Binary(bytes))) => {
                    // The server is free to frame its JSON as binary.
                    let text = String::from_utf8(bytes).map_err(|e| {
                        SessionError::Protocol(format!("non-UTF-8 server frame: {}", e))
                    })?;
                    return decode_server_message(&text).map(Some);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.writer.lock().await.close().await.map_err(Into::into)
    }
}

fn setup_message(config: &SessionConfig) -> String {
    // Push-to-talk drives activity boundaries, so the server-side detector
    // is disabled.
    json!({
        "setup": {
            "model": config.model_path(),
            "generationConfig": {"responseModalities": ["AUDIO"]},
            "realtimeInputConfig": {"automaticActivityDetection": {"disabled": true}},
        }
    })
    .to_string()
}

fn encode_outbound(msg: &OutboundMessage, media_type: &str) -> String {
    let value = match msg {
        OutboundMessage::TurnStart => json!({"realtimeInput": {"activityStart": {}}}),
        OutboundMessage::TurnEnd => json!({"realtimeInput": {"activityEnd": {}}}),
        OutboundMessage::Audio(chunk) => json!({
            "realtimeInput": {
                "mediaChunks": [{
                    "mimeType": media_type,
                    "data": BASE64.encode(&chunk.data),
                }]
            }
        }),
    };
    value.to_string()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<WireServerContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServerContent {
    model_turn: Option<WireModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Deserialize)]
struct WireModelTurn {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    inline_data: Option<WireInlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInlineData {
    mime_type: String,
    data: String,
}

fn decode_server_message(text: &str) -> Result<ServerEvent, SessionError> {
    let wire: WireServerMessage = serde_json::from_str(text)
        .map_err(|e| SessionError::Protocol(format!("bad server message: {}", e)))?;

    let mut event = ServerEvent {
        setup_complete: wire.setup_complete.is_some(),
        ..Default::default()
    };

    if let Some(content) = wire.server_content {
        event.turn_complete = content.turn_complete;
        event.interrupted = content.interrupted;
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    let data = BASE64
                        .decode(inline.data.as_bytes())
                        .map_err(|e| SessionError::Protocol(format!("bad audio payload: {}", e)))?;
                    event.audio.push(AudioPayload {
                        mime_type: inline.mime_type,
                        data,
                    });
                }
            }
        }
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectMode;
    use voxline_audio::AudioChunk;

    #[test]
    fn decodes_audio_parts_in_order() {
        let text = format!(
            r#"{{"serverContent": {{"modelTurn": {{"parts": [
                {{"inlineData": {{"mimeType": "audio/pcm;rate=24000", "data": "{}"}}}},
                {{"text": "thinking..."}},
                {{"inlineData": {{"mimeType": "audio/pcm;rate=24000", "data": "{}"}}}}
            ]}}}}}}"#,
            BASE64.encode([1u8, 0]),
            BASE64.encode([2u8, 0]),
        );
        let event = decode_server_message(&text).unwrap();
        assert_eq!(event.audio.len(), 2);
        assert_eq!(event.audio[0].data, vec![1, 0]);
        assert_eq!(event.audio[1].data, vec![2, 0]);
        assert!(!event.turn_complete);
    }

    #[test]
    fn decodes_turn_complete_and_interruption() {
        let event =
            decode_server_message(r#"{"serverContent": {"turnComplete": true}}"#).unwrap();
        assert!(event.turn_complete);
        assert!(event.audio.is_empty());

        let event =
            decode_server_message(r#"{"serverContent": {"interrupted": true}}"#).unwrap();
        assert!(event.interrupted);
    }

    #[test]
    fn unrecognized_messages_decode_to_empty_events() {
        let event = decode_server_message(r#"{"usageMetadata": {"totalTokenCount": 5}}"#).unwrap();
        assert!(event.is_empty());
    }

    #[test]
    fn setup_acknowledgment_is_detected() {
        let event = decode_server_message(r#"{"setupComplete": {}}"#).unwrap();
        assert!(event.setup_complete);
    }

    #[test]
    fn outbound_signals_and_audio_have_the_expected_shape() {
        let start: serde_json::Value =
            serde_json::from_str(&encode_outbound(&OutboundMessage::TurnStart, "audio/pcm"))
                .unwrap();
        assert!(start["realtimeInput"]["activityStart"].is_object());

        let end: serde_json::Value =
            serde_json::from_str(&encode_outbound(&OutboundMessage::TurnEnd, "audio/pcm"))
                .unwrap();
        assert!(end["realtimeInput"]["activityEnd"].is_object());

        let chunk = AudioChunk::from_samples(&[100, -100]);
        let audio: serde_json::Value = serde_json::from_str(&encode_outbound(
            &OutboundMessage::Audio(chunk.clone()),
            "audio/pcm;rate=24000",
        ))
        .unwrap();
        let media = &audio["realtimeInput"]["mediaChunks"][0];
        assert_eq!(media["mimeType"], "audio/pcm;rate=24000");
        assert_eq!(
            media["data"].as_str().unwrap(),
            BASE64.encode(&chunk.data)
        );
    }

    #[test]
    fn setup_message_disables_server_side_activity_detection() {
        let config = SessionConfig::for_tests(ConnectMode::ApiKey);
        let setup: serde_json::Value = serde_json::from_str(&setup_message(&config)).unwrap();
        assert_eq!(setup["setup"]["model"], "models/test-model");
        assert_eq!(
            setup["setup"]["realtimeInputConfig"]["automaticActivityDetection"]["disabled"],
            true
        );
        assert_eq!(
            setup["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
    }
}
