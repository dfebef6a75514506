//! WebSocket plumbing for the streaming session
//!
//! Builds the upgrade request and runs the send and receive halves of
//! the connection as independent tasks. The receive task is the only
//! consumer of server messages, so transcript events reach the
//! assembler in network arrival order.

use super::error::SessionError;
use super::messages::{ClientMessage, ServerMessage};
use crate::audio::AudioChunk;
use crate::transcript::{self, TranscriptAssembler};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

/// Ping interval in seconds to keep the WebSocket connection alive
const PING_INTERVAL_SECS: u64 = 30;

/// Commands consumed by the send task
#[derive(Debug)]
pub(super) enum Outbound {
    /// Forward one captured audio chunk
    Audio(AudioChunk),
    /// Signal end-of-stream to the service
    Terminate,
}

/// Why the receive task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ReceiveOutcome {
    /// Service confirmed closure
    Terminated,
    /// Socket closed without a terminate confirmation
    ConnectionClosed,
    /// Transport error
    ReceiveError,
}

/// Build the streaming URL with the session sample rate
pub(super) fn build_stream_url(endpoint: &str, sample_rate: u32) -> String {
    format!(
        "{}?sample_rate={}",
        endpoint.trim_end_matches('/'),
        sample_rate
    )
}

/// Build the WebSocket upgrade request with API-key authentication
pub(super) fn build_ws_request(ws_url: &str, api_key: &str) -> Result<http::Request<()>, String> {
    let parsed = url::Url::parse(ws_url).map_err(|e| e.to_string())?;
    let host = parsed
        .host_str()
        .ok_or_else(|| "Invalid URL: no host".to_string())?;

    http::Request::builder()
        .uri(ws_url)
        .header("Host", host)
        .header("Authorization", api_key)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", generate_ws_key())
        .header("Sec-WebSocket-Version", "13")
        .body(())
        .map_err(|e| e.to_string())
}

/// Generate a random WebSocket key
fn generate_ws_key() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut key = [0u8; 16];
    rng.fill(&mut key);
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Wait for the service to assign a session id
///
/// Everything before the session-opened message is ignored except
/// errors; the connection closing first means the handshake failed.
pub(super) async fn wait_for_session_id<S>(ws_stream: &mut S) -> Result<String, SessionError>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::SessionBegins { session_id }) => return Ok(session_id),
                Ok(ServerMessage::RealtimeError { error }) => {
                    return Err(SessionError::ConnectionError(error));
                }
                Ok(other) => debug!("Ignoring pre-session message: {:?}", other),
                Err(e) => warn!("Failed to parse service message: {} - {}", e, text),
            },
            Ok(Message::Close(_)) => return Err(SessionError::HandshakeFailed),
            Ok(_) => {}
            Err(e) => return Err(SessionError::ConnectionError(e.to_string())),
        }
    }
    Err(SessionError::HandshakeFailed)
}

/// Send the stream configuration after the session opens
pub(super) async fn send_stream_config<S>(
    ws_sink: &mut S,
    end_utterance_silence_ms: u32,
) -> Result<(), String>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let msg = ClientMessage::Configure {
        end_utterance_silence_threshold: end_utterance_silence_ms,
    };
    let json = serde_json::to_string(&msg).map_err(|e| e.to_string())?;
    info!("Sending stream configuration: {}", json);

    ws_sink
        .send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

/// Spawn the send task that forwards audio chunks and keepalive pings
///
/// Exits on the terminate command (after putting the end-of-stream
/// message on the wire), when every outbound sender is gone, or on the
/// first transport failure. The sink is dropped without a close frame so
/// the service can still deliver its terminate confirmation.
pub(super) fn spawn_send_task<S>(
    mut ws_sink: S,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) -> tokio::task::JoinHandle<()>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let base64_engine = base64::engine::general_purpose::STANDARD;
        let mut chunks_sent = 0u64;

        let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                command = outbound_rx.recv() => match command {
                    Some(Outbound::Audio(chunk)) => {
                        chunks_sent += 1;
                        if chunks_sent == 1 || chunks_sent.is_multiple_of(100) {
                            debug!(
                                "Sending audio chunk #{} ({} samples)",
                                chunks_sent,
                                chunk.samples.len()
                            );
                        }
                        if send_audio_chunk(&mut ws_sink, &chunk, &base64_engine).await.is_err() {
                            error!("Failed to send audio chunk - stopping sender");
                            break;
                        }
                    }
                    Some(Outbound::Terminate) => {
                        info!("Sending terminate request after {} chunks", chunks_sent);
                        if let Err(e) = send_terminate(&mut ws_sink).await {
                            warn!("Failed to send terminate request: {}", e);
                        }
                        break;
                    }
                    None => {
                        debug!("Outbound channel closed after {} chunks", chunks_sent);
                        break;
                    }
                },
                _ = ping_interval.tick() => {
                    if ws_sink.send(Message::Ping(vec![])).await.is_err() {
                        warn!("Failed to send keepalive ping");
                        break;
                    }
                    trace!("Sent keepalive ping");
                }
            }
        }
    })
}

/// Send one audio chunk as a base64 PCM16 payload
async fn send_audio_chunk<S>(
    ws_sink: &mut S,
    chunk: &AudioChunk,
    base64_engine: &base64::engine::GeneralPurpose,
) -> Result<(), ()>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    // PCM16 little-endian bytes
    let bytes: Vec<u8> = chunk
        .samples
        .iter()
        .flat_map(|&s| s.to_le_bytes())
        .collect();

    let msg = ClientMessage::Audio {
        audio_data: base64_engine.encode(&bytes),
    };

    if let Ok(json) = serde_json::to_string(&msg) {
        ws_sink.send(Message::Text(json)).await.map_err(|_| ())?;
    }
    Ok(())
}

/// Send the end-of-stream request
async fn send_terminate<S>(ws_sink: &mut S) -> Result<(), String>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(&ClientMessage::terminate()).map_err(|e| e.to_string())?;
    ws_sink
        .send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

/// Spawn the receive task that handles incoming server messages
///
/// Fragments are applied to the assembler and rendered in arrival
/// order. Service errors are logged and do not stop the session;
/// in-flight fragments arriving after close() has been requested are
/// still processed, since the task only stops on the terminate
/// confirmation, a socket close, or a transport error.
pub(super) fn spawn_receive_task(
    mut ws_stream: impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send
        + 'static,
    assembler: Arc<Mutex<TranscriptAssembler>>,
) -> tokio::task::JoinHandle<ReceiveOutcome> {
    tokio::spawn(async move {
        while let Some(msg_result) = ws_stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    trace!("Service message: {}", text);
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if !handle_server_message(msg, &assembler) {
                                return ReceiveOutcome::Terminated;
                            }
                        }
                        Err(e) => warn!("Failed to parse service message: {} - {}", e, text),
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket closed by service");
                    return ReceiveOutcome::ConnectionClosed;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    trace!("WebSocket keepalive");
                }
                Ok(_) => {}
                Err(e) => {
                    error!("WebSocket receive error: {}", e);
                    return ReceiveOutcome::ReceiveError;
                }
            }
        }
        ReceiveOutcome::ConnectionClosed
    })
}

/// Apply one server message; returns false once the session terminated
fn handle_server_message(msg: ServerMessage, assembler: &Arc<Mutex<TranscriptAssembler>>) -> bool {
    if let Some(fragment) = msg.to_fragment() {
        let update = match assembler.lock() {
            Ok(mut assembler) => assembler.on_fragment(fragment),
            Err(poisoned) => poisoned.into_inner().on_fragment(fragment),
        };
        if let Some(update) = update {
            if let Err(e) = transcript::render_update(&mut io::stdout(), &update) {
                warn!("Display write failed: {}", e);
            }
        }
        return true;
    }

    match msg {
        ServerMessage::RealtimeError { error } => {
            // Non-fatal: report and keep the pipeline running.
            error!("Service error: {}", error);
            true
        }
        ServerMessage::SessionTerminated => {
            info!("Session terminated by service");
            false
        }
        ServerMessage::SessionBegins { session_id } => {
            debug!("Duplicate session-begins for {}", session_id);
            true
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_carries_sample_rate() {
        let url = build_stream_url("wss://api.example.com/v2/realtime/ws", 44_100);
        assert_eq!(url, "wss://api.example.com/v2/realtime/ws?sample_rate=44100");
    }

    #[test]
    fn stream_url_strips_trailing_slash() {
        let url = build_stream_url("wss://api.example.com/stream/", 16_000);
        assert!(!url.contains("//?"));
        assert!(url.ends_with("?sample_rate=16000"));
    }

    #[test]
    fn ws_request_has_upgrade_headers() {
        let request = build_ws_request("wss://api.example.com/ws?sample_rate=44100", "key").unwrap();
        assert_eq!(request.headers()["Host"], "api.example.com");
        assert_eq!(request.headers()["Authorization"], "key");
        assert_eq!(request.headers()["Upgrade"], "websocket");
        assert!(request.headers().contains_key("Sec-WebSocket-Key"));
    }

    #[test]
    fn ws_request_rejects_bad_url() {
        assert!(build_ws_request("not a url", "key").is_err());
    }

    #[test]
    fn fragments_reach_the_assembler_in_order() {
        let assembler = Arc::new(Mutex::new(TranscriptAssembler::new()));
        for msg in [
            ServerMessage::PartialTranscript {
                text: "hel".to_string(),
            },
            ServerMessage::FinalTranscript {
                text: "hello".to_string(),
            },
            ServerMessage::FinalTranscript {
                text: "world".to_string(),
            },
        ] {
            assert!(handle_server_message(msg, &assembler));
        }
        assert_eq!(assembler.lock().unwrap().lines(), ["hello", "world"]);
    }

    #[test]
    fn service_errors_do_not_stop_the_session() {
        let assembler = Arc::new(Mutex::new(TranscriptAssembler::new()));
        let keep_going = handle_server_message(
            ServerMessage::RealtimeError {
                error: "audio too quiet".to_string(),
            },
            &assembler,
        );
        assert!(keep_going);
        assert!(assembler.lock().unwrap().lines().is_empty());
    }

    #[test]
    fn terminate_confirmation_stops_the_session() {
        let assembler = Arc::new(Mutex::new(TranscriptAssembler::new()));
        assert!(!handle_server_message(
            ServerMessage::SessionTerminated,
            &assembler
        ));
    }

    #[test]
    fn fragment_after_close_request_is_still_recorded() {
        // The receive loop has no cutoff of its own: a final fragment
        // that arrives between the terminate request and the service's
        // confirmation still lands in the buffer.
        let assembler = Arc::new(Mutex::new(TranscriptAssembler::new()));
        assert!(handle_server_message(
            ServerMessage::FinalTranscript {
                text: "late final".to_string(),
            },
            &assembler
        ));
        assert!(!handle_server_message(
            ServerMessage::SessionTerminated,
            &assembler
        ));
        assert_eq!(assembler.lock().unwrap().lines(), ["late final"]);
    }
}
