//! Streaming session against the realtime transcription service
//!
//! Owns the connection lifecycle: connect (WebSocket handshake plus the
//! server-assigned session id), stream (forward captured audio), and
//! close (signal end-of-stream, drain the confirmation, persist the
//! transcript). A session moves through
//! `Unopened -> Open -> Streaming -> Closing -> Closed`; close() is
//! valid from any non-terminal state and is idempotent once closed.

mod connection;
mod error;
mod messages;

pub(crate) use error::SessionError;

use crate::audio::AudioChunk;
use crate::config::ApiKey;
use crate::storage::{self, StorageError};
use crate::transcript::TranscriptAssembler;
use connection::Outbound;
use error::{CLOSE_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, OPEN_TIMEOUT_SECS};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

/// Capacity of the outbound command channel
const OUTBOUND_CAPACITY: usize = 1000;

/// Lifecycle states of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Unopened,
    Open,
    Streaming,
    Closing,
    Closed,
}

/// Connection parameters for a streaming session
#[derive(Debug)]
pub(crate) struct SessionConfig {
    /// WebSocket endpoint of the transcription service
    pub endpoint: String,
    pub api_key: ApiKey,
    /// Sample rate the audio arrives at, in Hz
    pub sample_rate: u32,
    /// Silence duration after which the service finalizes an utterance
    pub end_utterance_silence_ms: u32,
    /// Where the transcript is written at close
    pub transcript_dir: PathBuf,
}

/// One streaming connection to the transcription service
///
/// Exactly one session exists per run. The id is assigned by the
/// service during connect() and stays inspectable after the session
/// closes.
pub(crate) struct StreamingSession {
    config: SessionConfig,
    state: SessionState,
    session_id: Option<String>,
    assembler: Arc<Mutex<TranscriptAssembler>>,
    outbound_tx: Option<mpsc::Sender<Outbound>>,
    send_task: Option<JoinHandle<()>>,
    recv_task: Option<JoinHandle<connection::ReceiveOutcome>>,
    forward_task: Option<JoinHandle<()>>,
}

impl StreamingSession {
    pub(crate) fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Unopened,
            session_id: None,
            assembler: Arc::new(Mutex::new(TranscriptAssembler::new())),
            outbound_tx: None,
            send_task: None,
            recv_task: None,
            forward_task: None,
        }
    }

    /// The server-assigned session id, if one was assigned
    ///
    /// Stays available after the session closes.
    #[allow(dead_code)]
    pub(crate) fn id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[allow(dead_code)]
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Perform the handshake and open the session
    ///
    /// Connects the WebSocket, waits for the service to assign a
    /// session id, sends the stream configuration, and spawns the send
    /// and receive tasks. On success the session is `Open` and its id
    /// is set.
    pub(crate) async fn connect(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Unopened {
            return Err(SessionError::ConnectionError(format!(
                "connect() is only valid on an unopened session (state: {:?})",
                self.state
            )));
        }

        let ws_url = connection::build_stream_url(&self.config.endpoint, self.config.sample_rate);
        info!("Connecting to {}", ws_url);

        let request = connection::build_ws_request(&ws_url, self.config.api_key.as_str())
            .map_err(SessionError::ConnectionError)?;

        let ws_stream = match timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect_async(request),
        )
        .await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => return Err(SessionError::ConnectionError(e.to_string())),
            Err(_) => return Err(SessionError::ConnectionTimeout),
        };

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let session_id = match timeout(
            Duration::from_secs(OPEN_TIMEOUT_SECS),
            connection::wait_for_session_id(&mut ws_stream),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(SessionError::ConnectionTimeout),
        };
        info!("Session opened: {}", session_id);

        connection::send_stream_config(&mut ws_sink, self.config.end_utterance_silence_ms)
            .await
            .map_err(SessionError::ConnectionError)?;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.send_task = Some(connection::spawn_send_task(ws_sink, outbound_rx));
        self.recv_task = Some(connection::spawn_receive_task(
            ws_stream,
            self.assembler.clone(),
        ));
        self.outbound_tx = Some(outbound_tx);
        self.session_id = Some(session_id);
        self.state = SessionState::Open;
        Ok(())
    }

    /// Begin forwarding captured audio to the service
    ///
    /// Non-blocking handoff: a forwarder task pumps chunks from the
    /// capture channel into the bounded outbound channel, so frame
    /// transmission runs concurrently with the caller. The forwarder
    /// exits on its own once capture stops and the channel drains.
    pub(crate) fn stream(&mut self, mut audio_rx: mpsc::Receiver<AudioChunk>) {
        if self.state != SessionState::Open {
            warn!("stream() ignored in state {:?}", self.state);
            return;
        }
        let Some(outbound_tx) = self.outbound_tx.clone() else {
            warn!("stream() with no active connection");
            return;
        };

        self.forward_task = Some(tokio::spawn(async move {
            let mut forwarded = 0u64;
            while let Some(chunk) = audio_rx.recv().await {
                if outbound_tx.send(Outbound::Audio(chunk)).await.is_err() {
                    debug!("Outbound channel closed - audio forwarder exiting");
                    break;
                }
                forwarded += 1;
            }
            debug!("Audio forwarder exited after {} chunks", forwarded);
        }));

        self.state = SessionState::Streaming;
        info!("Streaming audio to the service");
    }

    /// Close the session and persist the transcript
    ///
    /// Valid from any state. Signals end-of-stream, waits (bounded) for
    /// the service to confirm closure, force-terminates the connection
    /// on timeout, and then writes the transcript synchronously - by
    /// the time close() returns, the transcript is durably written or
    /// the failure has been reported. Returns the transcript path the
    /// first time one is written; repeat calls are no-ops.
    pub(crate) async fn close(&mut self) -> Option<PathBuf> {
        match self.state {
            SessionState::Closed => {
                debug!("close() on a closed session is a no-op");
                return None;
            }
            SessionState::Unopened => {
                self.state = SessionState::Closed;
                return self.persist_transcript();
            }
            _ => {}
        }

        self.state = SessionState::Closing;
        info!("Closing session");

        // End-of-stream: the send task puts the terminate request on
        // the wire and exits.
        if let Some(outbound_tx) = self.outbound_tx.take() {
            if outbound_tx.send(Outbound::Terminate).await.is_err() {
                warn!("Send task already stopped - terminate request not sent");
            }
        }

        // The forwarder is a pure pump with nothing left to drain once
        // the outbound channel is gone.
        if let Some(forward_task) = self.forward_task.take() {
            forward_task.abort();
        }

        // Wait for the service to confirm closure; in-flight fragments
        // keep landing in the assembler until the confirmation arrives.
        if let Some(mut recv_task) = self.recv_task.take() {
            match timeout(Duration::from_secs(CLOSE_TIMEOUT_SECS), &mut recv_task).await {
                Ok(Ok(outcome)) => info!("Session closed ({:?})", outcome),
                Ok(Err(e)) => warn!("Receive task failed: {}", e),
                Err(_) => {
                    warn!("Timed out waiting for close confirmation - terminating connection");
                    recv_task.abort();
                }
            }
        }

        // Normally finished by now; abort covers a stuck transport.
        if let Some(send_task) = self.send_task.take() {
            send_task.abort();
            let _ = send_task.await;
        }

        self.state = SessionState::Closed;
        self.persist_transcript()
    }

    /// Write the accumulated transcript; runs once per session
    fn persist_transcript(&self) -> Option<PathBuf> {
        let lines = match self.assembler.lock() {
            Ok(assembler) => assembler.lines().to_vec(),
            Err(poisoned) => poisoned.into_inner().lines().to_vec(),
        };

        match storage::persist(
            &self.config.transcript_dir,
            self.session_id.as_deref(),
            &lines,
        ) {
            Ok(path) => Some(path),
            Err(StorageError::NoSession) => {
                warn!("No session id assigned - transcript not saved");
                None
            }
            Err(e) => {
                error!("Failed to write transcript: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{Finality, TranscriptFragment};
    use std::fs;
    use std::path::Path;

    fn test_session(dir: &Path) -> StreamingSession {
        StreamingSession::new(SessionConfig {
            endpoint: "wss://example.test/ws".to_string(),
            api_key: ApiKey::new("test-key".to_string()),
            sample_rate: 44_100,
            end_utterance_silence_ms: 500,
            transcript_dir: dir.to_path_buf(),
        })
    }

    fn push_fragment(session: &StreamingSession, text: &str, finality: Finality) {
        session
            .assembler
            .lock()
            .unwrap()
            .on_fragment(TranscriptFragment {
                text: text.to_string(),
                finality,
            });
    }

    #[test]
    fn new_session_is_unopened_without_id() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        assert_eq!(session.state(), SessionState::Unopened);
        assert!(session.id().is_none());
    }

    #[tokio::test]
    async fn close_without_open_skips_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("transcripts");
        let mut session = test_session(&target);

        assert!(session.close().await.is_none());

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_persists_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = test_session(dir.path());
        session.state = SessionState::Open;
        session.session_id = Some("abc123".to_string());
        push_fragment(&session, "first", Finality::Final);

        let path = session.close().await.expect("first close persists");
        assert_eq!(path, dir.path().join("abc123.txt"));

        // A write between closes must not leak into the file: the
        // second close is a no-op.
        push_fragment(&session, "straggler", Finality::Final);
        assert!(session.close().await.is_none());

        assert_eq!(fs::read_to_string(&path).unwrap(), "first");
    }

    #[tokio::test]
    async fn interims_are_displayed_but_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = test_session(dir.path());
        session.state = SessionState::Open;
        session.session_id = Some("abc123".to_string());

        push_fragment(&session, "hel", Finality::Interim);
        push_fragment(&session, "hello", Finality::Interim);
        push_fragment(&session, "hello world", Finality::Final);

        let path = session.close().await.unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "hello world");
    }

    #[tokio::test]
    async fn interrupt_after_two_finals_persists_both() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = test_session(dir.path());
        session.state = SessionState::Streaming;
        session.session_id = Some("s-42".to_string());

        push_fragment(&session, "one", Finality::Final);
        push_fragment(&session, "two", Finality::Final);

        let path = session.close().await.unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "one\ntwo");
    }

    #[tokio::test]
    async fn id_stays_inspectable_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = test_session(dir.path());
        session.state = SessionState::Open;
        session.session_id = Some("abc123".to_string());

        session.close().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.id(), Some("abc123"));
    }

    #[test]
    fn stream_is_rejected_before_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = test_session(dir.path());
        let (_tx, rx) = mpsc::channel(1);

        session.stream(rx);

        assert_eq!(session.state(), SessionState::Unopened);
    }
}
