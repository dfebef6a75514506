//! Wire message types for the realtime transcription service
//!
//! Everything on the socket is a JSON text frame. Server messages are
//! tagged by `message_type`; client messages are bare objects whose
//! shape identifies them (audio payload, stream configuration, or the
//! terminate request).

use crate::transcript::{Finality, TranscriptFragment};
use serde::{Deserialize, Serialize};

/// Messages sent to the service
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum ClientMessage {
    /// PCM16 audio payload, base64-encoded
    Audio { audio_data: String },
    /// Adjust how much trailing silence ends an utterance (milliseconds)
    Configure {
        end_utterance_silence_threshold: u32,
    },
    /// Ask the service to finalize and close the session
    Terminate { terminate_session: bool },
}

impl ClientMessage {
    /// The end-of-stream request
    pub(crate) fn terminate() -> Self {
        ClientMessage::Terminate {
            terminate_session: true,
        }
    }
}

/// Messages received from the service
#[derive(Debug, Deserialize)]
#[serde(tag = "message_type")]
pub(crate) enum ServerMessage {
    /// Handshake completed; carries the server-assigned session id
    SessionBegins { session_id: String },
    /// Revisable transcript for the utterance in progress
    PartialTranscript {
        #[serde(default)]
        text: String,
    },
    /// Stabilized transcript for a finished utterance
    FinalTranscript {
        #[serde(default)]
        text: String,
    },
    /// Service is done; no further transcript messages will arrive
    SessionTerminated,
    /// Non-fatal diagnostic from the service
    RealtimeError { error: String },
    /// Catch-all for message types this client does not act on
    #[serde(other)]
    Other,
}

impl ServerMessage {
    /// Extract a transcript fragment, if this message carries one
    ///
    /// Empty transcripts are discarded here so they never reach the
    /// assembler.
    pub(crate) fn to_fragment(&self) -> Option<TranscriptFragment> {
        let (text, finality) = match self {
            ServerMessage::PartialTranscript { text } => (text, Finality::Interim),
            ServerMessage::FinalTranscript { text } => (text, Finality::Final),
            _ => return None,
        };
        if text.is_empty() {
            return None;
        }
        Some(TranscriptFragment {
            text: text.clone(),
            finality,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_message_serializes_as_bare_object() {
        let msg = ClientMessage::Audio {
            audio_data: "cGNtMTY=".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"audio_data":"cGNtMTY="}"#);
    }

    #[test]
    fn configure_message_carries_threshold() {
        let msg = ClientMessage::Configure {
            end_utterance_silence_threshold: 500,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"end_utterance_silence_threshold":500}"#);
    }

    #[test]
    fn terminate_message_serialization() {
        let json = serde_json::to_string(&ClientMessage::terminate()).unwrap();
        assert_eq!(json, r#"{"terminate_session":true}"#);
    }

    #[test]
    fn session_begins_deserialization() {
        let json = r#"{"message_type": "SessionBegins", "session_id": "abc123", "expires_at": "2026-01-01T00:00:00Z"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::SessionBegins { session_id } => assert_eq!(session_id, "abc123"),
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn partial_becomes_interim_fragment() {
        let json = r#"{"message_type": "PartialTranscript", "text": "hel"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let fragment = msg.to_fragment().unwrap();
        assert_eq!(fragment.finality, Finality::Interim);
        assert_eq!(fragment.text, "hel");
    }

    #[test]
    fn final_becomes_final_fragment() {
        let json = r#"{"message_type": "FinalTranscript", "text": "hello world", "confidence": 0.97}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let fragment = msg.to_fragment().unwrap();
        assert_eq!(fragment.finality, Finality::Final);
        assert_eq!(fragment.text, "hello world");
    }

    #[test]
    fn empty_transcripts_yield_no_fragment() {
        let partial: ServerMessage =
            serde_json::from_str(r#"{"message_type": "PartialTranscript", "text": ""}"#).unwrap();
        assert!(partial.to_fragment().is_none());

        let fin: ServerMessage =
            serde_json::from_str(r#"{"message_type": "FinalTranscript"}"#).unwrap();
        assert!(fin.to_fragment().is_none());
    }

    #[test]
    fn unknown_message_types_are_tolerated() {
        let json = r#"{"message_type": "SomethingNew", "payload": 1}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::Other));
        assert!(msg.to_fragment().is_none());
    }

    #[test]
    fn session_terminated_deserialization() {
        let json = r#"{"message_type": "SessionTerminated"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::SessionTerminated));
    }
}
