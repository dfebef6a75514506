use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio capture error: {0}")]
    Audio(#[from] crate::audio::AudioCaptureError),

    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),
}
