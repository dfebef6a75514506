//! Capture types and error definitions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// A fixed-size block of PCM audio ready for transmission
///
/// Samples are mono PCM 16-bit at the session sample rate
/// (44.1kHz unless configured otherwise).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// PCM 16-bit signed samples (mono)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Controls a running capture from outside the capture thread
///
/// The device callback checks an atomic flag on every invocation, so
/// stopping never races a frame in flight and never blocks on device I/O.
pub struct CaptureHandle {
    pub(super) is_capturing: Arc<AtomicBool>,
    pub(super) thread_handle: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stop capturing and wait for the capture thread to exit
    pub fn stop(&mut self) {
        self.is_capturing.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        info!("Audio capture stopped");
    }

    /// Check if currently capturing
    #[allow(dead_code)]
    pub fn is_capturing(&self) -> bool {
        self.is_capturing.load(Ordering::SeqCst)
    }
}

/// Errors that can occur while opening or running audio capture
#[derive(Debug, thiserror::Error)]
pub enum AudioCaptureError {
    #[error("No audio input device available")]
    NoInputDevice,

    #[error("Input device {0:?} is no longer available")]
    DeviceGone(String),

    #[error("No supported audio configuration found")]
    NoSupportedConfig,

    #[error("Audio configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio device error: {0}")]
    DeviceError(#[from] cpal::DevicesError),

    #[error("Audio stream error: {0}")]
    StreamError(#[from] cpal::BuildStreamError),

    #[error("Audio play error: {0}")]
    PlayError(#[from] cpal::PlayStreamError),
}
