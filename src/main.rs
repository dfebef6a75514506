#![deny(clippy::all)]

mod audio;
mod config;
mod error;
mod session;
mod storage;
mod transcript;

use config::Settings;
use error::AppError;
use session::{SessionConfig, StreamingSession};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    tracing_subscriber::fmt::init();

    // Pick up a local .env before reading the environment
    let _ = dotenvy::dotenv();

    let settings = Settings::load()?;
    run(settings).await?;
    Ok(())
}

/// Capture, stream, wait for the interrupt, then shut down in order
async fn run(settings: Settings) -> Result<(), AppError> {
    // Resolve the configured capture device. No match falls back to the
    // default input device - loudly, since the user asked for a
    // specific one.
    let device = audio::resolve_device(&settings.device_prefix);
    match &device {
        Some(device) => info!("Selected input device #{}: {}", device.index, device.name),
        None => warn!(
            "No input device matching prefix {:?} - falling back to the default input device",
            settings.device_prefix
        ),
    }

    // A device that cannot be opened is fatal before any network work.
    let (mut capture_handle, audio_rx) = audio::start_capture(device, settings.sample_rate)?;

    let mut streaming_session = StreamingSession::new(SessionConfig {
        endpoint: settings.endpoint,
        api_key: settings.api_key,
        sample_rate: settings.sample_rate,
        end_utterance_silence_ms: settings.end_utterance_silence_ms,
        transcript_dir: storage::transcripts_dir(),
    });

    if let Err(e) = streaming_session.connect().await {
        capture_handle.stop();
        return Err(e.into());
    }

    streaming_session.stream(audio_rx);

    info!("Transcribing - press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for the interrupt signal: {}", e);
    }

    // Cancellation order: stop capture first, then close the session.
    // close() persists the transcript before it returns.
    info!("Interrupt received - closing session");
    capture_handle.stop();
    if let Some(path) = streaming_session.close().await {
        info!("Transcript saved to: {}", path.display());
    }

    Ok(())
}
