//! Audio capture via cpal
//!
//! Captures from the selected input device (or the host default when
//! none was selected) on a dedicated thread, producing mono PCM16 chunks
//! at the session sample rate for the streaming session to forward.

mod chunker;
mod device;
mod types;

pub(crate) use device::{resolve_device, CaptureDevice};
pub(crate) use types::{AudioCaptureError, AudioChunk, CaptureHandle};

use chunker::Chunker;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use rubato::{SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Capacity of the chunk channel (100ms chunks, so roughly a minute)
const CHUNK_CHANNEL_CAPACITY: usize = 600;

/// Start audio capture on a dedicated thread
///
/// Opens `device` (or the default input device when `None` - the caller
/// is expected to have logged that fallback) and begins producing audio
/// chunks resampled to `target_sample_rate`.
///
/// # Returns
/// A tuple containing:
/// - `CaptureHandle` - used to stop capture from another thread of control
/// - `mpsc::Receiver<AudioChunk>` - receives chunks for streaming
///
/// # Errors
/// Fails with `AudioCaptureError` when the device cannot be opened, has
/// no usable configuration, or the stream cannot be started. Any of
/// these is fatal for the session: capture cannot proceed without a
/// working device.
pub(crate) fn start_capture(
    device: Option<CaptureDevice>,
    target_sample_rate: u32,
) -> Result<(CaptureHandle, mpsc::Receiver<AudioChunk>), AudioCaptureError> {
    let is_capturing = Arc::new(AtomicBool::new(true));
    let is_capturing_thread = is_capturing.clone();

    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

    // The stream must be built and kept alive on its own thread (cpal
    // streams are not Send). Startup errors are reported back through a
    // rendezvous channel so open failures surface to the caller instead
    // of dying inside the thread.
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    let thread_handle = thread::spawn(move || {
        run_capture(
            device,
            is_capturing_thread,
            chunk_tx,
            target_sample_rate,
            ready_tx,
        );
    });

    match ready_rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = thread_handle.join();
            return Err(e);
        }
        Err(_) => {
            let _ = thread_handle.join();
            return Err(AudioCaptureError::ConfigError(
                "capture thread exited before startup".to_string(),
            ));
        }
    }

    let handle = CaptureHandle {
        is_capturing,
        thread_handle: Some(thread_handle),
    };

    Ok((handle, chunk_rx))
}

/// Open the stream and keep it alive until capture is stopped
fn run_capture(
    device: Option<CaptureDevice>,
    is_capturing: Arc<AtomicBool>,
    chunk_tx: mpsc::Sender<AudioChunk>,
    target_sample_rate: u32,
    ready_tx: std::sync::mpsc::Sender<Result<(), AudioCaptureError>>,
) {
    let stream = match open_stream(device, is_capturing.clone(), chunk_tx, target_sample_rate) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    while is_capturing.load(Ordering::SeqCst) {
        thread::sleep(std::time::Duration::from_millis(100));
    }

    drop(stream);
}

/// Resolve the cpal device, pick a stream config, and start the stream
fn open_stream(
    device: Option<CaptureDevice>,
    is_capturing: Arc<AtomicBool>,
    chunk_tx: mpsc::Sender<AudioChunk>,
    target_sample_rate: u32,
) -> Result<cpal::Stream, AudioCaptureError> {
    let host = cpal::default_host();

    let cpal_device = match device {
        Some(selected) => host
            .input_devices()?
            .nth(selected.index)
            .ok_or(AudioCaptureError::DeviceGone(selected.name))?,
        None => host
            .default_input_device()
            .ok_or(AudioCaptureError::NoInputDevice)?,
    };

    let device_name = cpal_device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio input device: {}", device_name);

    let supported_configs = cpal_device
        .supported_input_configs()
        .map_err(|e| AudioCaptureError::ConfigError(e.to_string()))?;

    // Prefer a config that can open at the target rate; otherwise take
    // any supported rate and resample.
    let mut best_config = None;
    let mut found_target_rate = false;

    for config in supported_configs {
        if config.channels() == 0 {
            continue;
        }
        if config.min_sample_rate().0 <= target_sample_rate
            && config.max_sample_rate().0 >= target_sample_rate
        {
            best_config = Some(config.with_sample_rate(cpal::SampleRate(target_sample_rate)));
            found_target_rate = true;
            break;
        } else if best_config.is_none() {
            best_config = Some(config.with_max_sample_rate());
        }
    }

    let supported_config = best_config.ok_or(AudioCaptureError::NoSupportedConfig)?;

    if !found_target_rate {
        warn!(
            "{}Hz not supported by {}, capturing at {}Hz and resampling",
            target_sample_rate,
            device_name,
            supported_config.sample_rate().0
        );
    }

    let sample_format = supported_config.sample_format();
    let config: cpal::StreamConfig = supported_config.into();
    let device_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    info!("Audio config: {} channels, {} Hz", channels, device_rate);

    let chunker = build_chunker(device_rate, target_sample_rate)?;

    let err_callback = |err| {
        error!("Audio stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::I16 => cpal_device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                if !is_capturing.load(Ordering::SeqCst) {
                    return;
                }
                chunker.push(data, channels, &chunk_tx);
            },
            err_callback,
            None,
        )?,
        SampleFormat::F32 => cpal_device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                if !is_capturing.load(Ordering::SeqCst) {
                    return;
                }
                let samples: Vec<i16> = data
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                    .collect();
                chunker.push(&samples, channels, &chunk_tx);
            },
            err_callback,
            None,
        )?,
        other => {
            return Err(AudioCaptureError::UnsupportedFormat(format!("{:?}", other)));
        }
    };

    stream.play()?;
    info!("Audio capture started");

    Ok(stream)
}

/// Build the sample pipeline, with a resampler when the device rate
/// differs from the session rate
fn build_chunker(device_rate: u32, target_sample_rate: u32) -> Result<Chunker, AudioCaptureError> {
    if device_rate == target_sample_rate {
        return Ok(Chunker::new(
            None,
            chunker::chunk_samples(target_sample_rate),
            target_sample_rate,
        ));
    }

    info!(
        "Creating resampler: {} Hz -> {} Hz",
        device_rate, target_sample_rate
    );
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    // Input pass size chosen so each pass yields one output chunk.
    let output_chunk = chunker::chunk_samples(target_sample_rate);
    let input_frames =
        (output_chunk as f64 * device_rate as f64 / target_sample_rate as f64).ceil() as usize;

    let resampler = SincFixedIn::<f32>::new(
        target_sample_rate as f64 / device_rate as f64,
        2.0,
        params,
        input_frames,
        1, // mono
    )
    .map_err(|e| AudioCaptureError::ConfigError(format!("failed to create resampler: {}", e)))?;

    Ok(Chunker::new(
        Some(resampler),
        input_frames,
        target_sample_rate,
    ))
}
