//! Sample processing between the device callback and the outbound channel
//!
//! Converts incoming frames to mono, resamples to the session rate when
//! the device could not be opened at that rate, and cuts the result into
//! fixed-size chunks for the WebSocket sender.

use super::types::AudioChunk;
use rubato::{Resampler, SincFixedIn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Chunk duration of 100ms, expressed in samples at the given rate
pub(super) fn chunk_samples(sample_rate: u32) -> usize {
    (sample_rate / 10) as usize
}

/// Shared sample pipeline state, cloned into the device callback
///
/// All buffers sit behind mutexes because cpal invokes the callback on
/// its own realtime thread.
#[derive(Clone)]
pub(super) struct Chunker {
    /// Samples awaiting resampling, at the device rate
    input_buffer: Arc<Mutex<Vec<i16>>>,
    /// Samples at the session rate, awaiting chunking
    output_buffer: Arc<Mutex<Vec<i16>>>,
    resampler: Option<Arc<Mutex<SincFixedIn<f32>>>>,
    /// Input samples consumed per resampler pass
    input_chunk_size: usize,
    /// Output samples per emitted chunk
    chunk_size: usize,
    target_sample_rate: u32,
}

impl Chunker {
    pub(super) fn new(
        resampler: Option<SincFixedIn<f32>>,
        input_chunk_size: usize,
        target_sample_rate: u32,
    ) -> Self {
        let chunk_size = chunk_samples(target_sample_rate);
        Self {
            input_buffer: Arc::new(Mutex::new(Vec::with_capacity(input_chunk_size * 2))),
            output_buffer: Arc::new(Mutex::new(Vec::with_capacity(chunk_size * 2))),
            resampler: resampler.map(|r| Arc::new(Mutex::new(r))),
            input_chunk_size,
            chunk_size,
            target_sample_rate,
        }
    }

    /// Feed one callback's worth of interleaved samples through the pipeline
    pub(super) fn push(&self, data: &[i16], channels: usize, sender: &mpsc::Sender<AudioChunk>) {
        let mono = downmix(data, channels);
        if self.resampler.is_some() {
            self.resample(&mono);
        } else if let Ok(mut output) = self.output_buffer.lock() {
            output.extend(&mono);
        }
        self.drain_chunks(sender);
    }

    /// Run buffered input through the resampler in fixed-size passes
    fn resample(&self, mono: &[i16]) {
        let Some(resampler_arc) = &self.resampler else {
            return;
        };
        let Ok(mut input) = self.input_buffer.lock() else {
            return;
        };
        input.extend(mono);

        while input.len() >= self.input_chunk_size {
            let pass: Vec<f32> = input
                .drain(..self.input_chunk_size)
                .map(|s| s as f32 / 32768.0)
                .collect();

            let Ok(mut resampler) = resampler_arc.lock() else {
                return;
            };
            match resampler.process(&[pass], None) {
                Ok(resampled) => {
                    let out: Vec<i16> = resampled[0]
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                        .collect();
                    if let Ok(mut output) = self.output_buffer.lock() {
                        output.extend(&out);
                    }
                }
                Err(e) => error!("Resampling error: {}", e),
            }
        }
    }

    /// Emit complete chunks from the output buffer
    ///
    /// try_send keeps the device callback from ever blocking; a full
    /// channel drops the chunk with a warning.
    fn drain_chunks(&self, sender: &mpsc::Sender<AudioChunk>) {
        let Ok(mut output) = self.output_buffer.lock() else {
            return;
        };
        while output.len() >= self.chunk_size {
            let samples: Vec<i16> = output.drain(..self.chunk_size).collect();
            let chunk = AudioChunk {
                samples,
                sample_rate: self.target_sample_rate,
            };
            if let Err(e) = sender.try_send(chunk) {
                warn!("Audio buffer overflow - chunk dropped: {}", e);
                return;
            }
        }
    }
}

/// Average interleaved channels down to mono
fn downmix(data: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}
