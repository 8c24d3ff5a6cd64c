//! Decoded audio buffers and payload decoding.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use rodio::{Decoder, Source};

use crate::error::SynthesisError;

/// One segment's decoded audio: interleaved f32 samples.
///
/// Cloning is cheap; the samples are shared.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() / usize::from(self.channels);
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

/// Decode a complete encoded payload (mp3, wav, ...) into samples.
///
/// CPU-bound; call from `spawn_blocking` for large payloads.
pub fn decode_audio(bytes: Vec<u8>) -> Result<AudioBuffer, SynthesisError> {
    if bytes.is_empty() {
        return Err(SynthesisError::EmptyPayload);
    }

    let decoder =
        Decoder::new(Cursor::new(bytes)).map_err(|e| SynthesisError::Decode(e.to_string()))?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<f32> = decoder.collect();

    if samples.is_empty() {
        return Err(SynthesisError::Decode("payload contains no audio frames".into()));
    }

    Ok(AudioBuffer::new(samples, sample_rate, channels))
}

/// [`decode_audio`] on the blocking pool.
pub async fn decode_audio_blocking(bytes: Vec<u8>) -> Result<AudioBuffer, SynthesisError> {
    tokio::task::spawn_blocking(move || decode_audio(bytes))
        .await
        .map_err(|e| SynthesisError::Decode(format!("decoder task failed: {e}")))?
}
