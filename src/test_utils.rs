//! Shared fakes for pipeline tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{PlaybackError, SynthesisError};
use crate::reply_speaker::audio::AudioBuffer;
use crate::reply_speaker::client::{SynthesisRequest, Synthesizer};
use crate::reply_speaker::playback::{AudioOutput, PlaybackDone};

/// 16-bit mono PCM wrapped in a minimal RIFF/WAVE header.
pub fn wav_bytes(pcm: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (pcm.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in pcm {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// A tiny buffer whose samples all carry `marker`, so tests can tell
/// buffers apart after they pass through the pipeline.
pub fn marked(marker: u32) -> AudioBuffer {
    AudioBuffer::new(vec![marker as f32; 8], 24_000, 1)
}

pub fn marker(audio: &AudioBuffer) -> u32 {
    audio.samples().first().map(|s| *s as u32).unwrap_or(u32::MAX)
}

enum Script {
    Audio { marker: u32, delay_ms: u64 },
    Fail { delay_ms: u64 },
}

/// Synthesizer answering from a text → outcome table after a virtual delay.
#[derive(Default)]
pub struct ScriptedSynthesizer {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<SynthesisRequest>>,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio(mut self, text: &str, marker: u32, delay_ms: u64) -> Self {
        self.scripts.insert(text.to_string(), Script::Audio { marker, delay_ms });
        self
    }

    pub fn fail(mut self, text: &str, delay_ms: u64) -> Self {
        self.scripts.insert(text.to_string(), Script::Fail { delay_ms });
        self
    }

    pub fn calls(&self) -> Vec<SynthesisRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer, SynthesisError> {
        self.calls.lock().unwrap().push(request.clone());
        match self.scripts.get(&request.text) {
            Some(Script::Audio { marker, delay_ms }) => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                Ok(marked(*marker))
            }
            Some(Script::Fail { delay_ms }) => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                Err(SynthesisError::Status {
                    status: 500,
                    body: "scripted failure".into(),
                })
            }
            None => Err(SynthesisError::Status {
                status: 404,
                body: format!("no script for {:?}", request.text),
            }),
        }
    }
}

#[derive(Default)]
struct LogState {
    played: Vec<u32>,
    halts: usize,
    overlaps: usize,
    current: Option<PlaybackDone>,
}

/// What a [`RecordingOutput`] was asked to do.
#[derive(Clone, Default)]
pub struct PlaybackLog(Arc<Mutex<LogState>>);

impl PlaybackLog {
    pub fn played(&self) -> Vec<u32> {
        self.0.lock().unwrap().played.clone()
    }

    pub fn halts(&self) -> usize {
        self.0.lock().unwrap().halts
    }

    /// Plays started while another buffer was still sounding.
    pub fn overlaps(&self) -> usize {
        self.0.lock().unwrap().overlaps
    }

    /// End the sounding buffer now. False if nothing is sounding.
    pub fn finish_current(&self) -> bool {
        let done = self.0.lock().unwrap().current.take();
        match done {
            Some(done) => {
                done.finish();
                true
            }
            None => false,
        }
    }

    fn finish_token(&self, token: u64) {
        let done = {
            let mut state = self.0.lock().unwrap();
            match &state.current {
                Some(current) if current.token() == token => state.current.take(),
                _ => None,
            }
        };
        if let Some(done) = done {
            done.finish();
        }
    }
}

/// Output device that records markers instead of making sound.
pub struct RecordingOutput {
    log: PlaybackLog,
    auto_finish: Option<Duration>,
    fail_on: Option<u32>,
    unplugged: bool,
}

impl RecordingOutput {
    /// Buffers end only when the test calls [`PlaybackLog::finish_current`].
    pub fn manual() -> (Self, PlaybackLog) {
        Self::build(None)
    }

    /// Every buffer ends after `play_time` of (virtual) time.
    pub fn auto(play_time: Duration) -> (Self, PlaybackLog) {
        Self::build(Some(play_time))
    }

    fn build(auto_finish: Option<Duration>) -> (Self, PlaybackLog) {
        let log = PlaybackLog::default();
        let output = Self {
            log: log.clone(),
            auto_finish,
            fail_on: None,
            unplugged: false,
        };
        (output, log)
    }

    pub fn failing_on(mut self, marker: u32) -> Self {
        self.fail_on = Some(marker);
        self
    }

    pub fn unplugged(mut self) -> Self {
        self.unplugged = true;
        self
    }
}

impl AudioOutput for RecordingOutput {
    fn play(&mut self, audio: AudioBuffer, done: PlaybackDone) -> Result<(), PlaybackError> {
        if self.unplugged {
            return Err(PlaybackError::DeviceUnavailable("device unplugged".into()));
        }
        let m = marker(&audio);
        if self.fail_on == Some(m) {
            return Err(PlaybackError::Playback(format!("cannot play buffer {m}")));
        }

        let token = done.token();
        {
            let mut state = self.log.0.lock().unwrap();
            if state.current.is_some() {
                state.overlaps += 1;
            }
            state.played.push(m);
            state.current = Some(done);
        }

        if let Some(play_time) = self.auto_finish {
            let log = self.log.clone();
            tokio::spawn(async move {
                tokio::time::sleep(play_time).await;
                log.finish_token(token);
            });
        }
        Ok(())
    }

    fn halt(&mut self) {
        let mut state = self.log.0.lock().unwrap();
        state.current = None;
        state.halts += 1;
    }
}
