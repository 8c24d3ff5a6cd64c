//! Playback engine: sequential, gapless-enough playback of decoded buffers.
//!
//! The engine owns the queue and the output device. It never blocks: a
//! buffer is handed to the [`AudioOutput`], which reports completion later
//! through a [`PlaybackDone`] token. Tokens that no longer match the current
//! buffer (after pause or stop) are ignored.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tracing::{debug, info, warn};

use super::audio::AudioBuffer;
use super::event::{EventSender, SpeechEvent};
use crate::error::PlaybackError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Completion signal for one buffer handed to an [`AudioOutput`].
#[derive(Debug)]
pub struct PlaybackDone {
    token: u64,
    events: EventSender,
}

impl PlaybackDone {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Report that the buffer played to the end.
    pub fn finish(self) {
        let _ = self.events.send(SpeechEvent::PlaybackFinished { token: self.token });
    }
}

/// An audio device that plays one buffer at a time.
pub trait AudioOutput: Send {
    /// Start playing `audio`, replacing anything still sounding. Call
    /// `done.finish()` when it ends naturally; never after `halt`.
    fn play(&mut self, audio: AudioBuffer, done: PlaybackDone) -> Result<(), PlaybackError>;

    /// Silence the current buffer immediately.
    fn halt(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

pub struct PlaybackEngine {
    output: Option<Box<dyn AudioOutput>>,
    events: EventSender,
    queue: VecDeque<AudioBuffer>,
    state: PlaybackState,
    current_token: Option<u64>,
    next_token: u64,
}

impl PlaybackEngine {
    /// A failed `output` leaves the engine without a device: buffers are
    /// dropped and `output_available` reports false.
    pub fn new(output: Result<Box<dyn AudioOutput>, PlaybackError>, events: EventSender) -> Self {
        let output = match output {
            Ok(o) => Some(o),
            Err(e) => {
                warn!("Audio output unavailable, speech will not be played: {e}");
                None
            }
        };
        Self {
            output,
            events,
            queue: VecDeque::new(),
            state: PlaybackState::Idle,
            current_token: None,
            next_token: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlaybackState::Paused
    }

    pub fn output_available(&self) -> bool {
        self.output.is_some()
    }

    /// Buffers waiting behind the one currently sounding.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn enqueue(&mut self, audio: AudioBuffer) {
        if self.output.is_none() {
            debug!("No audio output, dropping {:.1}s buffer", audio.duration().as_secs_f64());
            return;
        }
        self.queue.push_back(audio);
        if self.state == PlaybackState::Idle {
            self.start_next();
        }
    }

    /// Advance after the output finished the buffer started under `token`.
    pub fn on_finished(&mut self, token: u64) {
        if self.current_token != Some(token) {
            debug!("Ignoring finish for superseded buffer {token}");
            return;
        }
        self.current_token = None;
        if self.state == PlaybackState::Playing {
            self.start_next();
        }
    }

    /// Halt the sounding buffer; the rest of the queue is kept.
    pub fn pause(&mut self) {
        match self.state {
            PlaybackState::Playing => {
                if let Some(output) = self.output.as_mut() {
                    output.halt();
                }
                self.current_token = None;
                self.state = PlaybackState::Paused;
                info!("Playback paused ({} buffer(s) queued)", self.queue.len());
            }
            // Pausing between buffers holds audio that arrives before resume.
            PlaybackState::Idle => self.state = PlaybackState::Paused,
            PlaybackState::Paused => {}
        }
    }

    /// Continue with the next queued buffer.
    pub fn resume(&mut self) {
        if self.state == PlaybackState::Playing {
            return;
        }
        self.state = PlaybackState::Idle;
        self.start_next();
        if self.state == PlaybackState::Playing {
            info!("Playback resumed");
        }
    }

    /// Halt audio and discard everything queued.
    pub fn stop(&mut self) {
        if let Some(output) = self.output.as_mut() {
            if self.current_token.is_some() {
                output.halt();
            }
        }
        let dropped = self.queue.len();
        self.queue.clear();
        self.current_token = None;
        self.state = PlaybackState::Idle;
        if dropped > 0 {
            debug!("Playback stopped, discarded {dropped} queued buffer(s)");
        }
    }

    fn start_next(&mut self) {
        while let Some(audio) = self.queue.pop_front() {
            let Some(output) = self.output.as_mut() else {
                break;
            };

            let token = self.next_token;
            self.next_token += 1;
            let done = PlaybackDone {
                token,
                events: self.events.clone(),
            };

            match output.play(audio, done) {
                Ok(()) => {
                    self.current_token = Some(token);
                    self.state = PlaybackState::Playing;
                    return;
                }
                Err(PlaybackError::DeviceUnavailable(e)) => {
                    warn!("Audio device lost, playback disabled: {e}");
                    self.output = None;
                    self.queue.clear();
                }
                Err(e) => warn!("Skipping buffer: {e}"),
            }
        }

        self.current_token = None;
        self.state = PlaybackState::Idle;
    }
}

fn lock_sink(slot: &Mutex<Option<Sink>>) -> std::sync::MutexGuard<'_, Option<Sink>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Default system output through rodio.
pub struct RodioOutput {
    // rodio 0.21: the stream is the handle and must stay alive
    stream: OutputStream,
    active: Option<Arc<Mutex<Option<Sink>>>>,
}

impl RodioOutput {
    pub fn open_default() -> Result<Self, PlaybackError> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| PlaybackError::DeviceUnavailable(format!("failed to open audio output: {e}")))?;
        info!("Audio output opened");
        Ok(Self { stream, active: None })
    }
}

impl AudioOutput for RodioOutput {
    fn play(&mut self, audio: AudioBuffer, done: PlaybackDone) -> Result<(), PlaybackError> {
        self.halt();
        if audio.is_empty() {
            return Err(PlaybackError::Playback("buffer has no samples".into()));
        }

        let sink = Sink::connect_new(self.stream.mixer());
        sink.append(SamplesBuffer::new(
            audio.channels(),
            audio.sample_rate(),
            audio.samples().to_vec(),
        ));

        let active = Arc::new(Mutex::new(Some(sink)));
        self.active = Some(Arc::clone(&active));

        // Poll for completion; a halted sink is taken out of the slot and
        // never reports.
        tokio::task::spawn_blocking(move || loop {
            let finished = match lock_sink(&active).as_ref() {
                Some(sink) => sink.empty(),
                None => return,
            };
            if finished {
                lock_sink(&active).take();
                done.finish();
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        });
        Ok(())
    }

    fn halt(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(sink) = lock_sink(&active).take() {
                sink.stop();
            }
        }
    }
}
