//! Ordered synthesis scheduler.
//!
//! Every submitted segment is dispatched to the synthesizer right away
//! (an optional `max_in_flight` cap holds the excess as Pending), but audio
//! is released strictly in sequence order: a finished task waits until every
//! lower sequence has reached a terminal state. Failed tasks are skipped once terminal.
//!
//! Completions come back as [`SpeechEvent::Synthesized`] tagged with the
//! generation they were dispatched under; [`OrderedScheduler::reset`] bumps
//! the generation so anything still in flight is ignored on arrival.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::audio::AudioBuffer;
use super::client::{RetryPolicy, SynthesisRequest, Synthesizer};
use super::event::{EventSender, SpeechEvent, SynthesisOutcome};
use super::segmenter::Segment;
use crate::config::TTSConfig;
use crate::error::SynthesisError;

#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    InFlight,
    Completed(AudioBuffer),
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed)
    }
}

struct SynthesisTask {
    sequence: u64,
    request: SynthesisRequest,
    state: TaskState,
    abort: Option<AbortHandle>,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Concurrent synthesis calls; 0 means unlimited.
    pub max_in_flight: usize,
    /// Bounded wait per task, retries included. Expiry fails the task.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 0,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&TTSConfig> for SchedulerSettings {
    fn from(config: &TTSConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight,
            timeout: config.timeout(),
            retry: config.retry.clone(),
        }
    }
}

pub struct OrderedScheduler {
    synthesizer: Arc<dyn Synthesizer>,
    settings: SchedulerSettings,
    events: EventSender,
    generation: u64,
    /// Ordered by sequence; the front is the drain cursor.
    tasks: VecDeque<SynthesisTask>,
    in_flight: usize,
    draining: bool,
}

impl OrderedScheduler {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, settings: SchedulerSettings, events: EventSender) -> Self {
        Self {
            synthesizer,
            settings,
            events,
            generation: 0,
            tasks: VecDeque::new(),
            in_flight: 0,
            draining: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Tasks not yet released to playback.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Lowest sequence not yet released.
    pub fn drain_cursor(&self) -> Option<u64> {
        self.tasks.front().map(|t| t.sequence)
    }

    pub fn state_of(&self, sequence: u64) -> Option<&TaskState> {
        self.tasks
            .iter()
            .find(|t| t.sequence == sequence)
            .map(|t| &t.state)
    }

    /// Queue a segment and dispatch it if a slot is free.
    pub fn submit(&mut self, segment: Segment, voice_type: &str, speed_ratio: f32) {
        let request = SynthesisRequest {
            text: segment.speakable_text().to_string(),
            voice_type: voice_type.to_string(),
            speed_ratio,
        };
        debug!("Segment {} queued: {:?}", segment.sequence, request.text);

        self.tasks.push_back(SynthesisTask {
            sequence: segment.sequence,
            request,
            state: TaskState::Pending,
            abort: None,
        });
        self.dispatch_pending();
    }

    /// Record a completion and return the audio now releasable, in order.
    pub fn on_outcome(&mut self, outcome: SynthesisOutcome) -> Vec<AudioBuffer> {
        if outcome.generation != self.generation {
            debug!(
                "Discarding stale result for segment {} (generation {} != {})",
                outcome.sequence, outcome.generation, self.generation
            );
            return Vec::new();
        }

        let Some(task) = self.tasks.iter_mut().find(|t| t.sequence == outcome.sequence) else {
            debug!("No task for segment {}, ignoring result", outcome.sequence);
            return Vec::new();
        };
        if task.state != TaskState::InFlight {
            return Vec::new();
        }

        task.abort = None;
        task.state = match outcome.result {
            Ok(audio) => TaskState::Completed(audio),
            Err(e) => {
                warn!("Synthesis failed for segment {}: {e}", task.sequence);
                TaskState::Failed
            }
        };
        self.in_flight = self.in_flight.saturating_sub(1);

        self.dispatch_pending();
        self.drain()
    }

    /// Abandon every task. Safe while calls are in flight.
    pub fn reset(&mut self) {
        self.generation += 1;
        let abandoned = self.tasks.len();
        for task in self.tasks.drain(..) {
            if let Some(handle) = task.abort {
                handle.abort();
            }
        }
        self.in_flight = 0;
        if abandoned > 0 {
            info!("Scheduler reset: abandoned {abandoned} task(s)");
        }
    }

    fn dispatch_pending(&mut self) {
        let limit = match self.settings.max_in_flight {
            0 => usize::MAX,
            n => n,
        };
        for idx in 0..self.tasks.len() {
            if self.in_flight >= limit {
                break;
            }
            if self.tasks[idx].state == TaskState::Pending {
                self.dispatch(idx);
            }
        }
    }

    fn dispatch(&mut self, idx: usize) {
        let synthesizer = Arc::clone(&self.synthesizer);
        let events = self.events.clone();
        let retry = self.settings.retry.clone();
        let timeout = self.settings.timeout;
        let generation = self.generation;

        let task = &mut self.tasks[idx];
        let sequence = task.sequence;
        let request = task.request.clone();

        let handle = tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, retry.synthesize(synthesizer.as_ref(), &request)).await {
                Ok(result) => result,
                Err(_) => Err(SynthesisError::Timeout(timeout)),
            };
            // The controller may already be gone; nothing to report to then.
            let _ = events.send(SpeechEvent::Synthesized(SynthesisOutcome {
                generation,
                sequence,
                result,
            }));
        });

        task.state = TaskState::InFlight;
        task.abort = Some(handle.abort_handle());
        self.in_flight += 1;
    }

    /// Pop every terminal task at the front of the queue.
    fn drain(&mut self) -> Vec<AudioBuffer> {
        if self.draining {
            return Vec::new();
        }
        self.draining = true;

        let mut ready = Vec::new();
        while self.tasks.front().is_some_and(|t| t.state.is_terminal()) {
            let Some(task) = self.tasks.pop_front() else {
                break;
            };
            match task.state {
                TaskState::Completed(audio) => {
                    debug!("Releasing segment {} to playback", task.sequence);
                    ready.push(audio);
                }
                _ => debug!("Skipping failed segment {}", task.sequence),
            }
        }

        self.draining = false;
        ready
    }
}
