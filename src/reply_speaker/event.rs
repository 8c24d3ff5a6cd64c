//! Completion events delivered back to the controller loop.

use tokio::sync::mpsc;

use super::audio::AudioBuffer;
use crate::error::SynthesisError;

/// Result of one synthesis task, tagged with the scheduler generation it
/// was dispatched under.
#[derive(Debug)]
pub struct SynthesisOutcome {
    pub generation: u64,
    pub sequence: u64,
    pub result: Result<AudioBuffer, SynthesisError>,
}

#[derive(Debug)]
pub enum SpeechEvent {
    Synthesized(SynthesisOutcome),
    /// The output finished the buffer started under `token`.
    PlaybackFinished { token: u64 },
}

pub type EventSender = mpsc::UnboundedSender<SpeechEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SpeechEvent>;
