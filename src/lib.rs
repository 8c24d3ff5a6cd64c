//! realtime-tts: token-to-speech streaming for character chat replies.

pub mod config;
pub mod error;
pub mod reply_speaker;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use error::{ControlError, PlaybackError, SynthesisError};
pub use reply_speaker::controller::{
    SessionId, SpeechController, SpeechHandle, SpeechSettings, SpeechStatus, SubscriptionId,
};
