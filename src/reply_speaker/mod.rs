//! Reply Speaker: speaks an assistant reply while it is still streaming.
//!
//! Components:
//! - `segmenter`: markup filtering and sentence extraction from growing text
//! - `client` / `upstream`: remote synthesis over the HTTP relay or the provider WebSocket
//! - `scheduler`: parallel synthesis with in-order release
//! - `playback`: sequential playback on the output device (rodio)
//! - `controller`: session lifecycle, status observers, and the actor handle
//! - `voices`: voice catalog
//! - `api`: Axum HTTP control server

pub mod api;
pub mod audio;
pub mod client;
pub mod controller;
pub mod event;
pub mod playback;
pub mod scheduler;
pub mod segmenter;
pub mod upstream;
pub mod voices;
