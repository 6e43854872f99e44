//! Client transport for remote-rendered VR sessions.
//!
//! Negotiates a WebRTC session with a render server, receives its video and audio tracks and
//! streams headset input back over a single reliable data channel shared with wallet traffic.
//! The WebRTC stack is [str0m](https://docs.rs/str0m), driven from a tokio task.

pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod model;
pub mod peer;
pub mod pose;
pub mod signaling;
pub mod stats;
pub mod transport;
pub mod util;
pub mod wallet;

pub use connection::{ConnectionManager, SessionPlan};
pub use error::{Result, WebrtcError};
