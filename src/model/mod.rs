//! Data models for remote-rendering sessions
//!
//! Session identity and state, media sink slots, and the events exchanged between the
//! transport, signaling and the connection manager.

pub mod events;
pub mod session;
pub mod tracks;
