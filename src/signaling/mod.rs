//! Signaling with the rendezvous service
//!
//! Three JSON messages are exchanged, each tagged with the session id:
//!
//! ```text
//! {"type":"offer",     "sessionId":…, "sdp":…}
//! {"type":"answer",    "sessionId":…, "sdp":…}
//! {"type":"candidate", "sessionId":…, "candidate":…, "sdpMid":…, "sdpMLineIndex":…}
//! ```
//!
//! The direct WebSocket variant and the polled HTTP relay variant carry the same messages.

pub mod http;
pub mod websocket;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::events::SignalingEvent;
use crate::model::session::{IceCandidate, SessionId};

pub use http::HttpSignaling;
pub use websocket::WebSocketSignaling;

/// Which signaling variant to use, normally decided by server config discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SignalingMode {
    #[value(name = "websocket")]
    WebSocket,
    #[value(name = "http")]
    HttpRelay,
}

/// Wire form of a signaling message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        sdp: String,
    },
    Answer {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        sdp: String,
    },
    Candidate {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        candidate: String,
        #[serde(rename = "sdpMid")]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex")]
        sdp_m_line_index: Option<u16>,
    },
}

impl SignalMessage {
    pub fn offer(session_id: &SessionId, sdp: &str) -> Self {
        SignalMessage::Offer {
            session_id: session_id.clone(),
            sdp: sdp.to_string(),
        }
    }

    pub fn candidate(session_id: &SessionId, candidate: &IceCandidate) -> Self {
        SignalMessage::Candidate {
            session_id: session_id.clone(),
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_m_line_index: candidate.sdp_m_line_index,
        }
    }

    /// Converts an inbound message into an event. We are always the offering side, so
    /// offers coming back are ignored.
    pub fn into_event(self) -> Option<SignalingEvent> {
        match self {
            SignalMessage::Offer { session_id, .. } => {
                debug!("Ignoring offer for session {}", session_id);
                None
            }
            SignalMessage::Answer { session_id, sdp } => {
                Some(SignalingEvent::Answer { session_id, sdp })
            }
            SignalMessage::Candidate {
                session_id,
                candidate,
                sdp_mid,
                sdp_m_line_index,
            } => Some(SignalingEvent::Candidate {
                session_id,
                candidate: IceCandidate::new(candidate, sdp_mid, sdp_m_line_index),
            }),
        }
    }
}

/// Capability set of a rendezvous transport.
///
/// `next_event` must be cancel safe; the connection manager polls it inside `select!`.
#[async_trait]
pub trait SignalingChannel: Send {
    /// Connects to the service. Failure is reported as `SignalingUnavailable`.
    async fn start(&mut self) -> Result<()>;

    /// Disconnects without waiting for in-flight requests.
    fn stop(&mut self);

    async fn send_offer(&mut self, session_id: &SessionId, sdp: &str) -> Result<()>;

    async fn send_candidate(&mut self, session_id: &SessionId, candidate: &IceCandidate)
        -> Result<()>;

    /// Next answer or candidate. `None` once the channel is stopped or the service went away.
    async fn next_event(&mut self) -> Option<SignalingEvent>;
}
