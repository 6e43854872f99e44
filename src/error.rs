//! Error taxonomy shared by the connection, codec and channel layers.
//!
//! Only [`WebrtcError::SignalingUnavailable`] and transport-level ICE failure tear a session
//! down. Everything else is logged where it happens and the session keeps running.

use thiserror::Error;

use crate::channel::ReadyState;
use crate::codec::DecodeError;

/// Errors that can occur while negotiating or running a remote-rendering session.
#[derive(Debug, Error)]
pub enum WebrtcError {
    /// The rendezvous service could not be reached. Fatal to `start()`.
    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    /// A signaling message could not be delivered after the channel was up.
    #[error("signaling error: {0}")]
    Signaling(String),

    /// An inbound binary message did not match the wire layout.
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] DecodeError),

    /// An outbound input event carried NaN or infinity. Nothing was sent.
    #[error("outbound input event carries a non-finite value")]
    NonFiniteInput,

    /// A send was attempted while the data channel was not open. The message was dropped.
    #[error("data channel not ready ({0:?})")]
    ChannelNotReady(ReadyState),

    /// An inbound track arrived with no free sink slot of its kind. The track was dropped.
    #[error("no free {0} sink for inbound track")]
    TrackAssignmentOverflow(&'static str),

    /// A wallet provider call failed. Converted to a text response at the wallet boundary.
    #[error("wallet call failed: {0}")]
    WalletCallFailed(String),

    /// SDP could not be produced, parsed or applied.
    #[error("sdp error: {0}")]
    Sdp(String),

    /// An ICE candidate could not be parsed or created.
    #[error("ice error: {0}")]
    Ice(String),

    /// Error reported by the str0m state machine.
    #[error("webrtc error: {0}")]
    Rtc(#[from] str0m::RtcError),

    /// Socket level failure.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// HTTP failure talking to the config or relay endpoints.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
}

impl WebrtcError {
    /// Whether this error ends the session it happened in.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, WebrtcError::SignalingUnavailable(_))
    }
}

pub type Result<T, E = WebrtcError> = std::result::Result<T, E>;
