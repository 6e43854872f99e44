//! Peer transport capabilities consumed by the connection manager.
//!
//! [`crate::peer`] provides the str0m implementation. Tests plug in their own.

use async_trait::async_trait;
use str0m::media::MediaKind;

use crate::channel::DataChannel;
use crate::error::Result;
use crate::model::events::TransportEvent;
use crate::model::session::IceCandidate;
use crate::signaling::{SignalingChannel, SignalingMode};

/// Inbound RTP statistics for one media line.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRtpReport {
    pub kind: MediaKind,
    pub mid: String,
    /// Unset until the transport has measured a full window.
    pub frames_per_second: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub reports: Vec<InboundRtpReport>,
}

/// A single peer connection, always the offering side.
#[async_trait]
pub trait PeerTransport: Send {
    /// Declares a receive-only media line. Only effective before the offer is created.
    fn add_transceiver(&mut self, kind: MediaKind) -> Result<()>;

    /// Declares the reliable data channel and returns its handle.
    fn data_channel(&mut self, label: &str) -> Result<Box<dyn DataChannel>>;

    async fn create_offer(&mut self) -> Result<String>;

    async fn set_local_description(&mut self, sdp: &str) -> Result<()>;

    async fn set_remote_description(&mut self, sdp: &str) -> Result<()>;

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<()>;

    /// Drives the connection until it has something to report. Must be cancel safe.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    fn stats(&self) -> StatsSnapshot;

    fn close(&mut self);
}

/// Creates the per-session collaborators.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn peer(&self) -> Result<Box<dyn PeerTransport>>;

    fn signaling(&self, mode: SignalingMode) -> Box<dyn SignalingChannel>;
}
