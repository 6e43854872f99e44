//! Events flowing into and out of the connection manager.
//!
//! Transport and signaling events are inputs to the state machine. Lifecycle events are
//! its outputs, delivered to a [`LifecycleObserver`] in the order they happen.

use tokio::sync::mpsc;

use crate::model::session::{ConnectionState, IceCandidate, SessionId};
use crate::model::tracks::{MediaFrame, Track};

/// ICE connectivity as far as the session cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    Checking,
    Connected,
    Disconnected,
}

/// Something the peer transport produced.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local candidate was gathered and should be forwarded to the remote side.
    LocalCandidate(IceCandidate),

    IceState(IceState),

    /// A new inbound media track.
    Track(Track),

    /// Media for an already announced track.
    Media(MediaFrame),

    ChannelOpen,

    ChannelClosed,

    /// One message from the reliable data channel.
    ChannelData(Vec<u8>),

    /// The transport has shut down and will produce nothing more.
    Closed,
}

/// Something the rendezvous service delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Answer { session_id: SessionId, sdp: String },
    Candidate {
        session_id: SessionId,
        candidate: IceCandidate,
    },
}

impl SignalingEvent {
    /// Session the event is addressed to. Events for any other session are ignored.
    pub fn session_id(&self) -> &SessionId {
        match self {
            SignalingEvent::Answer { session_id, .. }
            | SignalingEvent::Candidate { session_id, .. } => session_id,
        }
    }
}

/// Notifications for collaborators outside the core (UI, CLI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    StateChanged(ConnectionState),

    /// An answer was observed. Fired before the remote description is applied so a UI can
    /// react optimistically.
    Answered(SessionId),

    Connected(SessionId),

    ChannelOpen(SessionId),

    /// The session was torn down. Fired at most once per session.
    Disconnected(SessionId),
}

pub trait LifecycleObserver: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

impl LifecycleObserver for mpsc::UnboundedSender<LifecycleEvent> {
    fn on_event(&self, event: &LifecycleEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(event.clone());
    }
}

/// Observer for callers that do not care.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {
    fn on_event(&self, _event: &LifecycleEvent) {}
}
