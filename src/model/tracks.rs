//! Media track management
//!
//! Sinks are registered before the offer is created. Each inbound track is handed to the next
//! sink of the same kind that has not received a track yet, in registration order.

use str0m::media::MediaKind;
use tracing::{debug, warn};

use crate::error::WebrtcError;

/// An inbound media track announced by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Media line the track arrives on
    pub mid: String,
    pub kind: MediaKind,
}

/// Depacketized media for a track.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub mid: String,
    pub kind: MediaKind,
    pub data: Vec<u8>,
}

/// Consumer of an inbound track, e.g. a video surface or an audio output.
pub trait MediaSink: Send {
    fn add_track(&mut self, track: &Track);

    fn on_frame(&mut self, _frame: &MediaFrame) {}
}

pub fn kind_name(kind: MediaKind) -> &'static str {
    if kind == MediaKind::Video {
        "video"
    } else {
        "audio"
    }
}

/// Assignment state of a sink slot.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotState {
    /// Waiting for the next track of its kind
    Waiting,
    /// Owns the track on this mid
    Assigned(String),
}

struct SinkSlot {
    kind: MediaKind,
    sink: Box<dyn MediaSink>,
    state: SlotState,
}

/// Ordered sink slots, assigned independently per kind.
#[derive(Default)]
pub struct SinkTable {
    slots: Vec<SinkSlot>,
}

impl std::fmt::Debug for SinkTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|s| (kind_name(s.kind), &s.state)))
            .finish()
    }
}

impl SinkTable {
    pub fn add(&mut self, kind: MediaKind, sink: Box<dyn MediaSink>) {
        self.slots.push(SinkSlot {
            kind,
            sink,
            state: SlotState::Waiting,
        });
    }

    /// Kinds in registration order. One receive-only transceiver is requested per entry.
    pub fn kinds(&self) -> Vec<MediaKind> {
        self.slots.iter().map(|s| s.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn assigned(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Assigned(_)))
            .count()
    }

    /// Hands `track` to the first waiting slot of its kind and returns that slot's index.
    pub fn assign(&mut self, track: &Track) -> Result<usize, WebrtcError> {
        if let Some(index) = self
            .slots
            .iter()
            .position(|s| matches!(&s.state, SlotState::Assigned(mid) if *mid == track.mid))
        {
            debug!("Track on mid {} already assigned", track.mid);
            return Ok(index);
        }

        let Some((index, slot)) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.kind == track.kind && s.state == SlotState::Waiting)
        else {
            warn!(
                "Dropping {} track on mid {}: no free sink",
                kind_name(track.kind),
                track.mid
            );
            return Err(WebrtcError::TrackAssignmentOverflow(kind_name(track.kind)));
        };

        slot.sink.add_track(track);
        slot.state = SlotState::Assigned(track.mid.clone());
        Ok(index)
    }

    /// Forwards a frame to the sink owning its track. Returns false when no sink owns it.
    pub fn deliver(&mut self, frame: &MediaFrame) -> bool {
        match self
            .slots
            .iter_mut()
            .find(|s| matches!(&s.state, SlotState::Assigned(mid) if *mid == frame.mid))
        {
            Some(slot) => {
                slot.sink.on_frame(frame);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
