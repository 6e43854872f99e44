//! Connection lifecycle
//!
//! [`ConnectionManager`] owns at most one [`Session`] at a time and drives its handshake:
//!
//! ```text
//! start ─► SignalingStarted ─► OfferCreated ─► OfferSent ─► AnswerApplied ─► Connected
//!                                      ICE disconnected ─► Disconnected
//!                                                 close ─► Closed
//! ```
//!
//! All work happens on the task that owns the manager. [`ConnectionManager::next_incoming`]
//! waits for the next transport, signaling or stats input and
//! [`ConnectionManager::handle`] applies it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use str0m::media::MediaKind;
use tracing::{debug, info, warn};

use crate::channel::{ChannelMultiplexer, DataChannel, InputConsumer, ReadyState, WalletConsumer};
use crate::codec::WireMessage;
use crate::config::Config;
use crate::error::{Result, WebrtcError};
use crate::model::events::{
    IceState, LifecycleEvent, LifecycleObserver, NoopObserver, SignalingEvent, TransportEvent,
};
use crate::model::session::{ConnectionState, IceCandidate, PendingCandidates, SessionId};
use crate::model::tracks::{MediaSink, SinkTable};
use crate::signaling::{SignalingChannel, SignalingMode};
use crate::stats::{FrameRateGauge, StatsSampler};
use crate::transport::{Connector, PeerTransport};

/// Everything a session needs before its offer is created.
///
/// Sinks can only be added here, so the offer always declares a media line for each of them.
pub struct SessionPlan {
    mode: SignalingMode,
    metadata: Option<Value>,
    sinks: SinkTable,
}

impl SessionPlan {
    pub fn new(mode: SignalingMode) -> Self {
        Self {
            mode,
            metadata: None,
            sinks: SinkTable::default(),
        }
    }

    /// JSON appended to the offer as an `x=` line for the renderer.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Registers a sink and requests one receive-only media line of `kind` for it.
    pub fn add_media_sink(mut self, kind: MediaKind, sink: impl MediaSink + 'static) -> Self {
        self.sinks.add(kind, Box::new(sink));
        self
    }

    pub fn video_sink(self, sink: impl MediaSink + 'static) -> Self {
        self.add_media_sink(MediaKind::Video, sink)
    }

    pub fn audio_sink(self, sink: impl MediaSink + 'static) -> Self {
        self.add_media_sink(MediaKind::Audio, sink)
    }

    pub fn mode(&self) -> SignalingMode {
        self.mode
    }
}

/// Appends the metadata line to an offer. The local description keeps the bare offer.
pub fn offer_with_metadata(sdp: &str, metadata: Option<&Value>) -> String {
    match metadata {
        Some(value) => format!("{sdp}x={value}\n"),
        None => sdp.to_string(),
    }
}

/// One connection attempt and its lifetime.
struct Session {
    id: SessionId,
    peer: Box<dyn PeerTransport>,
    signaling: Box<dyn SignalingChannel>,
    signaling_live: bool,
    mux: ChannelMultiplexer,
    sinks: SinkTable,
    pending: PendingCandidates,
    local_sdp: Option<String>,
    remote_sdp: Option<String>,
}

impl Session {
    fn shutdown(&mut self) {
        self.peer.close();
        self.signaling.stop();
        self.signaling_live = false;
        self.sinks.clear();
    }
}

/// Input for [`ConnectionManager::handle`].
#[derive(Debug)]
pub enum Incoming {
    /// `None` when the transport has stopped producing events.
    Transport(Option<TransportEvent>),
    /// `None` when the signaling channel went away.
    Signaling(Option<SignalingEvent>),
    StatsTick,
}

pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    channel_label: String,
    state: ConnectionState,
    session: Option<Session>,
    sampler: StatsSampler,
    observer: Arc<dyn LifecycleObserver>,
    input: Option<Arc<dyn InputConsumer>>,
    wallet: Option<Arc<dyn WalletConsumer>>,
}

impl ConnectionManager {
    pub fn new(connector: Box<dyn Connector>, config: &Config) -> Self {
        Self::with_settings(connector, &config.channel_label, config.stats_interval)
    }

    pub fn with_settings(
        connector: Box<dyn Connector>,
        channel_label: &str,
        stats_interval: Duration,
    ) -> Self {
        Self {
            connector,
            channel_label: channel_label.to_string(),
            state: ConnectionState::Idle,
            session: None,
            sampler: StatsSampler::new(stats_interval),
            observer: Arc::new(NoopObserver),
            input: None,
            wallet: None,
        }
    }

    pub fn set_observer(&mut self, observer: Arc<dyn LifecycleObserver>) {
        self.observer = observer;
    }

    /// Takes effect from the next `start`.
    pub fn set_input_consumer(&mut self, consumer: Arc<dyn InputConsumer>) {
        self.input = Some(consumer);
    }

    /// Takes effect from the next `start`.
    pub fn set_wallet_consumer(&mut self, consumer: Arc<dyn WalletConsumer>) {
        self.wallet = Some(consumer);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.id)
    }

    pub fn local_description(&self) -> Option<&str> {
        self.session.as_ref()?.local_sdp.as_deref()
    }

    pub fn remote_description(&self) -> Option<&str> {
        self.session.as_ref()?.remote_sdp.as_deref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.pending.len())
    }

    pub fn channel_state(&self) -> ReadyState {
        self.session
            .as_ref()
            .map_or(ReadyState::Closed, |s| s.mux.ready_state())
    }

    pub fn frame_rate(&self) -> FrameRateGauge {
        self.sampler.gauge()
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("Connection state {:?} -> {:?}", self.state, next);
            self.state = next;
            self.observer.on_event(&LifecycleEvent::StateChanged(next));
        }
    }

    /// Opens a new session and sends its offer.
    ///
    /// Any open session is closed first. On failure everything acquired so far is released
    /// and the manager ends up `Closed`.
    pub async fn start(&mut self, plan: SessionPlan) -> Result<SessionId> {
        if self.session.is_some() {
            info!("Closing current session before starting a new one");
            self.close();
        }

        let SessionPlan {
            mode,
            metadata,
            sinks,
        } = plan;

        match self.open_session(mode, metadata, sinks).await {
            Ok(id) => Ok(id),
            Err(e) => {
                warn!("Session start failed: {}", e);
                self.teardown(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    async fn open_session(
        &mut self,
        mode: SignalingMode,
        metadata: Option<Value>,
        sinks: SinkTable,
    ) -> Result<SessionId> {
        let mut peer = self.connector.peer().await?;
        let channel = match prepare_peer(peer.as_mut(), &sinks, &self.channel_label) {
            Ok(channel) => channel,
            Err(e) => {
                peer.close();
                return Err(e);
            }
        };

        let mut signaling = self.connector.signaling(mode);
        if let Err(e) = signaling.start().await {
            peer.close();
            signaling.stop();
            return Err(match e {
                WebrtcError::SignalingUnavailable(_) => e,
                other => WebrtcError::SignalingUnavailable(other.to_string()),
            });
        }

        let id = SessionId::generate();
        info!("Starting session {} over {:?} signaling", id, mode);
        let mux = ChannelMultiplexer::new(channel)
            .with_input(self.input.clone())
            .with_wallet(self.wallet.clone());
        self.session = Some(Session {
            id: id.clone(),
            peer,
            signaling,
            signaling_live: true,
            mux,
            sinks,
            pending: PendingCandidates::default(),
            local_sdp: None,
            remote_sdp: None,
        });
        self.set_state(ConnectionState::SignalingStarted);

        let session = self.session_mut()?;
        let offer = session.peer.create_offer().await?;
        self.set_state(ConnectionState::OfferCreated);

        let session = self.session_mut()?;
        session.peer.set_local_description(&offer).await?;
        let wire_sdp = offer_with_metadata(&offer, metadata.as_ref());
        session.local_sdp = Some(offer);
        session
            .signaling
            .send_offer(&id, &wire_sdp)
            .await
            .map_err(|e| WebrtcError::SignalingUnavailable(e.to_string()))?;

        self.set_state(ConnectionState::OfferSent);
        self.sampler.start();
        Ok(id)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or(WebrtcError::ChannelNotReady(ReadyState::Closed))
    }

    /// Current session if `id` names it. Messages for any other session are dropped.
    fn session_for(&mut self, id: &SessionId) -> Option<&mut Session> {
        match self.session.as_mut() {
            Some(session) if session.id == *id => Some(session),
            _ => {
                debug!("Ignoring signaling for stale session {}", id);
                None
            }
        }
    }

    /// Applies the remote answer, then replays buffered candidates in arrival order.
    ///
    /// Observers see [`LifecycleEvent::Answered`] before the description is applied.
    pub async fn on_remote_answer(&mut self, session_id: &SessionId, sdp: &str) -> Result<()> {
        let state = self.state;
        if self.session_for(session_id).is_none() {
            return Ok(());
        }
        if state != ConnectionState::OfferSent {
            debug!("Ignoring answer in state {:?}", state);
            return Ok(());
        }

        self.observer
            .on_event(&LifecycleEvent::Answered(session_id.clone()));

        let session = self.session_mut()?;
        session.peer.set_remote_description(sdp).await?;
        session.remote_sdp = Some(sdp.to_string());
        self.set_state(ConnectionState::AnswerApplied);

        let session = self.session_mut()?;
        let buffered = session.pending.len();
        for candidate in session.pending.drain() {
            if let Err(e) = session.peer.add_ice_candidate(&candidate) {
                warn!("Dropping buffered candidate: {}", e);
            }
        }
        if buffered > 0 {
            debug!("Applied {} buffered candidates", buffered);
        }
        Ok(())
    }

    /// Applies a remote candidate, or buffers it until the answer has been applied.
    pub fn on_remote_candidate(&mut self, session_id: &SessionId, candidate: IceCandidate) {
        let Some(session) = self.session_for(session_id) else {
            return;
        };

        if session.remote_sdp.is_some() {
            if let Err(e) = session.peer.add_ice_candidate(&candidate) {
                warn!("Dropping remote candidate: {}", e);
            }
        } else {
            session.pending.push(candidate);
            debug!("Buffered remote candidate ({} pending)", session.pending.len());
        }
    }

    pub async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Answer { session_id, sdp } => {
                if let Err(e) = self.on_remote_answer(&session_id, &sdp).await {
                    warn!("Failed to apply answer: {}", e);
                }
            }
            SignalingEvent::Candidate {
                session_id,
                candidate,
            } => self.on_remote_candidate(&session_id, candidate),
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        let Some(session) = self.session.as_mut() else {
            debug!("Transport event without a session: {:?}", event);
            return;
        };

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if !session.signaling_live {
                    debug!("Signaling gone, not forwarding local candidate");
                    return;
                }
                if let Err(e) = session
                    .signaling
                    .send_candidate(&session.id, &candidate)
                    .await
                {
                    warn!("Failed to send local candidate: {}", e);
                }
            }
            TransportEvent::IceState(IceState::Checking) => debug!("ICE checking"),
            TransportEvent::IceState(IceState::Connected) => {
                let id = session.id.clone();
                if self.state == ConnectionState::AnswerApplied {
                    info!("Session {} connected", id);
                    self.set_state(ConnectionState::Connected);
                    self.observer.on_event(&LifecycleEvent::Connected(id));
                }
            }
            TransportEvent::IceState(IceState::Disconnected) => {
                info!("ICE disconnected, tearing down session {}", session.id);
                self.teardown(ConnectionState::Disconnected);
            }
            TransportEvent::Track(track) => {
                if let Ok(index) = session.sinks.assign(&track) {
                    info!("Track on mid {} assigned to sink {}", track.mid, index);
                }
            }
            TransportEvent::Media(frame) => {
                session.sinks.deliver(&frame);
            }
            TransportEvent::ChannelOpen => {
                let id = session.id.clone();
                self.observer.on_event(&LifecycleEvent::ChannelOpen(id));
            }
            TransportEvent::ChannelClosed => info!("Data channel closed"),
            TransportEvent::ChannelData(bytes) => {
                // Errors are logged by the multiplexer.
                let _ = session.mux.dispatch(&bytes);
            }
            TransportEvent::Closed => {
                warn!("Transport closed under session {}", session.id);
                self.teardown(ConnectionState::Disconnected);
            }
        }
    }

    /// Waits for the next input of the current session. Pending forever without a session.
    ///
    /// Cancel safe, so it can sit in a `select!` next to other work.
    pub async fn next_incoming(&mut self) -> Incoming {
        let Some(session) = self.session.as_mut() else {
            return std::future::pending().await;
        };
        let sampler = &mut self.sampler;

        tokio::select! {
            event = session.peer.next_event() => Incoming::Transport(event),
            event = session.signaling.next_event(), if session.signaling_live => {
                Incoming::Signaling(event)
            }
            _ = sampler.tick() => Incoming::StatsTick,
        }
    }

    pub async fn handle(&mut self, incoming: Incoming) {
        match incoming {
            Incoming::Transport(Some(event)) => self.handle_transport_event(event).await,
            Incoming::Transport(None) => self.handle_transport_event(TransportEvent::Closed).await,
            Incoming::Signaling(Some(event)) => self.handle_signaling_event(event).await,
            Incoming::Signaling(None) => {
                if let Some(session) = self.session.as_mut() {
                    info!("Signaling closed for session {}", session.id);
                    session.signaling_live = false;
                }
            }
            Incoming::StatsTick => {
                self.sample_stats();
            }
        }
    }

    /// Runs one `next_incoming` / `handle` round.
    pub async fn step(&mut self) {
        let incoming = self.next_incoming().await;
        self.handle(incoming).await;
    }

    /// Samples transport stats into the frame rate gauge.
    pub fn sample_stats(&mut self) -> Option<f64> {
        let session = self.session.as_ref()?;
        Some(self.sampler.record(&session.peer.stats()))
    }

    /// Sends a message on the data channel. Dropped and logged unless the channel is open.
    pub fn send(&mut self, message: impl Into<WireMessage>) -> Result<()> {
        let message = message.into();
        match self.session.as_mut() {
            Some(session) => session.mux.send_message(&message),
            None => {
                warn!("Dropping {:?} message, no session", message.domain());
                Err(WebrtcError::ChannelNotReady(ReadyState::Closed))
            }
        }
    }

    /// Ends the session. Safe to call in any state and any number of times.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed && self.session.is_none() {
            return;
        }
        self.teardown(ConnectionState::Closed);
    }

    /// Releases the session, if any, and notifies observers of its end exactly once.
    fn teardown(&mut self, next: ConnectionState) {
        self.sampler.stop();
        if let Some(mut session) = self.session.take() {
            session.shutdown();
            info!("Session {} torn down", session.id);
            self.set_state(next);
            self.observer
                .on_event(&LifecycleEvent::Disconnected(session.id));
        } else {
            self.set_state(next);
        }
    }
}

/// Declares media lines and the data channel. Must run before the offer is created.
fn prepare_peer(
    peer: &mut dyn PeerTransport,
    sinks: &SinkTable,
    label: &str,
) -> Result<Box<dyn DataChannel>> {
    for kind in sinks.kinds() {
        peer.add_transceiver(kind)?;
    }
    peer.data_channel(label)
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
    }
}
