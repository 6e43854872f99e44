//! str0m backed peer transport
//!
//! `Rtc` is sans-IO: this module owns the UDP socket, feeds received datagrams and timeouts
//! into the state machine and transmits whatever it produces. The loop only runs while
//! [`PeerTransport::next_event`] is being polled, so the connection manager drives it from its
//! own task.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use str0m::change::{SdpAnswer, SdpPendingOffer};
use str0m::channel::{ChannelData, ChannelId};
use str0m::media::{Direction, KeyframeRequestKind, MediaData, MediaKind, Mid};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::channel::{DataChannel, ReadyState};
use crate::config::Config;
use crate::error::{Result, WebrtcError};
use crate::model::events::{IceState, TransportEvent};
use crate::model::session::IceCandidate;
use crate::model::tracks::{MediaFrame, Track};
use crate::signaling::{HttpSignaling, SignalingChannel, SignalingMode, WebSocketSignaling};
use crate::transport::{Connector, InboundRtpReport, PeerTransport, StatsSnapshot};
use crate::util::{host_candidate, select_host_address};

const FPS_WINDOW: Duration = Duration::from_secs(1);
const KEYFRAME_THROTTLE: Duration = Duration::from_secs(1);

/// Counts frames of one inbound video track over fixed windows.
#[derive(Debug)]
struct FrameCounter {
    window_start: Instant,
    frames: u32,
    fps: Option<f64>,
}

impl FrameCounter {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            fps: None,
        }
    }

    fn frame(&mut self, now: Instant) {
        self.roll(now);
        self.frames += 1;
    }

    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= FPS_WINDOW {
            self.fps = Some(f64::from(self.frames) / elapsed.as_secs_f64());
            self.frames = 0;
            self.window_start = now;
        }
    }
}

#[derive(Debug)]
struct InboundMedia {
    kind: MediaKind,
    counter: FrameCounter,
    last_keyframe_request: Option<Instant>,
}

/// What woke the drive loop.
enum Wake {
    Datagram(io::Result<(usize, SocketAddr)>),
    Timeout,
    Outbound(Vec<u8>),
}

pub struct Str0mPeer {
    rtc: Rtc,
    socket: UdpSocket,
    local_addr: SocketAddr,
    buf: Vec<u8>,
    pending_media: Vec<MediaKind>,
    pending_channel: Option<String>,
    offer: Option<(String, SdpPendingOffer)>,
    offer_created: bool,
    cid: Option<ChannelId>,
    ready: watch::Sender<ReadyState>,
    outbox_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbox_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: HashMap<Mid, InboundMedia>,
    events: VecDeque<TransportEvent>,
    ice_connected: bool,
    finished: bool,
}

impl Str0mPeer {
    /// Binds a UDP socket on the first routable host address.
    pub async fn bind() -> Result<Self> {
        let host = select_host_address()?;
        let socket = UdpSocket::bind(SocketAddr::new(host, 0)).await?;
        let local_addr = socket.local_addr()?;
        info!("Bound UDP port: {}", local_addr);

        let mut rtc = Rtc::builder().build();
        let candidate = host_candidate(local_addr)?;
        let sdp = candidate.to_sdp_string();
        if rtc.add_local_candidate(candidate).is_none() {
            return Err(WebrtcError::Ice(format!("local candidate rejected: {sdp}")));
        }

        let (ready, _) = watch::channel(ReadyState::Connecting);
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

        // str0m puts host candidates into the offer as well. Forwarding it keeps trickle-only
        // answerers working.
        let mut events = VecDeque::new();
        events.push_back(TransportEvent::LocalCandidate(IceCandidate::new(
            sdp.trim_start_matches("a="),
            None,
            Some(0),
        )));

        Ok(Self {
            rtc,
            socket,
            local_addr,
            buf: vec![0; 2000],
            pending_media: vec![],
            pending_channel: None,
            offer: None,
            offer_created: false,
            cid: None,
            ready,
            outbox_tx,
            outbox_rx,
            inbound: HashMap::new(),
            events,
            ice_connected: false,
            finished: false,
        })
    }

    /// Poll all output until str0m asks for a timeout. Transmits go out immediately.
    fn poll_until_timeout(&mut self) -> Option<Instant> {
        loop {
            if !self.rtc.is_alive() {
                return None;
            }

            match self.rtc.poll_output() {
                Ok(Output::Timeout(t)) => return Some(t),
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = self.socket.try_send_to(&transmit.contents, transmit.destination) {
                        // Datagram loss; ICE and SCTP retransmit.
                        debug!("UDP send to {} failed: {}", transmit.destination, e);
                    }
                }
                Ok(Output::Event(event)) => self.handle_event(event),
                Err(e) => {
                    warn!("poll_output failed: {:?}", e);
                    self.rtc.disconnect();
                    return None;
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::IceConnectionStateChange(state) => {
                info!("ICE state: {:?}", state);
                match state {
                    IceConnectionState::New => {}
                    IceConnectionState::Checking => {
                        self.events.push_back(TransportEvent::IceState(IceState::Checking))
                    }
                    IceConnectionState::Connected | IceConnectionState::Completed => {
                        if !self.ice_connected {
                            self.ice_connected = true;
                            self.events.push_back(TransportEvent::IceState(IceState::Connected));
                        }
                    }
                    IceConnectionState::Disconnected => {
                        self.ice_connected = false;
                        self.events
                            .push_back(TransportEvent::IceState(IceState::Disconnected));
                    }
                }
            }
            Event::MediaAdded(e) => {
                info!("Media added: {:?} {:?}", e.mid, e.kind);
                self.inbound.insert(
                    e.mid,
                    InboundMedia {
                        kind: e.kind,
                        counter: FrameCounter::new(Instant::now()),
                        last_keyframe_request: None,
                    },
                );
                self.events.push_back(TransportEvent::Track(Track {
                    mid: e.mid.to_string(),
                    kind: e.kind,
                }));
            }
            Event::MediaData(data) => self.handle_media_data(data),
            Event::ChannelOpen(id, label) => {
                if self.cid == Some(id) {
                    info!("Data channel '{}' open ({:?})", label, id);
                    self.ready.send_replace(ReadyState::Open);
                    self.events.push_back(TransportEvent::ChannelOpen);
                } else {
                    debug!("Ignoring unexpected channel '{}' ({:?})", label, id);
                }
            }
            Event::ChannelData(ChannelData { id, data, .. }) => {
                if self.cid == Some(id) {
                    self.events.push_back(TransportEvent::ChannelData(data));
                }
            }
            Event::ChannelClose(id) => {
                if self.cid == Some(id) {
                    info!("Data channel closed ({:?})", id);
                    self.ready.send_replace(ReadyState::Closed);
                    self.events.push_back(TransportEvent::ChannelClosed);
                }
            }
            other => debug!("Event: {:?}", other),
        }
    }

    fn handle_media_data(&mut self, data: MediaData) {
        let now = Instant::now();
        let Some(media) = self.inbound.get_mut(&data.mid) else {
            debug!("Media data for unknown mid {:?}", data.mid);
            return;
        };

        if media.kind == MediaKind::Video {
            media.counter.frame(now);

            let throttled = media
                .last_keyframe_request
                .map(|t| now.saturating_duration_since(t) < KEYFRAME_THROTTLE)
                .unwrap_or(false);
            if !data.contiguous && !throttled {
                if let Some(mut writer) = self.rtc.writer(data.mid) {
                    if let Err(e) = writer.request_keyframe(data.rid, KeyframeRequestKind::Fir) {
                        debug!("request_keyframe failed: {:?}", e);
                    }
                    media.last_keyframe_request = Some(now);
                }
            }
        }

        self.events.push_back(TransportEvent::Media(MediaFrame {
            mid: data.mid.to_string(),
            kind: media.kind,
            data: data.data,
        }));
    }

    fn handle_input(&mut self, input: Input) {
        if !self.rtc.is_alive() {
            return;
        }
        if let Err(e) = self.rtc.handle_input(input) {
            warn!("Peer disconnected: {:?}", e);
            self.rtc.disconnect();
        }
    }

    fn handle_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Datagram(Ok((n, source))) => {
                let Ok(contents) = (&self.buf[..n]).try_into() else {
                    debug!("Unparseable datagram from {}", source);
                    return;
                };
                let input = Input::Receive(
                    Instant::now(),
                    Receive {
                        proto: Protocol::Udp,
                        source,
                        destination: self.local_addr,
                        contents,
                    },
                );
                if !self.rtc.is_alive() {
                    return;
                }
                if let Err(e) = self.rtc.handle_input(input) {
                    warn!("Peer disconnected: {:?}", e);
                    self.rtc.disconnect();
                }
            }
            Wake::Datagram(Err(e)) => warn!("UDP receive failed: {}", e),
            Wake::Timeout => self.handle_input(Input::Timeout(Instant::now())),
            Wake::Outbound(bytes) => {
                let Some(mut channel) = self.cid.and_then(|id| self.rtc.channel(id)) else {
                    warn!("Dropping {} bytes, data channel gone", bytes.len());
                    return;
                };
                if let Err(e) = channel.write(true, &bytes) {
                    warn!("Data channel write failed: {:?}", e);
                }
            }
        }

        let now = Instant::now();
        for media in self.inbound.values_mut() {
            media.counter.roll(now);
        }
    }
}

#[async_trait]
impl PeerTransport for Str0mPeer {
    fn add_transceiver(&mut self, kind: MediaKind) -> Result<()> {
        if self.offer_created {
            return Err(WebrtcError::Sdp("media lines must be added before the offer".into()));
        }
        self.pending_media.push(kind);
        Ok(())
    }

    fn data_channel(&mut self, label: &str) -> Result<Box<dyn DataChannel>> {
        if self.offer_created || self.pending_channel.is_some() {
            return Err(WebrtcError::Sdp("data channel must be declared once, before the offer".into()));
        }
        self.pending_channel = Some(label.to_string());
        Ok(Box::new(Str0mChannel {
            ready: self.ready.subscribe(),
            outbox: self.outbox_tx.clone(),
        }))
    }

    async fn create_offer(&mut self) -> Result<String> {
        let mut change = self.rtc.sdp_api();
        for kind in self.pending_media.drain(..) {
            change.add_media(kind, Direction::RecvOnly, None, None, None);
        }
        if let Some(label) = self.pending_channel.take() {
            self.cid = Some(change.add_channel(label));
        }

        let (offer, pending) = change
            .apply()
            .ok_or_else(|| WebrtcError::Sdp("nothing to negotiate".into()))?;
        self.offer_created = true;

        let sdp = offer.to_sdp_string();
        debug!("Offer SDP:\n{}", sdp);
        self.offer = Some((sdp.clone(), pending));
        Ok(sdp)
    }

    async fn set_local_description(&mut self, sdp: &str) -> Result<()> {
        // str0m applies the offer locally when it is created; this only checks it is the same one.
        match &self.offer {
            Some((offer, _)) if offer == sdp => Ok(()),
            Some(_) => Err(WebrtcError::Sdp("local description differs from the created offer".into())),
            None => Err(WebrtcError::Sdp("no offer to apply".into())),
        }
    }

    async fn set_remote_description(&mut self, sdp: &str) -> Result<()> {
        let answer = SdpAnswer::from_sdp_string(sdp).map_err(|e| WebrtcError::Sdp(e.to_string()))?;
        let (_, pending) = self
            .offer
            .take()
            .ok_or_else(|| WebrtcError::Sdp("answer without a pending offer".into()))?;
        self.rtc.sdp_api().accept_answer(pending, answer)?;
        info!("Answer accepted, waiting for ICE");
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<()> {
        let line = candidate.candidate.trim().trim_start_matches("a=");
        if line.is_empty() {
            debug!("End of remote candidates");
            return Ok(());
        }
        let parsed = Candidate::from_sdp_string(line).map_err(|e| WebrtcError::Ice(e.to_string()))?;
        self.rtc.add_remote_candidate(parsed);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            let Some(timeout) = self.poll_until_timeout() else {
                self.finished = true;
                self.ready.send_replace(ReadyState::Closed);
                self.events.push_back(TransportEvent::Closed);
                continue;
            };
            if !self.events.is_empty() {
                continue;
            }

            let delay = timeout.saturating_duration_since(Instant::now());
            let wake = tokio::select! {
                r = self.socket.recv_from(&mut self.buf) => Wake::Datagram(r),
                _ = tokio::time::sleep(delay) => Wake::Timeout,
                Some(bytes) = self.outbox_rx.recv() => Wake::Outbound(bytes),
            };
            self.handle_wake(wake);
        }
    }

    fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            reports: self
                .inbound
                .iter()
                .map(|(mid, media)| InboundRtpReport {
                    kind: media.kind,
                    mid: mid.to_string(),
                    frames_per_second: media.counter.fps,
                })
                .collect(),
        }
    }

    fn close(&mut self) {
        if self.finished {
            return;
        }
        self.ready.send_replace(ReadyState::Closing);
        self.rtc.disconnect();
        self.finished = true;
        self.events.clear();
        self.ready.send_replace(ReadyState::Closed);
        info!("Peer closed");
    }
}

/// Data channel handle given to the multiplexer. Writes are queued to the drive loop.
pub struct Str0mChannel {
    ready: watch::Receiver<ReadyState>,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
}

impl DataChannel for Str0mChannel {
    fn ready_state(&self) -> ReadyState {
        *self.ready.borrow()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.outbox
            .send(bytes.to_vec())
            .map_err(|_| WebrtcError::ChannelNotReady(ReadyState::Closed))
    }
}

/// Builds str0m peers and the configured signaling variant.
///
/// Peers gather a single host candidate. str0m has no STUN or TURN client, so
/// [`Config::ice_servers`] is not contacted and no server-reflexive or relay candidates are
/// offered.
pub struct Str0mConnector {
    config: Config,
}

impl Str0mConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for Str0mConnector {
    async fn peer(&self) -> Result<Box<dyn PeerTransport>> {
        if !self.config.ice_servers.is_empty() {
            debug!(
                "Host candidates only, ICE servers {:?} are not contacted",
                self.config.ice_servers
            );
        }
        Ok(Box::new(Str0mPeer::bind().await?))
    }

    fn signaling(&self, mode: SignalingMode) -> Box<dyn SignalingChannel> {
        match mode {
            SignalingMode::WebSocket => Box::new(WebSocketSignaling::new(self.config.websocket_url())),
            SignalingMode::HttpRelay => Box::new(HttpSignaling::new(
                self.config.signaling_url(),
                self.config.poll_interval,
            )),
        }
    }
}
