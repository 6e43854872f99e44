//! In-memory peer, signaling and connector for driving the connection manager.
//!
//! Every call made on the mocks lands in one shared [`CallLog`], so tests can assert on the
//! relative order of transport, signaling and lifecycle activity. Transport and signaling
//! events are injected through the [`MockRtc`] handle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use str0m::media::MediaKind;
use tokio::sync::mpsc;

use render_rtc::channel::{DataChannel, ReadyState};
use render_rtc::model::events::{LifecycleEvent, LifecycleObserver, SignalingEvent, TransportEvent};
use render_rtc::model::session::{IceCandidate, SessionId};
use render_rtc::model::tracks::{MediaSink, Track};
use render_rtc::signaling::{SignalingChannel, SignalingMode};
use render_rtc::transport::{Connector, PeerTransport, StatsSnapshot};
use render_rtc::{Result, WebrtcError};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    AddTransceiver(MediaKind),
    DataChannel(String),
    CreateOffer,
    SetLocal(String),
    SetRemote(String),
    AddCandidate(String),
    PeerClosed,
    SignalingStart(SignalingMode),
    SignalingStop,
    SendOffer(String),
    SendCandidate(String),
    ChannelSend(Vec<u8>),
    Lifecycle(LifecycleEvent),
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

#[allow(dead_code)]
impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.0.lock().unwrap().iter().position(pred)
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn channel_sends(&self) -> Vec<Vec<u8>> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::ChannelSend(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn lifecycle(&self) -> Vec<LifecycleEvent> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Lifecycle(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.count(|c| matches!(c, Call::Lifecycle(LifecycleEvent::Disconnected(_))))
    }
}

impl LifecycleObserver for CallLog {
    fn on_event(&self, event: &LifecycleEvent) {
        self.push(Call::Lifecycle(event.clone()));
    }
}

#[derive(Default)]
struct Shared {
    transport: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    signaling: Mutex<Option<mpsc::UnboundedSender<SignalingEvent>>>,
    scripted: Mutex<Vec<TransportEvent>>,
    channel_state: Mutex<Option<Arc<Mutex<ReadyState>>>>,
    open_channels: AtomicBool,
    fail_signaling: AtomicBool,
    stats: Mutex<StatsSnapshot>,
    offers: AtomicUsize,
}

/// Test-side handle to the mocks of the current session.
#[derive(Clone, Default)]
pub struct MockRtc {
    pub log: CallLog,
    shared: Arc<Shared>,
}

#[allow(dead_code)]
impl MockRtc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(MockConnector { rtc: self.clone() })
    }

    /// Events queued on the next peer as soon as it is created.
    pub fn script(&self, events: impl IntoIterator<Item = TransportEvent>) {
        self.shared.scripted.lock().unwrap().extend(events);
    }

    pub fn fail_signaling(&self) {
        self.shared.fail_signaling.store(true, Ordering::SeqCst);
    }

    /// Data channels of later sessions are created already open.
    pub fn open_channels(&self) {
        self.shared.open_channels.store(true, Ordering::SeqCst);
    }

    pub fn transport_event(&self, event: TransportEvent) {
        let tx = self.shared.transport.lock().unwrap();
        tx.as_ref().expect("no peer").send(event).unwrap();
    }

    pub fn signaling_event(&self, event: SignalingEvent) {
        let tx = self.shared.signaling.lock().unwrap();
        tx.as_ref().expect("no signaling").send(event).unwrap();
    }

    /// Drops the signaling sender so the channel reports that the service went away.
    pub fn drop_signaling(&self) {
        self.shared.signaling.lock().unwrap().take();
    }

    pub fn set_channel_state(&self, state: ReadyState) {
        let current = self.shared.channel_state.lock().unwrap();
        *current.as_ref().expect("no data channel").lock().unwrap() = state;
    }

    pub fn set_stats(&self, stats: StatsSnapshot) {
        *self.shared.stats.lock().unwrap() = stats;
    }
}

struct MockConnector {
    rtc: MockRtc,
}

#[async_trait]
impl Connector for MockConnector {
    async fn peer(&self) -> Result<Box<dyn PeerTransport>> {
        let (tx, events) = mpsc::unbounded_channel();
        for event in self.rtc.shared.scripted.lock().unwrap().drain(..) {
            tx.send(event).unwrap();
        }
        *self.rtc.shared.transport.lock().unwrap() = Some(tx);
        Ok(Box::new(MockPeer {
            rtc: self.rtc.clone(),
            events,
            remote_set: false,
        }))
    }

    fn signaling(&self, mode: SignalingMode) -> Box<dyn SignalingChannel> {
        Box::new(MockSignaling {
            rtc: self.rtc.clone(),
            mode,
            events: None,
        })
    }
}

struct MockPeer {
    rtc: MockRtc,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    remote_set: bool,
}

#[async_trait]
impl PeerTransport for MockPeer {
    fn add_transceiver(&mut self, kind: MediaKind) -> Result<()> {
        self.rtc.log.push(Call::AddTransceiver(kind));
        Ok(())
    }

    fn data_channel(&mut self, label: &str) -> Result<Box<dyn DataChannel>> {
        self.rtc.log.push(Call::DataChannel(label.to_string()));
        let initial = if self.rtc.shared.open_channels.load(Ordering::SeqCst) {
            ReadyState::Open
        } else {
            ReadyState::Connecting
        };
        let state = Arc::new(Mutex::new(initial));
        *self.rtc.shared.channel_state.lock().unwrap() = Some(state.clone());
        Ok(Box::new(MockChannel {
            log: self.rtc.log.clone(),
            state,
        }))
    }

    async fn create_offer(&mut self) -> Result<String> {
        self.rtc.log.push(Call::CreateOffer);
        let n = self.rtc.shared.offers.fetch_add(1, Ordering::SeqCst);
        Ok(format!("v=0\r\ns=mock-offer-{n}\r\n"))
    }

    async fn set_local_description(&mut self, sdp: &str) -> Result<()> {
        self.rtc.log.push(Call::SetLocal(sdp.to_string()));
        Ok(())
    }

    async fn set_remote_description(&mut self, sdp: &str) -> Result<()> {
        self.rtc.log.push(Call::SetRemote(sdp.to_string()));
        self.remote_set = true;
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<()> {
        if !self.remote_set {
            return Err(WebrtcError::Ice("remote description not set".into()));
        }
        self.rtc.log.push(Call::AddCandidate(candidate.candidate.clone()));
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    fn stats(&self) -> StatsSnapshot {
        self.rtc.shared.stats.lock().unwrap().clone()
    }

    fn close(&mut self) {
        self.rtc.log.push(Call::PeerClosed);
    }
}

struct MockChannel {
    log: CallLog,
    state: Arc<Mutex<ReadyState>>,
}

impl DataChannel for MockChannel {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.log.push(Call::ChannelSend(bytes.to_vec()));
        Ok(())
    }
}

struct MockSignaling {
    rtc: MockRtc,
    mode: SignalingMode,
    events: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    async fn start(&mut self) -> Result<()> {
        self.rtc.log.push(Call::SignalingStart(self.mode));
        if self.rtc.shared.fail_signaling.load(Ordering::SeqCst) {
            return Err(WebrtcError::Network(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.rtc.shared.signaling.lock().unwrap() = Some(tx);
        self.events = Some(rx);
        Ok(())
    }

    fn stop(&mut self) {
        self.rtc.log.push(Call::SignalingStop);
        self.events = None;
    }

    async fn send_offer(&mut self, _session_id: &SessionId, sdp: &str) -> Result<()> {
        self.rtc.log.push(Call::SendOffer(sdp.to_string()));
        Ok(())
    }

    async fn send_candidate(&mut self, _session_id: &SessionId, candidate: &IceCandidate) -> Result<()> {
        self.rtc.log.push(Call::SendCandidate(candidate.candidate.clone()));
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SignalingEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

/// Records the mids of the tracks it was handed.
#[derive(Clone, Default)]
pub struct RecordingSink(pub Arc<Mutex<Vec<String>>>);

#[allow(dead_code)]
impl RecordingSink {
    pub fn mids(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl MediaSink for RecordingSink {
    fn add_track(&mut self, track: &Track) {
        self.0.lock().unwrap().push(track.mid.clone());
    }
}
