//! Handshake and session lifetime of the connection manager against the mocks.

use std::sync::Arc;
use std::time::Duration;

use str0m::media::MediaKind;
use tokio::sync::mpsc;

use render_rtc::channel::ReadyState;
use render_rtc::codec::{ButtonId, ButtonTransition, Device, InputEvent};
use render_rtc::model::events::{IceState, LifecycleEvent, SignalingEvent, TransportEvent};
use render_rtc::model::session::{ConnectionState, IceCandidate, SessionId};
use render_rtc::model::tracks::Track;
use render_rtc::signaling::SignalingMode;
use render_rtc::transport::{InboundRtpReport, StatsSnapshot};
use render_rtc::{ConnectionManager, SessionPlan, WebrtcError};
use serde_json::json;

use crate::mock_rtc::{Call, MockRtc, RecordingSink};

fn manager(rtc: &MockRtc, stats_interval: Duration) -> ConnectionManager {
    let mut manager = ConnectionManager::with_settings(rtc.connector(), "data", stats_interval);
    manager.set_observer(Arc::new(rtc.log.clone()));
    manager
}

fn idle_stats() -> Duration {
    Duration::from_secs(3600)
}

fn plan() -> SessionPlan {
    SessionPlan::new(SignalingMode::WebSocket)
        .video_sink(RecordingSink::default())
        .video_sink(RecordingSink::default())
        .audio_sink(RecordingSink::default())
}

fn candidate(name: &str) -> IceCandidate {
    IceCandidate::new(name, Some("0".into()), Some(0))
}

fn remote_candidate(id: &SessionId, name: &str) -> SignalingEvent {
    SignalingEvent::Candidate {
        session_id: id.clone(),
        candidate: candidate(name),
    }
}

fn answer(id: &SessionId) -> SignalingEvent {
    SignalingEvent::Answer {
        session_id: id.clone(),
        sdp: "v=0\r\ns=answer\r\n".into(),
    }
}

// ── Offer ────────────────────────────────────────────────────

#[tokio::test]
async fn start_declares_media_then_sends_offer_with_metadata() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());

    let id = manager
        .start(plan().with_metadata(json!({"user": "7"})))
        .await
        .unwrap();

    let offer = "v=0\r\ns=mock-offer-0\r\n".to_string();
    assert_eq!(
        rtc.log.calls(),
        [
            Call::AddTransceiver(MediaKind::Video),
            Call::AddTransceiver(MediaKind::Video),
            Call::AddTransceiver(MediaKind::Audio),
            Call::DataChannel("data".into()),
            Call::SignalingStart(SignalingMode::WebSocket),
            Call::Lifecycle(LifecycleEvent::StateChanged(ConnectionState::SignalingStarted)),
            Call::CreateOffer,
            Call::Lifecycle(LifecycleEvent::StateChanged(ConnectionState::OfferCreated)),
            Call::SetLocal(offer.clone()),
            Call::SendOffer(format!("{offer}x={{\"user\":\"7\"}}\n")),
            Call::Lifecycle(LifecycleEvent::StateChanged(ConnectionState::OfferSent)),
        ]
    );
    assert_eq!(manager.state(), ConnectionState::OfferSent);
    assert_eq!(manager.session_id(), Some(&id));
    assert_eq!(manager.local_description(), Some(offer.as_str()));
    assert_eq!(manager.remote_description(), None);
}

#[tokio::test]
async fn signaling_unavailable_fails_start_and_releases_peer() {
    let rtc = MockRtc::new();
    rtc.fail_signaling();
    let mut manager = manager(&rtc, idle_stats());

    let err = manager.start(plan()).await.unwrap_err();

    assert!(matches!(err, WebrtcError::SignalingUnavailable(_)), "got {err:?}");
    assert!(err.is_connection_fatal());
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(manager.session_id(), None);
    assert_eq!(rtc.log.count(|c| *c == Call::CreateOffer), 0);
    assert_eq!(rtc.log.count(|c| *c == Call::PeerClosed), 1);
    assert_eq!(rtc.log.disconnects(), 0);
}

// ── Answer and candidates ────────────────────────────────────

#[tokio::test]
async fn candidates_before_answer_are_replayed_in_order() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let id = manager.start(plan()).await.unwrap();

    for name in ["c0", "c1", "c2"] {
        rtc.signaling_event(remote_candidate(&id, name));
        manager.step().await;
    }
    assert_eq!(manager.pending_candidates(), 3);
    assert!(rtc.log.applied_candidates().is_empty());

    rtc.signaling_event(answer(&id));
    manager.step().await;
    assert_eq!(manager.state(), ConnectionState::AnswerApplied);
    assert_eq!(manager.pending_candidates(), 0);
    assert_eq!(rtc.log.applied_candidates(), ["c0", "c1", "c2"]);

    let set_remote = rtc
        .log
        .position(|c| matches!(c, Call::SetRemote(_)))
        .unwrap();
    let first_applied = rtc
        .log
        .position(|c| matches!(c, Call::AddCandidate(_)))
        .unwrap();
    assert!(set_remote < first_applied);

    rtc.signaling_event(remote_candidate(&id, "c3"));
    manager.step().await;
    assert_eq!(rtc.log.applied_candidates(), ["c0", "c1", "c2", "c3"]);
    assert_eq!(manager.pending_candidates(), 0);
}

#[tokio::test]
async fn answer_is_announced_before_it_is_applied() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let id = manager.start(plan()).await.unwrap();

    manager.on_remote_answer(&id, "v=0\r\n").await.unwrap();

    let answered = rtc
        .log
        .position(|c| *c == Call::Lifecycle(LifecycleEvent::Answered(id.clone())))
        .unwrap();
    let applied = rtc
        .log
        .position(|c| matches!(c, Call::SetRemote(_)))
        .unwrap();
    assert!(answered < applied);
    assert_eq!(manager.remote_description(), Some("v=0\r\n"));
}

#[tokio::test]
async fn second_answer_is_ignored() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let id = manager.start(plan()).await.unwrap();

    manager.on_remote_answer(&id, "first").await.unwrap();
    manager.on_remote_answer(&id, "second").await.unwrap();

    assert_eq!(rtc.log.count(|c| matches!(c, Call::SetRemote(_))), 1);
    assert_eq!(manager.remote_description(), Some("first"));
}

#[tokio::test]
async fn messages_for_another_session_are_ignored() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let id = manager.start(plan()).await.unwrap();
    let stale = SessionId::from("not-this-one");

    rtc.signaling_event(answer(&stale));
    manager.step().await;
    rtc.signaling_event(remote_candidate(&stale, "c0"));
    manager.step().await;

    assert_eq!(manager.state(), ConnectionState::OfferSent);
    assert_eq!(manager.pending_candidates(), 0);
    assert_eq!(rtc.log.count(|c| matches!(c, Call::SetRemote(_))), 0);
    assert_eq!(manager.session_id(), Some(&id));
}

#[tokio::test]
async fn ice_connected_before_the_answer_does_not_connect() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let id = manager.start(plan()).await.unwrap();

    rtc.transport_event(TransportEvent::IceState(IceState::Connected));
    manager.step().await;

    assert_eq!(manager.state(), ConnectionState::OfferSent);
    assert!(!rtc
        .log
        .lifecycle()
        .contains(&LifecycleEvent::Connected(id.clone())));

    manager.on_remote_answer(&id, "v=0\r\n").await.unwrap();
    rtc.transport_event(TransportEvent::IceState(IceState::Connected));
    manager.step().await;
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn local_candidates_go_out_while_signaling_is_up() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    manager.start(plan()).await.unwrap();

    rtc.transport_event(TransportEvent::LocalCandidate(candidate("local-1")));
    manager.step().await;
    assert_eq!(rtc.log.count(|c| *c == Call::SendCandidate("local-1".into())), 1);

    rtc.drop_signaling();
    manager.step().await;
    rtc.transport_event(TransportEvent::LocalCandidate(candidate("local-2")));
    manager.step().await;

    assert_eq!(rtc.log.count(|c| matches!(c, Call::SendCandidate(_))), 1);
    assert_eq!(manager.state(), ConnectionState::OfferSent);
}

// ── Lifetime ─────────────────────────────────────────────────

#[tokio::test]
async fn ice_disconnect_then_close_notifies_once() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let id = manager.start(plan()).await.unwrap();
    manager.on_remote_answer(&id, "v=0\r\n").await.unwrap();

    rtc.transport_event(TransportEvent::IceState(IceState::Connected));
    manager.step().await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(rtc
        .log
        .lifecycle()
        .contains(&LifecycleEvent::Connected(id.clone())));

    rtc.transport_event(TransportEvent::IceState(IceState::Disconnected));
    manager.step().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.session_id(), None);

    manager.close();
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(rtc.log.disconnects(), 1);
    assert_eq!(rtc.log.count(|c| *c == Call::PeerClosed), 1);
}

#[tokio::test]
async fn transport_shutdown_tears_the_session_down() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let id = manager.start(plan()).await.unwrap();

    rtc.transport_event(TransportEvent::Closed);
    manager.step().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(
        rtc.log.lifecycle().last(),
        Some(&LifecycleEvent::Disconnected(id))
    );
}

#[tokio::test]
async fn close_is_idempotent() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    manager.start(plan()).await.unwrap();

    manager.close();
    manager.close();

    let closed = LifecycleEvent::StateChanged(ConnectionState::Closed);
    assert_eq!(rtc.log.count(|c| *c == Call::Lifecycle(closed.clone())), 1);
    assert_eq!(rtc.log.count(|c| *c == Call::PeerClosed), 1);
    assert_eq!(rtc.log.count(|c| *c == Call::SignalingStop), 1);
    assert_eq!(rtc.log.disconnects(), 1);
    assert_eq!(manager.channel_state(), ReadyState::Closed);
}

#[tokio::test]
async fn nothing_leaves_closed() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let id = manager.start(plan()).await.unwrap();
    manager.close();

    manager.on_remote_answer(&id, "v=0\r\n").await.unwrap();
    manager.on_remote_candidate(&id, candidate("late"));
    manager
        .handle_transport_event(TransportEvent::IceState(IceState::Connected))
        .await;

    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(manager.remote_description(), None);
    assert_eq!(rtc.log.count(|c| matches!(c, Call::SetRemote(_))), 0);
    assert_eq!(rtc.log.count(|c| matches!(c, Call::AddCandidate(_))), 0);
    assert_eq!(rtc.log.disconnects(), 1);
    assert!(!rtc
        .log
        .lifecycle()
        .contains(&LifecycleEvent::Connected(id)));
}

#[tokio::test]
async fn close_without_session_is_harmless() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());

    manager.close();
    manager.close();

    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(rtc.log.disconnects(), 0);
}

#[tokio::test]
async fn restart_replaces_the_running_session() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let first = manager.start(plan()).await.unwrap();
    let second = manager.start(plan()).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(manager.session_id(), Some(&second));
    assert_eq!(manager.state(), ConnectionState::OfferSent);
    assert_eq!(
        rtc.log
            .lifecycle()
            .iter()
            .filter(|e| matches!(e, LifecycleEvent::Disconnected(_)))
            .collect::<Vec<_>>(),
        [&LifecycleEvent::Disconnected(first)]
    );
    assert_eq!(rtc.log.count(|c| *c == Call::PeerClosed), 1);
}

// ── Tracks ───────────────────────────────────────────────────

#[tokio::test]
async fn tracks_fill_sinks_in_order_and_overflow_is_dropped() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let left = RecordingSink::default();
    let right = RecordingSink::default();
    let audio = RecordingSink::default();
    let plan = SessionPlan::new(SignalingMode::HttpRelay)
        .video_sink(left.clone())
        .video_sink(right.clone())
        .audio_sink(audio.clone());
    manager.start(plan).await.unwrap();

    for (mid, kind) in [
        ("0", MediaKind::Video),
        ("1", MediaKind::Audio),
        ("2", MediaKind::Video),
        ("3", MediaKind::Video),
    ] {
        rtc.transport_event(TransportEvent::Track(Track {
            mid: mid.into(),
            kind,
        }));
        manager.step().await;
    }

    assert_eq!(left.mids(), ["0"]);
    assert_eq!(right.mids(), ["2"]);
    assert_eq!(audio.mids(), ["1"]);
    assert_eq!(manager.state(), ConnectionState::OfferSent);
}

// ── Data channel ─────────────────────────────────────────────

#[tokio::test]
async fn send_is_dropped_until_channel_opens() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    manager.start(plan()).await.unwrap();

    let err = manager.send(InputEvent::EnterVr).unwrap_err();
    assert!(matches!(err, WebrtcError::ChannelNotReady(ReadyState::Connecting)));
    assert!(rtc.log.channel_sends().is_empty());

    rtc.set_channel_state(ReadyState::Open);
    manager.send(InputEvent::EnterVr).unwrap();
    assert_eq!(rtc.log.channel_sends(), [vec![0u8, 4]]);
}

#[tokio::test]
async fn non_finite_input_never_reaches_the_channel() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    manager.start(plan()).await.unwrap();
    rtc.set_channel_state(ReadyState::Open);

    let err = manager
        .send(InputEvent::Axis {
            device: Device::Left,
            x: f32::NAN,
            y: 0.0,
        })
        .unwrap_err();

    assert!(matches!(err, WebrtcError::NonFiniteInput), "got {err:?}");
    assert!(rtc.log.channel_sends().is_empty());
    assert_eq!(manager.state(), ConnectionState::OfferSent);
}

#[tokio::test]
async fn send_without_session_is_dropped() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    assert!(manager.send(InputEvent::ExitVr).is_err());
}

#[tokio::test]
async fn inbound_messages_reach_the_input_consumer() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, idle_stats());
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.set_input_consumer(Arc::new(tx));
    manager.start(plan()).await.unwrap();

    let press = InputEvent::button(Device::Right, ButtonId::Trigger, ButtonTransition::Down);
    rtc.transport_event(TransportEvent::ChannelData(vec![0, 9, 9]));
    rtc.transport_event(TransportEvent::ChannelData(press.encode()));
    manager.step().await;
    manager.step().await;

    assert_eq!(rx.try_recv().unwrap(), press);
    assert!(rx.try_recv().is_err());
    assert_eq!(manager.state(), ConnectionState::OfferSent);
}

// ── Stats ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stats_ticks_update_the_frame_rate_gauge() {
    let rtc = MockRtc::new();
    let mut manager = manager(&rtc, Duration::from_secs(1));
    let gauge = manager.frame_rate();
    manager.start(plan()).await.unwrap();

    rtc.set_stats(StatsSnapshot {
        reports: vec![
            InboundRtpReport {
                kind: MediaKind::Video,
                mid: "0".into(),
                frames_per_second: Some(72.0),
            },
            InboundRtpReport {
                kind: MediaKind::Video,
                mid: "1".into(),
                frames_per_second: Some(70.0),
            },
        ],
    });
    manager.step().await;
    assert_eq!(gauge.get(), 71.0);

    rtc.set_stats(StatsSnapshot::default());
    manager.step().await;
    assert_eq!(gauge.get(), 0.0);
}
