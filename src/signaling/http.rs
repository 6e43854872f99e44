//! Relayed signaling over plain HTTP, for networks where WebSockets do not get through.
//!
//! `PUT` registers with the relay and yields a relay session id sent back in the `Session-Id`
//! header. Offers and candidates are `POST`ed, inbound messages are polled with
//! `GET ?fromtime=<ms>` and `DELETE` unregisters.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{SignalMessage, SignalingChannel};
use crate::error::{Result, WebrtcError};
use crate::model::events::SignalingEvent;
use crate::model::session::{IceCandidate, SessionId};

const SESSION_HEADER: &str = "Session-Id";

#[derive(Debug, Deserialize)]
struct Registration {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Mailbox {
    #[serde(default)]
    messages: Vec<SignalMessage>,
}

pub struct HttpSignaling {
    client: reqwest::Client,
    url: String,
    poll_interval: Duration,
    relay_session: Option<String>,
    events: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
    poller: Option<JoinHandle<()>>,
}

impl HttpSignaling {
    pub fn new(url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            poll_interval,
            relay_session: None,
            events: None,
            poller: None,
        }
    }

    async fn post(&self, path: &str, message: &SignalMessage) -> Result<()> {
        let relay_session = self
            .relay_session
            .as_deref()
            .ok_or_else(|| WebrtcError::Signaling("relay not registered".into()))?;
        self.client
            .post(format!("{}/{}", self.url, path))
            .header(SESSION_HEADER, relay_session)
            .json(message)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WebrtcError::Signaling(e.to_string()))?;
        Ok(())
    }
}

/// Polls the relay mailbox until the receiver is dropped or the task is aborted.
async fn poll_loop(
    client: reqwest::Client,
    url: String,
    relay_session: String,
    interval: Duration,
    tx: mpsc::UnboundedSender<SignalingEvent>,
) {
    let mut from_time = 0i64;
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        let requested_at = Utc::now().timestamp_millis();

        let response = client
            .get(&url)
            .query(&[("fromtime", from_time)])
            .header(SESSION_HEADER, &relay_session)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let mailbox = match response {
            Ok(r) => match r.json::<Mailbox>().await {
                Ok(mailbox) => mailbox,
                Err(e) => {
                    warn!("Unreadable relay mailbox: {}", e);
                    continue;
                }
            },
            Err(e) => {
                warn!("Relay poll failed: {}", e);
                continue;
            }
        };
        from_time = requested_at;

        for event in mailbox.messages.into_iter().filter_map(SignalMessage::into_event) {
            if tx.send(event).is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl SignalingChannel for HttpSignaling {
    async fn start(&mut self) -> Result<()> {
        let registration: Registration = self
            .client
            .put(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WebrtcError::SignalingUnavailable(format!("{}: {}", self.url, e)))?
            .json()
            .await
            .map_err(|e| WebrtcError::SignalingUnavailable(e.to_string()))?;
        info!("Registered with signaling relay as {}", registration.session_id);

        let (tx, rx) = mpsc::unbounded_channel();
        self.poller = Some(tokio::spawn(poll_loop(
            self.client.clone(),
            self.url.clone(),
            registration.session_id.clone(),
            self.poll_interval,
            tx,
        )));
        self.events = Some(rx);
        self.relay_session = Some(registration.session_id);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.events = None;

        let Some(relay_session) = self.relay_session.take() else {
            return;
        };
        let request = self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, relay_session);
        // Only possible inside a runtime; outside one the relay expires the session itself.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = request.send().await {
                    debug!("Relay unregister failed: {}", e);
                }
            });
        }
    }

    async fn send_offer(&mut self, session_id: &SessionId, sdp: &str) -> Result<()> {
        self.post("offer", &SignalMessage::offer(session_id, sdp)).await
    }

    async fn send_candidate(
        &mut self,
        session_id: &SessionId,
        candidate: &IceCandidate,
    ) -> Result<()> {
        self.post("candidate", &SignalMessage::candidate(session_id, candidate))
            .await
    }

    async fn next_event(&mut self) -> Option<SignalingEvent> {
        self.events.as_mut()?.recv().await
    }
}

impl Drop for HttpSignaling {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}
