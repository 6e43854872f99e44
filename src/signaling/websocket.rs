//! Direct signaling over a WebSocket, one JSON message per text frame.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{SignalMessage, SignalingChannel};
use crate::error::{Result, WebrtcError};
use crate::model::events::SignalingEvent;
use crate::model::session::{IceCandidate, SessionId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketSignaling {
    url: String,
    sender: Option<SplitSink<WsStream, Message>>,
    receiver: Option<SplitStream<WsStream>>,
}

impl WebSocketSignaling {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sender: None,
            receiver: None,
        }
    }

    async fn send(&mut self, message: &SignalMessage) -> Result<()> {
        let sender = self
            .sender
            .as_mut()
            .ok_or_else(|| WebrtcError::Signaling("websocket not connected".into()))?;
        let json = serde_json::to_string(message).map_err(|e| WebrtcError::Signaling(e.to_string()))?;
        sender
            .send(Message::Text(json))
            .await
            .map_err(|e| WebrtcError::Signaling(e.to_string()))
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    async fn start(&mut self) -> Result<()> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| WebrtcError::SignalingUnavailable(format!("{}: {}", self.url, e)))?;
        info!("Connected to signaling server at {}", self.url);

        let (sender, receiver) = ws_stream.split();
        self.sender = Some(sender);
        self.receiver = Some(receiver);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping both halves closes the socket.
        if self.sender.take().is_some() {
            debug!("Closing websocket signaling");
        }
        self.receiver = None;
    }

    async fn send_offer(&mut self, session_id: &SessionId, sdp: &str) -> Result<()> {
        self.send(&SignalMessage::offer(session_id, sdp)).await
    }

    async fn send_candidate(
        &mut self,
        session_id: &SessionId,
        candidate: &IceCandidate,
    ) -> Result<()> {
        self.send(&SignalMessage::candidate(session_id, candidate)).await
    }

    async fn next_event(&mut self) -> Option<SignalingEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<SignalMessage>(&text) {
                    Ok(message) => {
                        if let Some(event) = message.into_event() {
                            return Some(event);
                        }
                    }
                    Err(e) => warn!("Ignoring unparseable signaling message: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Signaling websocket closed");
                    self.receiver = None;
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Signaling websocket error: {}", e);
                    self.receiver = None;
                    return None;
                }
            }
        }
    }
}
