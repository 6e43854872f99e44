//! Reliable data channel and the multiplexer that shares it between input and wallet traffic.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec::{Domain, InputEvent, WalletFrame, WireMessage};
use crate::error::{Result, WebrtcError};

/// Readiness of the reliable channel, mirroring the browser data channel states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Handle to the single ordered, lossless channel of a session.
pub trait DataChannel: Send {
    fn ready_state(&self) -> ReadyState;

    /// Queues one message. Messages leave in the order they were queued.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Receives decoded input events from the remote side.
pub trait InputConsumer: Send + Sync {
    fn on_input(&self, event: InputEvent);
}

/// Receives wallet requests from the remote side.
pub trait WalletConsumer: Send + Sync {
    fn on_request(&self, frame: WalletFrame);
}

impl InputConsumer for mpsc::UnboundedSender<InputEvent> {
    fn on_input(&self, event: InputEvent) {
        if self.send(event).is_err() {
            debug!("Input consumer gone, dropping event");
        }
    }
}

impl WalletConsumer for mpsc::UnboundedSender<WalletFrame> {
    fn on_request(&self, frame: WalletFrame) {
        if self.send(frame).is_err() {
            debug!("Wallet consumer gone, dropping request");
        }
    }
}

/// Serializes outbound messages onto the channel and routes inbound ones by domain tag.
pub struct ChannelMultiplexer {
    channel: Box<dyn DataChannel>,
    input: Option<Arc<dyn InputConsumer>>,
    wallet: Option<Arc<dyn WalletConsumer>>,
}

impl ChannelMultiplexer {
    pub fn new(channel: Box<dyn DataChannel>) -> Self {
        Self {
            channel,
            input: None,
            wallet: None,
        }
    }

    pub fn with_input(mut self, consumer: Option<Arc<dyn InputConsumer>>) -> Self {
        self.input = consumer;
        self
    }

    pub fn with_wallet(mut self, consumer: Option<Arc<dyn WalletConsumer>>) -> Self {
        self.wallet = consumer;
        self
    }

    pub fn ready_state(&self) -> ReadyState {
        self.channel.ready_state()
    }

    /// Transmits `bytes` unchanged when the channel is open.
    ///
    /// In any other state the message is dropped and logged. The returned error is
    /// informational; callers may ignore it.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self.channel.ready_state() {
            ReadyState::Open => self.channel.send(bytes),
            state => {
                warn!("Dropping {} byte message, channel is {:?}", bytes.len(), state);
                Err(WebrtcError::ChannelNotReady(state))
            }
        }
    }

    /// Encodes and sends `message`. Input events with a non-finite float are refused.
    pub fn send_message(&mut self, message: &WireMessage) -> Result<()> {
        if let WireMessage::Input(event) = message {
            if !event.is_finite() {
                warn!("Dropping non-finite input {:?}", event);
                return Err(WebrtcError::NonFiniteInput);
            }
        }
        self.send(&message.encode())
    }

    /// Decodes one inbound message and hands it to the consumer for its domain.
    ///
    /// Malformed messages and messages without a registered consumer are logged and dropped.
    pub fn dispatch(&self, bytes: &[u8]) -> Result<Domain> {
        let message = WireMessage::decode(bytes).map_err(|e| {
            warn!("Dropping malformed message ({} bytes): {}", bytes.len(), e);
            WebrtcError::from(e)
        })?;

        let domain = message.domain();
        match message {
            WireMessage::Input(event) => match &self.input {
                Some(consumer) => consumer.on_input(event),
                None => debug!("No input consumer, dropping {:?}", event),
            },
            WireMessage::Wallet(frame) => match &self.wallet {
                Some(consumer) => consumer.on_request(frame),
                None => debug!("No wallet consumer, dropping {:?} request", frame.kind),
            },
        }
        Ok(domain)
    }
}

impl std::fmt::Debug for ChannelMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMultiplexer")
            .field("state", &self.channel.ready_state())
            .field("input", &self.input.is_some())
            .field("wallet", &self.wallet.is_some())
            .finish()
    }
}
