//! Session driver
//!
//! Runs one session on the current task: transport, signaling and stats through the
//! [`ConnectionManager`], pose ticks while immersive mode is active, wallet responses from the
//! wallet worker and commands from the application. Returns when the session ends.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::ReadyState;
use crate::codec::{InputEvent, WalletFrame, WireMessage};
use crate::connection::{ConnectionManager, SessionPlan};
use crate::error::Result;
use crate::model::events::{LifecycleEvent, LifecycleObserver, NoopObserver};
use crate::pose::PoseScheduler;
use crate::wallet::{spawn_wallet_worker, WalletService};

/// Requests from the application to a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(WireMessage),
    /// Announces immersive mode with the display size and starts pose sampling.
    EnterVr { width: u32, height: u32 },
    ExitVr,
    Close,
}

/// Why [`SessionDriver::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The session was torn down by the transport.
    Disconnected,
    /// The application closed it, or dropped its command sender.
    Closed,
}

struct WalletWorker {
    responses: mpsc::UnboundedReceiver<WalletFrame>,
    handle: JoinHandle<()>,
}

pub struct SessionDriver {
    manager: ConnectionManager,
    poses: PoseScheduler,
    lifecycle: mpsc::UnboundedReceiver<LifecycleEvent>,
    observer: Arc<dyn LifecycleObserver>,
    wallet: Option<WalletWorker>,
}

impl SessionDriver {
    pub fn new(mut manager: ConnectionManager, poses: PoseScheduler) -> Self {
        let (tx, lifecycle) = mpsc::unbounded_channel();
        manager.set_observer(Arc::new(tx));
        Self {
            manager,
            poses,
            lifecycle,
            observer: Arc::new(NoopObserver),
            wallet: None,
        }
    }

    /// Lifecycle events are forwarded here after the driver has acted on them.
    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Serves wallet requests from the remote side on a worker task.
    pub fn with_wallet(mut self, service: WalletService) -> Self {
        let (tx, requests) = mpsc::unbounded_channel();
        self.manager.set_wallet_consumer(Arc::new(tx));
        let (handle, responses) = spawn_wallet_worker(service, requests);
        self.wallet = Some(WalletWorker { responses, handle });
        self
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ConnectionManager {
        &mut self.manager
    }

    /// Starts a session from `plan` and drives it until it ends.
    pub async fn run(
        &mut self,
        plan: SessionPlan,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> Result<Exit> {
        let session = self.manager.start(plan).await?;
        info!("Driving session {}", session);

        let exit = loop {
            tokio::select! {
                incoming = self.manager.next_incoming() => {
                    self.manager.handle(incoming).await;
                }
                Some(event) = self.lifecycle.recv() => {
                    let ended = matches!(&event, LifecycleEvent::Disconnected(id) if *id == session);
                    self.observer.on_event(&event);
                    if ended {
                        break Exit::Disconnected;
                    }
                }
                events = self.poses.tick() => self.send_poses(events),
                Some(frame) = wallet_response(&mut self.wallet) => {
                    self.send(frame.into());
                }
                command = commands.recv() => match command {
                    Some(Command::Send(message)) => self.send(message),
                    Some(Command::EnterVr { width, height }) => {
                        for event in InputEvent::enter_vr(width, height) {
                            self.send(event.into());
                        }
                        self.poses.resume();
                    }
                    Some(Command::ExitVr) => {
                        self.poses.pause();
                        self.send(InputEvent::ExitVr.into());
                    }
                    Some(Command::Close) | None => {
                        info!("Closing session {}", session);
                        self.manager.close();
                        break Exit::Closed;
                    }
                },
            }
        };

        self.poses.pause();
        // Close may have queued the final notification behind the one that ended the loop.
        while let Ok(event) = self.lifecycle.try_recv() {
            self.observer.on_event(&event);
        }
        Ok(exit)
    }

    fn send(&mut self, message: WireMessage) {
        // Failures are logged by the multiplexer and the message is dropped.
        let _ = self.manager.send(message);
    }

    fn send_poses(&mut self, events: Vec<InputEvent>) {
        if self.manager.channel_state() != ReadyState::Open {
            debug!("Channel not open, skipping {} pose events", events.len());
            return;
        }
        for event in events {
            if self.manager.send(event).is_err() {
                break;
            }
        }
    }
}

async fn wallet_response(worker: &mut Option<WalletWorker>) -> Option<WalletFrame> {
    match worker.as_mut() {
        Some(worker) => worker.responses.recv().await,
        None => std::future::pending().await,
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        if let Some(worker) = self.wallet.take() {
            worker.handle.abort();
        }
        if self.manager.session_id().is_some() {
            warn!("Session driver dropped with a live session");
        }
    }
}
