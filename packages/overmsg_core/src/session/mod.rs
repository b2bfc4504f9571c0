//! Session management: the persistent channel, heartbeat watchdog and
//! reconnect state machine.
//!
//! [`SessionManager`] is the owned handle. Starting a session dials the
//! persistent channel, sends the token, and hands a supervisor task the
//! link. From then on the supervisor is the only owner of the connection:
//!
//! - `heartbeat` posts the token on the control channel every interval
//! - `ingest` reads frames and pushes messages into the [`DeliveryQueue`]
//! - `supervisor` turns failures into state transitions and redials
//!
//! State is published on a watch channel; everything the presentation layer
//! should hear about goes out as a [`Notice`].

mod backoff;
mod dialer;
mod heartbeat;
mod ingest;
mod state;
mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use backoff::Backoff;
pub use dialer::{BoxedReader, BoxedWriter, Dialer, Link, TcpDialer};
pub use ingest::IngestOutcome;
pub use state::SessionState;

use supervisor::{Command, Shared, Supervisor};

use crate::config::SessionConfig;
use crate::control::{ControlChannel, ControlClient};
use crate::error::{ClientError, Result};
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::protocol::InboundMessage;
use crate::selector::SelectedEndpoint;
use crate::token::Token;

const NOTICE_CAPACITY: usize = 256;

/// Something the presentation layer should show or react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A frame that could not be decoded. The ingest loop keeps reading.
    IngestError { raw: String, reason: String },
    /// A `message` frame carrying an error instead of a chat message.
    RemoteError { from: String, error: String },
    /// A redial is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected { attempts: u32 },
    /// The session stopped on its own. Sign-out does not produce this.
    SessionEnded(ClientError),
}

/// Receiving end of the delivery queue.
///
/// Messages come out in the order they were read off the connection. Once
/// the session ends and the queue is drained, `recv` returns `None`.
pub struct DeliveryQueue {
    rx: mpsc::Receiver<InboundMessage>,
}

impl DeliveryQueue {
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }
}

struct Running {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// What the manager holds between calls.
#[derive(Default)]
struct Slot {
    /// Token of the current or last session; kept until sign-out.
    token: Option<Token>,
    running: Option<Running>,
}

/// Owns at most one live session.
pub struct SessionManager {
    shared: Arc<Shared>,
    slot: Mutex<Slot>,
}

impl SessionManager {
    pub fn new(
        control: Arc<dyn ControlChannel>,
        dialer: Arc<dyn Dialer>,
        stream_addr: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                control,
                dialer,
                stream_addr: stream_addr.into(),
                config,
                state,
                notices,
                metrics: Arc::new(SessionMetrics::new()),
            }),
            slot: Mutex::new(Slot::default()),
        }
    }

    /// HTTP control channel and TCP persistent channel for a selected server.
    pub fn for_endpoint(endpoint: &SelectedEndpoint, config: SessionConfig) -> Result<Self> {
        let control = ControlClient::new(endpoint, config.request_timeout)?;
        Ok(Self::new(
            Arc::new(control),
            Arc::new(TcpDialer),
            endpoint.stream_addr.clone(),
            config,
        ))
    }

    /// Hold a stored token without starting a session, so it can be signed
    /// out from `Idle`.
    pub fn with_token(mut self, token: Token) -> Self {
        self.slot.get_mut().token = Some(token);
        self
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Dial, hand over the token, and start the heartbeat and ingest loops.
    ///
    /// A failed initial dial is returned to the caller and the session goes
    /// back to `Idle`, still holding the token; it is not retried. Allowed
    /// from `Idle` or `Terminated`.
    pub async fn start(&self, token: Token) -> Result<DeliveryQueue> {
        let mut slot = self.slot.lock().await;

        let state = self.state();
        if state.is_live() {
            return Err(ClientError::SessionActive);
        }
        if state == SessionState::Terminated {
            if let Some(old) = slot.running.take() {
                let _ = old.task.await;
            }
            self.shared.set_state(SessionState::Idle);
        }

        slot.token = Some(token.clone());
        self.shared.set_state(SessionState::Connecting);
        let (delivery_tx, delivery_rx) = mpsc::channel(self.shared.config.delivery_capacity);
        let (commands_tx, commands_rx) = mpsc::channel(1);

        let mut supervisor =
            Supervisor::new(Arc::clone(&self.shared), token, delivery_tx, commands_rx);
        if let Err(e) = supervisor.connect().await {
            warn!(error = %e, "initial connect failed");
            self.shared.set_state(SessionState::Idle);
            return Err(e);
        }
        self.shared.set_state(SessionState::Authenticated);

        slot.running = Some(Running {
            commands: commands_tx,
            task: tokio::spawn(supervisor.run()),
        });
        Ok(DeliveryQueue { rx: delivery_rx })
    }

    /// Invalidate the token server-side and stop every loop.
    ///
    /// Works from any state that holds a token, including after the session
    /// ended on its own. The session ends and the token is dropped even if
    /// the server call fails; the call's error is still returned.
    pub async fn sign_out(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;

        if let Some(Running { commands, task }) = slot.running.take() {
            let (reply, rx) = oneshot::channel();
            let delivered = commands.send(Command::SignOut { reply }).await.is_ok();
            let answer = if delivered { rx.await.ok() } else { None };
            let _ = task.await;
            if let Some(result) = answer {
                slot.token = None;
                return result;
            }
            debug!("supervisor already gone, signing out directly");
        }

        let Some(token) = slot.token.take() else {
            return Err(ClientError::NoSession);
        };
        let result = self.shared.control.sign_out(&token).await;
        self.shared.set_state(SessionState::Terminated);
        match &result {
            Ok(()) => info!("signed out"),
            Err(e) => warn!(error = %e, "sign-out request failed, token dropped locally"),
        }
        result
    }
}
