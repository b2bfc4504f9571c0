//! The single task that owns the persistent link and drives the session
//! state machine.
//!
//! Heartbeat results and ingest exits arrive on one bounded event channel,
//! each tagged with the generation of the link that produced it. Events from
//! a retired link are dropped, so an old heartbeat can never act on a new
//! connection.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Notice;
use super::backoff::Backoff;
use super::dialer::{BoxedWriter, Dialer, Link, write_handshake};
use super::heartbeat::run_heartbeat;
use super::ingest::{IngestOutcome, run_ingest};
use super::state::SessionState;
use crate::config::SessionConfig;
use crate::control::ControlChannel;
use crate::error::{ClientError, Result};
use crate::metrics::{Gauge, GaugeGuard, SessionMetrics};
use crate::protocol::InboundMessage;
use crate::token::Token;

pub(crate) const EVENT_CAPACITY: usize = 16;

/// Everything the manager and the supervisor both see.
pub(crate) struct Shared {
    pub(crate) control: Arc<dyn ControlChannel>,
    pub(crate) dialer: Arc<dyn Dialer>,
    pub(crate) stream_addr: String,
    pub(crate) config: SessionConfig,
    pub(crate) state: watch::Sender<SessionState>,
    pub(crate) notices: broadcast::Sender<Notice>,
    pub(crate) metrics: Arc<SessionMetrics>,
}

impl Shared {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let prev = self.state();
        if prev == next {
            return;
        }
        if !prev.can_transition(next) {
            warn!(from = %prev, to = %next, "unexpected session transition");
        }
        self.state.send_replace(next);
        info!(from = %prev, to = %next, "session state changed");
        self.notify(Notice::StateChanged { from: prev, to: next });
    }

    pub(crate) fn notify(&self, notice: Notice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

#[derive(Debug)]
pub(crate) enum Event {
    HeartbeatOk { generation: u64 },
    HeartbeatFailed { generation: u64, error: ClientError },
    LinkClosed { generation: u64, outcome: IngestOutcome },
}

impl Event {
    fn generation(&self) -> u64 {
        match self {
            Self::HeartbeatOk { generation }
            | Self::HeartbeatFailed { generation, .. }
            | Self::LinkClosed { generation, .. } => *generation,
        }
    }
}

pub(crate) enum Command {
    SignOut { reply: oneshot::Sender<Result<()>> },
}

/// One open persistent connection and the two tasks bound to it.
struct ActiveLink {
    generation: u64,
    writer: BoxedWriter,
    cancel: CancellationToken,
    heartbeat: JoinHandle<()>,
    ingest: JoinHandle<()>,
    _open: GaugeGuard,
}

impl ActiveLink {
    fn is_reading(&self) -> bool {
        !self.ingest.is_finished()
    }

    /// Stop both tasks and wait for them before closing the connection.
    async fn retire(self) {
        let ActiveLink {
            generation,
            mut writer,
            cancel,
            heartbeat,
            ingest,
            _open,
        } = self;

        cancel.cancel();
        if let Err(e) = heartbeat.await {
            error!(generation, error = %e, "heartbeat task panicked");
        }
        if let Err(e) = ingest.await {
            error!(generation, error = %e, "ingest task panicked");
        }
        let _ = writer.shutdown().await;
        drop(writer);
        drop(_open);
        debug!(generation, "link retired");
    }
}

pub(crate) struct Supervisor {
    shared: Arc<Shared>,
    token: Token,
    delivery: mpsc::Sender<InboundMessage>,
    events_tx: mpsc::Sender<Event>,
    events: mpsc::Receiver<Event>,
    commands: mpsc::Receiver<Command>,
    link: Option<ActiveLink>,
    generation: u64,
    failures: u32,
    backoff: Backoff,
}

impl Supervisor {
    pub(crate) fn new(
        shared: Arc<Shared>,
        token: Token,
        delivery: mpsc::Sender<InboundMessage>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_CAPACITY);
        let backoff = Backoff::new(
            shared.config.reconnect_base_delay,
            shared.config.reconnect_max_delay,
        );
        Self {
            shared,
            token,
            delivery,
            events_tx,
            events,
            commands,
            link: None,
            generation: 0,
            failures: 0,
            backoff,
        }
    }

    /// Dial, send the handshake, and start the heartbeat and ingest tasks.
    ///
    /// Must only be called with no link open.
    pub(crate) async fn connect(&mut self) -> Result<()> {
        debug_assert!(self.link.is_none());
        let shared = Arc::clone(&self.shared);
        let timeout = shared.config.dial_timeout;
        let token = &self.token;

        let dial = async {
            let mut link = shared.dialer.dial(&shared.stream_addr).await?;
            write_handshake(&mut link.writer, token).await?;
            Ok::<_, std::io::Error>(link)
        };
        let Link { reader, writer } = match tokio::time::timeout(timeout, dial).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return Err(ClientError::from_io(e)),
            Err(_) => return Err(ClientError::timed_out("dial", timeout)),
        };

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();

        let heartbeat = {
            let running = GaugeGuard::enter(&shared.metrics, Gauge::Heartbeats);
            let control = Arc::clone(&shared.control);
            let token = self.token.clone();
            let events = self.events_tx.clone();
            let metrics = Arc::clone(&shared.metrics);
            let cancel = cancel.clone();
            let period = shared.config.heartbeat_interval;
            tokio::spawn(async move {
                let _running = running;
                run_heartbeat(control, token, period, generation, events, metrics, cancel).await;
            })
        };

        let ingest = {
            let running = GaugeGuard::enter(&shared.metrics, Gauge::Ingest);
            let delivery = self.delivery.clone();
            let notices = shared.notices.clone();
            let events = self.events_tx.clone();
            let metrics = Arc::clone(&shared.metrics);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let _running = running;
                let outcome = run_ingest(reader, delivery, notices, &metrics, cancel.clone()).await;
                if outcome == IngestOutcome::Cancelled {
                    return;
                }
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = events.send(Event::LinkClosed { generation, outcome }) => {}
                }
            })
        };

        shared.metrics.link_opened();
        info!(generation, addr = %shared.stream_addr, "persistent channel up");
        self.link = Some(ActiveLink {
            generation,
            writer,
            cancel,
            heartbeat,
            ingest,
            _open: GaugeGuard::enter(&shared.metrics, Gauge::Links),
        });
        Ok(())
    }

    pub(crate) async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                cmd = self.commands.recv() => self.handle_command(cmd).await,
                Some(event) = self.events.recv() => self.handle_event(event).await,
            };
            if flow.is_break() {
                break;
            }
        }
        debug!(generation = self.generation, "session supervisor exited");
    }

    async fn handle_command(&mut self, cmd: Option<Command>) -> ControlFlow<()> {
        match cmd {
            Some(Command::SignOut { reply }) => {
                let result = self.sign_out().await;
                let _ = reply.send(result);
            }
            None => {
                info!("session manager dropped, closing session");
                self.retire_link().await;
                self.shared.set_state(SessionState::Terminated);
            }
        }
        ControlFlow::Break(())
    }

    async fn handle_event(&mut self, event: Event) -> ControlFlow<()> {
        if event.generation() != self.generation {
            debug!(
                stale = event.generation(),
                current = self.generation,
                "dropping event from retired link"
            );
            return ControlFlow::Continue(());
        }

        match event {
            Event::HeartbeatOk { .. } => {
                self.failures = 0;
                if self.shared.state() == SessionState::Degraded {
                    info!("heartbeat recovered");
                    self.shared.set_state(SessionState::Authenticated);
                }
                ControlFlow::Continue(())
            }
            Event::HeartbeatFailed { error, .. } => {
                if error == ClientError::Unauthorized {
                    return self.terminate(error).await;
                }
                self.failures += 1;
                self.degrade();

                let reading = self.link.as_ref().is_some_and(ActiveLink::is_reading);
                let threshold = self.shared.config.heartbeat_failure_threshold;
                if reading && self.failures < threshold {
                    debug!(
                        failures = self.failures,
                        threshold, "link still reading, waiting for next heartbeat"
                    );
                    return ControlFlow::Continue(());
                }
                self.recover().await
            }
            Event::LinkClosed { outcome, .. } => {
                if outcome == IngestOutcome::ConsumerGone {
                    info!("delivery queue dropped, closing session");
                    self.retire_link().await;
                    self.shared.set_state(SessionState::Terminated);
                    return ControlFlow::Break(());
                }
                warn!(generation = self.generation, ?outcome, "persistent channel lost");
                self.degrade();
                self.recover().await
            }
        }
    }

    fn degrade(&self) {
        if self.shared.state() == SessionState::Authenticated {
            self.shared.set_state(SessionState::Degraded);
        }
    }

    /// Confirm the server is up, then retire the link and redial with backoff.
    async fn recover(&mut self) -> ControlFlow<()> {
        if let Err(e) = confirm_server_alive(self.shared.control.as_ref()).await {
            return self.terminate(e).await;
        }
        self.shared.set_state(SessionState::Reconnecting);
        self.retire_link().await;
        self.failures = 0;
        self.backoff.reset();

        loop {
            if let Some(max) = self.shared.config.max_reconnect_attempts {
                if self.backoff.attempts() >= max {
                    let e = ClientError::Transport(format!(
                        "persistent channel not restored after {max} attempts"
                    ));
                    return self.terminate(e).await;
                }
            }

            let delay = self.backoff.next_delay();
            let attempt = self.backoff.attempts();
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            self.shared.notify(Notice::Reconnecting { attempt, delay });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                cmd = self.commands.recv() => return self.handle_command(cmd).await,
            }

            match self.connect().await {
                Ok(()) => {
                    self.shared.metrics.reconnected();
                    self.shared.set_state(SessionState::Authenticated);
                    self.shared.notify(Notice::Reconnected { attempts: attempt });
                    return ControlFlow::Continue(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "redial failed");
                    self.shared.set_state(SessionState::Degraded);
                    if let Err(e) = confirm_server_alive(self.shared.control.as_ref()).await {
                        return self.terminate(e).await;
                    }
                    self.shared.set_state(SessionState::Reconnecting);
                }
            }
        }
    }

    async fn sign_out(&mut self) -> Result<()> {
        let result = self.shared.control.sign_out(&self.token).await;
        self.retire_link().await;
        self.shared.set_state(SessionState::Terminated);
        match &result {
            Ok(()) => info!("signed out"),
            Err(e) => warn!(error = %e, "sign-out request failed, session closed locally"),
        }
        result
    }

    async fn terminate(&mut self, error: ClientError) -> ControlFlow<()> {
        error!(error = %error, code = error.error_code(), "session ended");
        self.retire_link().await;
        self.shared.set_state(SessionState::Terminated);
        self.shared.notify(Notice::SessionEnded(error));
        ControlFlow::Break(())
    }

    async fn retire_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.retire().await;
        }
    }
}

/// A failed control-channel probe means a full outage.
async fn confirm_server_alive(control: &dyn ControlChannel) -> Result<()> {
    match control.ping().await {
        Ok(rtt) => {
            debug!(rtt_ms = rtt.as_millis() as u64, "control channel reachable");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "control channel unreachable, treating as outage");
            Err(e)
        }
    }
}
