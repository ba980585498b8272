//! Connection manager for the real-time channel.
//!
//! A [`RealtimeChannel`] is a cheap handle onto a single driver task that owns
//! the transport, the connection state machine, the auth handshake and the
//! subscription reconciler. Consumer calls reach the driver as commands; socket
//! events and timers reach it as signals tagged with the epoch that produced
//! them. A signal whose epoch is not the current one is discarded, which is
//! what keeps a late frame, close or timer from acting on a connection that has
//! already been replaced or shut down.

use std::collections::BTreeSet;
use std::sync::Arc;

use archive_shared::{ClientFrame, GroupId, ServerEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::auth::AuthHandshake;
use super::connection::{
    ChannelStatus, CloseReason, ConnectionState, Connector, Transport, WsConnector,
};
use super::dispatcher::{EventDispatcher, Handler, HandlerRegistry};
use super::reconciler::SubscriptionReconciler;
use super::topics::DesiredTopics;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, TransportError};

type ConnectReply = oneshot::Sender<Result<(), ChannelError>>;

enum Command {
    Connect { token: String, reply: ConnectReply },
    Disconnect { done: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    AuthDeadline,
    Reconnect,
}

enum Signal {
    Opened {
        epoch: u64,
        transport: Box<dyn Transport>,
    },
    OpenFailed {
        epoch: u64,
        error: TransportError,
    },
    Frame {
        epoch: u64,
        text: String,
    },
    Closed {
        epoch: u64,
        error: TransportError,
    },
    Timer {
        epoch: u64,
        timer: Timer,
    },
}

impl Signal {
    fn epoch(&self) -> u64 {
        match self {
            Signal::Opened { epoch, .. }
            | Signal::OpenFailed { epoch, .. }
            | Signal::Frame { epoch, .. }
            | Signal::Closed { epoch, .. }
            | Signal::Timer { epoch, .. } => *epoch,
        }
    }
}

/// Authenticated, auto-reconnecting event channel for one dashboard session.
///
/// Cloning yields another handle onto the same session. The driver task stops
/// once every handle has been dropped.
#[derive(Clone)]
pub struct RealtimeChannel {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
    registry: HandlerRegistry,
}

impl RealtimeChannel {
    /// Start a channel driver on the current tokio runtime. Nothing is opened
    /// until [`connect`](Self::connect) is called.
    pub fn new(
        config: ChannelConfig,
        connector: impl Connector,
        registry: HandlerRegistry,
        desired: &DesiredTopics,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ChannelStatus::default());

        let driver = Driver {
            auth: AuthHandshake::new(config.auth_timeout),
            config,
            connector: Arc::new(connector),
            dispatcher: EventDispatcher::new(registry.clone()),
            reconciler: SubscriptionReconciler::new(),
            desired: desired.watch(),
            status: status_tx,
            signals,
            state: ConnectionState::Idle,
            epoch: 0,
            attempt: 0,
            token: String::new(),
            has_been_ready: false,
            first_attempt: false,
            resumed: false,
            last_error: None,
            waiters: Vec::new(),
            link: None,
            connecting: None,
            reconnect_timer: None,
        };
        tokio::spawn(driver.run(command_rx, signal_rx));

        Self {
            commands,
            status,
            registry,
        }
    }

    /// Channel over a real WebSocket to `config.url`.
    pub fn websocket(
        config: ChannelConfig,
        registry: HandlerRegistry,
        desired: &DesiredTopics,
    ) -> Self {
        let connector = WsConnector::new(config.url.clone());
        Self::new(config, connector, registry, desired)
    }

    /// Open the transport and authenticate with `credential`.
    ///
    /// Resolves once the channel is Ready. Only the first attempt of a session
    /// rejects this call with its transport or auth error; that attempt and
    /// every later failure are retried in the background under the
    /// [`ReconnectPolicy`](super::ReconnectPolicy) and reported through
    /// [`watch_status`](Self::watch_status). Calling this while a session is
    /// already live joins it instead of starting another.
    pub async fn connect(&self, credential: impl Into<String>) -> Result<(), ChannelError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                token: credential.into(),
                reply,
            })
            .map_err(|_| ChannelError::Stopped)?;
        outcome.await.map_err(|_| ChannelError::Stopped)?
    }

    /// Close the session. Idempotent. Registered handlers and the desired
    /// group set are left untouched.
    pub async fn disconnect(&self) {
        let (done, ack) = oneshot::channel();
        if self.commands.send(Command::Disconnect { done }).is_ok() {
            let _ = ack.await;
        }
    }

    /// True while authenticated and Ready. Gates UI affordances that need a
    /// live channel, such as the "live" badge.
    pub fn is_ready(&self) -> bool {
        self.status.borrow().state.is_ready()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Snapshot of the latest published status.
    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Register `handler` for frames of type `kind`. See [`HandlerRegistry::on`].
    pub fn on(&self, kind: impl Into<String>, handler: &Handler) -> bool {
        self.registry.on(kind, handler)
    }

    /// Remove `handler` from `kind`. See [`HandlerRegistry::off`].
    pub fn off(&self, kind: &str, handler: &Handler) -> bool {
        self.registry.off(kind, handler)
    }

    /// The handler registry shared with the driver.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}

struct Driver {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    dispatcher: EventDispatcher,
    reconciler: SubscriptionReconciler,
    auth: AuthHandshake,
    desired: watch::Receiver<BTreeSet<GroupId>>,
    status: watch::Sender<ChannelStatus>,
    signals: mpsc::UnboundedSender<Signal>,

    state: ConnectionState,
    epoch: u64,
    attempt: u32,
    token: String,
    has_been_ready: bool,
    /// No attempt of this session has finished yet
    first_attempt: bool,
    resumed: bool,
    last_error: Option<String>,
    waiters: Vec<ConnectReply>,

    /// Outbound queue of the live transport task
    link: Option<mpsc::UnboundedSender<String>>,
    connecting: Option<AbortHandle>,
    reconnect_timer: Option<AbortHandle>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        let mut desired_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
                changed = self.desired.changed(), if desired_open => match changed {
                    Ok(()) => self.on_desired_changed(),
                    // Every DesiredTopics handle is gone; keep the last value
                    Err(_) => desired_open = false,
                },
            }
        }

        tracing::debug!("all channel handles dropped, stopping driver");
        self.teardown();
        self.resolve_waiters(Err(ChannelError::Stopped));
        self.set_state(ConnectionState::Closed(CloseReason::Disconnected));
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { token, reply } => self.connect(token, reply),
            Command::Disconnect { done } => {
                self.disconnect();
                let _ = done.send(());
            }
        }
    }

    fn connect(&mut self, token: String, reply: ConnectReply) {
        match self.state {
            ConnectionState::Ready => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting
            | ConnectionState::Authenticating
            | ConnectionState::Degraded => {
                tracing::debug!(state = ?self.state, "connect joined the live session");
                self.waiters.push(reply);
            }
            ConnectionState::Idle | ConnectionState::Closed(_) => {
                self.token = token;
                self.attempt = 0;
                self.has_been_ready = false;
                self.first_attempt = true;
                self.last_error = None;
                self.waiters.push(reply);
                self.begin_attempt();
            }
        }
    }

    fn disconnect(&mut self) {
        self.teardown();
        self.token.clear();
        self.resolve_waiters(Err(ChannelError::Disconnected));
        self.set_state(ConnectionState::Closed(CloseReason::Disconnected));
    }

    fn begin_attempt(&mut self) {
        self.epoch += 1;
        let epoch = self.epoch;
        self.set_state(ConnectionState::Connecting);

        let connector = Arc::clone(&self.connector);
        let signals = self.signals.clone();
        let timeout = self.config.connect_timeout;
        let task = tokio::spawn(async move {
            let signal = match tokio::time::timeout(timeout, connector.connect()).await {
                Ok(Ok(transport)) => Signal::Opened { epoch, transport },
                Ok(Err(error)) => Signal::OpenFailed { epoch, error },
                Err(_) => Signal::OpenFailed {
                    epoch,
                    error: TransportError::ConnectTimeout(timeout),
                },
            };
            let _ = signals.send(signal);
        });
        self.connecting = Some(task.abort_handle());
    }

    fn handle_signal(&mut self, signal: Signal) {
        if signal.epoch() != self.epoch {
            tracing::trace!(
                stale = signal.epoch(),
                current = self.epoch,
                "discarding stale signal"
            );
            if let Signal::Opened { mut transport, .. } = signal {
                tokio::spawn(async move {
                    let _ = transport.close().await;
                });
            }
            return;
        }

        match signal {
            Signal::Opened { epoch, transport } => self.on_opened(epoch, transport),
            Signal::OpenFailed { error, .. } | Signal::Closed { error, .. } => {
                self.fail_attempt(error.into())
            }
            Signal::Frame { epoch, text } => self.on_frame(epoch, &text),
            Signal::Timer {
                epoch,
                timer: Timer::AuthDeadline,
            } => {
                if let Some(error) = self.auth.on_deadline(epoch) {
                    self.fail_attempt(error.into());
                }
            }
            Signal::Timer {
                timer: Timer::Reconnect,
                ..
            } => {
                if self.state == ConnectionState::Degraded {
                    self.reconnect_timer = None;
                    self.begin_attempt();
                }
            }
        }
    }

    fn on_opened(&mut self, epoch: u64, transport: Box<dyn Transport>) {
        self.connecting = None;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(epoch, transport, outbound_rx, self.signals.clone()));
        self.link = Some(outbound);
        self.set_state(ConnectionState::Authenticating);

        let (frame, deadline) = self.auth.begin(epoch, &self.token);
        let timer = self.schedule(deadline, Timer::AuthDeadline);
        self.auth.arm(timer);
        self.send(&frame);
    }

    fn on_frame(&mut self, epoch: u64, text: &str) {
        tracing::trace!(len = text.len(), "frame received");
        let event = match self.dispatcher.decode(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        if let ServerEvent::Authenticated { success } = &event {
            match self.auth.on_ack(epoch, *success) {
                Some(Ok(())) => self.enter_ready(),
                Some(Err(e)) => self.fail_attempt(e.into()),
                None => tracing::debug!("unsolicited authenticated frame"),
            }
        }

        self.dispatcher.deliver(&event);
    }

    fn enter_ready(&mut self) {
        self.attempt = 0;
        self.resumed = self.has_been_ready;
        self.has_been_ready = true;
        self.first_attempt = false;
        self.last_error = None;
        // Tracked set is empty after any (re)connect, so this re-subscribes
        // the full desired set
        self.reconcile();
        self.set_state(ConnectionState::Ready);
        self.resolve_waiters(Ok(()));
    }

    fn on_desired_changed(&mut self) {
        if self.state.is_ready() {
            self.reconcile();
            self.publish();
        } else {
            let _ = self.desired.borrow_and_update();
            tracing::trace!(state = ?self.state, "desired groups changed while not ready");
        }
    }

    fn reconcile(&mut self) {
        let desired = self.desired.borrow_and_update().clone();
        let plan = self.reconciler.reconcile(&desired);
        if plan.is_empty() {
            return;
        }
        tracing::debug!(
            subscribe = ?plan.to_subscribe,
            unsubscribe = ?plan.to_unsubscribe,
            "reconciling subscriptions"
        );
        for frame in plan.frames() {
            self.send(&frame);
        }
    }

    /// A connection attempt or a live connection failed.
    fn fail_attempt(&mut self, error: ChannelError) {
        self.last_error = Some(error.to_string());
        self.teardown();

        // The session's opening attempt rejects its callers; everything after
        // that is only visible through the status channel
        if self.first_attempt {
            self.first_attempt = false;
            tracing::warn!(error = %error, "initial connection attempt failed");
            self.resolve_waiters(Err(error.clone()));
        }

        match self.config.reconnect.after_failure(&mut self.attempt) {
            Some(delay) => {
                tracing::warn!(error = %error, attempt = self.attempt, ?delay, "connection lost, reconnecting");
                let timer = self.schedule(Instant::now() + delay, Timer::Reconnect);
                self.reconnect_timer = Some(timer);
                self.set_state(ConnectionState::Degraded);
            }
            None => {
                tracing::error!(
                    error = %error,
                    attempts = self.attempt,
                    "reconnect attempts exhausted, reload required"
                );
                self.resolve_waiters(Err(ChannelError::Exhausted));
                self.set_state(ConnectionState::Closed(CloseReason::Exhausted));
            }
        }
    }

    /// Drop the transport and invalidate everything tagged with the current epoch.
    fn teardown(&mut self) {
        self.epoch += 1;
        self.link = None;
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        self.auth.cancel();
        self.reconciler.clear();
        self.resumed = false;
    }

    /// The single scheduling function: fires `timer` at `at`, tagged with the
    /// current epoch.
    fn schedule(&self, at: Instant, timer: Timer) -> AbortHandle {
        let epoch = self.epoch;
        let signals = self.signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            let _ = signals.send(Signal::Timer { epoch, timer });
        })
        .abort_handle()
    }

    fn send(&self, frame: &ClientFrame) {
        let Some(link) = &self.link else {
            tracing::debug!(kind = frame.kind(), "no open transport, frame dropped");
            return;
        };
        match frame.to_json() {
            Ok(text) => {
                tracing::debug!(kind = frame.kind(), "sending frame");
                if link.send(text).is_err() {
                    tracing::warn!(kind = frame.kind(), "transport task gone, frame dropped");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode frame"),
        }
    }

    fn resolve_waiters(&mut self, outcome: Result<(), ChannelError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::info!(from = ?self.state, to = ?state, epoch = self.epoch, "connection state changed");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(ChannelStatus {
            state: self.state,
            epoch: self.epoch,
            attempt: self.attempt,
            resumed: self.resumed,
            subscribed: self.reconciler.tracked().clone(),
            last_error: self.last_error.clone(),
        });
    }
}

/// Pumps one transport: outbound frames from the driver, inbound frames and
/// the final close back to it, all tagged with `epoch`.
async fn run_link(
    epoch: u64,
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    signals: mpsc::UnboundedSender<Signal>,
) {
    let error = loop {
        tokio::select! {
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = transport.send(text).await {
                        break e;
                    }
                }
                None => {
                    // Torn down by the driver
                    if let Err(e) = transport.close().await {
                        tracing::debug!(error = %e, "close after teardown failed");
                    }
                    return;
                }
            },
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => {
                    if signals.send(Signal::Frame { epoch, text }).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => break e,
                None => break TransportError::Closed,
            },
        }
    };

    tracing::debug!(epoch, error = %error, "transport closed");
    let _ = transport.close().await;
    let _ = signals.send(Signal::Closed { epoch, error });
}
