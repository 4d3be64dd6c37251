//! Connection supervisor.
//!
//! A single actor task owns the connection lifecycle for one session key:
//! - Serializes `start`/`stop` requests, client events and retry timers
//! - Persists every credential rotation before acknowledging it
//! - Publishes a [`ConnectionStatus`] on every transition
//!
//! Each connection attempt gets a fresh generation number. Events and
//! connect results from an older generation are ignored, so a client that
//! outlives its connection can never overwrite newer state.

use std::sync::Arc;

use courier_core::{
    AuthError, ClientEvent, CloseReason, ConnectOptions, ConnectionError, ConnectionStatus,
    CredentialStore, Envelope, EventSink, MessageHandler, ProtocolClient, ProtocolConnector,
    SaveError, SendError, SupervisorConfig, SupervisorPhase,
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep_until},
};
use tracing::{debug, info, warn};

use crate::{
    auth::{AuthStateAdapter, LiveSessionState},
    backoff::{BackoffPolicy, RetryState},
    dispatcher::{DispatchError, EventDispatcher},
};

/// Capacity of the command channel.
const COMMAND_CAPACITY: usize = 32;

/// Capacity of the client event channel.
const EVENT_CAPACITY: usize = 256;

/// Supervisor error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("Supervisor has shut down")]
    Shutdown,
}

enum Command {
    Start {
        reply: oneshot::Sender<ConnectionStatus>,
    },
    Stop {
        reply: oneshot::Sender<ConnectionStatus>,
    },
}

/// Result of one `connect` call.
struct AttemptOutcome {
    generation: u64,
    result: Result<Arc<dyn ProtocolClient>, ConnectionError>,
}

/// Handle to a running supervisor. Cheap to clone.
#[derive(Clone)]
pub struct SupervisorHandle {
    session_key: Arc<str>,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    dispatcher: EventDispatcher,
}

impl SupervisorHandle {
    /// Begin connecting. A no-op while an attempt is already underway or the
    /// session is connected; skips the remaining wait when backing off.
    ///
    /// # Errors
    /// Returns `SupervisorError::Shutdown` if the actor is gone.
    pub async fn start(&self) -> Result<ConnectionStatus, SupervisorError> {
        self.request(|reply| Command::Start { reply }).await
    }

    /// Disconnect and stay idle until the next `start`.
    ///
    /// # Errors
    /// Returns `SupervisorError::Shutdown` if the actor is gone.
    pub async fn stop(&self) -> Result<ConnectionStatus, SupervisorError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Send a text message through the active client.
    ///
    /// # Errors
    /// See [`EventDispatcher::send`].
    pub async fn send(&self, recipient: &str, body: &str) -> Result<(), SendError> {
        self.dispatcher.send(recipient, body).await
    }

    /// Register the inbound message handler.
    ///
    /// # Errors
    /// See [`EventDispatcher::on_inbound`].
    pub fn on_inbound(&self, handler: Arc<dyn MessageHandler>) -> Result<(), DispatchError> {
        self.dispatcher.on_inbound(handler)
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<ConnectionStatus>) -> Command,
    ) -> Result<ConnectionStatus, SupervisorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| SupervisorError::Shutdown)?;
        reply_rx.await.map_err(|_| SupervisorError::Shutdown)
    }
}

/// Actor that drives one session's connection state machine.
pub struct ConnectionSupervisor {
    session_key: String,
    connector: Arc<dyn ProtocolConnector>,
    adapter: AuthStateAdapter,
    dispatcher: EventDispatcher,
    options: ConnectOptions,
    clear_on_logout: bool,

    // State
    phase: SupervisorPhase,
    generation: u64,
    client: Option<Arc<dyn ProtocolClient>>,
    qr: Option<String>,
    last_error: Option<String>,
    policy: BackoffPolicy,
    retry: RetryState,
    retry_at: Option<Instant>,

    // Communication
    command_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<Envelope>,
    event_rx: mpsc::Receiver<Envelope>,
    outcome_tx: mpsc::UnboundedSender<AttemptOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<AttemptOutcome>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionSupervisor {
    /// Spawn the supervisor task. It stays idle until `start` is called and
    /// shuts down once every handle has been dropped.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn spawn(
        config: &SupervisorConfig,
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn ProtocolConnector>,
    ) -> SupervisorHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::idle());
        let dispatcher = EventDispatcher::new(status_tx.subscribe(), config.dedupe_window);

        let actor = Self {
            session_key: config.session_key.clone(),
            connector,
            adapter: AuthStateAdapter::new(store, config.session_key.clone(), config.allow_bootstrap),
            dispatcher: dispatcher.clone(),
            options: ConnectOptions {
                session_key: config.session_key.clone(),
                client_name: config.client_name.clone(),
                client_version: config.client_version.clone(),
            },
            clear_on_logout: config.clear_on_logout,
            phase: SupervisorPhase::Idle,
            generation: 0,
            client: None,
            qr: None,
            last_error: None,
            policy: BackoffPolicy::from_config(config),
            retry: RetryState::default(),
            retry_at: None,
            command_rx,
            event_tx,
            event_rx,
            outcome_tx,
            outcome_rx,
            status_tx,
        };

        tokio::spawn(actor.run());

        SupervisorHandle {
            session_key: Arc::from(config.session_key.as_str()),
            commands: command_tx,
            status: status_rx,
            dispatcher,
        }
    }

    async fn run(mut self) {
        debug!(session_key = %self.session_key, "Supervisor started");

        loop {
            let retry_at = self.retry_at;

            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!(session_key = %self.session_key, "All handles dropped, shutting down");
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                Some(envelope) = self.event_rx.recv() => {
                    self.handle_event(envelope).await;
                }

                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome).await;
                }

                () = retry_timer(retry_at) => {
                    self.retry_at = None;
                    debug!(
                        session_key = %self.session_key,
                        attempt = self.retry.attempt(),
                        "Backoff elapsed, reconnecting"
                    );
                    self.begin_attempt().await;
                }
            }
        }

        debug!(session_key = %self.session_key, "Supervisor stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { reply } => {
                match self.phase {
                    SupervisorPhase::Idle | SupervisorPhase::Backoff => {
                        self.retry_at = None;
                        self.begin_attempt().await;
                    }
                    phase => debug!(session_key = %self.session_key, ?phase, "Already running, ignoring start"),
                }
                let _ = reply.send(self.snapshot());
            }
            Command::Stop { reply } => {
                self.shutdown().await;
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Load credentials and launch a connect call for a new generation.
    async fn begin_attempt(&mut self) {
        self.generation += 1;
        self.qr = None;
        self.set_phase(SupervisorPhase::Starting);

        let LiveSessionState {
            credential,
            bootstrapped,
        } = match self.adapter.load(self.connector.as_ref()).await {
            Ok(state) => state,
            Err(e @ AuthError::CorruptSession { .. }) => {
                warn!(session_key = %self.session_key, error = %e, "Refusing to connect with a corrupt session");
                self.last_error = Some(e.to_string());
                self.set_phase(SupervisorPhase::Idle);
                return;
            }
            Err(e) => {
                self.schedule_retry(e.to_string());
                return;
            }
        };

        info!(
            session_key = %self.session_key,
            generation = self.generation,
            bootstrapped,
            "Connecting"
        );

        let generation = self.generation;
        let sink = EventSink::new(generation, self.event_tx.clone());
        let connector = Arc::clone(&self.connector);
        let options = self.options.clone();
        let outcome_tx = self.outcome_tx.clone();

        // Connect runs off the actor so its events can be handled meanwhile.
        tokio::spawn(async move {
            let result = connector.connect(credential, &options, sink).await;
            let _ = outcome_tx.send(AttemptOutcome { generation, result });
        });
    }

    async fn handle_outcome(&mut self, outcome: AttemptOutcome) {
        if outcome.generation != self.generation {
            if let Ok(client) = outcome.result {
                debug!(generation = outcome.generation, "Disconnecting superseded client");
                tokio::spawn(async move { client.disconnect().await });
            }
            return;
        }

        match outcome.result {
            Ok(client) => {
                self.client = Some(Arc::clone(&client));
                if self.phase == SupervisorPhase::Connected {
                    self.dispatcher.attach(client).await;
                }
            }
            Err(ConnectionError::TransportClosed(reason)) => self.on_close(reason).await,
            Err(ConnectionError::HandshakeExpired) => self.on_close(CloseReason::HandshakeExpired).await,
            Err(e @ ConnectionError::Refused(_)) => {
                self.generation += 1;
                self.schedule_retry(e.to_string());
            }
        }
    }

    async fn handle_event(&mut self, envelope: Envelope) {
        let stale = envelope.generation != self.generation;

        match envelope.event {
            ClientEvent::CredentialUpdate { snapshot, ack } => {
                if stale {
                    debug!(generation = envelope.generation, "Refusing credentials from superseded client");
                    let _ = ack.send(Err(SaveError::Superseded));
                    return;
                }
                let result = self.adapter.persist(&snapshot).await;
                if let Err(e) = &result {
                    warn!(session_key = %self.session_key, error = %e, "Failed to persist credentials");
                    self.last_error = Some(e.to_string());
                    self.publish();
                }
                let _ = ack.send(result.map_err(SaveError::from));
            }
            _ if stale => {
                debug!(generation = envelope.generation, "Ignoring event from superseded client");
            }
            ClientEvent::Qr(payload) => {
                if matches!(self.phase, SupervisorPhase::Starting | SupervisorPhase::AwaitingScan) {
                    info!(session_key = %self.session_key, "Login handshake waiting for scan");
                    self.qr = Some(payload);
                    self.set_phase(SupervisorPhase::AwaitingScan);
                }
            }
            ClientEvent::Open => self.on_open().await,
            ClientEvent::Close(reason) => self.on_close(reason).await,
            ClientEvent::Messages(messages) => {
                for message in messages {
                    self.dispatcher.dispatch(message);
                }
            }
        }
    }

    async fn on_open(&mut self) {
        if !matches!(self.phase, SupervisorPhase::Starting | SupervisorPhase::AwaitingScan) {
            debug!(session_key = %self.session_key, phase = ?self.phase, "Ignoring open outside a connect attempt");
            return;
        }

        info!(session_key = %self.session_key, generation = self.generation, "Connected");
        self.retry_at = None;
        self.retry.reset();
        self.qr = None;
        self.last_error = None;

        if let Err(e) = self.adapter.flush_pending().await {
            warn!(session_key = %self.session_key, error = %e, "Failed to persist new identity");
            self.last_error = Some(e.to_string());
        }
        if let Some(client) = self.client.clone() {
            self.dispatcher.attach(client).await;
        }
        self.set_phase(SupervisorPhase::Connected);
    }

    async fn on_close(&mut self, reason: CloseReason) {
        info!(session_key = %self.session_key, %reason, "Connection closed");
        self.set_phase(SupervisorPhase::Closing);
        self.release_client().await;

        if reason.is_terminal() {
            self.last_error = Some(reason.to_string());
            if self.clear_on_logout {
                if let Err(e) = self.adapter.clear().await {
                    warn!(session_key = %self.session_key, error = %e, "Failed to clear session");
                    self.last_error = Some(format!("{reason}; failed to clear session: {e}"));
                }
            }
            self.retry.reset();
            self.set_phase(SupervisorPhase::Idle);
        } else if reason == CloseReason::HandshakeExpired {
            // Not a failure: present a fresh handshake right away.
            self.last_error = Some(reason.to_string());
            self.retry_at = Some(Instant::now() + self.policy.initial);
            self.set_phase(SupervisorPhase::Backoff);
        } else {
            self.schedule_retry(reason.to_string());
        }
    }

    fn schedule_retry(&mut self, error: String) {
        let attempt = self.retry.record_failure();
        let delay = self.policy.delay_for(attempt);
        warn!(
            session_key = %self.session_key,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Connection attempt failed, backing off"
        );
        self.last_error = Some(error);
        self.retry_at = Some(Instant::now() + delay);
        self.set_phase(SupervisorPhase::Backoff);
    }

    /// Disconnect the active client and return to idle.
    async fn shutdown(&mut self) {
        self.retry_at = None;
        self.release_client().await;
        self.retry.reset();
        self.qr = None;
        if self.phase != SupervisorPhase::Idle {
            info!(session_key = %self.session_key, "Stopped");
        }
        self.set_phase(SupervisorPhase::Idle);
    }

    /// Retire the current generation and disconnect its client.
    async fn release_client(&mut self) {
        self.generation += 1;
        let attached = self.dispatcher.detach().await;
        if let Some(client) = self.client.take().or(attached) {
            client.disconnect().await;
        }
    }

    fn set_phase(&mut self, phase: SupervisorPhase) {
        self.phase = phase;
        self.publish();
    }

    fn snapshot(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.phase.connection_state(),
            phase: self.phase,
            qr_payload: if self.phase == SupervisorPhase::AwaitingScan {
                self.qr.clone()
            } else {
                None
            },
            last_error: self.last_error.clone(),
            retry_attempt: self.retry.attempt(),
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.snapshot());
    }
}

async fn retry_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
