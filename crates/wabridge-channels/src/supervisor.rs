//! Connection supervisor: owns the single protocol session, its state
//! machine, and the reconnect timer.
//!
//! ```text
//! Disconnected -> Connecting { qr } -> Connected { identity }
//!       ^                                   |
//!       +--------- Closed(reason) ----------+
//! ```
//!
//! Every session attempt gets a generation number. Lifecycle events from a
//! superseded attempt are dropped; messages are always passed through.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use wabridge_core::{
    config::WhatsAppConfig,
    error::BridgeError,
    session::{CloseReason, ConnectionState, EventSink, InboundMessage, SessionEvent},
    traits::{CredentialStore, Session, SessionFactory},
};

/// Capacity of the event and message queues.
const QUEUE_CAPACITY: usize = 256;

/// Reconnect policy.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Fixed delay after any reported closure or failed start. Never grows.
    pub reconnect_delay: Duration,
    /// Delay before a fresh session starts after an explicit logout.
    pub logout_restart_delay: Duration,
}

impl From<&WhatsAppConfig> for SupervisorConfig {
    fn from(cfg: &WhatsAppConfig) -> Self {
        Self {
            reconnect_delay: cfg.reconnect_delay(),
            logout_restart_delay: cfg.logout_restart_delay(),
        }
    }
}

/// Shared pointer to the authenticated session, if any.
///
/// Populated on `Connected`, cleared on closure, logout, and restart.
#[derive(Clone, Default)]
pub(crate) struct SessionSlot(Arc<RwLock<Option<Arc<dyn Session>>>>);

impl SessionSlot {
    fn get(&self) -> Option<Arc<dyn Session>> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, session: Option<Arc<dyn Session>>) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = session;
    }
}

enum Command {
    Logout(oneshot::Sender<Result<(), BridgeError>>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle for status queries, sends, and logout.
#[derive(Clone)]
pub struct SupervisorHandle {
    state: watch::Receiver<ConnectionState>,
    commands: mpsc::Sender<Command>,
    slot: SessionSlot,
}

impl SupervisorHandle {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The authenticated session, or `NotConnected`.
    pub fn session(&self) -> Result<Arc<dyn Session>, BridgeError> {
        self.slot.get().ok_or(BridgeError::NotConnected)
    }

    /// Log out, erase credentials, and schedule a fresh session.
    pub async fn logout(&self) -> Result<(), BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Logout(tx))
            .await
            .map_err(|_| BridgeError::Session("supervisor stopped".into()))?;
        rx.await
            .map_err(|_| BridgeError::Session("supervisor stopped".into()))?
    }

    /// Stop the supervisor and tear down the live session.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// The supervising task. Construct with [`ConnectionSupervisor::spawn`].
pub struct ConnectionSupervisor {
    factory: Arc<dyn SessionFactory>,
    credentials: Arc<dyn CredentialStore>,
    config: SupervisorConfig,
    state: watch::Sender<ConnectionState>,
    slot: SessionSlot,
    generation: u64,
    session: Option<Arc<dyn Session>>,
    restart_at: Option<Instant>,
    events_tx: mpsc::Sender<(u64, SessionEvent)>,
    events_rx: mpsc::Receiver<(u64, SessionEvent)>,
    commands: mpsc::Receiver<Command>,
    messages: mpsc::Sender<InboundMessage>,
}

impl ConnectionSupervisor {
    /// Start supervising. Returns the handle, the stream of protocol
    /// messages, and the supervisor task.
    pub fn spawn(
        factory: Arc<dyn SessionFactory>,
        credentials: Arc<dyn CredentialStore>,
        config: SupervisorConfig,
    ) -> (
        SupervisorHandle,
        mpsc::Receiver<InboundMessage>,
        JoinHandle<()>,
    ) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (msg_tx, msg_rx) = mpsc::channel(QUEUE_CAPACITY);
        let slot = SessionSlot::default();

        let supervisor = Self {
            factory,
            credentials,
            config,
            state: state_tx,
            slot: slot.clone(),
            generation: 0,
            session: None,
            restart_at: None,
            events_tx,
            events_rx,
            commands: cmd_rx,
            messages: msg_tx,
        };
        let task = tokio::spawn(supervisor.run());

        let handle = SupervisorHandle {
            state: state_rx,
            commands: cmd_tx,
            slot,
        };
        (handle, msg_rx, task)
    }

    async fn run(mut self) {
        self.start_session().await;

        loop {
            let restart_at = self.restart_at;
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Logout(reply)) => {
                        let result = self.logout().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.retire_session().await;
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.retire_session().await;
                        break;
                    }
                },
                Some((generation, event)) = self.events_rx.recv() => {
                    self.handle_event(generation, event).await;
                }
                _ = wait_until(restart_at) => {
                    self.restart_at = None;
                    self.start_session().await;
                }
            }
        }
        info!("connection supervisor stopped");
    }

    /// Replace the current session (if any) with a new attempt.
    async fn start_session(&mut self) {
        self.retire_session().await;
        self.set_state(ConnectionState::Connecting { qr: None });

        let generation = self.generation;
        info!("starting whatsapp session (generation {generation})");
        let sink = EventSink::new(generation, self.events_tx.clone());
        match self.factory.start(sink).await {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                error!("whatsapp session start failed: {e}");
                self.set_state(ConnectionState::Disconnected);
                self.schedule_restart(self.config.reconnect_delay);
            }
        }
    }

    /// Drop the current session and invalidate its generation.
    async fn retire_session(&mut self) {
        self.generation += 1;
        self.slot.set(None);
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }
    }

    async fn handle_event(&mut self, generation: u64, event: SessionEvent) {
        if let SessionEvent::Message(msg) = event {
            if self.messages.send(msg).await.is_err() {
                warn!("message receiver dropped");
            }
            return;
        }
        if generation != self.generation {
            debug!(
                "dropping event from stale session generation {generation} (current {})",
                self.generation
            );
            return;
        }

        match event {
            SessionEvent::Qr(code) => {
                info!("whatsapp pairing QR updated (scan to link)");
                self.set_state(ConnectionState::Connecting { qr: Some(code) });
            }
            SessionEvent::Connected { identity } => {
                info!(
                    "whatsapp connected as {}",
                    identity.as_deref().unwrap_or("unknown")
                );
                self.slot.set(self.session.clone());
                self.set_state(ConnectionState::Connected { identity });
            }
            SessionEvent::Closed(reason) => self.on_closed(reason).await,
            SessionEvent::Message(_) => {}
        }
    }

    async fn on_closed(&mut self, reason: CloseReason) {
        warn!("whatsapp session closed: {reason}");
        self.retire_session().await;

        if reason.requires_fresh_credentials() {
            info!("stored credentials are no longer valid, erasing");
            if let Err(e) = self.credentials.erase().await {
                error!("failed to erase whatsapp credentials: {e}");
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.schedule_restart(self.config.reconnect_delay);
    }

    async fn logout(&mut self) -> Result<(), BridgeError> {
        let connected = self.state.borrow().is_connected();
        let result = match self.session.clone() {
            Some(session) if connected => session.logout().await,
            _ => Ok(()),
        };
        if let Err(ref e) = result {
            warn!("whatsapp logout request failed: {e}");
        }

        self.retire_session().await;
        let erased = self.credentials.erase().await;
        self.set_state(ConnectionState::Disconnected);
        self.schedule_restart(self.config.logout_restart_delay);
        info!("whatsapp logged out, credentials erased");

        result.and(erased)
    }

    fn schedule_restart(&mut self, delay: Duration) {
        debug!("whatsapp session restart in {delay:?}");
        self.restart_at = Some(Instant::now() + delay);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
