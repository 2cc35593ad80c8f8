//! Bridge session lifecycle.
//!
//! [`BridgeCoordinator`] owns the one process-wide slot holding the current
//! [`BridgeSession`]. Every state change goes through `connect`, `disconnect`
//! or `handle_connection_lost`, which are serialized by a single async lock:
//!
//! ```text
//! Idle -> Connecting -> Active -> Disconnecting -> Idle
//!            |                        ^
//!            +--------> Idle          | (connection lost)
//! ```
//!
//! Blocking game I/O runs on the blocking pool, never on the gateway loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task;
use tracing::{debug, info, warn};

use crate::bridge::drain::{DrainLoop, DrainSettings};
use crate::bridge::queue::RelayQueue;
use crate::common::{BridgeError, BridgeResult, GatewayTask};
use crate::game::adapter::{GameSender, GameSessionAdapter};
use crate::game::connection::{Credentials, GameConnector, ServerAddress};

/// Lifecycle state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Public description of an established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u64,
    pub username: String,
    pub server: ServerAddress,
}

/// Result of a disconnect request. Both outcomes leave the bridge idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected,
    NotConnected,
}

/// One live pairing of a game connection with its drain loop.
pub struct BridgeSession {
    info: SessionInfo,
    adapter: GameSessionAdapter,
    drain: DrainLoop,
    sender: GameSender,
}

impl BridgeSession {
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Stop the drain loop first, then close the game connection.
    fn shutdown(mut self) {
        self.drain.stop();
        self.adapter.disconnect();
        self.drain.join();
    }
}

enum Slot {
    Idle,
    Connecting,
    Active(BridgeSession),
    Disconnecting,
}

impl Slot {
    fn state(&self) -> SessionState {
        match self {
            Slot::Idle => SessionState::Idle,
            Slot::Connecting => SessionState::Connecting,
            Slot::Active(_) => SessionState::Active,
            Slot::Disconnecting => SessionState::Disconnecting,
        }
    }
}

/// Owner of the single bridge session.
pub struct BridgeCoordinator {
    connector: Arc<dyn GameConnector>,
    address: ServerAddress,
    credentials: Credentials,
    settings: DrainSettings,
    queue_capacity: Option<usize>,
    tasks: mpsc::UnboundedSender<GatewayTask>,
    commands: AsyncMutex<()>,
    slot: Mutex<Slot>,
    next_id: AtomicU64,
}

impl BridgeCoordinator {
    pub fn new(
        connector: Arc<dyn GameConnector>,
        address: ServerAddress,
        credentials: Credentials,
        tasks: mpsc::UnboundedSender<GatewayTask>,
    ) -> Self {
        Self {
            connector,
            address,
            credentials,
            settings: DrainSettings::default(),
            queue_capacity: None,
            tasks,
            commands: AsyncMutex::new(()),
            slot: Mutex::new(Slot::Idle),
            next_id: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub fn with_drain_settings(mut self, settings: DrainSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Bound each session's relay queue. `None` keeps it unbounded.
    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn state(&self) -> SessionState {
        self.slot.lock().state()
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Info of the active session, if any.
    #[cfg(test)]
    pub fn active_session(&self) -> Option<SessionInfo> {
        match &*self.slot.lock() {
            Slot::Active(session) => Some(session.info().clone()),
            _ => None,
        }
    }

    fn set_slot(&self, slot: Slot) {
        let mut current = self.slot.lock();
        debug!("Bridge state {} -> {}", current.state(), slot.state());
        *current = slot;
    }

    /// Open a game connection and start relaying.
    ///
    /// Refused with [`BridgeError::AlreadyActive`] before any network call if a
    /// session is connecting or active. On failure the bridge is idle again
    /// and no worker thread is left running.
    pub async fn connect(&self) -> BridgeResult<SessionInfo> {
        let _command = self.commands.lock().await;

        {
            let mut slot = self.slot.lock();
            if !matches!(*slot, Slot::Idle) {
                return Err(BridgeError::AlreadyActive);
            }
            *slot = Slot::Connecting;
        }

        match self.open_session().await {
            Ok(session) => {
                let info = session.info().clone();
                self.set_slot(Slot::Active(session));
                info!(
                    session_id = info.id,
                    "Bridge session active: {} on {}", info.username, info.server
                );
                Ok(info)
            }
            Err(e) => {
                self.set_slot(Slot::Idle);
                warn!("Bridge connect failed: {}", e);
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> BridgeResult<BridgeSession> {
        let queue = RelayQueue::with_capacity(self.queue_capacity);
        let connector = Arc::clone(&self.connector);
        let address = self.address.clone();
        let credentials = self.credentials.clone();
        let adapter_queue = queue.clone();

        let mut adapter = task::spawn_blocking(move || {
            GameSessionAdapter::connect(connector.as_ref(), &address, &credentials, adapter_queue)
        })
        .await
        .map_err(|e| BridgeError::Worker(e.to_string()))??;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        // Dropping the adapter on an error path closes the connection again.
        adapter
            .start_receiving(id, self.tasks.clone())
            .map_err(|e| BridgeError::Worker(format!("failed to start receive thread: {}", e)))?;
        let drain = DrainLoop::spawn(queue, self.settings, self.tasks.clone())
            .map_err(|e| BridgeError::Worker(format!("failed to start drain loop: {}", e)))?;

        Ok(BridgeSession {
            info: SessionInfo {
                id,
                username: self.credentials.username.clone(),
                server: self.address.clone(),
            },
            sender: adapter.sender(),
            adapter,
            drain,
        })
    }

    /// Tear down the active session, if any. Never fails; the bridge is idle
    /// afterwards.
    pub async fn disconnect(&self) -> DisconnectOutcome {
        let _command = self.commands.lock().await;

        let session = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Disconnecting) {
                Slot::Active(session) => session,
                other => {
                    *slot = other;
                    debug!("Disconnect requested with no active session");
                    return DisconnectOutcome::NotConnected;
                }
            }
        };

        let id = session.info().id;
        self.teardown(session).await;
        self.set_slot(Slot::Idle);
        info!(session_id = id, "Bridge session disconnected");
        DisconnectOutcome::Disconnected
    }

    /// Move the session identified by `session_id` to idle after its game
    /// connection closed on its own. Reports for a session that is no longer
    /// current are ignored. Returns whether a session was torn down.
    pub async fn handle_connection_lost(&self, session_id: u64) -> bool {
        let _command = self.commands.lock().await;

        let session = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Disconnecting) {
                Slot::Active(session) if session.info().id == session_id => session,
                other => {
                    *slot = other;
                    debug!(session_id, "Ignoring connection loss of a stale session");
                    return false;
                }
            }
        };

        self.teardown(session).await;
        self.set_slot(Slot::Idle);
        info!(session_id, "Bridge session closed after connection loss");
        true
    }

    async fn teardown(&self, session: BridgeSession) {
        if let Err(e) = task::spawn_blocking(move || session.shutdown()).await {
            warn!("Session teardown did not complete cleanly: {}", e);
        }
    }

    /// Forward text verbatim to the game through the active session.
    ///
    /// A send failure is returned to the caller but leaves the session up.
    pub async fn send_to_game(&self, text: &str) -> BridgeResult<()> {
        let sender = match &*self.slot.lock() {
            Slot::Active(session) => session.sender.clone(),
            _ => return Err(BridgeError::NotActive),
        };

        let text = text.to_string();
        task::spawn_blocking(move || sender.send(&text))
            .await
            .map_err(|e| BridgeError::Worker(e.to_string()))??;
        Ok(())
    }
}
