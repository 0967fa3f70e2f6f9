//! Stop flag, cancellation and worker bookkeeping shared by the acceptor and
//! the shutdown coordinator

use crate::PacketLogError;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Identifier assigned to each accepted connection
pub type SessionId = Uuid;

/// Registry entry for a live session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Remote address of the peer
    pub peer: SocketAddr,
    /// When the connection was accepted
    pub accepted_at: Instant,
}

/// State owned by one running server: the monotonic stop flag, the
/// cancellation token every waiter observes, the tracker joining every
/// spawned task and the registry of live sessions.
#[derive(Debug)]
pub struct ServerState {
    stop: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
    sessions: DashMap<SessionId, SessionInfo>,
    worker_slots: Arc<Semaphore>,
}

impl ServerState {
    /// Create state allowing at most `max_workers` concurrent sessions
    pub fn new(max_workers: usize) -> Self {
        Self {
            stop: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            sessions: DashMap::new(),
            worker_slots: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Set the stop flag and wake every cancellable wait. Safe to call any
    /// number of times.
    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            info!(active_sessions = self.sessions.len(), "stop requested");
        }
        self.cancel.cancel();
    }

    /// Whether a stop has been requested
    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Token cancelled by [`ServerState::request_stop`]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tracker that every worker and the timestamp task is spawned on
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Semaphore bounding concurrent sessions
    pub fn worker_slots(&self) -> Arc<Semaphore> {
        Arc::clone(&self.worker_slots)
    }

    /// Number of sessions currently registered
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Add a session to the registry. The session stays registered until the
    /// returned guard is dropped.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> SessionRegistration {
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            SessionInfo {
                peer,
                accepted_at: Instant::now(),
            },
        );
        SessionRegistration {
            id,
            state: Arc::clone(self),
        }
    }

    /// Snapshot of the sessions still registered, oldest first
    pub fn remaining_sessions(&self) -> Vec<(SessionId, SessionInfo)> {
        let mut remaining: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        remaining.sort_by_key(|(_, info)| info.accepted_at);
        remaining
    }

    /// Log every session that outlived the drain timeout
    pub fn log_stragglers(&self) {
        for (id, info) in self.remaining_sessions() {
            warn!(
                session = %id,
                peer = %info.peer,
                age_ms = info.accepted_at.elapsed().as_millis() as u64,
                "session still running after drain timeout"
            );
        }
    }
}

/// Removes a session from the registry when dropped, including when its
/// task unwinds.
#[derive(Debug)]
pub struct SessionRegistration {
    id: SessionId,
    state: Arc<ServerState>,
}

impl SessionRegistration {
    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.state.sessions.remove(&self.id);
    }
}

/// Cloneable handle that triggers a graceful shutdown of a running server
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    state: Arc<ServerState>,
}

impl ShutdownHandle {
    pub(crate) fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Request shutdown; equivalent to receiving SIGTERM
    pub fn shutdown(&self) {
        self.state.request_stop();
    }

    /// Whether shutdown has been requested
    pub fn is_stopping(&self) -> bool {
        self.state.is_stopping()
    }

    /// Number of sessions currently registered
    pub fn active_sessions(&self) -> usize {
        self.state.active_sessions()
    }
}

/// Routes task failures: errors that must stop the service go to the
/// coordinator, everything else only ends the task that hit it.
#[derive(Debug, Clone)]
pub(crate) struct FaultReporter {
    tx: mpsc::UnboundedSender<PacketLogError>,
    fatal_storage_errors: bool,
}

impl FaultReporter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<PacketLogError>, fatal_storage_errors: bool) -> Self {
        Self {
            tx,
            fatal_storage_errors,
        }
    }

    pub(crate) fn escalates(&self, err: &PacketLogError) -> bool {
        match err {
            PacketLogError::Storage(_) => self.fatal_storage_errors,
            other => other.is_fatal(),
        }
    }

    pub(crate) fn report(&self, err: PacketLogError) {
        if self.escalates(&err) {
            error!(error = %err, "fatal error, requesting shutdown");
            // The coordinator may already be draining and have dropped the receiver
            let _ = self.tx.send(err);
        } else {
            warn!(error = %err, "task ended with error, service continues");
        }
    }
}

/// Listens for the process termination signals.
///
/// tokio's handler only records that a signal arrived; everything that
/// follows runs on the task awaiting [`SignalListener::recv`].
#[cfg(unix)]
pub struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    /// Install SIGINT and SIGTERM handlers
    pub fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Listens for Ctrl+C.
#[cfg(not(unix))]
pub struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    /// Install the Ctrl+C handler
    pub fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    /// Wait for Ctrl+C
    pub async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    }
}
