//! TCP connection acceptor for packetlog

use crate::server::session::{Session, SessionEnd, SessionSettings};
use crate::server::shutdown::{FaultReporter, ServerState};
use crate::server::LogStore;
use crate::{PacketLogError, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, info_span, warn, Instrument};

/// Resolve `host:port` to the first matching socket address
pub fn resolve_address(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .map_err(|e| PacketLogError::Config(format!("Invalid listen address '{}': {}", address, e)))?
        .next()
        .ok_or_else(|| PacketLogError::Config(format!("No address found for '{}'", address)))
}

/// Create a listening socket with `SO_REUSEADDR` set.
///
/// Returns a std listener so the socket can be bound before the process
/// detaches and before any async runtime exists.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| PacketLogError::Server(format!("Failed to create socket: {}", e)))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| PacketLogError::Server(format!("Failed to set socket options: {}", e)))?;
    socket
        .bind(&addr.into())
        .map_err(|e| PacketLogError::Server(format!("Failed to bind {}: {}", addr, e)))?;
    socket
        .listen(backlog)
        .map_err(|e| PacketLogError::Server(format!("Failed to listen on {}: {}", addr, e)))?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Accepts connections and spawns one [`Session`] per connection
pub struct Acceptor {
    listener: TcpListener,
    state: Arc<ServerState>,
    store: Arc<LogStore>,
    settings: SessionSettings,
    faults: FaultReporter,
}

impl Acceptor {
    /// Create a new acceptor
    pub(crate) fn new(
        listener: TcpListener,
        state: Arc<ServerState>,
        store: Arc<LogStore>,
        settings: SessionSettings,
        faults: FaultReporter,
    ) -> Self {
        Self {
            listener,
            state,
            store,
            settings,
            faults,
        }
    }

    /// Accept connections until a stop is requested.
    ///
    /// Returns `Ok(())` once cancelled, or an error for an accept failure the
    /// listener cannot recover from.
    pub async fn run(&self) -> Result<()> {
        let cancel = self.state.cancel_token();
        let slots = self.state.worker_slots();

        while !self.state.is_stopping() {
            if slots.available_permits() == 0 {
                debug!(
                    active_sessions = self.state.active_sessions(),
                    "worker limit reached, waiting for a free slot"
                );
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => permit.map_err(|_| {
                    PacketLogError::Server("worker slots closed".to_string())
                })?,
            };

            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            if let Some((stream, peer)) = check_accept(accepted)? {
                self.spawn_session(stream, peer, permit);
            }
        }

        info!("acceptor stopped");
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr, permit: OwnedSemaphorePermit) {
        let registration = self.state.register(peer);
        let span = info_span!("session", id = %registration.id(), peer = %peer);
        info!(
            parent: &span,
            active_sessions = self.state.active_sessions(),
            "accepted connection"
        );

        let session = Session::new(stream, peer, Arc::clone(&self.store), self.settings.clone());
        let cancel = self.state.cancel_token();
        let faults = self.faults.clone();

        self.state.tracker().spawn(
            async move {
                let _registration = registration;
                let _permit = permit;

                match session.run(cancel).await {
                    Ok(SessionEnd::PeerClosed { discarded }) => {
                        info!(discarded, "closed connection");
                    }
                    Ok(SessionEnd::Cancelled) => {
                        debug!("session cancelled");
                    }
                    Err(e) => faults.report(e),
                }
            }
            .instrument(span),
        );
    }
}

/// Classify an accept result: `Some` for a connection, `None` for an error
/// the listener survives, `Err` for one that must stop the server.
fn check_accept<T>(accepted: std::io::Result<T>) -> Result<Option<T>> {
    match accepted {
        Ok(conn) => Ok(Some(conn)),
        Err(e) if is_transient(&e) => {
            warn!(error = %e, "accept failed, continuing");
            Ok(None)
        }
        Err(e) => Err(PacketLogError::Server(format!(
            "Failed to accept connection: {}",
            e
        ))),
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}
