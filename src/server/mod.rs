//! packetlog server implementation

pub mod acceptor;
pub mod session;
pub mod shutdown;
pub mod storage;
pub mod timestamp;

use crate::config::ServerConfig;
use crate::{PacketLogError, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub use acceptor::{bind_listener, resolve_address, Acceptor};
pub use session::{Session, SessionEnd, SessionSettings};
pub use shutdown::{ServerState, ShutdownHandle, SignalListener};
pub use storage::LogStore;
pub use timestamp::TimestampWriter;

use shutdown::FaultReporter;

/// Main packetlog server that coordinates all components
pub struct PacketServer {
    config: ServerConfig,
    listener: TcpListener,
    store: Arc<LogStore>,
    state: Arc<ServerState>,
}

impl PacketServer {
    /// Bind the configured address and create an empty log store
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = resolve_address(&config.listen_address())?;
        let listener = bind_listener(addr, config.server.backlog)?;
        Self::from_listener(config, listener).await
    }

    /// Build a server around an already bound listener
    pub async fn from_listener(config: ServerConfig, listener: std::net::TcpListener) -> Result<Self> {
        config.validate()?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;

        let store = Arc::new(
            LogStore::create(&config.storage.data_file, config.storage.sync_writes).await?,
        );
        let state = Arc::new(ServerState::new(config.server.max_connections));

        info!(
            address = %listener.local_addr()?,
            data_file = %config.storage.data_file.display(),
            max_connections = config.server.max_connections,
            "server listening"
        );

        Ok(Self {
            config,
            listener,
            store,
            state,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared log store
    pub fn store(&self) -> Arc<LogStore> {
        Arc::clone(&self.store)
    }

    /// Handle that stops the server the same way a signal does
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.state))
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        let mut signals = SignalListener::new()
            .map_err(|e| PacketLogError::Server(format!("Failed to install signal handlers: {}", e)))?;

        self.run_until(async move {
            let signal = signals.recv().await;
            info!(signal, "caught signal, exiting");
        })
        .await
    }

    /// Run until `shutdown` completes, a stop is requested through a
    /// [`ShutdownHandle`], or a fatal error occurs.
    ///
    /// On the way out every session and the timestamp writer are cancelled
    /// and joined, the listener is closed and the log file removed. Returns
    /// the fatal error if one caused the stop.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let PacketServer {
            config,
            listener,
            store,
            state,
        } = self;

        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();
        let faults = FaultReporter::new(fault_tx, config.shutdown.fatal_storage_errors);

        if config.timestamp.enabled {
            let writer = TimestampWriter::new(
                Arc::clone(&store),
                Duration::from_secs(config.timestamp.interval_secs),
                config.timestamp.format.clone(),
            );
            let cancel = state.cancel_token();
            let faults = faults.clone();
            state.tracker().spawn(async move {
                if let Err(e) = writer.run(cancel).await {
                    faults.report(e);
                }
            });
        }

        let acceptor = Acceptor::new(
            listener,
            Arc::clone(&state),
            Arc::clone(&store),
            SessionSettings::from(&config),
            faults,
        );

        tokio::pin!(shutdown);
        let outcome = tokio::select! {
            _ = &mut shutdown => Ok(()),
            Some(fault) = fault_rx.recv() => Err(fault),
            result = acceptor.run() => result,
        };
        if let Err(e) = &outcome {
            error!(error = %e, "stopping after fatal error");
        }

        state.request_stop();
        state.tracker().close();
        let drain = Duration::from_secs(config.shutdown.drain_timeout_secs);
        if tokio::time::timeout(drain, state.tracker().wait()).await.is_err() {
            warn!(
                remaining = state.tracker().len(),
                "tasks still running after drain timeout"
            );
            state.log_stragglers();
        }
        while let Ok(late) = fault_rx.try_recv() {
            warn!(error = %late, "error reported during shutdown");
        }

        drop(acceptor);
        info!("listener closed");

        if config.storage.remove_on_shutdown {
            if let Err(e) = store.remove().await {
                error!(error = %e, "failed to remove log file");
                if outcome.is_ok() {
                    return Err(e);
                }
            }
        }

        info!("server shutting down");
        outcome
    }
}
