//! # packetlog - Newline-Framed Packet Logging Server
//!
//! packetlog accepts newline-terminated packets from any number of concurrent
//! TCP clients, appends every complete packet to one shared log file and echoes
//! the whole log back to the client that sent it.
//!
//! ## Features
//!
//! - **Atomic Appends**: every append and its read-back happen under one lock
//! - **Task per Connection**: bounded by a configurable worker cap
//! - **Timestamps**: a `timestamp:<date>` record is appended on a fixed interval
//! - **Graceful Shutdown**: SIGINT/SIGTERM drain every worker, then remove the log
//!
//! ## Quick Start
//!
//! ### Server
//! ```no_run
//! use packetlog::config::ServerConfig;
//! use packetlog::server::PacketServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::from_file("config/server.toml")?;
//!     let server = PacketServer::bind(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Client
//! ```no_run
//! use packetlog::client::PacketClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = PacketClient::connect("127.0.0.1:9000").await?;
//!     let log = client.send_packet(b"hello\n").await?;
//!     assert!(log.ends_with(b"hello\n"));
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod daemon;
pub mod server;
pub mod types;

/// Common error types used throughout packetlog
pub mod error {
    use std::fmt;

    /// packetlog error types
    #[derive(Debug)]
    pub enum PacketLogError {
        /// I/O operation failed
        Io(std::io::Error),
        /// Configuration error
        Config(String),
        /// Server error (listener setup or accept failure)
        Server(String),
        /// Per-connection failure; only the affected session is torn down
        Connection(String),
        /// Reading or writing the shared log file failed
        Storage(std::io::Error),
        /// A packet grew past the configured limit without a newline
        PacketTooLarge(usize),
        /// Client error
        Client(String),
    }

    impl PacketLogError {
        /// Whether this error should stop the whole service rather than a
        /// single connection.
        pub fn is_fatal(&self) -> bool {
            matches!(self, PacketLogError::Storage(_) | PacketLogError::Server(_))
        }
    }

    impl fmt::Display for PacketLogError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                PacketLogError::Io(e) => write!(f, "I/O error: {}", e),
                PacketLogError::Config(e) => write!(f, "Configuration error: {}", e),
                PacketLogError::Server(e) => write!(f, "Server error: {}", e),
                PacketLogError::Connection(e) => write!(f, "Connection error: {}", e),
                PacketLogError::Storage(e) => write!(f, "Storage error: {}", e),
                PacketLogError::PacketTooLarge(limit) => {
                    write!(f, "Packet exceeds limit of {} bytes", limit)
                }
                PacketLogError::Client(e) => write!(f, "Client error: {}", e),
            }
        }
    }

    impl std::error::Error for PacketLogError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            match self {
                PacketLogError::Io(e) | PacketLogError::Storage(e) => Some(e),
                _ => None,
            }
        }
    }

    impl From<std::io::Error> for PacketLogError {
        fn from(err: std::io::Error) -> Self {
            PacketLogError::Io(err)
        }
    }

    impl From<toml::de::Error> for PacketLogError {
        fn from(err: toml::de::Error) -> Self {
            PacketLogError::Config(format!("Failed to parse config: {}", err))
        }
    }

    /// Result type alias for packetlog operations
    pub type Result<T> = std::result::Result<T, PacketLogError>;
}

pub use error::{PacketLogError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::PacketClient;
    pub use crate::config::{ClientConfig, ServerConfig};
    pub use crate::server::{LogStore, PacketServer, ShutdownHandle};
    pub use crate::types::{PacketCodec, RemainderPolicy};
    pub use crate::{PacketLogError, Result};
}
