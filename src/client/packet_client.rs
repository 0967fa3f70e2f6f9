//! TCP client for sending packets to a packetlog server

use crate::config::ClientConfig;
use crate::types::DELIMITER;
use crate::{PacketLogError, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// Client connection to a packetlog server
pub struct PacketClient {
    config: ClientConfig,
    stream: TcpStream,
}

impl PacketClient {
    /// Connect to the server at `address`
    pub async fn connect(address: &str) -> Result<Self> {
        let config = ClientConfig {
            address: address.to_string(),
            ..Default::default()
        };

        Self::with_config(config).await
    }

    /// Connect using a custom configuration
    pub async fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let stream = timeout(
            Duration::from_secs(config.timeout_seconds),
            TcpStream::connect(&config.address),
        )
        .await
        .map_err(|_| PacketLogError::Connection("Connection timeout".to_string()))?
        .map_err(|e| PacketLogError::Connection(format!("Failed to connect: {}", e)))?;

        Ok(Self { config, stream })
    }

    /// Send one packet and return the log echoed by the server.
    ///
    /// A trailing newline is added when `payload` lacks one. The server's
    /// echo always ends with the packet just committed, which is how the end
    /// of the response is detected, so payloads should be distinguishable
    /// from earlier log content.
    pub async fn send_packet(&mut self, payload: &[u8]) -> Result<Bytes> {
        let mut packet = BytesMut::with_capacity(payload.len() + 1);
        packet.extend_from_slice(payload);
        if packet.last() != Some(&DELIMITER) {
            packet.extend_from_slice(&[DELIMITER]);
        }

        self.send_raw(&packet).await?;
        self.read_until_suffix(&packet).await
    }

    /// Write bytes without waiting for a response
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read until the received bytes end with `suffix`
    pub async fn read_until_suffix(&mut self, suffix: &[u8]) -> Result<Bytes> {
        let mut received = BytesMut::new();
        let deadline = Duration::from_secs(self.config.timeout_seconds);

        timeout(deadline, async {
            while !received.ends_with(suffix) {
                let n = self.stream.read_buf(&mut received).await?;
                if n == 0 {
                    return Err(PacketLogError::Connection(
                        "Server closed connection before echo completed".to_string(),
                    ));
                }
            }
            Ok::<(), PacketLogError>(())
        })
        .await
        .map_err(|_| PacketLogError::Client("Timed out waiting for echo".to_string()))??;

        Ok(received.freeze())
    }

    /// Wait for the server to close the connection, returning any bytes
    /// received first
    pub async fn read_to_close(&mut self) -> Result<Bytes> {
        let mut received = Vec::new();
        timeout(
            Duration::from_secs(self.config.timeout_seconds),
            self.stream.read_to_end(&mut received),
        )
        .await
        .map_err(|_| PacketLogError::Client("Timed out waiting for close".to_string()))??;
        Ok(Bytes::from(received))
    }

    /// Close the connection to the server
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(PacketLogError::Io)?;
        Ok(())
    }
}
