//! Shared append-only log file for packetlog

use crate::{PacketLogError, Result};
use bytes::Bytes;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lock-protected append-only log shared by every session and the
/// timestamp writer.
///
/// Each operation opens the backing file, does its work and closes it again
/// while holding the lock, so a reader never sees half of an append. The lock
/// is a FIFO-fair `tokio::sync::Mutex`: concurrent writers commit in the order
/// they started waiting.
///
/// The file is never recreated behind the store's back: if it disappears
/// after [`LogStore::create`], appends fail with [`PacketLogError::Storage`].
/// A failed append is cut back so the file only ever holds whole appends.
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    sync_writes: bool,
    // Running byte count; the mutex also serializes all file access.
    state: Mutex<u64>,
}

impl LogStore {
    /// Create the backing file, truncating anything left from a previous run
    pub async fn create<P: AsRef<Path>>(path: P, sync_writes: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::File::create(&path)
            .await
            .map_err(PacketLogError::Storage)?;
        info!(path = %path.display(), "log store created");

        Ok(Self {
            path,
            sync_writes,
            state: Mutex::new(0),
        })
    }

    /// Bytes committed so far
    pub async fn len(&self) -> u64 {
        *self.state.lock().await
    }

    /// Whether nothing has been committed yet
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Append `bytes` and return the whole log as it stands right after the
    /// append. The snapshot always ends with `bytes` and contains every append
    /// committed before it.
    pub async fn append_and_echo(&self, bytes: &[u8]) -> Result<Bytes> {
        let mut len = self.state.lock().await;
        self.append_locked(bytes, *len).await?;
        *len += bytes.len() as u64;

        let contents = fs::read(&self.path).await.map_err(PacketLogError::Storage)?;
        debug!(appended = bytes.len(), total = *len, "packet committed");
        Ok(Bytes::from(contents))
    }

    /// Append `bytes` without reading the log back
    pub async fn append_only(&self, bytes: &[u8]) -> Result<()> {
        let mut len = self.state.lock().await;
        self.append_locked(bytes, *len).await?;
        *len += bytes.len() as u64;
        Ok(())
    }

    /// Read the whole log under the lock
    pub async fn snapshot(&self) -> Result<Bytes> {
        let _guard = self.state.lock().await;
        let contents = fs::read(&self.path).await.map_err(PacketLogError::Storage)?;
        Ok(Bytes::from(contents))
    }

    /// Delete the backing file. A file that is already gone is not an error.
    pub async fn remove(&self) -> Result<()> {
        let _guard = self.state.lock().await;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "log store removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PacketLogError::Storage(e)),
        }
    }

    async fn append_locked(&self, bytes: &[u8], committed: u64) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(PacketLogError::Storage)?;

        append_or_truncate(&mut file, bytes, committed, self.sync_writes)
            .await
            .map_err(PacketLogError::Storage)
    }
}

/// Writable log file that can be synced and cut back to a length
trait LogFile: AsyncWrite + Unpin {
    fn sync(&mut self) -> impl Future<Output = io::Result<()>> + Send;
    fn truncate(&mut self, len: u64) -> impl Future<Output = io::Result<()>> + Send;
}

impl LogFile for fs::File {
    fn sync(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> impl Future<Output = io::Result<()>> + Send {
        self.set_len(len)
    }
}

/// Append `bytes` to a file holding `committed` bytes. On failure the file
/// is truncated back to `committed` before the error is returned.
async fn append_or_truncate<F: LogFile>(
    file: &mut F,
    bytes: &[u8],
    committed: u64,
    sync: bool,
) -> io::Result<()> {
    let result = write_through(file, bytes, sync).await;
    if let Err(e) = &result {
        match file.truncate(committed).await {
            Ok(()) => warn!(error = %e, committed, "append failed, log cut back to last commit"),
            Err(truncate_err) => {
                warn!(error = %truncate_err, committed, "append failed and could not be rolled back")
            }
        }
    }
    result
}

async fn write_through<F: LogFile>(file: &mut F, bytes: &[u8], sync: bool) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    if sync {
        file.sync().await?;
    }
    Ok(())
}
