//! Periodic timestamp records for packetlog

use crate::server::LogStore;
use crate::{PacketLogError, Result};
use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Prefix of every timestamp record
pub const TIMESTAMP_PREFIX: &str = "timestamp:";

/// Background writer that appends a `timestamp:<date>` line to the log
/// store once per period until cancelled.
pub struct TimestampWriter {
    store: Arc<LogStore>,
    period: Duration,
    format: String,
}

impl TimestampWriter {
    /// Create a new timestamp writer
    pub fn new(store: Arc<LogStore>, period: Duration, format: impl Into<String>) -> Self {
        Self {
            store,
            period,
            format: format.into(),
        }
    }

    /// Run until `cancel` fires. The first record is written one full period
    /// after start.
    ///
    /// A period too long to schedule is rejected with
    /// [`PacketLogError::Config`].
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let start = Instant::now().checked_add(self.period).ok_or_else(|| {
            PacketLogError::Config(format!("Timestamp period {:?} is out of range", self.period))
        })?;
        let mut ticker = interval_at(start, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("timestamp writer stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let record = format_record(&Local::now(), &self.format);
                    self.store.append_only(record.as_bytes()).await?;
                    debug!(record = record.trim_end(), "timestamp appended");
                }
            }
        }
    }
}

/// Render one timestamp record, newline included
pub fn format_record<Tz>(now: &DateTime<Tz>, format: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{}{}\n", TIMESTAMP_PREFIX, now.format(format))
}
