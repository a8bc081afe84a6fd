//! Append-only persistence for workflow events.
//!
//! The backing file is a single JSON document rewritten wholesale on every
//! mutation. There is no in-memory cache between calls: every append is a
//! read-modify-write so reads are always fresh. That trades throughput for
//! simplicity, which is fine at the human/CI timescales workers operate on.
//!
//! Read failures degrade to an empty log (the log is observability, losing
//! it must never crash the driver). Write failures are surfaced as errors,
//! since silently dropping an append corrupts the only record we keep.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use super::types::{EventLog, WorkflowEvent, EVENT_LOG_VERSION};

/// Default log location relative to the project directory.
pub const DEFAULT_EVENT_LOG_PATH: &str = ".autopilot/events.json";

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable, append-only store for [`WorkflowEvent`]s.
///
/// Single-writer by design: concurrent processes appending to the same file
/// can lose updates because read-modify-write is not atomic across
/// processes.
#[derive(Debug, Clone)]
pub struct EventStore {
    path: PathBuf,
}

impl EventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store rooted at a project directory, using the default file name.
    pub fn for_project_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(DEFAULT_EVENT_LOG_PATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event and persist. Updates `lastUpdated`.
    pub async fn append(&self, event: WorkflowEvent) -> Result<(), EventStoreError> {
        let mut log = self.read_all().await;
        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Appending workflow event"
        );
        log.events.push(event);
        self.write_log(&mut log).await
    }

    /// Read the full log. A missing or unparseable backing file yields an
    /// empty log rather than an error.
    pub async fn read_all(&self) -> EventLog {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return EventLog::empty();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read event log, treating as empty");
                return EventLog::empty();
            }
        };

        match serde_json::from_slice::<EventLog>(&raw) {
            Ok(log) => log,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Event log is unparseable, treating as empty");
                EventLog::empty()
            }
        }
    }

    /// Convenience accessor for just the event sequence.
    pub async fn events(&self) -> Vec<WorkflowEvent> {
        self.read_all().await.events
    }

    /// Remove events older than the retention window. Returns the number
    /// removed. Skips the rewrite entirely when nothing is pruned, so
    /// running it twice in a row removes zero the second time.
    pub async fn rotate(&self, retention_days: u32) -> Result<usize, EventStoreError> {
        let mut log = self.read_all().await;
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));

        let before = log.events.len();
        log.events.retain(|e| e.timestamp >= cutoff);
        let removed = before - log.events.len();

        if removed == 0 {
            return Ok(0);
        }

        debug!(removed, retention_days, "Rotated event log");
        self.write_log(&mut log).await?;
        Ok(removed)
    }

    /// Reset to an empty log. Test/debug use only.
    pub async fn clear(&self) -> Result<(), EventStoreError> {
        let mut log = EventLog::empty();
        self.write_log(&mut log).await
    }

    /// Rewrite the backing file atomically: serialize to a sibling temp
    /// file, then rename over the target.
    async fn write_log(&self, log: &mut EventLog) -> Result<(), EventStoreError> {
        log.version = EVENT_LOG_VERSION;
        log.last_updated = Utc::now();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let serialized = serde_json::to_vec_pretty(log)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &serialized).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
