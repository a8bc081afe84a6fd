//! Workflow event model.
//!
//! Events are immutable facts about worker/PR/feature lifecycles. They are
//! only ever appended to the log or pruned wholesale by retention rotation;
//! no event is mutated or deleted individually.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Current schema version written to new event logs.
pub const EVENT_LOG_VERSION: u32 = 1;

/// Closed set of lifecycle event types, partitioned into four families.
///
/// Wire names are dotted (`worker.start`, `pr.merged`, ...) so the log stays
/// greppable and the family is visible in raw JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "worker.start")]
    WorkerStart,
    #[serde(rename = "worker.complete")]
    WorkerComplete,
    #[serde(rename = "worker.fail")]
    WorkerFail,
    #[serde(rename = "worker.timeout")]
    WorkerTimeout,
    #[serde(rename = "pr.created")]
    PrCreated,
    #[serde(rename = "pr.ci_pass")]
    PrCiPass,
    #[serde(rename = "pr.ci_fail")]
    PrCiFail,
    #[serde(rename = "pr.merged")]
    PrMerged,
    #[serde(rename = "pr.closed")]
    PrClosed,
    #[serde(rename = "feature.started")]
    FeatureStarted,
    #[serde(rename = "feature.completed")]
    FeatureCompleted,
    #[serde(rename = "system.start")]
    SystemStart,
    #[serde(rename = "system.error")]
    SystemError,
    #[serde(rename = "system.notification_sent")]
    NotificationSent,
}

/// Event family, used by the projector to scope its folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    Worker,
    PullRequest,
    Feature,
    System,
}

impl EventType {
    pub fn family(self) -> EventFamily {
        match self {
            EventType::WorkerStart
            | EventType::WorkerComplete
            | EventType::WorkerFail
            | EventType::WorkerTimeout => EventFamily::Worker,
            EventType::PrCreated
            | EventType::PrCiPass
            | EventType::PrCiFail
            | EventType::PrMerged
            | EventType::PrClosed => EventFamily::PullRequest,
            EventType::FeatureStarted | EventType::FeatureCompleted => EventFamily::Feature,
            EventType::SystemStart | EventType::SystemError | EventType::NotificationSent => {
                EventFamily::System
            }
        }
    }

    /// Terminal types close a lifecycle: once one is recorded for a key, the
    /// worker/PR is no longer active/pending.
    pub fn is_worker_terminal(self) -> bool {
        matches!(
            self,
            EventType::WorkerComplete | EventType::WorkerFail | EventType::WorkerTimeout
        )
    }

    pub fn is_pr_terminal(self) -> bool {
        matches!(self, EventType::PrMerged | EventType::PrClosed)
    }

    /// Stable wire name (`worker.start`, ...), as serialized into the log.
    pub fn wire_name(self) -> &'static str {
        match self {
            EventType::WorkerStart => "worker.start",
            EventType::WorkerComplete => "worker.complete",
            EventType::WorkerFail => "worker.fail",
            EventType::WorkerTimeout => "worker.timeout",
            EventType::PrCreated => "pr.created",
            EventType::PrCiPass => "pr.ci_pass",
            EventType::PrCiFail => "pr.ci_fail",
            EventType::PrMerged => "pr.merged",
            EventType::PrClosed => "pr.closed",
            EventType::FeatureStarted => "feature.started",
            EventType::FeatureCompleted => "feature.completed",
            EventType::SystemStart => "system.start",
            EventType::SystemError => "system.error",
            EventType::NotificationSent => "system.notification_sent",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown event type: {s}"))
    }
}

/// Payload carried by an event. Which fields are populated depends on the
/// event family; unused fields are omitted from the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_method: Option<String>,
}

/// Correlation fields for diagnostics. Never consulted by lifecycle
/// derivation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl EventMetadata {
    /// Capture host diagnostics for a locally recorded event.
    pub fn local() -> Self {
        Self {
            session_id: None,
            project_dir: std::env::current_dir()
                .ok()
                .map(|p| p.display().to_string()),
            actor: None,
            hostname: hostname::get().ok().map(|h| h.to_string_lossy().into_owned()),
            pid: Some(std::process::id()),
        }
    }
}

/// One immutable record of something that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: EventData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

impl WorkflowEvent {
    pub fn new(event_type: EventType, data: EventData) -> Self {
        Self {
            id: generate_event_id(),
            event_type,
            timestamp: Utc::now(),
            data,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn worker_started(issue: u64) -> Self {
        Self::new(
            EventType::WorkerStart,
            EventData {
                issue: Some(issue),
                ..Default::default()
            },
        )
    }

    pub fn worker_completed(issue: u64, duration_ms: u64) -> Self {
        Self::new(
            EventType::WorkerComplete,
            EventData {
                issue: Some(issue),
                duration_ms: Some(duration_ms),
                ..Default::default()
            },
        )
    }

    pub fn worker_failed(issue: u64, error: impl Into<String>) -> Self {
        Self::new(
            EventType::WorkerFail,
            EventData {
                issue: Some(issue),
                error: Some(error.into()),
                ..Default::default()
            },
        )
    }

    pub fn worker_timed_out(issue: u64, duration_ms: u64) -> Self {
        Self::new(
            EventType::WorkerTimeout,
            EventData {
                issue: Some(issue),
                duration_ms: Some(duration_ms),
                ..Default::default()
            },
        )
    }

    pub fn pr_created(pr: u64, issue: Option<u64>) -> Self {
        Self::new(
            EventType::PrCreated,
            EventData {
                pr: Some(pr),
                issue,
                ..Default::default()
            },
        )
    }

    pub fn pr_ci_pass(pr: u64, checks: Vec<String>) -> Self {
        Self::new(
            EventType::PrCiPass,
            EventData {
                pr: Some(pr),
                checks: Some(checks),
                ..Default::default()
            },
        )
    }

    pub fn pr_ci_fail(pr: u64, checks: Vec<String>) -> Self {
        Self::new(
            EventType::PrCiFail,
            EventData {
                pr: Some(pr),
                checks: Some(checks),
                ..Default::default()
            },
        )
    }

    pub fn pr_merged(pr: u64, merge_method: impl Into<String>) -> Self {
        Self::new(
            EventType::PrMerged,
            EventData {
                pr: Some(pr),
                merge_method: Some(merge_method.into()),
                ..Default::default()
            },
        )
    }

    pub fn pr_closed(pr: u64) -> Self {
        Self::new(
            EventType::PrClosed,
            EventData {
                pr: Some(pr),
                ..Default::default()
            },
        )
    }

    pub fn feature_started(feature_id: impl Into<String>) -> Self {
        Self::new(
            EventType::FeatureStarted,
            EventData {
                feature_id: Some(feature_id.into()),
                ..Default::default()
            },
        )
    }

    pub fn feature_completed(feature_id: impl Into<String>) -> Self {
        Self::new(
            EventType::FeatureCompleted,
            EventData {
                feature_id: Some(feature_id.into()),
                ..Default::default()
            },
        )
    }

    pub fn system_error(error: impl Into<String>) -> Self {
        Self::new(
            EventType::SystemError,
            EventData {
                error: Some(error.into()),
                ..Default::default()
            },
        )
    }
}

/// Durable container for the event sequence. Exclusively owned by the
/// event store; nothing else writes the backing file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub events: Vec<WorkflowEvent>,
}

impl EventLog {
    pub fn empty() -> Self {
        Self {
            version: EVENT_LOG_VERSION,
            last_updated: Utc::now(),
            events: Vec::new(),
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::empty()
    }
}

/// Time-prefixed unique id. The millisecond prefix keeps ids roughly
/// sortable; the random suffix distinguishes events recorded in the same
/// millisecond.
fn generate_event_id() -> String {
    format!(
        "{}_{:08x}",
        Utc::now().timestamp_millis(),
        rand::rng().random::<u32>()
    )
}
