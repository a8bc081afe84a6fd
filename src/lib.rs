// Autopilot Library - Autonomous coding worker orchestration
// This exposes the core components for testing and integration

pub mod admission;
pub mod ci;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod telemetry;
pub mod worker;

// Re-export key types for easy access
pub use admission::{AdmissionController, AdmissionDecision};
pub use ci::{
    CiResult, CiStatusEvaluator, GhCliProvider, GitHubApiProvider, MergeReadiness, PrStatus,
    PullRequestProvider, StatusOptions,
};
pub use config::{AutopilotConfig, ConfigValidation, PrStrategy};
pub use events::{EventStore, EventStoreError, EventType, WorkflowEvent};
pub use lifecycle::{EventQuery, LifecycleProjector, LogStats, SortOrder};
pub use telemetry::{create_dispatch_span, generate_correlation_id, init_telemetry};
pub use worker::{
    DispatchResult, ProcessWorkerRunner, WorkerOutcome, WorkerRunner, WorkerSupervisor,
};
