//! Worker dispatch: admission check, run, record.
//!
//! The supervisor is the caller the event contract expects: it consults
//! admission control, appends `worker.start` before running, and appends
//! the matching terminal event (`complete`/`fail`/`timeout`) afterwards.
//! The append failures are the one error class surfaced to the caller;
//! runner failures become `worker.fail` events instead.

use std::sync::Arc;

use tracing::{info, warn, Instrument};

use crate::admission::{AdmissionController, AdmissionDecision};
use crate::config::AutopilotConfig;
use crate::events::{EventMetadata, EventStore, EventStoreError, WorkflowEvent};
use crate::lifecycle::LifecycleProjector;
use crate::telemetry::{create_dispatch_span, generate_correlation_id};

use super::runner::{WorkerOutcome, WorkerRequest, WorkerRunner};

/// Cap on the error text recorded into `worker.fail` events.
const MAX_RECORDED_ERROR_LEN: usize = 500;

#[derive(Debug)]
pub enum DispatchResult {
    /// Admission control refused to start another worker.
    Rejected(AdmissionDecision),
    /// The worker ran to some terminal outcome (which may be a failure or
    /// timeout); the matching event has been recorded.
    Finished(WorkerOutcome),
}

pub struct WorkerSupervisor {
    store: EventStore,
    admission: AdmissionController,
    runner: Arc<dyn WorkerRunner>,
    config: AutopilotConfig,
}

impl WorkerSupervisor {
    pub fn new(store: EventStore, runner: Arc<dyn WorkerRunner>, config: AutopilotConfig) -> Self {
        let projector = LifecycleProjector::new(store.clone());
        let admission = AdmissionController::new(projector, config.max_concurrent_workers);
        Self {
            store,
            admission,
            runner,
            config,
        }
    }

    /// Run one worker for one issue, recording lifecycle events. The whole
    /// dispatch runs inside a correlation span; the same correlation id is
    /// stamped into the `worker.start` event so log lines and the event log
    /// can be joined afterwards.
    pub async fn dispatch(
        &self,
        issue: u64,
        prompt: String,
    ) -> Result<DispatchResult, EventStoreError> {
        let correlation_id = generate_correlation_id();
        let span = create_dispatch_span("dispatch", Some(issue), Some(&correlation_id));
        self.dispatch_traced(issue, prompt, correlation_id)
            .instrument(span)
            .await
    }

    async fn dispatch_traced(
        &self,
        issue: u64,
        prompt: String,
        correlation_id: String,
    ) -> Result<DispatchResult, EventStoreError> {
        let decision = self.admission.can_admit().await;
        if !decision.admitted {
            info!(
                issue,
                active = decision.active_workers,
                max = decision.max_concurrent,
                "Worker rejected by admission control"
            );
            return Ok(DispatchResult::Rejected(decision));
        }

        let metadata = EventMetadata {
            session_id: Some(correlation_id),
            ..EventMetadata::local()
        };
        self.store
            .append(WorkflowEvent::worker_started(issue).with_metadata(metadata))
            .await?;

        let request = WorkerRequest {
            issue,
            prompt,
            timeout: self.config.worker_timeout_duration(),
        };

        let outcome = match self.runner.run(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(issue, error = %e, "Worker runner failed");
                self.store
                    .append(WorkflowEvent::worker_failed(issue, truncate(&e.to_string())))
                    .await?;
                return Ok(DispatchResult::Finished(WorkerOutcome {
                    success: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    timed_out: false,
                    duration_ms: 0,
                }));
            }
        };

        let terminal = if outcome.timed_out {
            WorkflowEvent::worker_timed_out(issue, outcome.duration_ms)
        } else if outcome.success {
            WorkflowEvent::worker_completed(issue, outcome.duration_ms)
        } else {
            let error = if outcome.stderr.trim().is_empty() {
                format!("worker exited with code {:?}", outcome.exit_code)
            } else {
                truncate(outcome.stderr.trim())
            };
            WorkflowEvent::worker_failed(issue, error)
        };
        self.store.append(terminal).await?;

        Ok(DispatchResult::Finished(outcome))
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_RECORDED_ERROR_LEN {
        text.to_string()
    } else {
        let mut end = MAX_RECORDED_ERROR_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::worker::runner::WorkerError;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct ScriptedRunner {
        outcome: WorkerOutcome,
    }

    #[async_trait]
    impl WorkerRunner for ScriptedRunner {
        async fn run(&self, _request: &WorkerRequest) -> Result<WorkerOutcome, WorkerError> {
            Ok(self.outcome.clone())
        }
    }

    fn outcome(success: bool, timed_out: bool) -> WorkerOutcome {
        WorkerOutcome {
            success,
            exit_code: Some(if success { 0 } else { 1 }),
            stdout: String::new(),
            stderr: if success { String::new() } else { "boom".into() },
            timed_out,
            duration_ms: 42,
        }
    }

    fn supervisor_with(
        dir: &TempDir,
        runner_outcome: WorkerOutcome,
        max_workers: u32,
    ) -> (EventStore, WorkerSupervisor) {
        let store = EventStore::new(dir.path().join("events.json"));
        let config = AutopilotConfig {
            max_concurrent_workers: max_workers,
            ..Default::default()
        };
        let supervisor = WorkerSupervisor::new(
            store.clone(),
            Arc::new(ScriptedRunner {
                outcome: runner_outcome,
            }),
            config,
        );
        (store, supervisor)
    }

    #[tokio::test]
    async fn test_dispatch_records_start_and_complete() {
        let dir = TempDir::new().unwrap();
        let (store, supervisor) = supervisor_with(&dir, outcome(true, false), 3);

        let result = supervisor.dispatch(7, "fix the bug".into()).await.unwrap();
        assert!(matches!(result, DispatchResult::Finished(o) if o.success));

        let events = store.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::WorkerStart);
        assert_eq!(events[1].event_type, EventType::WorkerComplete);
        assert_eq!(events[1].data.issue, Some(7));
        assert_eq!(events[1].data.duration_ms, Some(42));
    }

    #[tokio::test]
    async fn test_dispatch_tags_start_event_with_correlation_id() {
        let dir = TempDir::new().unwrap();
        let (store, supervisor) = supervisor_with(&dir, outcome(true, false), 3);

        supervisor.dispatch(7, "fix the bug".into()).await.unwrap();

        let events = store.events().await;
        let metadata = events[0].metadata.as_ref().unwrap();
        assert!(metadata.session_id.is_some());
        assert_eq!(metadata.pid, Some(std::process::id()));
    }

    #[tokio::test]
    async fn test_dispatch_records_failure_with_error_text() {
        let dir = TempDir::new().unwrap();
        let (store, supervisor) = supervisor_with(&dir, outcome(false, false), 3);

        supervisor.dispatch(7, "fix the bug".into()).await.unwrap();

        let events = store.events().await;
        assert_eq!(events[1].event_type, EventType::WorkerFail);
        assert_eq!(events[1].data.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_dispatch_records_timeout() {
        let dir = TempDir::new().unwrap();
        let (store, supervisor) = supervisor_with(&dir, outcome(false, true), 3);

        supervisor.dispatch(7, "fix the bug".into()).await.unwrap();

        let events = store.events().await;
        assert_eq!(events[1].event_type, EventType::WorkerTimeout);
        assert_eq!(events[1].data.duration_ms, Some(42));
    }

    #[tokio::test]
    async fn test_dispatch_rejected_at_ceiling_records_nothing() {
        let dir = TempDir::new().unwrap();
        let (store, supervisor) = supervisor_with(&dir, outcome(true, false), 1);

        // Simulate an already-active worker.
        store.append(WorkflowEvent::worker_started(1)).await.unwrap();

        let result = supervisor.dispatch(2, "more work".into()).await.unwrap();
        assert!(matches!(result, DispatchResult::Rejected(d) if d.active_workers == 1));

        // Only the pre-existing start event remains.
        assert_eq!(store.events().await.len(), 1);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(400);
        let truncated = truncate(&long);
        assert!(truncated.len() <= MAX_RECORDED_ERROR_LEN + 3);
        assert!(truncated.ends_with("..."));
    }
}
