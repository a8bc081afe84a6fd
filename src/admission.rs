//! Admission control: at most N concurrently active workers.
//!
//! The check is advisory, not transactional. There is an inherent race
//! between "check admission" and "record worker start" because both go
//! through the same append-only file without a lock. Workers are dispatched
//! at human/CI cadence by a single driver, so the single-writer assumption
//! holds in practice; multi-process dispatch would need file locking or an
//! atomic compare-and-append store.

use tracing::debug;

use crate::lifecycle::LifecycleProjector;

/// Outcome of an admission check, with the observed count for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub admitted: bool,
    pub active_workers: usize,
    pub max_concurrent: u32,
}

/// Enforces the configured concurrency ceiling before new work is
/// dispatched.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    projector: LifecycleProjector,
    max_concurrent_workers: u32,
}

impl AdmissionController {
    /// `max_concurrent_workers` is validated to 1-10 at config-load time.
    pub fn new(projector: LifecycleProjector, max_concurrent_workers: u32) -> Self {
        Self {
            projector,
            max_concurrent_workers,
        }
    }

    /// Compare the projected active-worker count against the ceiling.
    pub async fn can_admit(&self) -> AdmissionDecision {
        let active_workers = self.projector.active_workers().await.len();
        let admitted = active_workers < self.max_concurrent_workers as usize;

        debug!(
            active_workers,
            max_concurrent = self.max_concurrent_workers,
            admitted,
            "Admission check"
        );

        AdmissionDecision {
            admitted,
            active_workers,
            max_concurrent: self.max_concurrent_workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventStore, WorkflowEvent};
    use tempfile::TempDir;

    fn controller(dir: &TempDir, max: u32) -> (EventStore, AdmissionController) {
        let store = EventStore::new(dir.path().join("events.json"));
        let projector = LifecycleProjector::new(store.clone());
        (store, AdmissionController::new(projector, max))
    }

    #[tokio::test]
    async fn test_admits_below_ceiling() {
        let dir = TempDir::new().unwrap();
        let (store, controller) = controller(&dir, 2);

        store.append(WorkflowEvent::worker_started(1)).await.unwrap();

        let decision = controller.can_admit().await;
        assert!(decision.admitted);
        assert_eq!(decision.active_workers, 1);
    }

    #[tokio::test]
    async fn test_rejects_at_ceiling_and_recovers_after_completion() {
        let dir = TempDir::new().unwrap();
        let (store, controller) = controller(&dir, 2);

        store.append(WorkflowEvent::worker_started(1)).await.unwrap();
        store.append(WorkflowEvent::worker_started(2)).await.unwrap();

        let decision = controller.can_admit().await;
        assert!(!decision.admitted);
        assert_eq!(decision.active_workers, 2);

        store
            .append(WorkflowEvent::worker_completed(1, 500))
            .await
            .unwrap();

        let decision = controller.can_admit().await;
        assert!(decision.admitted);
        assert_eq!(decision.active_workers, 1);
    }

    #[tokio::test]
    async fn test_empty_log_admits() {
        let dir = TempDir::new().unwrap();
        let (_store, controller) = controller(&dir, 1);
        assert!(controller.can_admit().await.admitted);
    }
}
