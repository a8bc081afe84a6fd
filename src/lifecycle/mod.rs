//! Lifecycle projections: pure folds over the event log.
//!
//! Worker/PR status is never stored as a mutable field. It is derived on
//! every query from the append-only event sequence: a key is "open" when it
//! has a qualifying start event and no later terminal event. Because the
//! fold is pure, the log alone is always enough to reconstruct state after
//! a crash.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::events::{EventFamily, EventStore, EventType, WorkflowEvent};

/// Conjunctive filter over the event sequence. A `None` field means "no
/// constraint on that dimension".
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub types: Option<Vec<EventType>>,
    /// Inclusive lower bound on `timestamp`.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`.
    pub until: Option<DateTime<Utc>>,
    pub issue: Option<u64>,
    pub pr: Option<u64>,
    pub feature_id: Option<String>,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    /// Newest first. The default: callers usually want recent history.
    #[default]
    Descending,
}

impl EventQuery {
    fn matches(&self, event: &WorkflowEvent) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        if let Some(issue) = self.issue {
            if event.data.issue != Some(issue) {
                return false;
            }
        }
        if let Some(pr) = self.pr {
            if event.data.pr != Some(pr) {
                return false;
            }
        }
        if let Some(feature_id) = &self.feature_id {
            if event.data.feature_id.as_deref() != Some(feature_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Filter, sort, and truncate the event sequence.
pub fn query(events: &[WorkflowEvent], q: &EventQuery) -> Vec<WorkflowEvent> {
    let mut matched: Vec<WorkflowEvent> =
        events.iter().filter(|e| q.matches(e)).cloned().collect();

    match q.order {
        SortOrder::Ascending => matched.sort_by_key(|e| e.timestamp),
        SortOrder::Descending => matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
    }

    if let Some(limit) = q.limit {
        matched.truncate(limit);
    }
    matched
}

/// Issues whose worker lifecycle is still open: a `worker.start` was
/// recorded and no terminal event for the same issue exists. Returns the
/// originally recorded start events, preserving provenance.
pub fn active_workers(events: &[WorkflowEvent]) -> Vec<WorkflowEvent> {
    open_lifecycles(
        events,
        EventFamily::Worker,
        EventType::WorkerStart,
        |t| t.is_worker_terminal(),
        |e| e.data.issue,
    )
}

/// PRs whose lifecycle is still open: a `pr.created` was recorded and no
/// `pr.merged`/`pr.closed` for the same PR exists.
pub fn pending_prs(events: &[WorkflowEvent]) -> Vec<WorkflowEvent> {
    open_lifecycles(
        events,
        EventFamily::PullRequest,
        EventType::PrCreated,
        |t| t.is_pr_terminal(),
        |e| e.data.pr,
    )
}

/// Shared fold for both views: group the family's events by key, keep the
/// qualifying event for groups with no terminal event.
fn open_lifecycles(
    events: &[WorkflowEvent],
    family: EventFamily,
    qualifying: EventType,
    is_terminal: impl Fn(EventType) -> bool,
    key: impl Fn(&WorkflowEvent) -> Option<u64>,
) -> Vec<WorkflowEvent> {
    struct Group<'a> {
        start: Option<&'a WorkflowEvent>,
        closed: bool,
    }

    let mut groups: HashMap<u64, Group> = HashMap::new();

    for event in events {
        if event.event_type.family() != family {
            continue;
        }
        let Some(k) = key(event) else {
            continue;
        };
        let group = groups.entry(k).or_insert(Group {
            start: None,
            closed: false,
        });
        if event.event_type == qualifying && group.start.is_none() {
            group.start = Some(event);
        }
        if is_terminal(event.event_type) {
            group.closed = true;
        }
    }

    groups
        .into_values()
        .filter(|g| !g.closed)
        .filter_map(|g| g.start.cloned())
        .collect()
}

/// Aggregate counts over the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogStats {
    pub total_events: usize,
    pub active_workers: usize,
    pub pending_prs: usize,
    /// Per-type histogram keyed by wire name, sorted for stable display.
    pub events_by_type: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Single pass over the log plus one derivation each of the active/pending
/// views.
pub fn stats(events: &[WorkflowEvent]) -> LogStats {
    let mut events_by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut oldest: Option<DateTime<Utc>> = None;
    let mut newest: Option<DateTime<Utc>> = None;

    for event in events {
        *events_by_type
            .entry(event.event_type.wire_name().to_string())
            .or_insert(0) += 1;
        oldest = Some(oldest.map_or(event.timestamp, |t| t.min(event.timestamp)));
        newest = Some(newest.map_or(event.timestamp, |t| t.max(event.timestamp)));
    }

    LogStats {
        total_events: events.len(),
        active_workers: active_workers(events).len(),
        pending_prs: pending_prs(events).len(),
        events_by_type,
        oldest,
        newest,
    }
}

/// Store-bound projector: reads the log once per call and applies the pure
/// folds above.
#[derive(Debug, Clone)]
pub struct LifecycleProjector {
    store: EventStore,
}

impl LifecycleProjector {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub async fn query(&self, q: &EventQuery) -> Vec<WorkflowEvent> {
        query(&self.store.events().await, q)
    }

    pub async fn active_workers(&self) -> Vec<WorkflowEvent> {
        active_workers(&self.store.events().await)
    }

    pub async fn pending_prs(&self) -> Vec<WorkflowEvent> {
        pending_prs(&self.store.events().await)
    }

    pub async fn stats(&self) -> LogStats {
        stats(&self.store.events().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(event: WorkflowEvent, offset_secs: i64) -> WorkflowEvent {
        let mut event = event;
        event.timestamp = Utc::now() + Duration::seconds(offset_secs);
        event
    }

    #[test]
    fn test_active_workers_tracks_latest_terminal() {
        let events = vec![
            at(WorkflowEvent::worker_started(7), 0),
            at(WorkflowEvent::worker_completed(7, 500), 1),
            at(WorkflowEvent::worker_started(9), 2),
        ];

        let active = active_workers(&events);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].data.issue, Some(9));
        assert_eq!(active[0].event_type, EventType::WorkerStart);
    }

    #[test]
    fn test_worker_removed_by_any_terminal_type() {
        for terminal in [
            WorkflowEvent::worker_completed(3, 100),
            WorkflowEvent::worker_failed(3, "broken"),
            WorkflowEvent::worker_timed_out(3, 1000),
        ] {
            let events = vec![at(WorkflowEvent::worker_started(3), 0), at(terminal, 1)];
            assert!(active_workers(&events).is_empty());
        }
    }

    #[test]
    fn test_pending_prs_ignore_intermediate_ci_events() {
        let events = vec![
            at(WorkflowEvent::pr_created(10, Some(7)), 0),
            at(WorkflowEvent::pr_ci_fail(10, vec!["test".into()]), 1),
            at(WorkflowEvent::pr_ci_pass(10, vec!["test".into()]), 2),
            at(WorkflowEvent::pr_created(11, None), 3),
            at(WorkflowEvent::pr_merged(11, "squash"), 4),
        ];

        let pending = pending_prs(&events);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].data.pr, Some(10));
    }

    #[test]
    fn test_query_is_conjunctive() {
        let events = vec![
            at(WorkflowEvent::worker_started(1), 0),
            at(WorkflowEvent::worker_started(2), 1),
            at(WorkflowEvent::worker_completed(1, 10), 2),
        ];

        let q = EventQuery {
            types: Some(vec![EventType::WorkerStart]),
            issue: Some(1),
            ..Default::default()
        };
        let matched = query(&events, &q);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].data.issue, Some(1));
        assert_eq!(matched[0].event_type, EventType::WorkerStart);
    }

    #[test]
    fn test_query_default_order_is_descending() {
        let events = vec![
            at(WorkflowEvent::worker_started(1), 0),
            at(WorkflowEvent::worker_started(2), 10),
        ];

        let matched = query(&events, &EventQuery::default());
        assert_eq!(matched[0].data.issue, Some(2));
        assert_eq!(matched[1].data.issue, Some(1));
    }

    #[test]
    fn test_query_limit_truncates_after_sort() {
        let events = vec![
            at(WorkflowEvent::worker_started(1), 0),
            at(WorkflowEvent::worker_started(2), 10),
            at(WorkflowEvent::worker_started(3), 20),
        ];

        let q = EventQuery {
            limit: Some(2),
            ..Default::default()
        };
        let matched = query(&events, &q);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].data.issue, Some(3));
    }

    #[test]
    fn test_query_time_range_is_inclusive() {
        let base = Utc::now();
        let mut event = WorkflowEvent::worker_started(1);
        event.timestamp = base;

        let q = EventQuery {
            since: Some(base),
            until: Some(base),
            ..Default::default()
        };
        assert_eq!(query(&[event], &q).len(), 1);
    }

    #[test]
    fn test_stats_counts_and_bounds() {
        let events = vec![
            at(WorkflowEvent::worker_started(7), 0),
            at(WorkflowEvent::worker_completed(7, 500), 1),
            at(WorkflowEvent::worker_started(9), 2),
            at(WorkflowEvent::pr_created(12, Some(9)), 3),
        ];

        let s = stats(&events);
        assert_eq!(s.total_events, 4);
        assert_eq!(s.active_workers, 1);
        assert_eq!(s.pending_prs, 1);
        assert_eq!(s.events_by_type["worker.start"], 2);
        assert_eq!(s.events_by_type["pr.created"], 1);
        assert_eq!(s.oldest, Some(events[0].timestamp));
        assert_eq!(s.newest, Some(events[3].timestamp));
    }

    #[test]
    fn test_stats_empty_log() {
        let s = stats(&[]);
        assert_eq!(s.total_events, 0);
        assert_eq!(s.active_workers, 0);
        assert_eq!(s.pending_prs, 0);
        assert!(s.oldest.is_none());
        assert!(s.newest.is_none());
    }
}
