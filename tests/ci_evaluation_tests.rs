//! End-to-end tests for the CI status evaluator against a scripted
//! provider, covering the decision-policy precedence and degradation
//! behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autopilot::ci::{
    CheckStatus, CiCheck, CiResult, CiStatusEvaluator, PrDetails, PrState, ProviderError,
    PullRequestProvider, ReviewDecision, StatusOptions,
};

#[derive(Default)]
struct ScriptedProvider {
    details: HashMap<u64, PrDetails>,
    checks: HashMap<u64, Vec<CiCheck>>,
    fail_all: bool,
}

impl ScriptedProvider {
    fn with_pr(mut self, details: PrDetails, checks: Vec<CiCheck>) -> Self {
        self.checks.insert(details.number, checks);
        self.details.insert(details.number, details);
        self
    }

    fn unreachable_provider() -> Self {
        Self {
            fail_all: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PullRequestProvider for ScriptedProvider {
    async fn pr_details(&self, pr_number: u64) -> Result<PrDetails, ProviderError> {
        if self.fail_all {
            return Err(ProviderError::Malformed("network down".into()));
        }
        Ok(self
            .details
            .get(&pr_number)
            .cloned()
            .unwrap_or_else(|| PrDetails::unknown(pr_number)))
    }

    async fn pr_checks(&self, pr_number: u64) -> Result<Vec<CiCheck>, ProviderError> {
        if self.fail_all {
            return Err(ProviderError::Malformed("network down".into()));
        }
        Ok(self.checks.get(&pr_number).cloned().unwrap_or_default())
    }
}

fn open_pr(number: u64) -> PrDetails {
    PrDetails {
        number,
        state: PrState::Open,
        draft: false,
        mergeable: Some(true),
        review_decision: None,
    }
}

fn check(name: &str, status: CheckStatus, conclusion: Option<&str>) -> CiCheck {
    CiCheck {
        name: name.to_string(),
        status,
        conclusion: conclusion.map(str::to_string),
    }
}

fn evaluator(provider: ScriptedProvider) -> CiStatusEvaluator {
    CiStatusEvaluator::new(Arc::new(provider))
}

#[tokio::test]
async fn no_required_checks_and_no_reported_checks_is_pass() {
    let evaluator = evaluator(ScriptedProvider::default().with_pr(open_pr(1), vec![]));
    let status = evaluator
        .check_pr_status(1, &[], StatusOptions::default())
        .await;
    assert_eq!(status.result, CiResult::Pass);
}

#[tokio::test]
async fn fuzzy_match_required_test_against_run_tests() {
    let evaluator = evaluator(ScriptedProvider::default().with_pr(
        open_pr(1),
        vec![check("Run tests", CheckStatus::Completed, Some("success"))],
    ));
    let status = evaluator
        .check_pr_status(1, &["test".to_string()], StatusOptions::default())
        .await;
    assert_eq!(status.result, CiResult::Pass);
}

#[tokio::test]
async fn draft_pr_with_passing_checks_is_pending() {
    let mut details = open_pr(1);
    details.draft = true;
    let evaluator = evaluator(ScriptedProvider::default().with_pr(
        details,
        vec![check("test", CheckStatus::Completed, Some("success"))],
    ));
    let status = evaluator
        .check_pr_status(1, &[], StatusOptions::default())
        .await;
    assert_eq!(status.result, CiResult::Pending);
}

#[tokio::test]
async fn unmatched_required_check_is_pending_not_fail() {
    let evaluator = evaluator(ScriptedProvider::default().with_pr(
        open_pr(1),
        vec![check("test", CheckStatus::Completed, Some("success"))],
    ));
    let status = evaluator
        .check_pr_status(1, &["build".to_string()], StatusOptions::default())
        .await;
    assert_eq!(status.result, CiResult::Pending);
}

#[tokio::test]
async fn provider_failure_degrades_to_pending_not_fail() {
    let evaluator = evaluator(ScriptedProvider::unreachable_provider());
    let status = evaluator
        .check_pr_status(9, &["test".to_string()], StatusOptions::default())
        .await;
    assert_eq!(status.result, CiResult::Pending);
    assert_eq!(status.state, PrState::Unknown);
    assert!(status.checks.is_empty());
}

#[tokio::test]
async fn ready_to_merge_reports_draft_reason() {
    let mut details = open_pr(5);
    details.draft = true;
    let evaluator = evaluator(ScriptedProvider::default().with_pr(
        details,
        vec![check("test", CheckStatus::Completed, Some("success"))],
    ));

    let readiness = evaluator.is_pr_ready_to_merge(5, &[]).await;
    assert!(!readiness.ready);
    assert!(readiness.reason.contains("draft"));
}

#[tokio::test]
async fn ready_to_merge_lists_failing_check_names() {
    let evaluator = evaluator(ScriptedProvider::default().with_pr(
        open_pr(5),
        vec![
            check("unit", CheckStatus::Completed, Some("failure")),
            check("lint", CheckStatus::Completed, Some("success")),
        ],
    ));

    let readiness = evaluator.is_pr_ready_to_merge(5, &[]).await;
    assert!(!readiness.ready);
    assert!(readiness.reason.contains("unit"));
}

#[tokio::test]
async fn ready_to_merge_rejects_closed_pr_before_checks() {
    let mut details = open_pr(5);
    details.state = PrState::Merged;
    let evaluator = evaluator(ScriptedProvider::default().with_pr(details, vec![]));

    let readiness = evaluator.is_pr_ready_to_merge(5, &[]).await;
    assert!(!readiness.ready);
    assert!(readiness.reason.contains("not open"));
}

#[tokio::test]
async fn ready_to_merge_rejects_changes_requested() {
    let mut details = open_pr(5);
    details.review_decision = Some(ReviewDecision::ChangesRequested);
    let evaluator = evaluator(ScriptedProvider::default().with_pr(
        details,
        vec![check("test", CheckStatus::Completed, Some("success"))],
    ));

    let readiness = evaluator.is_pr_ready_to_merge(5, &[]).await;
    assert!(!readiness.ready);
    assert!(readiness.reason.contains("changes requested"));
}

#[tokio::test]
async fn ready_to_merge_rejects_conflicting_pr() {
    let mut details = open_pr(5);
    details.mergeable = Some(false);
    let evaluator = evaluator(ScriptedProvider::default().with_pr(
        details,
        vec![check("test", CheckStatus::Completed, Some("success"))],
    ));

    let readiness = evaluator.is_pr_ready_to_merge(5, &[]).await;
    assert!(!readiness.ready);
    assert!(readiness.reason.contains("conflict"));
}

#[tokio::test]
async fn ready_to_merge_accepts_clean_pr() {
    let mut details = open_pr(5);
    details.review_decision = Some(ReviewDecision::Approved);
    let evaluator = evaluator(ScriptedProvider::default().with_pr(
        details,
        vec![check("test", CheckStatus::Completed, Some("success"))],
    ));

    let readiness = evaluator.is_pr_ready_to_merge(5, &[]).await;
    assert!(readiness.ready, "reason: {}", readiness.reason);
}

#[tokio::test(start_paused = true)]
async fn wait_returns_immediately_on_non_pending_result() {
    let evaluator = evaluator(ScriptedProvider::default().with_pr(
        open_pr(5),
        vec![check("test", CheckStatus::Completed, Some("success"))],
    ));

    let outcome = evaluator
        .wait_for_pr_checks(
            5,
            &[],
            Duration::from_secs(30),
            Duration::from_secs(600),
            |_| {},
        )
        .await;
    assert!(!outcome.timed_out);
    assert_eq!(outcome.status.result, CiResult::Pass);
}

#[tokio::test(start_paused = true)]
async fn wait_times_out_with_annotated_pending_result() {
    let evaluator = evaluator(ScriptedProvider::default().with_pr(
        open_pr(5),
        vec![check("test", CheckStatus::InProgress, None)],
    ));

    let mut polls = 0;
    let outcome = evaluator
        .wait_for_pr_checks(
            5,
            &[],
            Duration::from_secs(30),
            Duration::from_secs(120),
            |_| polls += 1,
        )
        .await;

    assert!(outcome.timed_out);
    assert_eq!(outcome.status.result, CiResult::Pending);
    assert!(outcome.status.summary.contains("timed out"));
    assert!(polls >= 2);
}

#[tokio::test]
async fn batch_check_preserves_input_order() {
    let provider = ScriptedProvider::default()
        .with_pr(
            open_pr(1),
            vec![check("test", CheckStatus::Completed, Some("success"))],
        )
        .with_pr(
            open_pr(2),
            vec![check("test", CheckStatus::Completed, Some("failure"))],
        )
        .with_pr(open_pr(3), vec![check("test", CheckStatus::InProgress, None)]);

    let evaluator = evaluator(provider);
    let results = evaluator.check_multiple(&[1, 2, 3], &[]).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].pr_number, 1);
    assert_eq!(results[0].result, CiResult::Pass);
    assert_eq!(results[1].result, CiResult::Fail);
    assert_eq!(results[2].result, CiResult::Pending);
}
