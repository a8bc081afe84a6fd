//! Merge-readiness evaluation against live CI and review state.
//!
//! Everything here resolves to one of `pass`/`fail`/`pending` plus a human
//! summary. There is no error terminal state: provider failures, missing
//! checks, and expired waits all resolve to `pending`, because an
//! autonomous driver must never treat "no data" as "failed".

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::matching::matches_check_name;
use super::provider::{CiCheck, PrDetails, PrState, PullRequestProvider, ReviewDecision};

/// Ternary CI verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiResult {
    Pass,
    Fail,
    Pending,
}

impl std::fmt::Display for CiResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CiResult::Pass => f.write_str("pass"),
            CiResult::Fail => f.write_str("fail"),
            CiResult::Pending => f.write_str("pending"),
        }
    }
}

/// Caller knobs for status evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusOptions {
    /// When every required check passes but a non-required check failed,
    /// downgrade the verdict from pass to fail.
    pub fail_on_unrequired_failure: bool,
}

/// Point-in-time snapshot of a PR's CI and review state. Constructed fresh
/// on every evaluation, never cached or persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrStatus {
    pub pr_number: u64,
    pub result: CiResult,
    pub checks: Vec<CiCheck>,
    pub passed: Vec<String>,
    pub failed: Vec<String>,
    pub pending: Vec<String>,
    pub required_checks: Vec<String>,
    pub mergeable: Option<bool>,
    pub state: PrState,
    pub draft: bool,
    pub review_decision: Option<ReviewDecision>,
    pub summary: String,
}

/// Outcome of the layered merge-readiness check.
#[derive(Debug, Clone)]
pub struct MergeReadiness {
    pub ready: bool,
    pub reason: String,
    pub status: PrStatus,
}

/// Outcome of a bounded polling wait.
#[derive(Debug, Clone)]
pub struct WaitOutcome {
    pub status: PrStatus,
    pub timed_out: bool,
}

/// Window size for batch evaluation, bounding simultaneous outbound
/// requests against the provider's rate limits.
const BATCH_SIZE: usize = 5;

/// Evaluates live PR state into a merge decision.
#[derive(Clone)]
pub struct CiStatusEvaluator {
    provider: Arc<dyn PullRequestProvider>,
}

impl CiStatusEvaluator {
    pub fn new(provider: Arc<dyn PullRequestProvider>) -> Self {
        Self { provider }
    }

    /// Fetch live state and render the ternary verdict.
    ///
    /// Provider failures degrade to "no data" (unknown PR state, empty
    /// check list) which evaluates to `pending`, never `fail`.
    pub async fn check_pr_status(
        &self,
        pr_number: u64,
        required_checks: &[String],
        opts: StatusOptions,
    ) -> PrStatus {
        let details = match self.provider.pr_details(pr_number).await {
            Ok(details) => details,
            Err(e) => {
                warn!(pr_number, error = %e, "Failed to fetch PR details, degrading to unknown");
                PrDetails::unknown(pr_number)
            }
        };

        let checks = match self.provider.pr_checks(pr_number).await {
            Ok(checks) => checks,
            Err(e) => {
                warn!(pr_number, error = %e, "Failed to fetch PR checks, degrading to empty list");
                Vec::new()
            }
        };

        let status = evaluate(pr_number, &details, checks, required_checks, opts);
        debug!(
            pr_number,
            result = %status.result,
            passed = status.passed.len(),
            failed = status.failed.len(),
            pending = status.pending.len(),
            "Evaluated PR status"
        );
        status
    }

    /// Layered short-circuit merge-readiness check on top of
    /// [`check_pr_status`](Self::check_pr_status).
    pub async fn is_pr_ready_to_merge(
        &self,
        pr_number: u64,
        required_checks: &[String],
    ) -> MergeReadiness {
        let status = self
            .check_pr_status(pr_number, required_checks, StatusOptions::default())
            .await;

        let reason = if status.state != PrState::Open {
            Some(format!(
                "PR #{pr_number} is not open (state: {:?})",
                status.state
            ))
        } else if status.draft {
            Some(format!("PR #{pr_number} is a draft"))
        } else if status.result == CiResult::Fail {
            Some(format!(
                "CI checks failing: {}",
                join_or(&status.failed, "unknown")
            ))
        } else if status.result == CiResult::Pending {
            Some(format!(
                "CI checks pending: {}",
                join_or(&status.pending, "awaiting required checks")
            ))
        } else if status.review_decision == Some(ReviewDecision::ChangesRequested) {
            Some(format!("PR #{pr_number} has changes requested by a reviewer"))
        } else if status.mergeable == Some(false) {
            Some(format!("PR #{pr_number} has merge conflicts"))
        } else {
            None
        };

        match reason {
            Some(reason) => MergeReadiness {
                ready: false,
                reason,
                status,
            },
            None => MergeReadiness {
                ready: true,
                reason: format!("PR #{pr_number} is ready to merge"),
                status,
            },
        }
    }

    /// Poll until the verdict leaves `pending` or the deadline elapses.
    ///
    /// On expiry the last pending status is returned flagged `timed_out`,
    /// with the summary annotated, so callers can treat "gave up waiting"
    /// the same as "still pending". Each iteration is independently
    /// idempotent; callers needing cancellation just stop awaiting.
    pub async fn wait_for_pr_checks(
        &self,
        pr_number: u64,
        required_checks: &[String],
        poll_interval: Duration,
        timeout: Duration,
        mut progress: impl FnMut(&PrStatus),
    ) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        info!(pr_number, ?poll_interval, ?timeout, "Waiting for PR checks");

        loop {
            let status = self
                .check_pr_status(pr_number, required_checks, StatusOptions::default())
                .await;
            progress(&status);

            if status.result != CiResult::Pending {
                return WaitOutcome {
                    status,
                    timed_out: false,
                };
            }

            if Instant::now() + poll_interval > deadline {
                let mut status = status;
                status.summary = format!(
                    "{} (timed out after {}s waiting for checks)",
                    status.summary,
                    timeout.as_secs()
                );
                info!(pr_number, "Timed out waiting for PR checks");
                return WaitOutcome {
                    status,
                    timed_out: true,
                };
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Evaluate a batch of PRs in fixed-size windows so we do not hammer
    /// the provider with one request per PR all at once.
    ///
    /// The result vector is positionally 1:1 with `pr_numbers`: a task that
    /// panics contributes a degraded `pending` status rather than losing
    /// its slot.
    pub async fn check_multiple(
        &self,
        pr_numbers: &[u64],
        required_checks: &[String],
    ) -> Vec<PrStatus> {
        let mut results = Vec::with_capacity(pr_numbers.len());

        for window in pr_numbers.chunks(BATCH_SIZE) {
            let mut handles = Vec::with_capacity(window.len());
            for &pr_number in window {
                let evaluator = self.clone();
                let required = required_checks.to_vec();
                handles.push((
                    pr_number,
                    tokio::spawn(async move {
                        evaluator
                            .check_pr_status(pr_number, &required, StatusOptions::default())
                            .await
                    }),
                ));
            }
            for (pr_number, handle) in handles {
                match handle.await {
                    Ok(status) => results.push(status),
                    Err(e) => {
                        warn!(pr_number, error = %e, "Batch status task panicked, recording pending");
                        results.push(degraded_status(pr_number, required_checks));
                    }
                }
            }
        }

        results
    }
}

/// Pure decision function. Precedence:
/// 1. draft PRs are always pending
/// 2. with required checks: fail on a matched failure, pending on any
///    unmatched-or-incomplete requirement, else pass
/// 3. without required checks: fail if anything failed, pending if anything
///    is incomplete, else pass (an empty check list is vacuously passing)
fn evaluate(
    pr_number: u64,
    details: &PrDetails,
    checks: Vec<CiCheck>,
    required_checks: &[String],
    opts: StatusOptions,
) -> PrStatus {
    let passed: Vec<String> = checks.iter().filter(|c| c.passed()).map(|c| c.name.clone()).collect();
    let failed: Vec<String> = checks.iter().filter(|c| c.failed()).map(|c| c.name.clone()).collect();
    let pending: Vec<String> = checks
        .iter()
        .filter(|c| !c.is_completed())
        .map(|c| c.name.clone())
        .collect();

    let result = if details.draft {
        CiResult::Pending
    } else if !required_checks.is_empty() {
        let matched_failure = required_checks
            .iter()
            .any(|req| failed.iter().any(|name| matches_check_name(req, name)));
        // A required check with no completed match is indistinguishable
        // from one still queued, including checks absent from the list.
        let unmatched = required_checks.iter().any(|req| {
            !passed.iter().any(|name| matches_check_name(req, name))
                && !failed.iter().any(|name| matches_check_name(req, name))
        });

        if matched_failure {
            CiResult::Fail
        } else if unmatched {
            CiResult::Pending
        } else if opts.fail_on_unrequired_failure && !failed.is_empty() {
            CiResult::Fail
        } else {
            CiResult::Pass
        }
    } else if !failed.is_empty() {
        CiResult::Fail
    } else if !pending.is_empty() {
        CiResult::Pending
    } else {
        CiResult::Pass
    };

    let summary = build_summary(pr_number, details, result, &passed, &failed, &pending);

    PrStatus {
        pr_number,
        result,
        checks,
        passed,
        failed,
        pending,
        required_checks: required_checks.to_vec(),
        mergeable: details.mergeable,
        state: details.state,
        draft: details.draft,
        review_decision: details.review_decision,
        summary,
    }
}

fn build_summary(
    pr_number: u64,
    details: &PrDetails,
    result: CiResult,
    passed: &[String],
    failed: &[String],
    pending: &[String],
) -> String {
    let total = passed.len() + failed.len() + pending.len();
    let mut summary = if total == 0 {
        format!("PR #{pr_number}: no checks reported ({result})")
    } else {
        format!(
            "PR #{pr_number}: {}/{total} checks passed, {} failed, {} pending ({result})",
            passed.len(),
            failed.len(),
            pending.len()
        )
    };
    if details.draft {
        summary.push_str(" [draft]");
    }
    summary
}

/// Placeholder status for a PR whose evaluation task died: no data, so
/// `pending`, same as any other degraded path.
fn degraded_status(pr_number: u64, required_checks: &[String]) -> PrStatus {
    PrStatus {
        pr_number,
        result: CiResult::Pending,
        checks: Vec::new(),
        passed: Vec::new(),
        failed: Vec::new(),
        pending: Vec::new(),
        required_checks: required_checks.to_vec(),
        mergeable: None,
        state: PrState::Unknown,
        draft: false,
        review_decision: None,
        summary: format!("PR #{pr_number}: status evaluation failed (pending)"),
    }
}

fn join_or(names: &[String], fallback: &str) -> String {
    if names.is_empty() {
        fallback.to_string()
    } else {
        names.join(", ")
    }
}
