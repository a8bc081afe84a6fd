//! Pull-request data providers.
//!
//! The evaluator depends on this capability seam rather than on a concrete
//! VCS client. Two production implementations: the `gh` CLI (what most
//! workstations have authenticated already) and the GitHub REST API via
//! octocrab. Both report failures as errors; the evaluator absorbs those
//! into "no data" so a flaky network call never crashes a long-running
//! driver.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed provider output: {0}")]
    Malformed(String),

    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),
}

/// Execution status of a single CI check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
    #[serde(untagged)]
    Unknown(String),
}

impl From<&str> for CheckStatus {
    fn from(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "queued" | "requested" | "waiting" | "pending" => CheckStatus::Queued,
            "in_progress" => CheckStatus::InProgress,
            "completed" => CheckStatus::Completed,
            other => CheckStatus::Unknown(other.to_string()),
        }
    }
}

/// One CI check as reported by the provider. `conclusion` is only present
/// once the check has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiCheck {
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<String>,
}

impl CiCheck {
    pub fn is_completed(&self) -> bool {
        self.status == CheckStatus::Completed
    }

    /// Success, neutral, and skipped conclusions all count as passing.
    pub fn passed(&self) -> bool {
        self.is_completed()
            && matches!(
                self.conclusion.as_deref(),
                Some("success") | Some("neutral") | Some("skipped")
            )
    }

    /// Any other completed conclusion (failure, cancelled, timed_out,
    /// action_required, ...) counts as failed.
    pub fn failed(&self) -> bool {
        self.is_completed() && !self.passed()
    }
}

/// Open/closed/merged state of a PR. `Unknown` is the degraded "no data"
/// value when the provider is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
    Unknown,
}

impl From<&str> for PrState {
    fn from(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "open" => PrState::Open,
            "closed" => PrState::Closed,
            "merged" => PrState::Merged,
            _ => PrState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    ReviewRequired,
}

/// PR metadata relevant to the merge decision. `mergeable` is tri-state:
/// GitHub reports `None` while it is still computing mergeability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrDetails {
    pub number: u64,
    pub state: PrState,
    pub draft: bool,
    pub mergeable: Option<bool>,
    pub review_decision: Option<ReviewDecision>,
}

impl PrDetails {
    /// Degraded response when the provider yields no data.
    pub fn unknown(number: u64) -> Self {
        Self {
            number,
            state: PrState::Unknown,
            draft: false,
            mergeable: None,
            review_decision: None,
        }
    }
}

/// Capability seam over the external VCS.
#[async_trait]
pub trait PullRequestProvider: Send + Sync {
    async fn pr_details(&self, pr_number: u64) -> Result<PrDetails, ProviderError>;
    async fn pr_checks(&self, pr_number: u64) -> Result<Vec<CiCheck>, ProviderError>;
}

/// Provider backed by the `gh` CLI with JSON output.
///
/// Each invocation carries its own wall-clock timeout; on expiry the child
/// is killed on drop (best-effort, failures to kill are swallowed since the
/// caller is already unblocked).
#[derive(Debug, Clone)]
pub struct GhCliProvider {
    program: String,
    timeout: Duration,
}

impl GhCliProvider {
    pub fn new() -> Self {
        Self {
            program: "gh".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run_json(&self, args: &[&str]) -> Result<serde_json::Value, ProviderError> {
        debug!(program = %self.program, ?args, "Invoking VCS CLI");

        let mut command = Command::new(&self.program);
        command.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
            .map_err(|source| ProviderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProviderError::CommandFailed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

impl Default for GhCliProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PullRequestProvider for GhCliProvider {
    async fn pr_details(&self, pr_number: u64) -> Result<PrDetails, ProviderError> {
        let json = self
            .run_json(&[
                "pr",
                "view",
                &pr_number.to_string(),
                "--json",
                "state,isDraft,mergeable,reviewDecision",
            ])
            .await?;

        let state = json["state"].as_str().map(PrState::from).unwrap_or(PrState::Unknown);
        // gh reports MERGEABLE / CONFLICTING / UNKNOWN
        let mergeable = match json["mergeable"].as_str().map(str::to_uppercase).as_deref() {
            Some("MERGEABLE") => Some(true),
            Some("CONFLICTING") => Some(false),
            _ => None,
        };
        let review_decision = match json["reviewDecision"].as_str().map(str::to_uppercase).as_deref()
        {
            Some("APPROVED") => Some(ReviewDecision::Approved),
            Some("CHANGES_REQUESTED") => Some(ReviewDecision::ChangesRequested),
            Some("REVIEW_REQUIRED") => Some(ReviewDecision::ReviewRequired),
            _ => None,
        };

        Ok(PrDetails {
            number: pr_number,
            state,
            draft: json["isDraft"].as_bool().unwrap_or(false),
            mergeable,
            review_decision,
        })
    }

    async fn pr_checks(&self, pr_number: u64) -> Result<Vec<CiCheck>, ProviderError> {
        let json = self
            .run_json(&[
                "pr",
                "view",
                &pr_number.to_string(),
                "--json",
                "statusCheckRollup",
            ])
            .await?;

        let rollup = json["statusCheckRollup"].as_array().cloned().unwrap_or_default();
        Ok(rollup.iter().filter_map(parse_rollup_entry).collect())
    }
}

/// Parse one statusCheckRollup entry. GitHub mixes two shapes here: check
/// runs carry name/status/conclusion, legacy commit statuses carry
/// context/state.
fn parse_rollup_entry(entry: &serde_json::Value) -> Option<CiCheck> {
    let name = entry["name"]
        .as_str()
        .or_else(|| entry["context"].as_str())?
        .to_string();

    if let Some(status) = entry["status"].as_str() {
        return Some(CiCheck {
            name,
            status: CheckStatus::from(status),
            conclusion: entry["conclusion"]
                .as_str()
                .map(|c| c.to_lowercase())
                .filter(|c| !c.is_empty()),
        });
    }

    // Legacy commit status: PENDING is still running, everything else is a
    // completed conclusion.
    let state = entry["state"].as_str()?.to_lowercase();
    if state == "pending" {
        Some(CiCheck {
            name,
            status: CheckStatus::InProgress,
            conclusion: None,
        })
    } else {
        Some(CiCheck {
            name,
            status: CheckStatus::Completed,
            conclusion: Some(state),
        })
    }
}

/// Provider backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubApiProvider {
    octocrab: Octocrab,
    owner: String,
    repo: String,
}

impl GitHubApiProvider {
    pub fn new(octocrab: Octocrab, owner: String, repo: String) -> Self {
        Self {
            octocrab,
            owner,
            repo,
        }
    }

    /// Derive a review decision from the latest review per reviewer.
    async fn review_decision(&self, pr_number: u64) -> Option<ReviewDecision> {
        let reviews = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .list_reviews(pr_number)
            .send()
            .await
            .ok()?;

        let mut latest: HashMap<octocrab::models::UserId, &octocrab::models::pulls::Review> =
            HashMap::new();
        for review in &reviews.items {
            let Some(user) = &review.user else { continue };
            match latest.get(&user.id) {
                Some(existing) => {
                    if let (Some(new_at), Some(old_at)) =
                        (&review.submitted_at, &existing.submitted_at)
                    {
                        if new_at > old_at {
                            latest.insert(user.id, review);
                        }
                    }
                }
                None => {
                    latest.insert(user.id, review);
                }
            }
        }

        let state_contains = |review: &octocrab::models::pulls::Review, needle: &str| {
            review
                .state
                .as_ref()
                .map(|s| format!("{s:?}").contains(needle))
                .unwrap_or(false)
        };

        if latest.values().any(|r| state_contains(r, "ChangesRequested")) {
            Some(ReviewDecision::ChangesRequested)
        } else if latest.values().any(|r| state_contains(r, "Approved")) {
            Some(ReviewDecision::Approved)
        } else {
            None
        }
    }
}

#[async_trait]
impl PullRequestProvider for GitHubApiProvider {
    async fn pr_details(&self, pr_number: u64) -> Result<PrDetails, ProviderError> {
        let pr = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .get(pr_number)
            .await?;

        let state = if pr.merged_at.is_some() {
            PrState::Merged
        } else {
            let state_str = format!("{:?}", pr.state).to_lowercase();
            if state_str.contains("open") {
                PrState::Open
            } else {
                PrState::Closed
            }
        };

        Ok(PrDetails {
            number: pr_number,
            state,
            draft: pr.draft.unwrap_or(false),
            mergeable: pr.mergeable,
            review_decision: self.review_decision(pr_number).await,
        })
    }

    async fn pr_checks(&self, pr_number: u64) -> Result<Vec<CiCheck>, ProviderError> {
        let pr = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .get(pr_number)
            .await?;
        let head_sha = pr.head.sha;

        let route = format!(
            "/repos/{}/{}/commits/{}/check-runs",
            self.owner, self.repo, head_sha
        );
        let json: serde_json::Value = self.octocrab.get(route, None::<&()>).await?;

        let runs = json["check_runs"].as_array().cloned().unwrap_or_default();
        Ok(runs
            .iter()
            .filter_map(|run| {
                Some(CiCheck {
                    name: run["name"].as_str()?.to_string(),
                    status: CheckStatus::from(run["status"].as_str().unwrap_or("queued")),
                    conclusion: run["conclusion"].as_str().map(|c| c.to_lowercase()),
                })
            })
            .collect())
    }
}
