use anyhow::Result;
use config::{Config, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Allowed range for concurrent workers. One autonomous agent per issue is
/// already heavyweight; more than ten will exhaust the host or the VCS rate
/// limits.
pub const MIN_CONCURRENT_WORKERS: u32 = 1;
pub const MAX_CONCURRENT_WORKERS: u32 = 10;

/// How pull requests produced by workers are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrStrategy {
    /// Merge automatically once CI passes and review requirements are met.
    Auto,
    /// Label for human review, never merge automatically.
    Review,
    /// Leave PRs untouched.
    Manual,
}

/// Main configuration structure for Autopilot.
///
/// Loaded once per invocation and passed explicitly into each component.
/// There is no process-wide cached instance; callers wanting fresh values
/// call [`AutopilotConfig::load`] again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    /// PR merge strategy
    pub pr_strategy: PrStrategy,
    /// Maximum concurrently active workers (1-10)
    pub max_concurrent_workers: u32,
    /// Wall-clock timeout per worker, duration string like "30m" or "2h"
    pub worker_timeout: String,
    /// Check names that must pass before merging
    pub required_checks: Vec<String>,
    /// Branch name template with a {feature-id} placeholder
    pub branch_pattern: String,
    /// Issue label that makes an issue eligible for a worker
    pub trigger_label: String,
    /// Label applied to PRs awaiting human review
    pub review_label: String,
    /// Event log settings
    pub events: EventLogConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Path to the event log file
    pub path: String,
    /// Retention window for rotation, in days
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Enable structured JSON logging
    pub json_logs: bool,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            pr_strategy: PrStrategy::Review,
            max_concurrent_workers: 3,
            worker_timeout: "30m".to_string(),
            required_checks: Vec::new(),
            branch_pattern: "feature/{feature-id}".to_string(),
            trigger_label: "autopilot".to_string(),
            review_label: "needs-review".to_string(),
            events: EventLogConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            path: crate::events::DEFAULT_EVENT_LOG_PATH.to_string(),
            retention_days: 30,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

/// Result of validating a loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl AutopilotConfig {
    /// Load configuration with precedence:
    /// 1. Default values
    /// 2. Configuration files (autopilot.toml, .autopilot-rc)
    /// 3. Environment variables prefixed with `AUTOPILOT_`, double
    ///    underscore for nesting (`AUTOPILOT_MAX_CONCURRENT_WORKERS`,
    ///    `AUTOPILOT_EVENTS__PATH`)
    ///
    /// Out-of-range values are reset to their defaults; see
    /// [`validate`](Self::validate).
    pub fn load() -> Result<(Self, ConfigValidation)> {
        let mut builder = Config::builder();

        if Path::new("autopilot.toml").exists() {
            builder = builder.add_source(File::with_name("autopilot"));
        }
        if Path::new(".autopilot-rc").exists() {
            builder = builder.add_source(File::with_name(".autopilot-rc"));
        }

        // Single underscores stay inside the key (max_concurrent_workers);
        // double underscores descend into nested sections (events__path).
        builder = builder.add_source(
            Environment::with_prefix("AUTOPILOT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut autopilot_config: AutopilotConfig = config.try_deserialize()?;

        let validation = autopilot_config.validate();
        for error in &validation.errors {
            warn!(error = %error, "Invalid configuration value reset to default");
        }

        Ok((autopilot_config, validation))
    }

    /// Validate fields against their allowed ranges. Each invalid field is
    /// reset to its default so no partial invalid state is ever applied.
    pub fn validate(&mut self) -> ConfigValidation {
        let defaults = AutopilotConfig::default();
        let mut errors = Vec::new();

        if !(MIN_CONCURRENT_WORKERS..=MAX_CONCURRENT_WORKERS).contains(&self.max_concurrent_workers)
        {
            errors.push(format!(
                "max_concurrent_workers must be between {MIN_CONCURRENT_WORKERS} and {MAX_CONCURRENT_WORKERS}, got {}",
                self.max_concurrent_workers
            ));
            self.max_concurrent_workers = defaults.max_concurrent_workers;
        }

        if parse_worker_timeout(&self.worker_timeout).is_none() {
            errors.push(format!(
                "worker_timeout must match \\d+[mh] (e.g. \"30m\", \"2h\"), got {:?}",
                self.worker_timeout
            ));
            self.worker_timeout = defaults.worker_timeout.clone();
        }

        if !self.branch_pattern.contains("{feature-id}") {
            errors.push(format!(
                "branch_pattern must contain a {{feature-id}} placeholder, got {:?}",
                self.branch_pattern
            ));
            self.branch_pattern = defaults.branch_pattern.clone();
        }

        if self.events.retention_days == 0 {
            errors.push("events.retention_days must be at least 1".to_string());
            self.events.retention_days = defaults.events.retention_days;
        }

        ConfigValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Parsed worker timeout. Callers should have gone through
    /// [`validate`](Self::validate), so an unparseable string falls back to
    /// the default.
    pub fn worker_timeout_duration(&self) -> Duration {
        parse_worker_timeout(&self.worker_timeout).unwrap_or(Duration::from_secs(30 * 60))
    }

    /// Expand the `{feature-id}` placeholder in the branch template.
    pub fn branch_for_feature(&self, feature_id: &str) -> String {
        self.branch_pattern.replace("{feature-id}", feature_id)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Parse a `\d+[mh]` duration string ("30m", "2h").
pub fn parse_worker_timeout(value: &str) -> Option<Duration> {
    let re = Regex::new(r"^(\d+)([mh])$").ok()?;
    let captures = re.captures(value.trim())?;
    let amount: u64 = captures.get(1)?.as_str().parse().ok()?;
    if amount == 0 {
        return None;
    }
    match captures.get(2)?.as_str() {
        "m" => Some(Duration::from_secs(amount * 60)),
        "h" => Some(Duration::from_secs(amount * 3600)),
        _ => None,
    }
}
