use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use autopilot::ci::{CiStatusEvaluator, GhCliProvider, StatusOptions};
use autopilot::config::AutopilotConfig;
use autopilot::events::{EventStore, EventType};
use autopilot::lifecycle::{EventQuery, LifecycleProjector, SortOrder};
use autopilot::worker::{DispatchResult, ProcessWorkerRunner, WorkerSupervisor};
use autopilot::AdmissionController;

#[derive(Parser)]
#[command(name = "autopilot")]
#[command(about = "Coordinates autonomous coding workers, one per GitHub issue")]
#[command(
    long_about = "Autopilot tracks worker and pull-request lifecycles in an append-only \
                  event log, bounds worker concurrency, and decides whether PRs are safe \
                  to merge from live CI and review state."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display active workers, pending PRs, and event log statistics
    Status,
    /// List recorded workflow events
    Events {
        /// Filter by event type (wire name, e.g. worker.start)
        #[arg(long = "type")]
        event_type: Option<String>,
        /// Filter by issue number
        #[arg(long)]
        issue: Option<u64>,
        /// Filter by PR number
        #[arg(long)]
        pr: Option<u64>,
        /// Filter by feature id
        #[arg(long)]
        feature: Option<String>,
        /// Maximum events to show
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Oldest first instead of newest first
        #[arg(long)]
        asc: bool,
    },
    /// Prune events older than the retention window
    Rotate {
        /// Retention window in days (defaults to the configured value)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Reset the event log to empty (debug use)
    Clear,
    /// Evaluate CI status for a pull request
    Check {
        /// Pull request number
        pr: u64,
        /// Fail when non-required checks have failed
        #[arg(long)]
        strict: bool,
    },
    /// Check whether a pull request is ready to merge
    Ready {
        /// Pull request number
        pr: u64,
    },
    /// Poll until a PR's checks settle or the timeout elapses
    Wait {
        /// Pull request number
        pr: u64,
        /// Seconds between polls
        #[arg(long, default_value = "30")]
        interval: u64,
        /// Overall timeout in seconds
        #[arg(long, default_value = "1800")]
        timeout: u64,
    },
    /// Check admission against the concurrency ceiling
    Admit,
    /// Dispatch a worker for an issue (admission-checked, event-recorded)
    Run {
        /// Issue number to work on
        issue: u64,
        /// Prompt for the worker (defaults to a standard issue prompt)
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Write a default autopilot.toml
    Init {
        /// Overwrite an existing autopilot.toml
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = AutopilotConfig::load_env_file();
    let (config, validation) = AutopilotConfig::load()?;
    autopilot::telemetry::init_telemetry(&config.observability)?;

    if !validation.valid {
        for error in &validation.errors {
            eprintln!("⚠️  config: {error}");
        }
    }

    tokio::runtime::Runtime::new()?.block_on(run(cli, config))
}

async fn run(cli: Cli, config: AutopilotConfig) -> Result<()> {
    let store = EventStore::new(&config.events.path);

    match cli.command {
        Commands::Status => status_command(&store).await,
        Commands::Events {
            event_type,
            issue,
            pr,
            feature,
            limit,
            asc,
        } => events_command(&store, event_type, issue, pr, feature, limit, asc).await,
        Commands::Rotate { days } => {
            let days = days.unwrap_or(config.events.retention_days);
            let removed = store.rotate(days).await?;
            println!("🧹 Removed {removed} event(s) older than {days} days");
            Ok(())
        }
        Commands::Clear => {
            store.clear().await?;
            println!("🧹 Event log cleared");
            Ok(())
        }
        Commands::Check { pr, strict } => check_command(&config, pr, strict).await,
        Commands::Ready { pr } => ready_command(&config, pr).await,
        Commands::Wait {
            pr,
            interval,
            timeout,
        } => wait_command(&config, pr, interval, timeout).await,
        Commands::Admit => {
            let projector = LifecycleProjector::new(store.clone());
            let controller = AdmissionController::new(projector, config.max_concurrent_workers);
            let decision = controller.can_admit().await;
            if decision.admitted {
                println!(
                    "✅ Can admit: {}/{} workers active",
                    decision.active_workers, decision.max_concurrent
                );
            } else {
                println!(
                    "🛑 At capacity: {}/{} workers active",
                    decision.active_workers, decision.max_concurrent
                );
            }
            Ok(())
        }
        Commands::Run { issue, prompt } => run_worker_command(&config, store, issue, prompt).await,
        Commands::Init { force } => init_command(&config, force),
    }
}

async fn status_command(store: &EventStore) -> Result<()> {
    let projector = LifecycleProjector::new(store.clone());
    let stats = projector.stats().await;
    let active = projector.active_workers().await;
    let pending = projector.pending_prs().await;

    println!("📊 AUTOPILOT STATUS");
    println!("───────────────────");
    println!("Events recorded: {}", stats.total_events);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!(
            "Log spans: {} → {}",
            oldest.format("%Y-%m-%d %H:%M:%S UTC"),
            newest.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    println!("\n🤖 Active workers: {}", active.len());
    for event in &active {
        if let Some(issue) = event.data.issue {
            println!(
                "   • issue #{issue} (started {})",
                event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    println!("\n📋 Pending PRs: {}", pending.len());
    for event in &pending {
        if let Some(pr) = event.data.pr {
            println!(
                "   • PR #{pr} (opened {})",
                event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    if !stats.events_by_type.is_empty() {
        println!("\nEvents by type:");
        for (event_type, count) in &stats.events_by_type {
            println!("   {event_type}: {count}");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn events_command(
    store: &EventStore,
    event_type: Option<String>,
    issue: Option<u64>,
    pr: Option<u64>,
    feature: Option<String>,
    limit: usize,
    asc: bool,
) -> Result<()> {
    let types = match event_type {
        Some(name) => Some(vec![name
            .parse::<EventType>()
            .map_err(|e| anyhow::anyhow!(e))?]),
        None => None,
    };

    let projector = LifecycleProjector::new(store.clone());
    let query = EventQuery {
        types,
        issue,
        pr,
        feature_id: feature,
        limit: Some(limit),
        order: if asc {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        },
        ..Default::default()
    };

    let events = projector.query(&query).await;
    if events.is_empty() {
        println!("No matching events");
        return Ok(());
    }

    for event in events {
        let mut detail = String::new();
        if let Some(issue) = event.data.issue {
            detail.push_str(&format!(" issue=#{issue}"));
        }
        if let Some(pr) = event.data.pr {
            detail.push_str(&format!(" pr=#{pr}"));
        }
        if let Some(feature_id) = &event.data.feature_id {
            detail.push_str(&format!(" feature={feature_id}"));
        }
        if let Some(duration) = event.data.duration_ms {
            detail.push_str(&format!(" duration={duration}ms"));
        }
        if let Some(error) = &event.data.error {
            detail.push_str(&format!(" error={error:?}"));
        }
        println!(
            "{}  {}{}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            detail
        );
    }
    Ok(())
}

async fn check_command(config: &AutopilotConfig, pr: u64, strict: bool) -> Result<()> {
    let evaluator = CiStatusEvaluator::new(Arc::new(GhCliProvider::new()));
    let status = evaluator
        .check_pr_status(
            pr,
            &config.required_checks,
            StatusOptions {
                fail_on_unrequired_failure: strict,
            },
        )
        .await;

    println!("{}", status.summary);
    if !status.failed.is_empty() {
        println!("❌ Failed: {}", status.failed.join(", "));
    }
    if !status.pending.is_empty() {
        println!("⏳ Pending: {}", status.pending.join(", "));
    }
    if !status.passed.is_empty() {
        println!("✅ Passed: {}", status.passed.join(", "));
    }
    Ok(())
}

async fn ready_command(config: &AutopilotConfig, pr: u64) -> Result<()> {
    let evaluator = CiStatusEvaluator::new(Arc::new(GhCliProvider::new()));
    let readiness = evaluator
        .is_pr_ready_to_merge(pr, &config.required_checks)
        .await;

    if readiness.ready {
        println!("✅ {}", readiness.reason);
    } else {
        println!("🛑 {}", readiness.reason);
    }
    Ok(())
}

async fn wait_command(config: &AutopilotConfig, pr: u64, interval: u64, timeout: u64) -> Result<()> {
    let evaluator = CiStatusEvaluator::new(Arc::new(GhCliProvider::new()));
    let outcome = evaluator
        .wait_for_pr_checks(
            pr,
            &config.required_checks,
            Duration::from_secs(interval),
            Duration::from_secs(timeout),
            |status| println!("   {}", status.summary),
        )
        .await;

    println!("{}", outcome.status.summary);
    if outcome.timed_out {
        println!("⏰ Gave up waiting; treat as still pending");
    }
    Ok(())
}

async fn run_worker_command(
    config: &AutopilotConfig,
    store: EventStore,
    issue: u64,
    prompt: Option<String>,
) -> Result<()> {
    let prompt = prompt.unwrap_or_else(|| {
        format!(
            "Work on GitHub issue #{issue}. Create a branch matching the pattern {} and open \
             a pull request when done.",
            config.branch_pattern
        )
    });

    let supervisor = WorkerSupervisor::new(
        store,
        Arc::new(ProcessWorkerRunner::claude_code()),
        config.clone(),
    );

    match supervisor.dispatch(issue, prompt).await? {
        DispatchResult::Rejected(decision) => {
            println!(
                "🛑 Rejected: {}/{} workers already active",
                decision.active_workers, decision.max_concurrent
            );
        }
        DispatchResult::Finished(outcome) => {
            if outcome.success {
                println!("✅ Worker finished for issue #{issue} ({}ms)", outcome.duration_ms);
            } else if outcome.timed_out {
                println!("⏰ Worker timed out for issue #{issue}");
            } else {
                println!(
                    "❌ Worker failed for issue #{issue} (exit code {:?})",
                    outcome.exit_code
                );
            }
        }
    }

    Ok(())
}

fn init_command(config: &AutopilotConfig, force: bool) -> Result<()> {
    let path = "autopilot.toml";
    if std::path::Path::new(path).exists() && !force {
        println!("⚠️  {path} already exists (use --force to overwrite)");
        return Ok(());
    }
    config.save_to_file(path)?;
    println!("📝 Wrote {path}");
    Ok(())
}
