//! `qsync` entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Wire observability**: `tracing-subscriber` with a text or JSON layer
//!    and an optional OpenTelemetry OTLP exporter.
//! 2. **Load configuration**: `SyncConfig` from a JSON file, defaults
//!    otherwise.
//! 3. **Construct infrastructure**: git repositories, the fixture-backed
//!    remote service, the environment auth store, and the notifier, injected
//!    into a `RepositoryOrchestrator`.
//! 4. **Run the subcommand**: `identity`, `status`, or `watch`.

mod adapters;
mod fixture;
mod observability;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use domain::{
    resolve_remote_url, AnalysisSnapshot, BranchClassification, LocalRepository, LocalVcsProvider,
    OrchestratorState, PullRequestSnapshot, RepositoryIdentity,
};
use git::{GitProvider, GitRepository};
use orchestrator::{Collaborators, RepositoryOrchestrator, SyncConfig};
use serde::Serialize;
use tracing::{info, instrument};

use crate::adapters::{EnvAuthStore, TracingCliFactory, TracingNotifier};
use crate::fixture::FixtureService;
use crate::observability::LogFormat;

#[derive(Parser)]
#[command(name = "qsync")]
#[command(about = "Keeps a local git checkout in sync with its remote code-quality analysis")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "QSYNC_LOG_FORMAT", global = true)]
    log_format: LogFormat,

    /// OTLP gRPC endpoint to export traces to.
    #[arg(long, env = "QSYNC_OTLP_ENDPOINT", global = true)]
    otlp_endpoint: Option<String>,

    /// JSON file with timing and limit overrides.
    #[arg(long, env = "QSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Service token.
    #[arg(long, env = "QSYNC_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the remote identity each remote of a checkout resolves to
    Identity {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Resolve a checkout once against a fixture and print the result
    Status {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// JSON fixture describing the remote service.
        #[arg(long, env = "QSYNC_FIXTURE")]
        fixture: PathBuf,
    },

    /// Follow a checkout and print state changes until interrupted
    Watch {
        #[arg(default_value = ".")]
        path: PathBuf,

        #[arg(long, env = "QSYNC_FIXTURE")]
        fixture: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = observability::init(cli.log_format, cli.otlp_endpoint.as_deref())?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Identity { path } => print_identities(&path),
        Commands::Status { path, fixture } => {
            let (orchestrator, repository) = build(config, &path, &fixture, cli.token.as_deref())?;
            status(&orchestrator, repository).await
        }
        Commands::Watch { path, fixture } => {
            let (orchestrator, repository) = build(config, &path, &fixture, cli.token.as_deref())?;
            watch(&orchestrator, repository).await
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    SyncConfig::from_json(&json).with_context(|| format!("invalid config {}", path.display()))
}

fn build(
    config: SyncConfig,
    path: &Path,
    fixture: &Path,
    token: Option<&str>,
) -> anyhow::Result<(RepositoryOrchestrator, Arc<dyn LocalRepository>)> {
    let provider = GitProvider::discover(&[path.to_path_buf()]);
    let Some(repository) = provider.repositories().into_iter().next() else {
        bail!("{} is not inside a git working tree", path.display());
    };
    let service = FixtureService::load(fixture)?;

    let orchestrator = RepositoryOrchestrator::new(
        config,
        Collaborators {
            vcs: Arc::new(provider),
            service: Arc::new(service),
            auth: Arc::new(EnvAuthStore::new(token)),
            notifier: Arc::new(TracingNotifier),
            cli_factory: Arc::new(TracingCliFactory),
        },
    );
    Ok((orchestrator, repository))
}

// ---------------------------------------------------------------------------
// identity
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RemoteReport {
    remote: String,
    url: Option<String>,
    identity: Option<RepositoryIdentity>,
}

fn print_identities(path: &Path) -> anyhow::Result<()> {
    let repository = GitRepository::discover(path)
        .with_context(|| format!("{} is not inside a git working tree", path.display()))?;
    let reports: Vec<RemoteReport> = repository
        .read_remotes()?
        .into_iter()
        .map(|remote| RemoteReport {
            remote: remote.name.to_string(),
            identity: remote.url().and_then(resolve_remote_url),
            url: remote.url().map(str::to_owned),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// status / watch
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct StatusReport {
    root: Option<PathBuf>,
    state: OrchestratorState,
    context: &'static str,
    classification: Option<BranchClassification>,
    identity: Option<RepositoryIdentity>,
    snapshot: Option<AnalysisSnapshot>,
    issues: usize,
    issues_truncated: bool,
    pull_requests: usize,
    active_pull_request: Option<PullRequestSnapshot>,
}

impl StatusReport {
    fn capture(orchestrator: &RepositoryOrchestrator) -> Self {
        let state = orchestrator.state();
        let issues = orchestrator.issues();
        Self {
            root: orchestrator
                .current_repository()
                .map(|repository| repository.root().to_path_buf()),
            state,
            context: state.context_key(),
            classification: orchestrator.classification(),
            identity: orchestrator.identity(),
            snapshot: orchestrator.snapshot(),
            issues: issues.len(),
            issues_truncated: issues.is_possibly_truncated(),
            pull_requests: orchestrator.pull_requests().map_or(0, |known| known.len()),
            active_pull_request: orchestrator.active_pull_request(),
        }
    }
}

#[instrument(skip_all, fields(root = %repository.root().display()))]
async fn status(
    orchestrator: &RepositoryOrchestrator,
    repository: Arc<dyn LocalRepository>,
) -> anyhow::Result<()> {
    orchestrator.open(repository).await;
    let report = StatusReport::capture(orchestrator);
    println!("{}", serde_json::to_string_pretty(&report)?);
    orchestrator.shutdown();
    Ok(())
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WatchEvent {
    State {
        previous: OrchestratorState,
        current: OrchestratorState,
    },
    Classification {
        classification: Option<BranchClassification>,
    },
    Issues {
        count: usize,
    },
}

#[instrument(skip_all, fields(root = %repository.root().display()))]
async fn watch(
    orchestrator: &RepositoryOrchestrator,
    repository: Arc<dyn LocalRepository>,
) -> anyhow::Result<()> {
    let mut states = orchestrator.subscribe_state();
    let mut classifications = orchestrator.subscribe_classification();
    let mut issues = orchestrator.subscribe_issues();

    orchestrator.open(repository).await;
    info!(state = %orchestrator.state(), "watching; press Ctrl-C to stop");

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(change) = states.recv() => WatchEvent::State {
                previous: change.previous,
                current: change.current,
            },
            Some(classification) = classifications.recv() => WatchEvent::Classification {
                classification,
            },
            Some(list) = issues.recv() => WatchEvent::Issues { count: list.len() },
            else => break,
        };
        println!("{}", serde_json::to_string(&event)?);
    }

    orchestrator.shutdown();
    println!("{}", serde_json::to_string(&StatusReport::capture(orchestrator))?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "qsync",
            "status",
            "/work/widgets",
            "--fixture",
            "service.json",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Status { ref path, .. } if path == Path::new("/work/widgets")
        ));
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_config_file_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("qsync.json");
        std::fs::write(&path, r#"{ "issue_cap": 50, "issue_page_size": 25 }"#).unwrap();

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.issue_cap, 50);
        assert_eq!(config.issue_page_size, 25);
        assert_eq!(config.head_wait_max_attempts, 5);
    }

    #[test]
    fn test_watch_events_are_tagged() {
        let event = WatchEvent::Classification {
            classification: Some(BranchClassification::OnPullRequestBranch),
        };

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "classification");
        assert_eq!(json["classification"], "on_pull_request_branch");
    }
}
