// # rotodnsd - DNS Rotation Daemon
//
// Thin integration layer over `rotodns-core`: it parses the command
// line, wires up the concrete provider/state/usage implementations, and
// maps engine faults to exit codes. All rotation logic lives in the
// library.
//
// ## Drive modes
//
// - `rotodnsd tick` — one evaluation pass and exit; meant to be invoked
//   by an external scheduler (cron, a systemd timer) every minute.
// - `rotodnsd run`  — long-lived daemon with an internal ticker;
//   responds to SIGTERM/SIGINT by finishing in-flight work and exiting.
//
// Both modes share the same evaluator and state-file discipline, so
// alternating between them does not corrupt state.
//
// ## Exit codes
//
// - 0: tick completed (individual jobs may have been skipped or failed;
//      details are in the logs)
// - 1: unexpected runtime error
// - 2: fatal configuration error
// - 3: fatal state-file error
// - 4: provider credentials invalid

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use rotodns_agent_http::HttpUsageAgent;
use rotodns_core::traits::{Clock, DnsProvider, StateStore, SystemClock, UsageSource};
use rotodns_core::{ConfigStore, EngineOptions, FaultKind, FileStateStore, RotationEngine};
use rotodns_provider_cloudflare::CloudflareProvider;

#[derive(Debug, Clone, Copy)]
enum AppExit {
    /// Tick completed
    Success = 0,
    /// Unexpected runtime failure
    Runtime = 1,
    /// Fatal configuration error
    ConfigError = 2,
    /// Fatal state-file error
    StateError = 3,
    /// Provider credentials invalid
    CredentialsError = 4,
}

impl From<AppExit> for ExitCode {
    fn from(code: AppExit) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Parser)]
#[command(name = "rotodnsd")]
#[command(about = "Scheduled DNS record rotation", version)]
struct Cli {
    /// Path to the configuration document
    #[arg(long, env = "ROTODNS_CONFIG", default_value = "/etc/rotodns/config.json")]
    config: PathBuf,

    /// Path to the rotation-state file
    #[arg(long, env = "ROTODNS_STATE", default_value = "/var/lib/rotodns/state.json")]
    state: PathBuf,

    /// Seconds between evaluation ticks in long-lived mode
    #[arg(long, default_value_t = 60)]
    tick_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ROTODNS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Evaluate rotations but log instead of writing to the provider
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one evaluation pass and exit (for external schedulers)
    Tick,
    /// Run as a long-lived daemon with an internal ticker
    Run,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            eprintln!("invalid log level: {other}");
            return AppExit::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set tracing subscriber: {e}");
        return AppExit::Runtime.into();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create tokio runtime: {e}");
            return AppExit::Runtime.into();
        }
    };

    runtime.block_on(run_daemon(cli)).into()
}

async fn run_daemon(cli: Cli) -> AppExit {
    // Startup is strict: a config that does not load is fatal here, even
    // though the long-lived loop tolerates reload failures later.
    let store = match ConfigStore::load(&cli.config).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "cannot load configuration");
            return AppExit::ConfigError;
        }
    };
    info!(
        accounts = store.accounts().len(),
        jobs = store.jobs().len(),
        triggers = store.triggers().len(),
        "configuration loaded"
    );

    let state = match FileStateStore::open(&cli.state).await {
        Ok(state) => Arc::new(state) as Arc<dyn StateStore>,
        Err(e) => {
            error!(error = %e, "cannot open state file");
            return AppExit::StateError;
        }
    };

    let provider: Arc<dyn DnsProvider> = Arc::new(CloudflareProvider::new(cli.dry_run));
    if cli.dry_run {
        warn!("dry-run mode: no records will be written");
    }

    if let Some(exit) = verify_credentials(&store, &provider).await {
        return exit;
    }

    let usage: Arc<dyn UsageSource> = Arc::new(HttpUsageAgent::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = RotationEngine::new(
        provider,
        state,
        clock,
        Some(usage),
        cli.config.clone(),
        EngineOptions {
            tick_period: Duration::from_secs(cli.tick_secs),
            ..EngineOptions::default()
        },
    );

    match cli.command {
        Command::Tick => match engine.run_tick().await {
            Ok(summary) => {
                info!(
                    fired = summary.fired,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    quarantined = summary.quarantined,
                    "tick complete"
                );
                AppExit::Success
            }
            Err(e) => fault_exit(e),
        },
        Command::Run => {
            let shutdown = match install_shutdown_handler() {
                Ok(rx) => rx,
                Err(e) => {
                    error!(error = %e, "cannot install signal handlers");
                    return AppExit::Runtime;
                }
            };
            match engine.run_with_shutdown(Some(shutdown)).await {
                Ok(()) => AppExit::Success,
                Err(e) => fault_exit(e),
            }
        }
    }
}

/// Verify every account's token before doing any rotation work
async fn verify_credentials(
    store: &ConfigStore,
    provider: &Arc<dyn DnsProvider>,
) -> Option<AppExit> {
    for account in store.accounts() {
        match provider.verify_token(account).await {
            Ok(verification) if verification.is_usable() => {
                info!(account = %account.name, "token verified");
            }
            Ok(verification) if !verification.valid => {
                error!(account = %account.name, "token rejected by the provider");
                return Some(AppExit::CredentialsError);
            }
            Ok(verification) => {
                error!(
                    account = %account.name,
                    missing = ?verification.missing_permissions,
                    "token lacks required permissions"
                );
                return Some(AppExit::CredentialsError);
            }
            Err(e) if e.is_retryable() => {
                // A provider outage at startup should not block a daemon
                // that may outlive it.
                warn!(account = %account.name, error = %e, "token verification unavailable, continuing");
            }
            Err(e) => {
                error!(account = %account.name, error = %e, "token verification failed");
                return Some(AppExit::CredentialsError);
            }
        }
    }
    None
}

fn fault_exit(e: rotodns_core::Error) -> AppExit {
    error!(error = %e, "fatal fault");
    match e.kind() {
        FaultKind::Config => AppExit::ConfigError,
        FaultKind::State => AppExit::StateError,
        FaultKind::Auth => AppExit::CredentialsError,
        FaultKind::RecordScope | FaultKind::Transient => AppExit::Runtime,
    }
}

/// Forward SIGTERM/SIGINT into a oneshot the engine selects on
#[cfg(unix)]
fn install_shutdown_handler() -> Result<tokio::sync::oneshot::Receiver<()>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        info!(signal = name, "shutdown signal received");
        let _ = tx.send(());
    });

    Ok(rx)
}

#[cfg(not(unix))]
fn install_shutdown_handler() -> Result<tokio::sync::oneshot::Receiver<()>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = tx.send(());
        }
    });
    Ok(rx)
}
