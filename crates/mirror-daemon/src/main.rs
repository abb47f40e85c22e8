//! mirror-daemon: Mirrors a local markdown vault into a remote document store.
//!
//! Watches the vault for created, modified, deleted and renamed notes and
//! pushes each change to the deployment configured in `.mirror/settings.json`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use mirror_core::{EventBus, EventDispatcher, HttpClientFactory, Subscription, SyncEngine, SyncEvent};
use mirror_daemon::console::{Console, HELP, render_report};
use mirror_daemon::native_fs::NativeFs;
use mirror_daemon::settings::SettingsStore;
use mirror_daemon::watcher::FileWatcher;

/// How long shutdown waits for in-flight remote calls.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "mirror-daemon")]
#[command(about = "Mirror a markdown vault into a remote document store")]
struct Args {
    /// Path to the vault directory
    #[arg(short, long)]
    vault: PathBuf,

    /// Deployment URL (saved to the vault settings)
    #[arg(long, env = "MIRROR_URL")]
    url: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Mode {
    /// Watch the vault and mirror changes as they happen (default)
    #[default]
    Watch,
    /// Upload every note once and exit
    Sync,
    /// Test the connection to the deployment and exit
    Check,
}

/// Print user-facing notices to stderr.
fn subscribe_notices(events: &Arc<EventBus>) -> Subscription {
    events.subscribe(|event| match event {
        SyncEvent::Notice { message } => eprintln!("[notice] {message}"),
        other => debug!("Sync event: {:?}", other),
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,mirror_daemon=debug,mirror_core=debug"
    } else {
        "info,mirror_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Vault path: {:?}", args.vault);

    let mut settings = SettingsStore::open(&args.vault).context("Failed to load settings")?;
    if let Some(url) = &args.url {
        settings.set_convex_url(url).context("Failed to save settings")?;
    }

    let events = Arc::new(EventBus::new());
    let _notices = subscribe_notices(&events);

    let engine = Arc::new(SyncEngine::with_events(HttpClientFactory, Arc::clone(&events)));
    if settings.convex_url().is_empty() {
        warn!("No deployment URL configured; changes will not be mirrored (use --url or `url <value>`)");
    } else {
        engine.configure(settings.convex_url());
    }

    let fs = Arc::new(NativeFs::new(args.vault.clone()));
    let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&engine), fs));

    match args.mode.unwrap_or_default() {
        Mode::Sync => {
            let report = dispatcher.sync_all().await;
            info!("{} saved, {} failed", report.saved.len(), report.failed.len());
            Ok(if report.is_clean() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Mode::Check => {
            let report = engine.check_connection().await;
            println!("{}", render_report(&report));
            Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Mode::Watch => {
            watch(args.vault, dispatcher, settings).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn watch(
    vault: PathBuf,
    dispatcher: Arc<EventDispatcher<NativeFs>>,
    settings: SettingsStore,
) -> Result<()> {
    let mut watcher = FileWatcher::new(vault).context("Failed to start file watcher")?;
    info!("File watcher started on {:?}", watcher.vault_path());

    let (quit_tx, mut quit_rx) = mpsc::channel(1);
    let console = Console::new(Arc::clone(&dispatcher), settings);
    tokio::spawn(console.run(BufReader::new(tokio::io::stdin()), quit_tx));

    info!("Mirror ready. {}", HELP);

    loop {
        tokio::select! {
            Some(event) = watcher.event_rx().recv() => {
                dispatcher.dispatch(event);
            }

            Some(()) = quit_rx.recv() => {
                info!("Quit requested");
                break;
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Waiting for {} in-flight change(s)", dispatcher.in_flight());
    if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher.flush()).await.is_err() {
        warn!("Gave up waiting for in-flight changes after {:?}", SHUTDOWN_GRACE);
    }

    info!("Shutting down");
    Ok(())
}
