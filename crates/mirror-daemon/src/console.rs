//! Line-based command console.
//!
//! Stands in for the host's command palette and settings panel while the
//! daemon is watching: `sync` is "Sync Now", `check` is "Test Connection",
//! `url <value>` edits the one setting.

use crate::settings::SettingsStore;
use mirror_core::fs::FileSystem;
use mirror_core::{ConnectionReport, ConnectionState, EventDispatcher};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{error, info};

pub const HELP: &str = "Commands: sync | check | url <value> | status | quit";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Upload every managed document
    SyncNow,
    /// Probe the configured deployment
    TestConnection,
    /// Persist a new URL and rebuild the client; empty clears it
    SetUrl(String),
    Status,
    Quit,
    Help,
}

impl Command {
    /// Parse one input line. Blank lines yield `None`; anything unknown is `Help`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        let command = match word.to_ascii_lowercase().as_str() {
            "sync" => Command::SyncNow,
            "check" | "test" => Command::TestConnection,
            "url" => Command::SetUrl(rest.trim().to_string()),
            "status" => Command::Status,
            "quit" | "exit" => Command::Quit,
            _ => Command::Help,
        };
        Some(command)
    }
}

/// Response to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message(String),
    Quit,
}

/// Render a connectivity report with a success/failure cue.
pub fn render_report(report: &ConnectionReport) -> String {
    let cue = if report.is_success() {
        "ok"
    } else if report.is_warning() {
        "warn"
    } else {
        "error"
    };
    format!("[{cue}] {report}")
}

/// Executes console commands against the dispatcher and settings.
pub struct Console<F> {
    dispatcher: Arc<EventDispatcher<F>>,
    settings: SettingsStore,
}

impl<F: FileSystem + 'static> Console<F> {
    pub fn new(dispatcher: Arc<EventDispatcher<F>>, settings: SettingsStore) -> Self {
        Self {
            dispatcher,
            settings,
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Run a single command to completion.
    pub async fn execute(&mut self, command: Command) -> Reply {
        let engine = self.dispatcher.engine();
        let message = match command {
            Command::SyncNow => {
                let report = self.dispatcher.sync_all().await;
                format!(
                    "Synced {} of {} documents ({} failed, {} skipped)",
                    report.saved.len(),
                    report.total(),
                    report.failed.len(),
                    report.skipped.len()
                )
            }
            Command::TestConnection => render_report(&engine.check_connection().await),
            Command::SetUrl(url) => {
                // Persist first so a restart picks the URL up even if the client can't be built
                if let Err(e) = self.settings.set_convex_url(&url) {
                    error!("Failed to save settings: {}", e);
                    return Reply::Message(format!("Failed to save settings: {e}"));
                }
                match engine.configure(&url) {
                    ConnectionState::Ready => format!("URL set to {url}"),
                    ConnectionState::Unconfigured => "URL cleared, syncing disabled".to_string(),
                    ConnectionState::Failed(e) => format!("URL saved but client failed: {e}"),
                    ConnectionState::Connecting => "Connecting...".to_string(),
                }
            }
            Command::Status => {
                let connection = engine.connection();
                format!(
                    "state: {:?}, url: {:?}, in flight: {}",
                    connection.state(),
                    connection.url(),
                    self.dispatcher.in_flight()
                )
            }
            Command::Quit => return Reply::Quit,
            Command::Help => HELP.to_string(),
        };
        Reply::Message(message)
    }

    /// Read commands from `input` until EOF or `quit`.
    ///
    /// Replies go to stdout. A `quit` is forwarded on `quit_tx`; EOF is not,
    /// so a daemon without a terminal keeps running.
    pub async fn run<R>(mut self, input: R, quit_tx: mpsc::Sender<()>)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Console input closed");
                    return;
                }
                Err(e) => {
                    error!("Failed to read console input: {}", e);
                    return;
                }
            };
            let Some(command) = Command::parse(&line) else {
                continue;
            };
            match self.execute(command).await {
                Reply::Message(message) => println!("{message}"),
                Reply::Quit => {
                    let _ = quit_tx.send(()).await;
                    return;
                }
            }
        }
    }
}
