//! SyncEngine: Maps local file lifecycle events onto remote writes.
//!
//! Every event becomes at most two calls against the remote client:
//!
//! 1. Created / Modified -> `saveDocument(path, content)` (upsert)
//! 2. Deleted -> `deleteDocument(path)`
//! 3. Renamed -> `deleteDocument(old)` then `saveDocument(new, content)`
//!
//! Both calls are idempotent on the store side, so replayed or duplicated
//! events converge to the same remote state. Nothing here returns an error:
//! save failures become a user notice, delete failures are only logged, and
//! a missing connection turns every write into a quiet skip.

use crate::connection::{ClientFactory, Connection, ConnectionState};
use crate::diagnostics::{self, ConnectionReport, PROBE_TIMEOUT, UrlCheck};
use crate::document::now_millis;
use crate::events::{EventBus, SyncEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What happened to a single remote write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The remote call succeeded
    Written,
    /// No connection configured; nothing was sent
    Skipped,
    /// The remote call failed with the given message
    Failed(String),
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written)
    }
}

/// Report from a full resync.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Paths whose upsert succeeded
    pub saved: Vec<String>,
    /// Paths skipped because no connection was configured
    pub skipped: Vec<String>,
    /// Paths whose upsert failed, with the error message
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    /// Number of upserts attempted (or skipped), one per file.
    pub fn total(&self) -> usize {
        self.saved.len() + self.skipped.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Translates file events into remote upserts and deletes.
///
/// Owns the connection slot; share it behind an `Arc`.
pub struct SyncEngine {
    connection: Connection,
    events: Arc<EventBus>,
    probe_timeout: Duration,
}

impl SyncEngine {
    /// Create an unconfigured engine.
    pub fn new(factory: impl ClientFactory + 'static) -> Self {
        Self::with_events(factory, Arc::new(EventBus::new()))
    }

    /// Create an engine publishing to an existing event bus.
    pub fn with_events(factory: impl ClientFactory + 'static, events: Arc<EventBus>) -> Self {
        Self {
            connection: Connection::new(factory),
            events,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    /// Override the connectivity probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Point the engine at `url`, replacing any existing client.
    ///
    /// Called at startup and whenever the URL setting changes.
    pub fn configure(&self, url: &str) -> ConnectionState {
        let state = self.connection.replace(url);

        let label = match &state {
            ConnectionState::Ready => {
                self.events.emit(SyncEvent::notice("Remote client initialized"));
                "ready"
            }
            ConnectionState::Failed(_) => {
                self.events
                    .emit(SyncEvent::notice("Failed to initialize remote client"));
                "failed"
            }
            ConnectionState::Unconfigured => "unconfigured",
            ConnectionState::Connecting => "connecting",
        };
        self.events.emit(SyncEvent::ConnectionChanged {
            state: label.to_string(),
            url: self.connection.url(),
        });

        state
    }

    /// Save `content` at `path`, creating or replacing the remote record.
    pub async fn upsert(&self, path: &str, content: &str) -> WriteOutcome {
        let Some(client) = self.connection.get() else {
            return WriteOutcome::Skipped;
        };

        match client.save_document(path, content).await {
            Ok(()) => {
                debug!("Saved {} ({} bytes)", path, content.len());
                self.events.emit(SyncEvent::DocumentSaved {
                    path: path.to_string(),
                    timestamp: now_millis(),
                });
                WriteOutcome::Written
            }
            Err(e) => {
                error!("Failed to save {}: {}", path, e);
                self.events.emit(SyncEvent::WriteFailed {
                    operation: "save".to_string(),
                    path: path.to_string(),
                    error: e.to_string(),
                });
                self.events
                    .emit(SyncEvent::notice(format!("Failed to save to remote: {e}")));
                WriteOutcome::Failed(e.to_string())
            }
        }
    }

    /// Delete the remote record at `path`. Missing records are not an error.
    pub async fn remove(&self, path: &str) -> WriteOutcome {
        let Some(client) = self.connection.get() else {
            return WriteOutcome::Skipped;
        };

        match client.delete_document(path).await {
            Ok(()) => {
                debug!("Deleted {}", path);
                self.events.emit(SyncEvent::DocumentDeleted {
                    path: path.to_string(),
                    timestamp: now_millis(),
                });
                WriteOutcome::Written
            }
            Err(e) => {
                error!("Failed to delete {}: {}", path, e);
                self.events.emit(SyncEvent::WriteFailed {
                    operation: "delete".to_string(),
                    path: path.to_string(),
                    error: e.to_string(),
                });
                WriteOutcome::Failed(e.to_string())
            }
        }
    }

    pub async fn handle_create(&self, path: &str, content: &str) -> WriteOutcome {
        self.upsert(path, content).await
    }

    pub async fn handle_modify(&self, path: &str, content: &str) -> WriteOutcome {
        self.upsert(path, content).await
    }

    pub async fn handle_delete(&self, path: &str) -> WriteOutcome {
        self.remove(path).await
    }

    /// Delete every remote record below `folder`.
    ///
    /// Used when a whole folder leaves the tree and the files inside were
    /// never reported one by one. Returns the last failure, if any.
    pub async fn handle_folder_delete(&self, folder: &str) -> WriteOutcome {
        let Some(client) = self.connection.get() else {
            return WriteOutcome::Skipped;
        };

        let records = match client.list_documents().await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to list documents under {}: {}", folder, e);
                self.events.emit(SyncEvent::WriteFailed {
                    operation: "delete".to_string(),
                    path: folder.to_string(),
                    error: e.to_string(),
                });
                return WriteOutcome::Failed(e.to_string());
            }
        };

        let prefix = format!("{folder}/");
        let mut outcome = WriteOutcome::Written;
        let mut removed = 0;
        for record in records.iter().filter(|r| r.path.starts_with(&prefix)) {
            match self.remove(&record.path).await {
                WriteOutcome::Failed(e) => outcome = WriteOutcome::Failed(e),
                _ => removed += 1,
            }
        }
        debug!("Removed {} documents under {}", removed, folder);

        outcome
    }

    /// Move a document: delete the old path, then save the new one.
    ///
    /// There is no atomic move; between the two calls neither path resolves.
    /// The save is issued even if the delete failed.
    pub async fn handle_rename(
        &self,
        old_path: &str,
        new_path: &str,
        content: &str,
    ) -> (WriteOutcome, WriteOutcome) {
        debug!("Rename {} -> {}", old_path, new_path);
        let removed = self.remove(old_path).await;
        let saved = self.upsert(new_path, content).await;
        (removed, saved)
    }

    /// Upsert every document, one at a time.
    ///
    /// A failing document doesn't stop the batch.
    pub async fn sync_all<I>(&self, documents: I) -> SyncReport
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.events.emit(SyncEvent::notice("Syncing all files..."));

        let mut report = SyncReport::default();
        for (path, content) in documents {
            match self.upsert(&path, &content).await {
                WriteOutcome::Written => report.saved.push(path),
                WriteOutcome::Skipped => report.skipped.push(path),
                WriteOutcome::Failed(e) => report.failed.push((path, e)),
            }
        }

        info!(
            "Sync complete: {} saved, {} failed, {} skipped",
            report.saved.len(),
            report.failed.len(),
            report.skipped.len()
        );
        if report.is_clean() {
            self.events.emit(SyncEvent::notice("Sync complete"));
        } else {
            self.events.emit(SyncEvent::notice(format!(
                "Sync complete ({} of {} failed)",
                report.failed.len(),
                report.total()
            )));
        }

        report
    }

    /// Check the configured URL and probe the deployment.
    ///
    /// Malformed and suspicious URLs are reported without any network call.
    pub async fn check_connection(&self) -> ConnectionReport {
        match UrlCheck::of(&self.connection.url()) {
            UrlCheck::Missing => return ConnectionReport::NotInitialized,
            UrlCheck::Malformed(reason) => return ConnectionReport::InvalidUrl(reason),
            UrlCheck::Suspicious(warning) => {
                warn!("{}", warning);
                return ConnectionReport::Warning(warning);
            }
            UrlCheck::Plausible => {}
        }

        let Some(client) = self.connection.get() else {
            return ConnectionReport::NotInitialized;
        };

        diagnostics::probe(client.as_ref(), self.probe_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentRecord;
    use crate::remote::{RemoteClient, RemoteError, Result, StoreClient};
    use crate::store::{DocumentStore, InMemoryStore};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Client over a shared store that fails chosen calls and records call order.
    struct ScriptedClient {
        inner: StoreClient<Arc<InMemoryStore>>,
        calls: Mutex<Vec<String>>,
        save_count: AtomicUsize,
        fail_save_number: Option<usize>,
        fail_deletes: bool,
        hang_queries: bool,
    }

    impl ScriptedClient {
        fn new(store: Arc<InMemoryStore>) -> Self {
            Self {
                inner: StoreClient::new(store),
                calls: Mutex::new(Vec::new()),
                save_count: AtomicUsize::new(0),
                fail_save_number: None,
                fail_deletes: false,
                hang_queries: false,
            }
        }
    }

    #[async_trait]
    impl RemoteClient for ScriptedClient {
        async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
            self.calls.lock().unwrap().push("list".into());
            if self.hang_queries {
                futures::future::pending::<()>().await;
            }
            self.inner.list_documents().await
        }

        async fn get_document(&self, path: &str) -> Result<Option<DocumentRecord>> {
            self.inner.get_document(path).await
        }

        async fn save_document(&self, path: &str, content: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("save {path}"));
            let n = self.save_count.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_save_number == Some(n) {
                return Err(RemoteError::Server(format!("save #{n} rejected")));
            }
            self.inner.save_document(path, content).await
        }

        async fn delete_document(&self, path: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete {path}"));
            if self.fail_deletes {
                return Err(RemoteError::Transport("connection reset".into()));
            }
            self.inner.delete_document(path).await
        }
    }

    /// Hands out one pre-built client for every URL.
    struct FixedFactory(Arc<ScriptedClient>);

    impl ClientFactory for FixedFactory {
        fn connect(&self, _url: &str) -> Result<Arc<dyn RemoteClient>> {
            let client: Arc<dyn RemoteClient> = self.0.clone();
            Ok(client)
        }
    }

    const URL: &str = "https://happy-otter-123.convex.cloud";

    fn engine_with(client: ScriptedClient) -> (SyncEngine, Arc<ScriptedClient>) {
        let client = Arc::new(client);
        let engine = SyncEngine::new(FixedFactory(client.clone()));
        engine.configure(URL);
        (engine, client)
    }

    fn collect_notices(engine: &SyncEngine) -> (Arc<Mutex<Vec<String>>>, crate::events::Subscription) {
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        let sub = engine.events().subscribe(move |event| {
            if let SyncEvent::Notice { message } = event {
                sink.lock().unwrap().push(message);
            }
        });
        (notices, sub)
    }

    #[tokio::test]
    async fn test_unconfigured_writes_are_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let client = Arc::new(ScriptedClient::new(store.clone()));
        let engine = SyncEngine::new(FixedFactory(client.clone()));

        assert_eq!(engine.upsert("a.md", "x").await, WriteOutcome::Skipped);
        assert_eq!(engine.remove("a.md").await, WriteOutcome::Skipped);
        assert!(client.calls.lock().unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_upserts_match_single_upsert() {
        let store = Arc::new(InMemoryStore::new());
        let (engine, _client) = engine_with(ScriptedClient::new(store.clone()));

        engine.handle_modify("a.md", "same").await;
        engine.handle_modify("a.md", "same").await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.count_path("a.md"), 1);
        let record = store.get_by_path("a.md").await.unwrap().unwrap();
        assert_eq!(record.content, "same");
    }

    #[tokio::test]
    async fn test_rename_deletes_old_then_saves_new() {
        let store = Arc::new(InMemoryStore::new());
        let (engine, client) = engine_with(ScriptedClient::new(store.clone()));
        engine.handle_create("old.md", "body").await;

        let (removed, saved) = engine.handle_rename("old.md", "new.md", "body").await;

        assert!(removed.is_written());
        assert!(saved.is_written());
        assert!(store.get_by_path("old.md").await.unwrap().is_none());
        assert_eq!(store.get_by_path("new.md").await.unwrap().unwrap().content, "body");
        assert_eq!(
            *client.calls.lock().unwrap(),
            vec!["save old.md", "delete old.md", "save new.md"]
        );
    }

    #[tokio::test]
    async fn test_delete_failure_is_log_only() {
        let store = Arc::new(InMemoryStore::new());
        let mut client = ScriptedClient::new(store.clone());
        client.fail_deletes = true;
        let (engine, _client) = engine_with(client);
        let (notices, _sub) = collect_notices(&engine);

        let outcome = engine.handle_delete("a.md").await;

        assert!(matches!(outcome, WriteOutcome::Failed(_)));
        assert!(notices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_raises_notice() {
        let store = Arc::new(InMemoryStore::new());
        let mut client = ScriptedClient::new(store.clone());
        client.fail_save_number = Some(1);
        let (engine, _client) = engine_with(client);
        let (notices, _sub) = collect_notices(&engine);

        let outcome = engine.upsert("a.md", "x").await;

        assert!(matches!(outcome, WriteOutcome::Failed(_)));
        let notices = notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].starts_with("Failed to save to remote:"));
    }

    #[tokio::test]
    async fn test_folder_delete_removes_only_records_below_it() {
        let store = Arc::new(InMemoryStore::new());
        for path in ["notes/a.md", "notes/deep/b.md", "notes.md", "notesx/c.md"] {
            store.upsert_by_path(path, "x").await.unwrap();
        }
        let (engine, _client) = engine_with(ScriptedClient::new(Arc::clone(&store)));

        assert_eq!(engine.handle_folder_delete("notes").await, WriteOutcome::Written);

        let mut left: Vec<String> = store.list_all().await.unwrap().into_iter().map(|r| r.path).collect();
        left.sort();
        assert_eq!(left, vec!["notes.md", "notesx/c.md"]);
    }

    #[tokio::test]
    async fn test_rename_still_saves_when_delete_fails() {
        let store = Arc::new(InMemoryStore::new());
        let mut client = ScriptedClient::new(store.clone());
        client.fail_deletes = true;
        let (engine, _client) = engine_with(client);

        let (removed, saved) = engine.handle_rename("old.md", "new.md", "c").await;

        assert!(matches!(removed, WriteOutcome::Failed(_)));
        assert!(saved.is_written());
        assert!(store.get_by_path("new.md").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sync_all_continues_past_failure() {
        let store = Arc::new(InMemoryStore::new());
        let mut client = ScriptedClient::new(store.clone());
        let n = 6;
        client.fail_save_number = Some(n / 2);
        let (engine, client) = engine_with(client);

        let documents: Vec<_> = (1..=n)
            .map(|i| (format!("note-{i}.md"), format!("content {i}")))
            .collect();
        let report = engine.sync_all(documents).await;

        assert_eq!(client.save_count.load(Ordering::SeqCst), n);
        assert_eq!(report.total(), n);
        assert_eq!(report.saved.len(), n - 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, format!("note-{}.md", n / 2));

        for path in &report.saved {
            let record = store.get_by_path(path).await.unwrap().unwrap();
            let i = path.trim_start_matches("note-").trim_end_matches(".md");
            assert_eq!(record.content, format!("content {i}"));
        }
        assert!(store.get_by_path(&report.failed[0].0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_all_announces_start_and_end() {
        let store = Arc::new(InMemoryStore::new());
        let (engine, _client) = engine_with(ScriptedClient::new(store));
        let (notices, _sub) = collect_notices(&engine);

        engine.sync_all(vec![("a.md".to_string(), "x".to_string())]).await;

        assert_eq!(*notices.lock().unwrap(), vec!["Syncing all files...", "Sync complete"]);
    }

    #[tokio::test]
    async fn test_check_connection_rejects_bad_scheme_without_network() {
        let store = Arc::new(InMemoryStore::new());
        let (engine, client) = engine_with(ScriptedClient::new(store));
        engine.configure("ftp://x");

        let report = engine.check_connection().await;

        assert!(matches!(report, ConnectionReport::InvalidUrl(_)));
        assert!(report.to_string().starts_with("Error:"));
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_connection_without_url_is_not_initialized() {
        let store = Arc::new(InMemoryStore::new());
        let client = Arc::new(ScriptedClient::new(store));
        let engine = SyncEngine::new(FixedFactory(client));

        let report = engine.check_connection().await;

        assert_eq!(report, ConnectionReport::NotInitialized);
        assert!(report.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn test_check_connection_counts_documents() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_by_path("a.md", "1").await.unwrap();
        store.upsert_by_path("b.md", "2").await.unwrap();
        let (engine, _client) = engine_with(ScriptedClient::new(store));

        let report = engine.check_connection().await;

        assert_eq!(report, ConnectionReport::Connected { count: 2 });
    }

    #[tokio::test]
    async fn test_check_connection_warns_on_unexpected_domain_without_network() {
        let store = Arc::new(InMemoryStore::new());
        let (engine, client) = engine_with(ScriptedClient::new(store));
        engine.configure("https://happy-otter-123");

        let report = engine.check_connection().await;

        assert!(report.is_warning());
        assert!(report.to_string().starts_with("Warning: URL usually ends in '.convex.cloud'"));
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_connection_rejects_plain_http() {
        let store = Arc::new(InMemoryStore::new());
        let (engine, client) = engine_with(ScriptedClient::new(store));
        engine.configure("http://happy-otter-123.convex.cloud");

        let report = engine.check_connection().await;

        assert_eq!(report.to_string(), "Error: URL must start with 'https://'");
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_connection_times_out_after_five_seconds() {
        let store = Arc::new(InMemoryStore::new());
        let mut client = ScriptedClient::new(store);
        client.hang_queries = true;
        let (engine, _client) = engine_with(client);

        let started = tokio::time::Instant::now();
        let report = engine.check_connection().await;
        let elapsed = started.elapsed();

        assert_eq!(report, ConnectionReport::TimedOut(PROBE_TIMEOUT));
        assert!(report.to_string().contains("timed out"));
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_configure_emits_notice_and_state() {
        let store = Arc::new(InMemoryStore::new());
        let client = Arc::new(ScriptedClient::new(store));
        let engine = SyncEngine::new(FixedFactory(client));
        let (notices, _sub) = collect_notices(&engine);

        assert_eq!(engine.configure(URL), ConnectionState::Ready);
        assert_eq!(engine.configure(""), ConnectionState::Unconfigured);

        assert_eq!(*notices.lock().unwrap(), vec!["Remote client initialized"]);
    }
}
