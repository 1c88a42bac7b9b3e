//! Network traffic capture engine.
//!
//! A [`CaptureEngine`] polls a [`LogSource`] on a fixed interval, hands each
//! batch to the [`Correlator`](correlator::Correlator), which pairs
//! request/response events and persists them through a
//! [`LogStore`](store::LogStore). Queries read either the record snapshot
//! published after each poll or the files on disk, so they never wait on a
//! poll that is still fetching bodies.
//!
//! One engine is created per process and shared as `Arc<CaptureEngine>`.
//! Each `start()`/`stop()` pair is one session with its own directory and
//! fresh correlation state.

pub mod correlator;
pub mod error;
pub mod event;
pub mod query;
pub mod record;
pub mod source;
pub mod store;

pub use error::CaptureError;
pub use event::LogEntry;
pub use query::{FilterReport, RequestDetails, RequestFilter, SearchQuery, SearchReport};
pub use record::CaptureRecord;
pub use source::{BodyFetcher, LogSource, ResponseBody};

use anyhow::Context;
use correlator::Correlator;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::LogStore;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Capture engine settings.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Parent directory for per-session log directories.
    pub log_root: PathBuf,
    /// Delay between log-source polls.
    pub poll_interval: Duration,
    /// Delete the session directory on `stop()` unless the caller asks to keep it.
    pub purge_on_stop: bool,
    /// Ask the browser for response bodies.
    pub fetch_bodies: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            log_root: std::env::temp_dir().join("netcap"),
            poll_interval: Duration::from_millis(500),
            purge_on_stop: true,
            fetch_bodies: true,
        }
    }
}

impl CaptureConfig {
    /// Default config with `log_root` resolved for this machine.
    pub fn resolved() -> anyhow::Result<Self> {
        Ok(Self {
            log_root: resolve_log_root()?,
            ..Default::default()
        })
    }
}

/// Resolve where session directories live.
///
/// Priority:
/// 1. `NETCAP_LOG_DIR` env var
/// 2. OS-specific data directory
pub fn resolve_log_root() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var("NETCAP_LOG_DIR") {
        return Ok(PathBuf::from(dir));
    }

    let proj_dirs = directories::ProjectDirs::from("com", "openclaw", "mcp-netcap-server")
        .context("Failed to determine data directory for this OS")?;

    Ok(proj_dirs.data_dir().join("network_logs"))
}

/// Result of stopping a capture session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSummary {
    pub total_requests: usize,
    pub log_dir: PathBuf,
    pub logs_preserved: bool,
}

#[derive(Clone)]
struct Binding {
    source: Arc<dyn LogSource>,
    bodies: Arc<dyn BodyFetcher>,
}

struct Poller {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

type SharedSession = Arc<Mutex<Option<Correlator>>>;

/// What readers see of the current (or most recent) session.
#[derive(Default)]
struct SessionView {
    log_dir: Option<PathBuf>,
    records: Vec<CaptureRecord>,
}

type SharedView = Arc<RwLock<SessionView>>;

pub struct CaptureEngine {
    config: CaptureConfig,
    binding: RwLock<Option<Binding>>,
    capturing: Arc<AtomicBool>,
    session: SharedSession,
    view: SharedView,
    poller: Mutex<Option<Poller>>,
}

impl CaptureEngine {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            binding: RwLock::new(None),
            capturing: Arc::new(AtomicBool::new(false)),
            session: Arc::new(Mutex::new(None)),
            view: Arc::new(RwLock::new(SessionView::default())),
            poller: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Bind the browser session whose traffic will be captured. Takes effect
    /// on the next `start()`.
    pub async fn attach(&self, source: Arc<dyn LogSource>, bodies: Arc<dyn BodyFetcher>) {
        *self.binding.write().await = Some(Binding { source, bodies });
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Begin a new session. Returns the session log directory.
    ///
    /// `log_dir` overrides the time-stamped directory under `log_root`. It
    /// must not already hold another session's index.
    pub async fn start(&self, log_dir: Option<PathBuf>) -> Result<PathBuf, CaptureError> {
        let binding = self
            .binding
            .read()
            .await
            .clone()
            .ok_or(CaptureError::NotConfigured)?;

        let mut poller = self.poller.lock().await;
        if self.is_capturing() {
            let dir = self.log_dir().await.unwrap_or_default();
            return Err(CaptureError::AlreadyCapturing(dir));
        }

        let dir = log_dir.unwrap_or_else(|| self.config.log_root.join(session_dir_name()));
        let store = LogStore::new(&dir);
        if store.has_index().await {
            return Err(CaptureError::LogDirInUse(dir));
        }
        store.ensure_dir().await?;

        *self.session.lock().await = Some(Correlator::new(
            store,
            binding.bodies,
            self.config.fetch_bodies,
        ));
        *self.view.write().await = SessionView {
            log_dir: Some(dir.clone()),
            records: Vec::new(),
        };
        self.capturing.store(true, Ordering::SeqCst);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(
            self.config.poll_interval,
            binding.source,
            self.session.clone(),
            self.view.clone(),
            self.capturing.clone(),
            shutdown_rx,
        ));
        *poller = Some(Poller { shutdown, task });

        tracing::info!(
            dir = %dir.display(),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Network capture started"
        );
        Ok(dir)
    }

    /// End the session: stop polling, drain once more, then purge or keep
    /// the log directory. `keep_logs` overrides `purge_on_stop`.
    pub async fn stop(&self, keep_logs: Option<bool>) -> Result<StopSummary, CaptureError> {
        let mut poller = self.poller.lock().await;
        if !self.capturing.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::NotCapturing);
        }

        // Let an in-flight tick finish before the final drain.
        if let Some(Poller { shutdown, task }) = poller.take() {
            let _ = shutdown.send(true);
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Capture poller ended abnormally");
            }
        }

        let source = self.binding.read().await.as_ref().map(|b| b.source.clone());
        if let Some(source) = source {
            poll_once(source.as_ref(), &self.session, &self.view).await;
        }

        let preserve = keep_logs.unwrap_or(!self.config.purge_on_stop);
        let guard = self.session.lock().await;
        let (total_requests, store) = match guard.as_ref() {
            Some(c) => (c.len(), c.store().clone()),
            None => return Err(CaptureError::NotCapturing),
        };
        drop(guard);

        if !preserve {
            store.cleanup().await;
        }

        tracing::info!(
            requests = total_requests,
            dir = %store.dir().display(),
            preserved = preserve,
            "Network capture stopped"
        );

        Ok(StopSummary {
            total_requests,
            log_dir: store.dir().to_path_buf(),
            logs_preserved: preserve,
        })
    }

    /// Directory of the current (or most recent) session.
    pub async fn log_dir(&self) -> Option<PathBuf> {
        self.view.read().await.log_dir.clone()
    }

    /// Records of the current session as of the last completed poll.
    pub async fn records(&self) -> Vec<CaptureRecord> {
        self.view.read().await.records.clone()
    }

    pub async fn filter(&self, filter: &RequestFilter) -> FilterReport {
        let records = self.records().await;
        query::filter_records(&records, filter)
    }

    /// Search the current session's files. The pattern is validated first.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchReport, CaptureError> {
        query.compile()?;
        let dir = self.log_dir().await.ok_or(CaptureError::NotCapturing)?;
        query::search_logs(&dir, query).await
    }

    pub async fn request_details(&self, unique_id: &str) -> Result<RequestDetails, CaptureError> {
        let dir = self.log_dir().await.ok_or(CaptureError::NotCapturing)?;
        query::request_details(&dir, unique_id).await
    }
}

/// `capture_20240101T120000.123_1a2b`
fn session_dir_name() -> String {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("capture_{}_{}", stamp, &suffix[..4])
}

async fn poll_loop(
    interval: Duration,
    source: Arc<dyn LogSource>,
    session: SharedSession,
    view: SharedView,
    capturing: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if !capturing.load(Ordering::SeqCst) {
            break;
        }
        poll_once(source.as_ref(), &session, &view).await;
    }
}

/// One fetch-and-correlate pass. Fetch failures skip the tick. Readers see
/// the batch once it is fully applied.
async fn poll_once(
    source: &dyn LogSource,
    session: &Mutex<Option<Correlator>>,
    view: &RwLock<SessionView>,
) -> usize {
    let entries = match source.fetch_entries().await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to fetch protocol log, skipping tick");
            return 0;
        }
    };
    if entries.is_empty() {
        return 0;
    }

    let mut guard = session.lock().await;
    let Some(correlator) = guard.as_mut() else {
        return 0;
    };
    let applied = correlator.ingest(entries).await;
    if applied > 0 {
        view.write().await.records = correlator.records();
    }
    applied
}
