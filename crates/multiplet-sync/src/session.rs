//! Sync session: the single orchestrator the UI layer talks to.
//!
//! One run at a time: Idle → Scanning → Downloading → {Completed | Failed |
//! Cancelled}, then back to accepting starts. `start()` returns
//! immediately; the run proceeds on the background pool and surfaces
//! progress through a watch channel of `SyncSnapshot`s, throttled so the UI
//! thread is never flooded.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::CacheIndex;
use crate::cancel::CancellationToken;
use crate::catalog::{ArtifactId, IonFamily, ModelKind, RemoteStore};
use crate::config::{SyncConfig, UiConfig};
use crate::error::{FailureKind, Result, SyncError};
use crate::plan::{compute_plan, DownloadPlan};
use crate::transfer::{self, TransferEvent};

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Scanning,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl SyncPhase {
    /// A run is in progress; `start()` would be rejected.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncPhase::Scanning | SyncPhase::Downloading)
    }

    /// Definitive outcome of the last run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncPhase::Completed | SyncPhase::Failed | SyncPhase::Cancelled
        )
    }
}

/// Per-artifact failure surfaced to the UI.
#[derive(Debug, Clone, Serialize)]
pub struct TaskFailure {
    pub id: ArtifactId,
    pub kind: FailureKind,
    pub message: String,
}

/// Read-only state snapshot published to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub phase: SyncPhase,
    pub run_id: Option<String>,
    pub total_tasks: usize,
    pub committed_tasks: usize,
    pub failed_tasks: usize,
    pub current_dataset: Option<String>,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Per-artifact outcomes of a Failed run. Cancelled tasks are not
    /// failures and do not appear here.
    pub failures: Vec<TaskFailure>,
    /// Run-level error (catalog or scan), set only on Failed.
    pub error: Option<String>,
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            run_id: None,
            total_tasks: 0,
            committed_tasks: 0,
            failed_tasks: 0,
            current_dataset: None,
            bytes_transferred: 0,
            total_bytes: 0,
            failures: Vec::new(),
            error: None,
        }
    }
}

/// What to sync: one model kind, optionally restricted to ion families.
/// An empty ion list means all families.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub model: ModelKind,
    pub ions: Vec<IonFamily>,
}

impl SyncRequest {
    pub fn new(model: ModelKind, ions: impl Into<Vec<IonFamily>>) -> Self {
        Self {
            model,
            ions: ions.into(),
        }
    }
}

/// Single-active sync orchestrator.
///
/// Must live inside a tokio runtime: `start()` spawns the run onto it.
/// Independent instances are fully isolated; "one active sync" is a
/// property of each session object, not of the process environment.
pub struct SyncSession {
    store: Arc<dyn RemoteStore>,
    cache: CacheIndex,
    concurrency: usize,
    /// `Some` while a run is scanning or downloading; doubles as the
    /// cancellation handle for that run.
    active: Arc<Mutex<Option<CancellationToken>>>,
    snapshot_tx: Arc<watch::Sender<SyncSnapshot>>,
}

impl SyncSession {
    pub fn new(store: Arc<dyn RemoteStore>, config: &SyncConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(SyncSnapshot::default());
        Self {
            store,
            cache: CacheIndex::new(&config.cache_root),
            concurrency: config.concurrency,
            active: Arc::new(Mutex::new(None)),
            snapshot_tx: Arc::new(snapshot_tx),
        }
    }

    /// The cache this session commits into. The visualization layer reads
    /// artifacts through this index.
    pub fn cache(&self) -> &CacheIndex {
        &self.cache
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to state updates. Publication is throttled except for
    /// phase transitions and terminal states.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    /// Start a sync run. Returns the run id immediately; progress arrives
    /// through the snapshot channel. Rejected with `SessionBusy` while a
    /// run is active; starts are never queued.
    pub fn start(&self, request: SyncRequest) -> Result<Uuid> {
        let token = CancellationToken::new();
        {
            let mut guard = self.active.lock().unwrap();
            if guard.is_some() {
                return Err(SyncError::SessionBusy);
            }
            *guard = Some(token.clone());
        }

        let run_id = Uuid::new_v4();
        info!("Sync run {} started for {}", run_id, request.model);

        self.snapshot_tx.send_replace(SyncSnapshot {
            phase: SyncPhase::Scanning,
            run_id: Some(run_id.to_string()),
            ..SyncSnapshot::default()
        });

        let store = self.store.clone();
        let cache = self.cache.clone();
        let concurrency = self.concurrency;
        let active = self.active.clone();
        let snapshot_tx = self.snapshot_tx.clone();

        tokio::spawn(async move {
            let terminal =
                run_sync(store, cache, concurrency, request, token, &snapshot_tx, run_id).await;
            // Publish and release the session under one lock so an observer
            // of the terminal snapshot can immediately start the next run.
            let mut guard = active.lock().unwrap();
            snapshot_tx.send_replace(terminal);
            *guard = None;
        });

        Ok(run_id)
    }

    /// Request cancellation of the active run. Returns `false` when no run
    /// is active. Already-committed artifacts are kept.
    pub fn cancel(&self) -> bool {
        let guard = self.active.lock().unwrap();
        match &*guard {
            Some(token) => {
                info!("Sync cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Compute what a run would download, without downloading anything.
    /// Backs the "available simulations" table in the UI.
    pub async fn preview(&self, request: &SyncRequest) -> Result<DownloadPlan> {
        if self.is_active() {
            return Err(SyncError::SessionBusy);
        }

        let remote = self
            .store
            .list_available(request.model, &request.ions)
            .await?;
        let cache = self.cache.clone();
        let local = tokio::task::spawn_blocking(move || cache.scan())
            .await
            .map_err(|e| SyncError::Io {
                message: format!("Cache scan interrupted: {}", e),
                path: None,
                source: None,
            })??;

        Ok(compute_plan(&remote, &local))
    }
}

/// Drive one run to its terminal snapshot.
async fn run_sync(
    store: Arc<dyn RemoteStore>,
    cache: CacheIndex,
    concurrency: usize,
    request: SyncRequest,
    token: CancellationToken,
    snapshot_tx: &watch::Sender<SyncSnapshot>,
    run_id: Uuid,
) -> SyncSnapshot {
    let mut state = SyncSnapshot {
        phase: SyncPhase::Scanning,
        run_id: Some(run_id.to_string()),
        ..SyncSnapshot::default()
    };

    // Scanning: catalog + local index. A failure here aborts the run with
    // no partial state change.
    let remote = match store.list_available(request.model, &request.ions).await {
        Ok(remote) => remote,
        Err(err) => {
            error!("Catalog query failed for run {}: {}", run_id, err);
            state.phase = SyncPhase::Failed;
            state.error = Some(err.to_string());
            return state;
        }
    };

    if token.is_cancelled() {
        info!("Run {} cancelled during scan", run_id);
        state.phase = SyncPhase::Cancelled;
        return state;
    }

    let scan_cache = cache.clone();
    let local = match tokio::task::spawn_blocking(move || {
        let _ = scan_cache.sweep_partials();
        scan_cache.scan()
    })
    .await
    {
        Ok(Ok(local)) => local,
        Ok(Err(err)) => {
            error!("Cache scan failed for run {}: {}", run_id, err);
            state.phase = SyncPhase::Failed;
            state.error = Some(err.to_string());
            return state;
        }
        Err(err) => {
            error!("Cache scan task failed for run {}: {}", run_id, err);
            state.phase = SyncPhase::Failed;
            state.error = Some(format!("Cache scan interrupted: {}", err));
            return state;
        }
    };

    let plan = compute_plan(&remote, &local);
    if plan.is_empty() {
        info!("Run {}: cache already current, nothing to download", run_id);
        state.phase = SyncPhase::Completed;
        return state;
    }

    state.phase = SyncPhase::Downloading;
    state.total_tasks = plan.task_count();
    state.total_bytes = plan.total_bytes();
    snapshot_tx.send_replace(state.clone());
    info!(
        "Run {}: downloading {} artifact(s), {} bytes",
        run_id, state.total_tasks, state.total_bytes
    );

    // Downloading: the worker pool reports through the event channel; this
    // loop is the only writer of the snapshot, so UI updates stay
    // serialized no matter which worker made progress.
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let pool = tokio::spawn(transfer::execute(
        store,
        cache,
        plan,
        concurrency,
        events_tx,
        token.clone(),
    ));

    let mut in_flight: HashMap<ArtifactId, u64> = HashMap::new();
    let mut committed_bytes: u64 = 0;
    let mut last_publish = Instant::now();

    while let Some(event) = events_rx.recv().await {
        match event {
            TransferEvent::TaskStarted { dataset, .. } => {
                state.current_dataset = Some(dataset.label());
            }
            TransferEvent::TaskProgress {
                id, transferred, ..
            } => {
                in_flight.insert(id, transferred);
            }
            TransferEvent::TaskCommitted { id, bytes } => {
                in_flight.remove(&id);
                committed_bytes += bytes;
                state.committed_tasks += 1;
            }
            TransferEvent::TaskFailed { id, kind, message } => {
                in_flight.remove(&id);
                state.failed_tasks += 1;
                state.failures.push(TaskFailure { id, kind, message });
            }
        }

        state.bytes_transferred = committed_bytes + in_flight.values().sum::<u64>();
        if last_publish.elapsed() >= UiConfig::SNAPSHOT_MIN_INTERVAL {
            snapshot_tx.send_replace(state.clone());
            last_publish = Instant::now();
        }
    }

    let report = match pool.await {
        Ok(report) => report,
        Err(err) => {
            error!("Download pool task failed for run {}: {}", run_id, err);
            state.phase = SyncPhase::Failed;
            state.error = Some(format!("Download pool interrupted: {}", err));
            return state;
        }
    };

    state.committed_tasks = report.committed.len();
    state.failed_tasks = report.failed.len();
    state.bytes_transferred = committed_bytes;
    state.current_dataset = None;

    if token.is_cancelled() {
        info!(
            "Run {} cancelled; {} committed artifact(s) kept",
            run_id,
            report.committed.len()
        );
        state.phase = SyncPhase::Cancelled;
    } else if report.fully_committed() {
        info!(
            "Run {} completed: {} artifact(s) committed",
            run_id,
            report.committed.len()
        );
        state.phase = SyncPhase::Completed;
    } else {
        warn!(
            "Run {} finished with failures: {} committed, {} failed",
            run_id,
            report.committed.len(),
            report.failed.len()
        );
        state.phase = SyncPhase::Failed;
    }

    state
}
