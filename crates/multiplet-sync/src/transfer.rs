//! Download coordinator: bounded worker pool with verified atomic commits.
//!
//! Workers pull tasks from the plan in declared order, stream each body to
//! a `.part` file with an incremental checksum, verify byte count and
//! fingerprint, then rename into place and write the sidecar marker. A
//! reader scanning the cache concurrently can never observe a partial file
//! at a final path; the rename is the only synchronization.

use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::CacheIndex;
use crate::cancel::CancellationToken;
use crate::catalog::{ArtifactId, ArtifactMeta, ByteStream, DatasetKey, Fingerprint, RemoteStore};
use crate::config::NetworkConfig;
use crate::error::{FailureKind, Result, SyncError};
use crate::plan::DownloadPlan;

/// Progress and outcome events emitted by the worker pool.
///
/// Senders are workers on the pool; the receiver is the session's event
/// loop, which serializes them into snapshot updates.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    TaskStarted {
        id: ArtifactId,
        dataset: DatasetKey,
    },
    TaskProgress {
        id: ArtifactId,
        transferred: u64,
        total: u64,
    },
    TaskCommitted {
        id: ArtifactId,
        bytes: u64,
    },
    TaskFailed {
        id: ArtifactId,
        kind: FailureKind,
        message: String,
    },
}

/// Final partition of a plan execution. Cancellation truncates the run but
/// never revokes entries already committed.
#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    pub committed: Vec<ArtifactId>,
    pub failed: Vec<(ArtifactId, FailureKind)>,
}

impl TransferReport {
    pub fn fully_committed(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: TransferReport) {
        self.committed.extend(other.committed);
        self.failed.extend(other.failed);
    }
}

/// Execute a download plan on a pool of `concurrency` workers.
///
/// One task's failure never aborts the pool; cancellation drains it
/// promptly, discarding in-flight temporaries.
pub async fn execute(
    store: Arc<dyn RemoteStore>,
    cache: CacheIndex,
    plan: DownloadPlan,
    concurrency: usize,
    events: mpsc::UnboundedSender<TransferEvent>,
    cancel: CancellationToken,
) -> TransferReport {
    let queue: VecDeque<ArtifactMeta> = plan.tasks().cloned().collect();
    if queue.is_empty() {
        return TransferReport::default();
    }

    let workers = concurrency.max(1).min(queue.len());
    debug!(
        "Executing plan: {} task(s) on {} worker(s)",
        queue.len(),
        workers
    );

    let queue = Arc::new(Mutex::new(queue));
    let mut pool = JoinSet::new();

    for _ in 0..workers {
        let store = store.clone();
        let cache = cache.clone();
        let queue = queue.clone();
        let events = events.clone();
        let cancel = cancel.clone();

        pool.spawn(async move {
            let mut report = TransferReport::default();
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(meta) = queue.lock().unwrap().pop_front() else {
                    break;
                };

                let _ = events.send(TransferEvent::TaskStarted {
                    id: meta.id.clone(),
                    dataset: meta.id.dataset(),
                });

                match download_one(store.as_ref(), &cache, &meta, &events, &cancel).await {
                    Ok(()) => {
                        info!("Committed {} ({} bytes)", meta.id, meta.size);
                        let _ = events.send(TransferEvent::TaskCommitted {
                            id: meta.id.clone(),
                            bytes: meta.size,
                        });
                        report.committed.push(meta.id);
                    }
                    Err(SyncError::Cancelled) => {
                        debug!("Worker cancelled while fetching {}", meta.id);
                        break;
                    }
                    Err(err) => {
                        let kind = err.failure_kind();
                        warn!("Task {} failed ({}): {}", meta.id, kind, err);
                        let _ = events.send(TransferEvent::TaskFailed {
                            id: meta.id.clone(),
                            kind,
                            message: err.to_string(),
                        });
                        report.failed.push((meta.id, kind));
                    }
                }
            }
            report
        });
    }

    let mut report = TransferReport::default();
    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok(worker_report) => report.merge(worker_report),
            Err(err) => error!("Download worker panicked: {}", err),
        }
    }

    // Completion order across workers is arbitrary; report in id order.
    report.committed.sort();
    report.failed.sort_by(|a, b| a.0.cmp(&b.0));
    report
}

/// Fetch, verify and commit a single artifact.
async fn download_one(
    store: &dyn RemoteStore,
    cache: &CacheIndex,
    meta: &ArtifactMeta,
    events: &mpsc::UnboundedSender<TransferEvent>,
    cancel: &CancellationToken,
) -> Result<()> {
    cancel.bail()?;

    let final_path = cache.artifact_path(&meta.id);
    let temp_path = cache.temp_path(&meta.id);
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::write_error(e, parent))?;
    }

    let mut stream = store.fetch(meta).await?;

    let (transferred, digest) =
        match write_stream(&mut stream, &temp_path, meta, events, cancel).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(err);
            }
        };

    if transferred != meta.size {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(SyncError::IntegrityMismatch {
            expected: format!("{} bytes", meta.size),
            actual: format!("{} bytes", transferred),
        });
    }

    if let (Fingerprint::Sha256 { hex: expected }, Some(actual)) = (&meta.fingerprint, digest) {
        let expected = expected.to_lowercase();
        if actual != expected {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(SyncError::IntegrityMismatch { expected, actual });
        }
    }

    // The rename is the commit point: the file appears at its final path
    // complete and verified, or not at all.
    if let Err(err) = tokio::fs::rename(&temp_path, &final_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(SyncError::write_error(err, &final_path));
    }

    cache.commit_marker(meta)?;
    Ok(())
}

/// Stream the body into the temp file, hashing as it goes.
///
/// Cancellation is checked once per chunk. On any error the caller owns
/// temp-file cleanup.
async fn write_stream(
    stream: &mut ByteStream,
    temp_path: &Path,
    meta: &ArtifactMeta,
    events: &mpsc::UnboundedSender<TransferEvent>,
    cancel: &CancellationToken,
) -> Result<(u64, Option<String>)> {
    let mut file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| SyncError::write_error(e, temp_path))?;

    let mut hasher = matches!(meta.fingerprint, Fingerprint::Sha256 { .. }).then(Sha256::new);
    let mut transferred: u64 = 0;
    let mut last_event: Option<Instant> = None;

    while let Some(chunk) = stream.next().await {
        cancel.bail()?;

        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::write_error(e, temp_path))?;
        if let Some(ref mut hasher) = hasher {
            hasher.update(&chunk);
        }
        transferred += chunk.len() as u64;

        let due = last_event
            .map(|t| t.elapsed() >= NetworkConfig::DOWNLOAD_PROGRESS_INTERVAL)
            .unwrap_or(true);
        if due {
            let _ = events.send(TransferEvent::TaskProgress {
                id: meta.id.clone(),
                transferred,
                total: meta.size,
            });
            last_event = Some(Instant::now());
        }
    }

    file.flush()
        .await
        .map_err(|e| SyncError::write_error(e, temp_path))?;
    file.sync_all()
        .await
        .map_err(|e| SyncError::io_with_path(e, temp_path))?;

    Ok((transferred, hasher.map(|h| hex::encode(h.finalize()))))
}
