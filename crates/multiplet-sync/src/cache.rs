//! Local cache index over the on-disk artifact store.
//!
//! Layout: `<root>/<model>_data/<ion_family>/<variant>[.hdf5]`, with a
//! `<file>.sync.json` sidecar per committed entry recording fingerprint,
//! byte count and commit time. In-progress downloads live under the
//! reserved `.part` suffix and are invisible to scans and readers, so a
//! file observable at a final path is always complete and verified.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::{ArtifactId, ArtifactMeta, Fingerprint};
use crate::config::CacheConfig;
use crate::error::{Result, SyncError};
use crate::fsutil;

/// Sidecar marker written after an artifact's data file is committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitMarker {
    pub id: ArtifactId,
    pub size: u64,
    pub fingerprint: Fingerprint,
    pub committed_at: String,
}

/// Index over one cache root. Cheap to clone; holds no open handles.
#[derive(Debug, Clone)]
pub struct CacheIndex {
    root: PathBuf,
}

impl CacheIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| SyncError::io_with_path(e, &self.root))
    }

    /// Stable final path of an artifact, derived from its identity alone.
    pub fn artifact_path(&self, id: &ArtifactId) -> PathBuf {
        let mut file_name = id.variant.clone();
        if let Some(ext) = id.model.file_extension() {
            file_name.push('.');
            file_name.push_str(ext);
        }
        self.root
            .join(id.model.data_dir_name())
            .join(id.ion.as_str())
            .join(file_name)
    }

    /// Sidecar marker path for an artifact.
    pub fn marker_path(&self, id: &ArtifactId) -> PathBuf {
        append_suffix(&self.artifact_path(id), CacheConfig::MARKER_SUFFIX)
    }

    /// In-progress download path. Never a valid final path.
    pub fn temp_path(&self, id: &ArtifactId) -> PathBuf {
        append_suffix(&self.artifact_path(id), CacheConfig::TEMP_SUFFIX)
    }

    /// Enumerate committed entries.
    ///
    /// Walks the root for sidecar markers and admits an entry only when its
    /// data file exists at the identity-derived path with the recorded byte
    /// count. Partials, sidecar-less files and stale markers are skipped.
    /// Output is sorted by artifact id, independent of filesystem
    /// enumeration order.
    pub fn scan(&self) -> Result<Vec<ArtifactMeta>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(CacheConfig::MARKER_SUFFIX) {
                continue;
            }

            let marker: CommitMarker = match fsutil::atomic_read_json(entry.path()) {
                Ok(Some(marker)) => marker,
                Ok(None) => continue,
                Err(err) => {
                    warn!("Skipping unreadable marker {}: {}", entry.path().display(), err);
                    continue;
                }
            };

            let data_path = self.artifact_path(&marker.id);
            let on_disk_len = match fs::metadata(&data_path) {
                Ok(meta) => meta.len(),
                Err(_) => {
                    warn!(
                        "Marker without data file, ignoring: {}",
                        entry.path().display()
                    );
                    continue;
                }
            };
            if on_disk_len != marker.size {
                warn!(
                    "Marker disagrees with data file ({} vs {} bytes), ignoring: {}",
                    marker.size,
                    on_disk_len,
                    data_path.display()
                );
                continue;
            }

            entries.push(ArtifactMeta {
                id: marker.id,
                size: marker.size,
                fingerprint: marker.fingerprint,
                download_ref: String::new(),
                params: Default::default(),
            });
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("Cache scan found {} committed entries", entries.len());
        Ok(entries)
    }

    /// Exact-match check on id AND fingerprint. A local file with a stale
    /// fingerprint counts as absent; it stays readable until the
    /// replacement commits over it.
    pub fn has(&self, id: &ArtifactId, fingerprint: &Fingerprint) -> bool {
        match self.committed_marker(id) {
            Some(marker) => marker.fingerprint == *fingerprint,
            None => false,
        }
    }

    /// Read a committed artifact for the visualization layer.
    ///
    /// `None` means "not yet synced". The same applies to files present on disk
    /// without a valid marker, which are indistinguishable from partial
    /// state to a reader.
    pub fn read_artifact(&self, id: &ArtifactId) -> Result<Option<Vec<u8>>> {
        if self.committed_marker(id).is_none() {
            return Ok(None);
        }
        let path = self.artifact_path(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SyncError::io_with_path(err, path)),
        }
    }

    /// Remove leftover `.part` files from interrupted runs. Returns the
    /// number removed.
    pub fn sweep_partials(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut removed = 0usize;
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(CacheConfig::TEMP_SUFFIX) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    removed += 1;
                    debug!("Removed stale partial {}", entry.path().display());
                }
                Err(err) => {
                    warn!(
                        "Failed to remove stale partial {}: {}",
                        entry.path().display(),
                        err
                    );
                }
            }
        }

        if removed > 0 {
            info!("Swept {} stale partial download(s)", removed);
        }
        Ok(removed)
    }

    /// Write the sidecar marker for a freshly committed artifact.
    pub fn commit_marker(&self, meta: &ArtifactMeta) -> Result<()> {
        let marker = CommitMarker {
            id: meta.id.clone(),
            size: meta.size,
            fingerprint: meta.fingerprint.clone(),
            committed_at: Utc::now().to_rfc3339(),
        };
        fsutil::atomic_write_json(&self.marker_path(&meta.id), &marker)
    }

    /// Marker for a committed entry, verified against the data file length.
    fn committed_marker(&self, id: &ArtifactId) -> Option<CommitMarker> {
        let marker: CommitMarker = fsutil::atomic_read_json(&self.marker_path(id)).ok()??;
        let data_len = fs::metadata(self.artifact_path(id)).ok()?.len();
        (data_len == marker.size).then_some(marker)
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}
