//! Centralized configuration for the sync manager.
//!
//! Constant blocks hold the fixed network/cache parameters; `SyncConfig`
//! carries the per-deployment knobs (cache root, catalog endpoint,
//! credential file, worker count).

use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    /// Catalog queries are a single attempt within this bound; retry policy
    /// belongs to the caller.
    pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);
    /// Covers connection setup and response headers. Download bodies stream
    /// without a total deadline.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DOWNLOAD_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);
    pub const DEFAULT_CONCURRENCY: usize = 4;
}

/// Cache directory layout.
pub struct CacheConfig;

impl CacheConfig {
    /// Suffix for in-progress downloads. Never a valid final path; scans
    /// skip it and `sweep_partials` removes leftovers.
    pub const TEMP_SUFFIX: &'static str = ".part";
    /// Suffix of the JSON sidecar recording a committed entry's fingerprint.
    pub const MARKER_SUFFIX: &'static str = ".sync.json";
    /// Per-model subtree suffix, e.g. `lat_data/`.
    pub const DATA_DIR_SUFFIX: &'static str = "_data";
}

/// UI-facing update pacing.
pub struct UiConfig;

impl UiConfig {
    /// Minimum interval between snapshot publications. Phase changes and
    /// terminal states publish immediately.
    pub const SNAPSHOT_MIN_INTERVAL: Duration = Duration::from_millis(250);
}

/// Per-deployment sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root of the local artifact cache.
    pub cache_root: PathBuf,
    /// Base URL of the remote catalog/store.
    pub catalog_base: Url,
    /// Path to the provisioned service credential file, if the store
    /// requires authentication.
    pub credential_path: Option<PathBuf>,
    /// Download worker count.
    pub concurrency: usize,
}

impl SyncConfig {
    pub fn new(catalog_base: Url) -> Self {
        Self {
            cache_root: Self::default_cache_root(),
            catalog_base,
            credential_path: None,
            concurrency: NetworkConfig::DEFAULT_CONCURRENCY,
        }
    }

    /// Default cache root under the platform data directory.
    pub fn default_cache_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("multiplet-dashboard")
            .join("data")
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    pub fn with_credential_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_path = Some(path.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}
