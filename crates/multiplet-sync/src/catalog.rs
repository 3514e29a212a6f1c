//! Remote catalog client and the artifact domain model.
//!
//! The remote store publishes a JSON manifest of simulation result files
//! per model kind, each entry carrying a fingerprint used to decide whether
//! the local copy is current. `RemoteStore` is the seam between the sync
//! core and the actual transport; `HttpRemoteStore` is the production
//! implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;
use url::Url;

use crate::config::{CacheConfig, NetworkConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::fsutil;

/// Simulation model families served by the dashboard.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ModelKind {
    /// Lattice model results, stored as HDF5 files.
    #[serde(rename = "lat")]
    Lattice,
    /// Single-site model results, stored as bare numeric dumps.
    #[serde(rename = "ss")]
    SingleSite,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Lattice => "lat",
            ModelKind::SingleSite => "ss",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "lat" => Some(ModelKind::Lattice),
            "ss" => Some(ModelKind::SingleSite),
            _ => None,
        }
    }

    /// File extension of committed artifacts, if the model uses one.
    pub fn file_extension(&self) -> Option<&'static str> {
        match self {
            ModelKind::Lattice => Some("hdf5"),
            ModelKind::SingleSite => None,
        }
    }

    /// Name of the per-model cache subtree, e.g. `lat_data`.
    pub fn data_dir_name(&self) -> String {
        format!("{}{}", self.as_str(), CacheConfig::DATA_DIR_SUFFIX)
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// d¹ ion series the dashboard filters on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum IonFamily {
    #[serde(rename = "3d_d1")]
    ThreeD,
    #[serde(rename = "4d_d1")]
    FourD,
    #[serde(rename = "5d_d1")]
    FiveD,
}

impl IonFamily {
    pub const ALL: [IonFamily; 3] = [IonFamily::ThreeD, IonFamily::FourD, IonFamily::FiveD];

    pub fn as_str(&self) -> &'static str {
        match self {
            IonFamily::ThreeD => "3d_d1",
            IonFamily::FourD => "4d_d1",
            IonFamily::FiveD => "5d_d1",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "3d_d1" => Some(IonFamily::ThreeD),
            "4d_d1" => Some(IonFamily::FourD),
            "5d_d1" => Some(IonFamily::FiveD),
            _ => None,
        }
    }
}

impl std::fmt::Display for IonFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable identifier of one simulation result file. Immutable once issued.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ArtifactId {
    pub model: ModelKind,
    pub ion: IonFamily,
    /// Result variant, e.g. the run timestamp stem `171203_1430`.
    pub variant: String,
}

impl ArtifactId {
    pub fn new(model: ModelKind, ion: IonFamily, variant: impl Into<String>) -> Self {
        Self {
            model,
            ion,
            variant: variant.into(),
        }
    }

    pub fn dataset(&self) -> DatasetKey {
        DatasetKey {
            model: self.model,
            ion: self.ion,
        }
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.model, self.ion, self.variant)
    }
}

/// Logical dataset grouping: model kind × ion family. One cache subtree
/// and one UI progress group per key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DatasetKey {
    pub model: ModelKind,
    pub ion: IonFamily,
}

impl DatasetKey {
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.model, self.ion)
    }
}

/// Value deciding whether a local and remote copy are the same bytes.
///
/// Content checksum when the store can provide one; size plus upstream
/// modification token otherwise. Compared structurally, so a scheme change
/// counts as a mismatch and triggers a re-fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fingerprint {
    Sha256 { hex: String },
    SizeMtime { size: u64, mtime: String },
}

impl Fingerprint {
    pub fn sha256(hex: impl Into<String>) -> Self {
        Fingerprint::Sha256 {
            hex: hex.into().to_lowercase(),
        }
    }

    pub fn size_mtime(size: u64, mtime: impl Into<String>) -> Self {
        Fingerprint::SizeMtime {
            size,
            mtime: mtime.into(),
        }
    }
}

/// One catalog entry: identity, expected size, fingerprint, where to fetch
/// it, and the declared simulation parameters shown in the UI tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub id: ArtifactId,
    /// Declared size in bytes; transfers are verified against it.
    pub size: u64,
    pub fingerprint: Fingerprint,
    /// Store-relative download reference. Empty on locally-scanned entries.
    #[serde(default)]
    pub download_ref: String,
    /// Simulation parameters (N, U, J, lbd, g, t, B, ...), passed through
    /// to the UI untouched.
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

/// Streamed artifact body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Seam between the sync core and the remote store transport.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Query the catalog for artifacts of one model kind, optionally
    /// restricted to the given ion families. Single attempt, bounded
    /// timeout; fails with `CatalogUnavailable`. Read-only.
    async fn list_available(
        &self,
        model: ModelKind,
        ions: &[IonFamily],
    ) -> Result<Vec<ArtifactMeta>>;

    /// Open a byte stream for one artifact body.
    async fn fetch(&self, artifact: &ArtifactMeta) -> Result<ByteStream>;
}

#[derive(Debug, Deserialize)]
struct CatalogManifest {
    artifacts: Vec<ArtifactMeta>,
}

/// Pre-provisioned service credential. Lifecycle (issuance, rotation) is
/// owned outside this crate.
#[derive(Debug, Deserialize)]
struct ServiceCredential {
    token: String,
}

/// HTTP implementation of `RemoteStore` over the dashboard's data store.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base,
            token: None,
        })
    }

    /// Build a store from deployment configuration, loading the service
    /// credential file when one is configured.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let mut store = Self::new(config.catalog_base.clone())?;
        if let Some(ref path) = config.credential_path {
            store = store.with_credential_file(path)?;
        }
        Ok(store)
    }

    pub fn with_credential_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let credential: ServiceCredential =
            fsutil::atomic_read_json(path)?.ok_or_else(|| SyncError::Config {
                message: format!("Credential file not found: {}", path.display()),
            })?;
        self.token = Some(credential.token);
        Ok(self)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list_available(
        &self,
        model: ModelKind,
        ions: &[IonFamily],
    ) -> Result<Vec<ArtifactMeta>> {
        let mut url = self
            .base
            .join(&format!("catalog/{}", model.as_str()))
            .map_err(|e| SyncError::Config {
                message: format!("Invalid catalog URL: {}", e),
            })?;

        if !ions.is_empty() {
            let filter = ions
                .iter()
                .map(IonFamily::as_str)
                .collect::<Vec<_>>()
                .join(",");
            url.query_pairs_mut().append_pair("ions", &filter);
        }

        let response = self
            .authorize(self.client.get(url.clone()))
            .timeout(NetworkConfig::CATALOG_TIMEOUT)
            .send()
            .await
            .map_err(|e| SyncError::CatalogUnavailable {
                message: format!("Catalog query failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::CatalogUnavailable {
                message: format!("HTTP {} from {}", status, url),
            });
        }

        let manifest: CatalogManifest =
            response
                .json()
                .await
                .map_err(|e| SyncError::CatalogUnavailable {
                    message: format!("Malformed catalog manifest: {}", e),
                })?;

        // The server already filters; re-apply locally so a lax deployment
        // cannot widen the requested scope.
        Ok(manifest
            .artifacts
            .into_iter()
            .filter(|a| a.id.model == model && (ions.is_empty() || ions.contains(&a.id.ion)))
            .collect())
    }

    async fn fetch(&self, artifact: &ArtifactMeta) -> Result<ByteStream> {
        let url = self
            .base
            .join(&artifact.download_ref)
            .map_err(|e| SyncError::Config {
                message: format!("Invalid download reference for {}: {}", artifact.id, e),
            })?;

        let response = self.authorize(self.client.get(url.clone())).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::DownloadFailed {
                url: url.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| SyncError::Network {
                message: format!("Download stream error: {}", e),
                source: Some(e),
            })
        });

        Ok(Box::pin(stream))
    }
}
