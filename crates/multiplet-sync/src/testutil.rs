//! In-memory remote store for exercising the sync pipeline in tests.
//!
//! Serves artifact bodies in small chunks with scheduler yields between
//! them so concurrent readers and cancellation interleave realistically,
//! and records the high-water mark of simultaneously open fetch streams.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::{
    ArtifactId, ArtifactMeta, ByteStream, Fingerprint, IonFamily, ModelKind, RemoteStore,
};
use crate::error::{Result, SyncError};

#[derive(Clone)]
enum ServeMode {
    /// Serve these bytes (may disagree with the declared meta).
    Body(Bytes),
    /// Never-ending stream; only cancellation stops it.
    Endless,
}

#[derive(Clone)]
struct StoredArtifact {
    meta: ArtifactMeta,
    serve: ServeMode,
}

pub(crate) struct MemoryStore {
    inner: Mutex<HashMap<ArtifactId, StoredArtifact>>,
    chunk_size: usize,
    fail_listing: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_chunk_size(1024)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
            fail_listing: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register an artifact whose served bytes match its declared meta.
    pub fn insert(
        &self,
        model: ModelKind,
        ion: IonFamily,
        variant: &str,
        body: &[u8],
    ) -> ArtifactMeta {
        let meta = self.declared_meta(model, ion, variant, body);
        self.store(meta.clone(), ServeMode::Body(Bytes::copy_from_slice(body)));
        meta
    }

    /// Register an artifact that serves different bytes than declared.
    /// Equal lengths trip the checksum check; different lengths trip the
    /// byte-count check.
    pub fn insert_corrupt(
        &self,
        model: ModelKind,
        ion: IonFamily,
        variant: &str,
        declared_body: &[u8],
        served_body: &[u8],
    ) -> ArtifactMeta {
        let meta = self.declared_meta(model, ion, variant, declared_body);
        self.store(
            meta.clone(),
            ServeMode::Body(Bytes::copy_from_slice(served_body)),
        );
        meta
    }

    /// Register an artifact whose stream never ends.
    pub fn insert_endless(
        &self,
        model: ModelKind,
        ion: IonFamily,
        variant: &str,
        declared_size: u64,
    ) -> ArtifactMeta {
        let meta = ArtifactMeta {
            id: ArtifactId::new(model, ion, variant),
            size: declared_size,
            fingerprint: Fingerprint::sha256("00"),
            download_ref: format!("files/{}/{}", model.as_str(), variant),
            params: Default::default(),
        };
        self.store(meta.clone(), ServeMode::Endless);
        meta
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// High-water mark of simultaneously open fetch streams.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn declared_meta(
        &self,
        model: ModelKind,
        ion: IonFamily,
        variant: &str,
        body: &[u8],
    ) -> ArtifactMeta {
        ArtifactMeta {
            id: ArtifactId::new(model, ion, variant),
            size: body.len() as u64,
            fingerprint: Fingerprint::sha256(hex::encode(Sha256::digest(body))),
            download_ref: format!("files/{}/{}", model.as_str(), variant),
            params: Default::default(),
        }
    }

    fn store(&self, meta: ArtifactMeta, serve: ServeMode) {
        self.inner
            .lock()
            .unwrap()
            .insert(meta.id.clone(), StoredArtifact { meta, serve });
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_available(
        &self,
        model: ModelKind,
        ions: &[IonFamily],
    ) -> Result<Vec<ArtifactMeta>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(SyncError::CatalogUnavailable {
                message: "listing disabled".into(),
            });
        }

        let mut listed: Vec<ArtifactMeta> = self
            .inner
            .lock()
            .unwrap()
            .values()
            .map(|stored| stored.meta.clone())
            .filter(|m| m.id.model == model && (ions.is_empty() || ions.contains(&m.id.ion)))
            .collect();
        listed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listed)
    }

    async fn fetch(&self, artifact: &ArtifactMeta) -> Result<ByteStream> {
        let stored = self
            .inner
            .lock()
            .unwrap()
            .get(&artifact.id)
            .cloned()
            .ok_or_else(|| SyncError::DownloadFailed {
                url: artifact.download_ref.clone(),
                message: "HTTP 404".into(),
            })?;

        let guard = FlightGuard::new(self.in_flight.clone(), &self.max_in_flight);

        match stored.serve {
            ServeMode::Body(body) => {
                let chunks: Vec<Bytes> = body
                    .chunks(self.chunk_size)
                    .map(Bytes::copy_from_slice)
                    .collect();
                let stream = futures::stream::unfold(
                    (chunks.into_iter(), guard),
                    |(mut chunks, guard)| async move {
                        tokio::task::yield_now().await;
                        chunks.next().map(|c| (Ok(c), (chunks, guard)))
                    },
                );
                Ok(Box::pin(stream))
            }
            ServeMode::Endless => {
                const FILLER: [u8; 256] = [0u8; 256];
                let stream = futures::stream::unfold(guard, |guard| async move {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    Some((Ok(Bytes::from_static(&FILLER)), guard))
                });
                Ok(Box::pin(stream))
            }
        }
    }
}

/// Counts a fetch stream as in flight until it is dropped.
struct FlightGuard {
    counter: Arc<AtomicUsize>,
}

impl FlightGuard {
    fn new(counter: Arc<AtomicUsize>, max: &AtomicUsize) -> Self {
        let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(current, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
