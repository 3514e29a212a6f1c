//! Multiplet Sync - background synchronization and local cache management
//! for simulation datasets.
//!
//! The dashboard's visualization pages read simulation result files
//! (lattice and single-site multiplet models) straight from a local cache
//! directory. This crate keeps that cache current: it diffs the remote
//! catalog against the committed local entries, downloads what's missing on
//! a bounded worker pool, and commits each file with an atomic rename so a
//! concurrent reader never observes a partial artifact.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use multiplet_sync::{
//!     HttpRemoteStore, IonFamily, ModelKind, SyncConfig, SyncRequest, SyncSession,
//! };
//!
//! #[tokio::main]
//! async fn main() -> multiplet_sync::Result<()> {
//!     let config = SyncConfig::new("https://store.example.org/simdata/".parse().unwrap())
//!         .with_credential_path("service_account.json");
//!     let store = Arc::new(HttpRemoteStore::from_config(&config)?);
//!     let session = SyncSession::new(store, &config);
//!
//!     let mut updates = session.subscribe();
//!     session.start(SyncRequest::new(ModelKind::Lattice, [IonFamily::ThreeD]))?;
//!
//!     while updates.changed().await.is_ok() {
//!         let snapshot = updates.borrow().clone();
//!         println!("{:?}: {}/{}", snapshot.phase, snapshot.committed_tasks, snapshot.total_tasks);
//!         if snapshot.phase.is_terminal() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod plan;
pub mod session;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use cache::{CacheIndex, CommitMarker};
pub use cancel::CancellationToken;
pub use catalog::{
    ArtifactId, ArtifactMeta, ByteStream, DatasetKey, Fingerprint, HttpRemoteStore, IonFamily,
    ModelKind, RemoteStore,
};
pub use config::SyncConfig;
pub use error::{FailureKind, Result, SyncError};
pub use plan::{compute_plan, DownloadPlan, PlanGroup};
pub use session::{SyncPhase, SyncRequest, SyncSession, SyncSnapshot, TaskFailure};
pub use transfer::{TransferEvent, TransferReport};
