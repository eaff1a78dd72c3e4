//! Document stores and snapshot writers selected by `[store]` config.

pub mod jsonl;
pub mod postgres;
pub mod snapshot;

use std::sync::Arc;

use anyhow::{Context, Result};
use coordination::debate::{
    ArtifactRecorder, DiscardSnapshots, DocumentStore, MemoryStore, SnapshotWriter,
};
use tracing::info;

use crate::config::{DebateConfig, StoreBackend};

pub use jsonl::JsonlDocumentStore;
pub use postgres::PostgresDocumentStore;
pub use snapshot::FileSnapshotWriter;

/// Subdirectory of `output_dir` holding the JSONL collections.
pub const JSONL_STORE_DIR: &str = "store";

/// Build the recorder for a run from the store settings.
pub async fn build_recorder(config: &DebateConfig) -> Result<ArtifactRecorder> {
    let output_dir = &config.run.output_dir;
    let store: Arc<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Jsonl => {
            let dir = output_dir.join(JSONL_STORE_DIR);
            Arc::new(
                JsonlDocumentStore::open(&dir)
                    .await
                    .with_context(|| format!("Failed to open JSONL store at {}", dir.display()))?,
            )
        }
        StoreBackend::Postgres => {
            let url = config
                .store
                .postgres_url
                .as_deref()
                .context("store.postgres_url is not set")?;
            Arc::new(
                PostgresDocumentStore::connect(url)
                    .await
                    .context("Failed to connect to postgres document store")?,
            )
        }
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };

    let snapshots: Arc<dyn SnapshotWriter> = if config.store.snapshots {
        Arc::new(FileSnapshotWriter::new(output_dir))
    } else {
        Arc::new(DiscardSnapshots)
    };

    info!(
        backend = ?config.store.backend,
        snapshots = config.store.snapshots,
        output_dir = %output_dir.display(),
        "persistence configured"
    );
    Ok(ArtifactRecorder::new(store, snapshots))
}
