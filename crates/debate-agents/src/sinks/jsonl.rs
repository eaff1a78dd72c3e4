//! Append-only JSONL document store: one `<Collection>.jsonl` file per collection.
//!
//! Each line is `{"_id": <document id>, "document": {...}}`. Appends are
//! serialized through one mutex so concurrent sessions never interleave
//! partial lines. Ids already present on disk are loaded at open time, so a
//! re-run into the same directory keeps the first write of every id.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use coordination::debate::{Collection, DocumentStore, PersistenceError};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct JsonlDocumentStore {
    dir: PathBuf,
    seen: Mutex<HashMap<Collection, HashSet<String>>>,
}

fn io_error(path: &Path, e: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

impl JsonlDocumentStore {
    /// Create `dir` if needed and index the ids already stored there.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let mut seen = HashMap::new();
        for collection in Collection::ALL {
            let path = collection_path(&dir, collection);
            let ids = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => existing_ids(&path, &raw),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
                Err(e) => return Err(io_error(&path, e)),
            };
            seen.insert(collection, ids);
        }

        Ok(Self {
            dir,
            seen: Mutex::new(seen),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, collection: Collection) -> PathBuf {
        collection_path(&self.dir, collection)
    }
}

fn collection_path(dir: &Path, collection: Collection) -> PathBuf {
    dir.join(format!("{}.jsonl", collection.name()))
}

fn existing_ids(path: &Path, raw: &str) -> HashSet<String> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(value) => value["_id"].as_str().map(str::to_string),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable line");
                None
            }
        })
        .collect()
}

#[async_trait]
impl DocumentStore for JsonlDocumentStore {
    async fn append(
        &self,
        collection: Collection,
        document_id: &str,
        document: &Value,
    ) -> Result<(), PersistenceError> {
        let line = serde_json::to_string(&json!({ "_id": document_id, "document": document }))
            .map_err(|e| PersistenceError::SerializeFailed {
                reason: e.to_string(),
            })?;

        let mut seen = self.seen.lock().await;
        let ids = seen.entry(collection).or_default();
        if ids.contains(document_id) {
            debug!(%collection, document_id, "document already stored");
            return Ok(());
        }

        let path = self.path_of(collection);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| io_error(&path, e))?;
        file.flush().await.map_err(|e| io_error(&path, e))?;

        ids.insert(document_id.to_string());
        Ok(())
    }
}
