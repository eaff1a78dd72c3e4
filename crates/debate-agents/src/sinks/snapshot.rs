//! Per-problem JSON snapshots: `<root>/<problem_id>/<stage_dir>/<name>.json`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use coordination::debate::{Collection, PersistenceError, SnapshotWriter};
use regex::Regex;
use serde_json::Value;

static UNSAFE_PATH_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9._-]+").expect("UNSAFE_PATH_CHARS regex should compile")
});

/// Make `name` safe as a single path component.
///
/// Names that are already safe are kept as-is. Anything that had to change
/// gets `~` plus a short hash of the raw name, so distinct names never share
/// a component (`~` never survives cleaning).
pub fn sanitize_component(name: &str) -> String {
    let cleaned = UNSAFE_PATH_CHARS.replace_all(name.trim(), "_");
    let cleaned = if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".into()
    } else {
        cleaned
    };
    if cleaned == name {
        return cleaned.into_owned();
    }
    let digest = blake3::hash(name.as_bytes()).to_hex();
    format!("{cleaned}~{}", &digest[..12])
}

pub struct FileSnapshotWriter {
    root: PathBuf,
}

impl FileSnapshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, problem_id: &str, collection: Collection, name: &str) -> PathBuf {
        self.root
            .join(sanitize_component(problem_id))
            .join(collection.snapshot_dir())
            .join(format!("{}.json", sanitize_component(name)))
    }
}

#[async_trait]
impl SnapshotWriter for FileSnapshotWriter {
    async fn write_snapshot(
        &self,
        problem_id: &str,
        collection: Collection,
        name: &str,
        document: &Value,
    ) -> Result<(), PersistenceError> {
        let path = self.path_for(problem_id, collection, name);
        let io_error = |e: std::io::Error| PersistenceError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let json = serde_json::to_string_pretty(document).map_err(|e| {
            PersistenceError::SerializeFailed {
                reason: e.to_string(),
            }
        })?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(&path, json).await.map_err(io_error)
    }
}
