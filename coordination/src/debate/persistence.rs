//! Debate persistence: document store and per-problem snapshot contracts.
//!
//! Every artifact is written twice: appended to a named collection in a
//! [`DocumentStore`] (keyed by its artifact id) and mirrored as a JSON file by
//! a [`SnapshotWriter`] under `<problem_id>/<stage_dir>/<name>.json`. Write
//! failures never fail a session; they come back as [`PersistenceWarning`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use super::trail::AuditTrail;

/// Schema version stamped onto every stored document.
pub const DOCUMENT_SCHEMA_VERSION: u32 = 1;

/// Named, append-only document collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    Runs,
    RoleAssessments,
    Solutions,
    SolutionReviews,
    RefinedSolutions,
    FinalJudgements,
    AnswerCorrectness,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Self::Runs,
        Self::RoleAssessments,
        Self::Solutions,
        Self::SolutionReviews,
        Self::RefinedSolutions,
        Self::FinalJudgements,
        Self::AnswerCorrectness,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Runs => "Runs",
            Self::RoleAssessments => "RoleAssessments",
            Self::Solutions => "Solutions",
            Self::SolutionReviews => "SolutionReviews",
            Self::RefinedSolutions => "RefinedSolutions",
            Self::FinalJudgements => "FinalJudgements",
            Self::AnswerCorrectness => "AnswerCorrectness",
        }
    }

    /// Directory under a problem's snapshot root.
    pub fn snapshot_dir(self) -> &'static str {
        match self {
            Self::Runs => "runs",
            Self::RoleAssessments => "role_assessments",
            Self::Solutions => "solutions",
            Self::SolutionReviews => "reviews",
            Self::RefinedSolutions => "refined_solutions",
            Self::FinalJudgements => "final_judgement",
            Self::AnswerCorrectness => "answer_correctness",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Error during a single persistence write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Document could not be serialized.
    SerializeFailed { reason: String },
    /// Filesystem write failed.
    Io { path: String, reason: String },
    /// Backend (database, remote store) rejected the write.
    Backend { reason: String },
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializeFailed { reason } => write!(f, "serialize failed: {}", reason),
            Self::Io { path, reason } => write!(f, "write to {} failed: {}", path, reason),
            Self::Backend { reason } => write!(f, "backend error: {}", reason),
        }
    }
}

impl std::error::Error for PersistenceError {}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append `document` to `collection`. Appending an id that already exists
    /// must not overwrite it.
    async fn append(
        &self,
        collection: Collection,
        document_id: &str,
        document: &Value,
    ) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait SnapshotWriter: Send + Sync {
    async fn write_snapshot(
        &self,
        problem_id: &str,
        collection: Collection,
        name: &str,
        document: &Value,
    ) -> Result<(), PersistenceError>;
}

/// Which side of a dual write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteTarget {
    Store,
    Snapshot,
}

/// Non-fatal persistence failure attached to a session result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceWarning {
    pub target: WriteTarget,
    pub collection: Collection,
    pub document_id: String,
    pub message: String,
}

/// One serialized artifact ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDocument {
    pub collection: Collection,
    pub document_id: String,
    /// File stem for the snapshot copy.
    pub snapshot_name: String,
    pub body: Value,
}

impl ArtifactDocument {
    pub fn new<T: Serialize>(
        collection: Collection,
        document_id: impl Into<String>,
        snapshot_name: impl Into<String>,
        artifact: &T,
    ) -> Result<Self, PersistenceError> {
        let mut body = serde_json::to_value(artifact).map_err(|e| {
            PersistenceError::SerializeFailed {
                reason: e.to_string(),
            }
        })?;
        if let Value::Object(map) = &mut body {
            map.insert("schema_version".into(), DOCUMENT_SCHEMA_VERSION.into());
        }
        Ok(Self {
            collection,
            document_id: document_id.into(),
            snapshot_name: snapshot_name.into(),
            body,
        })
    }
}

/// Documents for every artifact in `trail`, in stage order.
pub fn trail_documents(trail: &AuditTrail) -> Result<Vec<ArtifactDocument>, PersistenceError> {
    let mut docs = Vec::with_capacity(trail.artifact_count());
    for a in &trail.role_assessments {
        docs.push(ArtifactDocument::new(
            Collection::RoleAssessments,
            &a.assessment_id,
            a.agent_id.as_str(),
            a,
        )?);
    }
    for s in &trail.solutions {
        docs.push(ArtifactDocument::new(
            Collection::Solutions,
            &s.solution_id,
            s.solver_id.as_str(),
            s,
        )?);
    }
    for r in &trail.reviews {
        docs.push(ArtifactDocument::new(
            Collection::SolutionReviews,
            &r.review_id,
            format!("{}_reviews_{}", r.reviewer_id, r.subject_id),
            r,
        )?);
    }
    for r in &trail.refinements {
        docs.push(ArtifactDocument::new(
            Collection::RefinedSolutions,
            &r.refined_solution_id,
            r.solver_id.as_str(),
            r,
        )?);
    }
    if let Some(j) = &trail.judgement {
        docs.push(ArtifactDocument::new(
            Collection::FinalJudgements,
            &j.judgement_id,
            j.judge_id.as_str(),
            j,
        )?);
    }
    Ok(docs)
}

/// Writes artifact documents to a store and a snapshot writer, collecting
/// failures as warnings.
#[derive(Clone)]
pub struct ArtifactRecorder {
    store: Arc<dyn DocumentStore>,
    snapshots: Arc<dyn SnapshotWriter>,
}

impl ArtifactRecorder {
    pub fn new(store: Arc<dyn DocumentStore>, snapshots: Arc<dyn SnapshotWriter>) -> Self {
        Self { store, snapshots }
    }

    /// Store writes only; snapshots are discarded.
    pub fn store_only(store: Arc<dyn DocumentStore>) -> Self {
        Self::new(store, Arc::new(DiscardSnapshots))
    }

    async fn record_one(
        &self,
        problem_id: &str,
        doc: &ArtifactDocument,
    ) -> Vec<PersistenceWarning> {
        let (stored, snapped) = tokio::join!(
            self.store
                .append(doc.collection, &doc.document_id, &doc.body),
            self.snapshots
                .write_snapshot(problem_id, doc.collection, &doc.snapshot_name, &doc.body),
        );

        let mut warnings = Vec::new();
        for (target, result) in [(WriteTarget::Store, stored), (WriteTarget::Snapshot, snapped)] {
            if let Err(e) = result {
                warn!(
                    problem_id,
                    collection = %doc.collection,
                    document_id = %doc.document_id,
                    ?target,
                    error = %e,
                    "persistence write failed"
                );
                warnings.push(PersistenceWarning {
                    target,
                    collection: doc.collection,
                    document_id: doc.document_id.clone(),
                    message: e.to_string(),
                });
            }
        }
        warnings
    }

    /// Write all documents concurrently. Never fails; returns one warning per
    /// failed write.
    pub async fn record_all(
        &self,
        problem_id: &str,
        docs: &[ArtifactDocument],
    ) -> Vec<PersistenceWarning> {
        futures::future::join_all(docs.iter().map(|doc| self.record_one(problem_id, doc)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Snapshot writer that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSnapshots;

#[async_trait]
impl SnapshotWriter for DiscardSnapshots {
    async fn write_snapshot(
        &self,
        _problem_id: &str,
        _collection: Collection,
        _name: &str,
        _document: &Value,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// In-process store for tests and dry runs. Also records snapshot paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<(Collection, String), Value>>,
    snapshots: Mutex<Vec<String>>,
    fail_with: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every write fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::default()
        }
    }

    pub async fn count(&self, collection: Collection) -> usize {
        self.documents
            .lock()
            .await
            .keys()
            .filter(|(c, _)| *c == collection)
            .count()
    }

    pub async fn documents(&self, collection: Collection) -> Vec<Value> {
        self.documents
            .lock()
            .await
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub async fn get(&self, collection: Collection, document_id: &str) -> Option<Value> {
        self.documents
            .lock()
            .await
            .get(&(collection, document_id.to_string()))
            .cloned()
    }

    /// Snapshot paths written so far, as `<problem>/<dir>/<name>.json`.
    pub async fn snapshot_paths(&self) -> Vec<String> {
        self.snapshots.lock().await.clone()
    }

    fn check_failure(&self) -> Result<(), PersistenceError> {
        match &self.fail_with {
            Some(reason) => Err(PersistenceError::Backend {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn append(
        &self,
        collection: Collection,
        document_id: &str,
        document: &Value,
    ) -> Result<(), PersistenceError> {
        self.check_failure()?;
        self.documents
            .lock()
            .await
            .entry((collection, document_id.to_string()))
            .or_insert_with(|| document.clone());
        Ok(())
    }
}

#[async_trait]
impl SnapshotWriter for MemoryStore {
    async fn write_snapshot(
        &self,
        problem_id: &str,
        collection: Collection,
        name: &str,
        _document: &Value,
    ) -> Result<(), PersistenceError> {
        self.check_failure()?;
        self.snapshots.lock().await.push(format!(
            "{}/{}/{}.json",
            problem_id,
            collection.snapshot_dir(),
            name
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str) -> ArtifactDocument {
        ArtifactDocument::new(Collection::Solutions, id, "solver-a", &json!({"answer": "42"}))
            .unwrap()
    }

    #[test]
    fn documents_carry_schema_version() {
        let d = doc("s1");
        assert_eq!(d.body["schema_version"], DOCUMENT_SCHEMA_VERSION);
        assert_eq!(d.body["answer"], "42");
    }

    #[test]
    fn collection_names_and_dirs() {
        assert_eq!(Collection::SolutionReviews.name(), "SolutionReviews");
        assert_eq!(Collection::SolutionReviews.snapshot_dir(), "reviews");
        assert_eq!(Collection::ALL.len(), 7);
    }

    #[tokio::test]
    async fn memory_store_keeps_first_write_per_id() {
        let store = MemoryStore::new();
        store.append(Collection::Runs, "r1", &json!({"v": 1})).await.unwrap();
        store.append(Collection::Runs, "r1", &json!({"v": 2})).await.unwrap();
        assert_eq!(store.count(Collection::Runs).await, 1);
        assert_eq!(store.get(Collection::Runs, "r1").await.unwrap()["v"], 1);
    }

    #[tokio::test]
    async fn recorder_writes_store_and_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let recorder = ArtifactRecorder::new(store.clone(), store.clone());
        let warnings = recorder.record_all("p-1", &[doc("s1"), doc("s2")]).await;
        assert!(warnings.is_empty());
        assert_eq!(store.count(Collection::Solutions).await, 2);
        assert_eq!(
            store.snapshot_paths().await,
            vec!["p-1/solutions/solver-a.json", "p-1/solutions/solver-a.json"]
        );
    }

    #[tokio::test]
    async fn recorder_turns_failures_into_warnings() {
        let failing = Arc::new(MemoryStore::failing("disk full"));
        let recorder = ArtifactRecorder::store_only(failing);
        let warnings = recorder.record_all("p-1", &[doc("s1")]).await;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].target, WriteTarget::Store);
        assert_eq!(warnings[0].document_id, "s1");
        assert!(warnings[0].message.contains("disk full"));
    }
}
