//! File-backed persistence: JSONL collections and per-problem snapshots.

use std::sync::Arc;

use coordination::debate::persistence::ArtifactDocument;
use coordination::debate::{ArtifactRecorder, Collection, DocumentStore, SnapshotWriter};
use debate_agents::sinks::{FileSnapshotWriter, JsonlDocumentStore};
use serde_json::{json, Value};

fn lines(path: &std::path::Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn jsonl_store_appends_one_line_per_document() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonlDocumentStore::open(dir.path()).await.unwrap();

    store
        .append(Collection::Solutions, "s1", &json!({"answer": "42"}))
        .await
        .unwrap();
    store
        .append(Collection::Solutions, "s2", &json!({"answer": "41"}))
        .await
        .unwrap();
    store
        .append(Collection::Runs, "r1", &json!({"status": "completed"}))
        .await
        .unwrap();

    let solutions = lines(&dir.path().join("Solutions.jsonl"));
    assert_eq!(solutions.len(), 2);
    assert_eq!(solutions[0]["_id"], "s1");
    assert_eq!(solutions[1]["document"]["answer"], "41");
    assert_eq!(lines(&store.path_of(Collection::Runs)).len(), 1);
}

#[tokio::test]
async fn jsonl_store_keeps_first_write_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = JsonlDocumentStore::open(dir.path()).await.unwrap();
        store
            .append(Collection::FinalJudgements, "j1", &json!({"winner": "a"}))
            .await
            .unwrap();
        store
            .append(Collection::FinalJudgements, "j1", &json!({"winner": "b"}))
            .await
            .unwrap();
    }

    let reopened = JsonlDocumentStore::open(dir.path()).await.unwrap();
    reopened
        .append(Collection::FinalJudgements, "j1", &json!({"winner": "c"}))
        .await
        .unwrap();

    let docs = lines(&dir.path().join("FinalJudgements.jsonl"));
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["document"]["winner"], "a");
}

#[tokio::test]
async fn concurrent_appends_never_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonlDocumentStore::open(dir.path()).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let body = json!({"reasoning": "x".repeat(4096), "n": i});
            store
                .append(Collection::SolutionReviews, &format!("rev-{i}"), &body)
                .await
                .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let docs = lines(&dir.path().join("SolutionReviews.jsonl"));
    assert_eq!(docs.len(), 32);
}

#[tokio::test]
async fn snapshot_writer_mirrors_layout() {
    let dir = tempfile::tempdir().unwrap();
    let writer = FileSnapshotWriter::new(dir.path());
    writer
        .write_snapshot(
            "p-1",
            Collection::SolutionReviews,
            "a_reviews_b",
            &json!({"critique": "step 3 is wrong"}),
        )
        .await
        .unwrap();

    let path = dir.path().join("p-1/reviews/a_reviews_b.json");
    let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["critique"], "step 3 is wrong");
}

#[tokio::test]
async fn problem_ids_that_clean_alike_get_separate_directories() {
    let dir = tempfile::tempdir().unwrap();
    let writer = FileSnapshotWriter::new(dir.path());
    let ids = ["geo/12", "geo 12", "geo_12"];
    for id in ids {
        writer
            .write_snapshot(id, Collection::Solutions, "s1", &json!({"problem": id}))
            .await
            .unwrap();
    }

    for id in ids {
        let path = writer.path_for(id, Collection::Solutions, "s1");
        assert!(path.starts_with(dir.path()));
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["problem"], id);
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
}

#[tokio::test]
async fn recorder_warns_when_snapshot_root_is_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocked");
    std::fs::write(&blocker, "not a directory").unwrap();

    let store = Arc::new(JsonlDocumentStore::open(dir.path().join("store")).await.unwrap());
    let recorder = ArtifactRecorder::new(store, Arc::new(FileSnapshotWriter::new(&blocker)));
    let doc = ArtifactDocument::new(
        Collection::Solutions,
        "s1",
        "a",
        &json!({"answer": "42"}),
    )
    .unwrap();

    let warnings = recorder.record_all("p-1", &[doc]).await;
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].document_id, "s1");
    assert_eq!(
        lines(&dir.path().join("store/Solutions.jsonl")).len(),
        1,
        "store write still lands"
    );
}
