//! Snapshot durability and corruption detection.

mod common;

use std::fs;
use std::path::Path;

use common::{TestEmbedder, config, embed_text, open};
use knowbase_rag::{
    DocumentMetadata, PersistenceManager, PreparedDocument, RagError, RetrievalEngine, SimilarityMetric, StoreState,
};
use serde_json::Value;

fn prepared(id: &str, passages: &[&str]) -> PreparedDocument {
    PreparedDocument {
        document_id: id.to_string(),
        metadata: DocumentMetadata::new(format!("{id}.md"), "md").with_extra("team", "platform"),
        text: passages.join(" "),
        chunks: passages.iter().map(|p| (p.to_string(), embed_text(p))).collect(),
    }
}

fn populated_state() -> StoreState {
    let mut state = StoreState::new(common::DIM, SimilarityMetric::Cosine);
    state
        .apply_ingest(prepared("network", &["routers forward packets", "switches learn mac addresses"]))
        .unwrap();
    state.apply_ingest(prepared("storage", &["disks fail eventually", "raid mirrors blocks"])).unwrap();
    state.apply_ingest(prepared("cooking", &["simmer the stock for hours"])).unwrap();
    state.apply_delete("cooking").unwrap();
    state
}

fn edit_json(path: &Path, edit: impl FnOnce(&mut Value)) {
    let mut value: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    edit(&mut value);
    fs::write(path, serde_json::to_string(&value).unwrap()).unwrap();
}

#[test]
fn round_trip_preserves_contents_ids_and_ranking() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    let state = populated_state();
    assert_eq!(manager.save(&state).unwrap(), 1);

    let loaded = manager.load().unwrap().unwrap();
    assert_eq!(loaded.index(), state.index());
    assert_eq!(loaded.metadata(), state.metadata());
    assert_eq!(loaded.next_chunk_id(), state.next_chunk_id());

    for query in ["packet routing", "disk failure", "mac learning"] {
        let vector = embed_text(query);
        assert_eq!(loaded.search(&vector, 4, 0.0).unwrap(), state.search(&vector, 4, 0.0).unwrap());
    }
}

#[test]
fn each_save_commits_a_new_generation_and_drops_the_old_one() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    let mut state = populated_state();
    manager.save(&state).unwrap();
    state.apply_delete("storage").unwrap();
    assert_eq!(manager.save(&state).unwrap(), 2);

    assert_eq!(manager.current_generation().unwrap(), Some(2));
    assert!(!dir.path().join("index-1.json").exists());
    assert!(!dir.path().join("metadata-1.json").exists());
    assert_eq!(manager.load().unwrap().unwrap().metadata().document_count(), 1);
}

#[test]
fn uncommitted_generation_is_invisible() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    let mut state = populated_state();
    manager.save(&state).unwrap();
    let committed = manager.load().unwrap().unwrap();

    state.apply_delete("network").unwrap();
    let staged = manager.stage(&state).unwrap();
    assert_eq!(staged.generation(), 2);
    // Simulate a crash between writing both artifacts and publishing them.
    drop(staged);

    let reloaded = manager.load().unwrap().unwrap();
    assert_eq!(reloaded.metadata(), committed.metadata());
    assert_eq!(reloaded.index(), committed.index());

    // The next save overwrites the abandoned generation and publishes it.
    assert_eq!(manager.save(&state).unwrap(), 2);
    assert!(!manager.load().unwrap().unwrap().metadata().contains_document("network"));
}

#[test]
fn leftover_temporary_files_are_ignored_and_cleaned() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    let state = populated_state();
    manager.save(&state).unwrap();
    fs::write(dir.path().join("index-2.json.tmp"), "{\"header\":").unwrap();
    fs::write(dir.path().join("CURRENT.tmp"), "{").unwrap();

    assert_eq!(manager.load().unwrap().unwrap().index(), state.index());
    manager.save(&state).unwrap();
    assert!(!dir.path().join("index-2.json.tmp").exists());
    assert!(!dir.path().join("CURRENT.tmp").exists());
}

#[test]
fn chunk_count_disagreeing_with_header_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    manager.save(&populated_state()).unwrap();

    for file in ["index-1.json", "metadata-1.json"] {
        edit_json(&dir.path().join(file), |v| v["header"]["chunk_count"] = Value::from(7));
    }
    assert!(matches!(manager.load(), Err(RagError::CorruptStore(_))));
}

#[test]
fn mismatched_headers_are_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    manager.save(&populated_state()).unwrap();

    edit_json(&dir.path().join("metadata-1.json"), |v| v["header"]["metric"] = Value::from("inner_product"));
    assert!(matches!(manager.load(), Err(RagError::CorruptStore(_))));
}

#[test]
fn truncated_artifact_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    manager.save(&populated_state()).unwrap();

    let path = dir.path().join("metadata-1.json");
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(manager.load(), Err(RagError::CorruptStore(_))));
}

#[test]
fn missing_artifact_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    manager.save(&populated_state()).unwrap();

    fs::remove_file(dir.path().join("index-1.json")).unwrap();
    assert!(matches!(manager.load(), Err(RagError::CorruptStore(_))));
}

#[test]
fn vector_of_wrong_length_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    manager.save(&populated_state()).unwrap();

    edit_json(&dir.path().join("index-1.json"), |v| {
        v["vectors"][0]["vector"].as_array_mut().unwrap().pop();
    });
    assert!(matches!(manager.load(), Err(RagError::CorruptStore(_))));
}

#[test]
fn vector_without_metadata_record_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    manager.save(&populated_state()).unwrap();

    edit_json(&dir.path().join("index-1.json"), |v| v["vectors"][0]["id"] = Value::from(999));
    assert!(matches!(manager.load(), Err(RagError::CorruptStore(_))));
}

#[tokio::test]
async fn engine_refuses_to_open_a_corrupt_store() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path(), TestEmbedder::new()).await;
    engine
        .ingest("notes", "a few words about nothing in particular", DocumentMetadata::new("notes.txt", "txt"))
        .await
        .unwrap();
    engine.close().await.unwrap();

    let store = dir.path().join("store");
    let generation = PersistenceManager::new(&store).current_generation().unwrap().unwrap();
    fs::write(store.join(format!("index-{generation}.json")), "not json").unwrap();

    let err = RetrievalEngine::open(config(dir.path()), TestEmbedder::new()).await.err().unwrap();
    assert!(matches!(err, RagError::CorruptStore(_)));
    // The damaged snapshot is left for inspection, not replaced.
    assert!(store.join(format!("index-{generation}.json")).exists());
}
