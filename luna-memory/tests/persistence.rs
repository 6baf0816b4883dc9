use std::fs;

use luna_memory::{
    EmbeddingVector, MemoryId, MemoryMetadata, MemoryRecord, StoreConfig, VectorStorage,
    VectorStore,
};
use serde_json::{Value, json};

fn vector(values: &[f32]) -> EmbeddingVector {
    EmbeddingVector::from_slice(values).unwrap()
}

fn config(path: &std::path::Path) -> StoreConfig {
    StoreConfig::new(path).with_autosave(false)
}

fn add_fact(store: &VectorStore, text: &str, values: &[f32]) -> MemoryId {
    let id = MemoryId::generate();
    store
        .add(id.clone(), text, vector(values), "fact", MemoryMetadata::default())
        .unwrap();
    id
}

#[test]
fn records_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memories.json");
    let id = MemoryId::generate();
    let metadata = MemoryMetadata::default()
        .with_category("preference")
        .with_importance(0.75)
        .with_extra("mood", json!("calm"));

    {
        let store = VectorStore::open(config(&path)).unwrap();
        store
            .add(
                id.clone(),
                "likes rainy mornings",
                vector(&[0.6, 0.8, 0.0]),
                "preference",
                metadata.clone(),
            )
            .unwrap();
        add_fact(&store, "owns a bicycle", &[0.0, 0.0, 1.0]);
        store.stop();
    }

    let reopened = VectorStore::open(config(&path)).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.dimension(), Some(3));

    let record = reopened.get(&id).unwrap();
    assert_eq!(record.text(), "likes rainy mornings");
    assert_eq!(record.source(), "preference");
    assert_eq!(record.metadata(), &metadata);
    assert_eq!(record.vector(), &vector(&[0.6, 0.8, 0.0]));

    let hits = reopened.search(&vector(&[0.6, 0.8, 0.0]), 1);
    assert_eq!(hits[0].id, id);
    assert!((hits[0].similarity - 1.0).abs() < 1e-6);
}

#[test]
fn snapshot_document_carries_count_and_update_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memories.json");
    let store = VectorStore::open(config(&path)).unwrap();
    add_fact(&store, "alpha", &[1.0, 0.0]);
    assert!(store.flush(false));

    let document: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(document["count"], 1);
    assert_eq!(document["memories"][0]["text"], "alpha");
    assert_eq!(document["memories"][0]["source"], "fact");
    assert!(document["last_updated"].is_string());
}

#[test]
fn legacy_documents_load_into_a_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.json");
    fs::write(
        &path,
        json!([
            {
                "id": "a",
                "text": "first",
                "source": "fact",
                "timestamp": "2024-03-01T10:00:00",
                "metadata": {"frequency": 2.0},
                "vector": [1.0, 0.0]
            },
            {"id": "broken"},
            {
                "id": "b",
                "text": "second",
                "timestamp": "2024-03-02T10:00:00",
                "vector": [0.0, 1.0]
            }
        ])
        .to_string(),
    )
    .unwrap();

    let store = VectorStore::open(config(&path)).unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.get_stats().matrix_shape, (2, 2));
    let first = store.get(&"a".parse().unwrap()).unwrap();
    assert_eq!(first.metadata().frequency, 2);

    let storage = VectorStorage::load(&path, None);
    assert_eq!(storage.len(), 2);
    assert!(!storage.is_dirty());
}

#[test]
fn unreadable_files_start_empty_and_are_replaced_on_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.json");
    fs::write(&path, "{ definitely not json").unwrap();

    let store = VectorStore::open(config(&path)).unwrap();
    assert!(store.is_empty());
    add_fact(&store, "fresh start", &[1.0]);
    store.stop();

    let document: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(document["count"], 1);
}

#[test]
fn reopening_with_a_new_dimension_keeps_the_old_records_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    {
        let store = VectorStore::open(config(&path)).unwrap();
        add_fact(&store, "embedded by the old model", &[0.0, 0.6, 0.8]);
        store.stop();
    }

    {
        let store = VectorStore::open(config(&path).with_dimension(4)).unwrap();
        assert!(store.is_empty());
        assert!(!store.get_stats().pending_flush);
        store.stop();
    }

    let document: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(document["count"], 1);
    assert_eq!(document["memories"][0]["text"], "embedded by the old model");
    assert_eq!(document["memories"][0]["vector"].as_array().unwrap().len(), 3);
}

#[test]
fn index_tracks_storage_through_mixed_operations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mixed.json");
    let store = VectorStore::open(config(&path)).unwrap();
    let mut ids = Vec::new();
    for i in 0..12_u8 {
        let angle = f32::from(i) * 0.5;
        let text = format!("memory {i}");
        ids.push(add_fact(&store, &text, &[angle.cos(), angle.sin(), 0.25]));
    }
    for id in ids.iter().step_by(3) {
        assert!(store.delete(id));
    }
    store.increment_frequency(&ids[1]);

    let stats = store.get_stats();
    assert_eq!(stats.records, 8);
    assert_eq!(stats.matrix_shape, (8, 3));

    // Every surviving record is its own nearest neighbour.
    for record in store.records() {
        let hits = store.search(record.vector(), 1);
        assert_eq!(&hits[0].id, record.id());
    }
    assert_eq!(store.search(&vector(&[1.0, 0.0, 0.0]), 100).len(), 8);

    let before = store.records();
    store.stop();
    drop(store);

    let reopened = VectorStore::open(config(&path)).unwrap();
    let after = reopened.records();
    let summary = |records: &[MemoryRecord]| {
        records
            .iter()
            .map(|record| {
                (
                    record.id().clone(),
                    record.text().to_owned(),
                    record.vector().clone(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(summary(&after), summary(&before));
    assert_eq!(reopened.get(&ids[1]).unwrap().metadata().frequency, 1);
    assert_eq!(reopened.get_stats().matrix_shape, (8, 3));
    for record in &after {
        assert_eq!(&reopened.search(record.vector(), 1)[0].id, record.id());
    }
}
