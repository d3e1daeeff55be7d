//! Two-phase semantic search behavior over a populated store.

use remora::db::{CommandRecord, CommandStore, EmbeddingStatus};
use remora::embeddings::vector::vector_to_bytes;

fn store_embedded(store: &CommandStore, command: &str, vector: &[f32]) -> i64 {
    let id = store
        .save_command_async(&CommandRecord::new(command))
        .unwrap();
    store
        .update_embedding_status(id, EmbeddingStatus::Completed, Some(&vector_to_bytes(vector)))
        .unwrap();
    id
}

#[test]
fn test_threshold_filters_and_results_sort_descending() {
    let store = CommandStore::open_in_memory().unwrap();
    store_embedded(&store, "git status", &[1.0, 0.0]);
    store_embedded(&store, "git diff", &[0.9, 0.1]);
    store_embedded(&store, "rm -rf target", &[0.0, 1.0]);

    let query = vector_to_bytes(&[1.0, 0.0]);
    let results = store.search_semantic("git", &query, 10, 0.5).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].record.command, "git status");
    assert_eq!(results[1].record.command, "git diff");
    assert!(results[0].similarity > results[1].similarity);
}

#[test]
fn test_limit_caps_result_count() {
    let store = CommandStore::open_in_memory().unwrap();
    for n in 0..5 {
        store_embedded(&store, &format!("echo step {n}"), &[1.0, 0.0]);
    }

    let query = vector_to_bytes(&[1.0, 0.0]);
    let results = store.search_semantic("echo", &query, 3, 0.5).unwrap();
    assert_eq!(results.len(), 3);
}

#[test]
fn test_rows_without_embeddings_are_invisible_to_semantic_search() {
    let store = CommandStore::open_in_memory().unwrap();
    store
        .save_command_async(&CommandRecord::new("htop"))
        .unwrap();

    let query = vector_to_bytes(&[1.0, 0.0]);
    let results = store.search_semantic("htop", &query, 10, 0.0).unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_query_unrelated_to_keywords_still_ranks_by_vector() {
    // Few FTS matches widens phase 1 to plain recency, so a keyword miss can
    // still surface via similarity.
    let store = CommandStore::open_in_memory().unwrap();
    store_embedded(&store, "kubectl get pods", &[0.8, 0.2]);

    let query = vector_to_bytes(&[0.8, 0.2]);
    let results = store
        .search_semantic("show running containers", &query, 10, 0.9)
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.command, "kubectl get pods");
}
