//! End-to-end indexing scenarios: fresh index, idempotent re-index,
//! delta re-index, and the empty-repo boundary.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::atomic::Ordering;

use common::{build_world, drain_queue, retention_file, seed_scenario_repo};
use regscan_rs::model::{DeltaType, JobStatus};

#[tokio::test]
async fn fresh_index_builds_the_code_map() {
    let world = build_world();
    seed_scenario_repo(&world);

    let job_id = world
        .service
        .request_index(world.repo.repo_id, None, None)
        .await
        .unwrap();
    drain_queue(&world).await;

    let job = world.service.job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // a.py contributes 1 chunk, b.py 5, c.md none
    let chunks = {
        let store = world.store.lock().await;
        store.chunks_for_repo(world.repo.repo_id).unwrap()
    };
    assert_eq!(chunks.len(), 6);
    assert!(chunks.iter().all(|c| c.embedding.is_some()));
    assert!(chunks.iter().all(|c| c.nl_summary.is_some()));
    assert!(chunks.iter().all(|c| c.delta_type == DeltaType::Added));

    let repo = {
        let store = world.store.lock().await;
        store.get_repo(world.repo.repo_id).unwrap().unwrap()
    };
    assert_eq!(repo.indexed_file_count, 2);
    assert_eq!(repo.total_chunks, 6);
    assert_eq!(repo.last_commit_sha.as_deref(), Some("c0ffee0"));

    // One embedding and one summary per chunk
    assert_eq!(world.embedder.calls.load(Ordering::SeqCst), 6);
    assert_eq!(world.llm.summary_calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn reindex_without_changes_is_idempotent() {
    let world = build_world();
    seed_scenario_repo(&world);

    world
        .service
        .request_index(world.repo.repo_id, None, None)
        .await
        .unwrap();
    drain_queue(&world).await;

    let before = {
        let store = world.store.lock().await;
        store.chunks_for_repo(world.repo.repo_id).unwrap()
    };
    let embed_calls = world.embedder.calls.load(Ordering::SeqCst);

    world
        .service
        .request_index(world.repo.repo_id, None, None)
        .await
        .unwrap();
    drain_queue(&world).await;

    let after = {
        let store = world.store.lock().await;
        store.chunks_for_repo(world.repo.repo_id).unwrap()
    };

    // No new rows, identical chunk IDs, everything unchanged
    assert_eq!(after.len(), 6);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.chunk_id, new.chunk_id);
        assert_eq!(old.chunk_hash, new.chunk_hash);
        assert_eq!(old.embedding, new.embedding);
    }
    assert!(after.iter().all(|c| c.delta_type == DeltaType::Unchanged));

    // No further provider calls: embeddings were retained
    assert_eq!(world.embedder.calls.load(Ordering::SeqCst), embed_calls);

    let repo = {
        let store = world.store.lock().await;
        store.get_repo(world.repo.repo_id).unwrap().unwrap()
    };
    assert_eq!(repo.last_commit_sha.as_deref(), Some("c0ffee0"));
    assert_eq!(repo.total_chunks, 6);
}

#[tokio::test]
async fn delta_reindex_touches_only_changed_files() {
    let world = build_world();
    seed_scenario_repo(&world);

    world
        .service
        .request_index(world.repo.repo_id, None, None)
        .await
        .unwrap();
    drain_queue(&world).await;

    let b_chunks_before: Vec<_> = {
        let store = world.store.lock().await;
        store.chunks_for_file(world.repo.repo_id, "b.py").unwrap()
    };

    // Add a second function to a.py and push a delta job
    let mut updated = retention_file();
    updated.push_str("\ndef rotate_archive(batch):\n");
    for i in 0..24 {
        updated.push_str(&format!("    r{i} = shift(batch, {i})\n"));
    }
    updated.push_str("    return seal(batch)\n");
    world.fixture.set_file("a.py", &updated);
    world.fixture.set_commit("c0ffee1");

    world
        .service
        .request_index(world.repo.repo_id, None, Some(vec!["a.py".into()]))
        .await
        .unwrap();
    drain_queue(&world).await;

    let a_chunks = {
        let store = world.store.lock().await;
        store.chunks_for_file(world.repo.repo_id, "a.py").unwrap()
    };
    assert_eq!(a_chunks.len(), 2);
    let original = a_chunks
        .iter()
        .find(|c| c.chunk_text.contains("archive_audit_event"))
        .expect("original function still chunked");
    let added = a_chunks
        .iter()
        .find(|c| c.chunk_text.contains("rotate_archive"))
        .expect("new function chunked");
    assert_eq!(original.delta_type, DeltaType::Unchanged);
    assert_eq!(added.delta_type, DeltaType::Added);

    // b.py rows are bit-identical, embeddings included
    let b_chunks_after: Vec<_> = {
        let store = world.store.lock().await;
        store.chunks_for_file(world.repo.repo_id, "b.py").unwrap()
    };
    assert_eq!(b_chunks_before, b_chunks_after);

    let repo = {
        let store = world.store.lock().await;
        store.get_repo(world.repo.repo_id).unwrap().unwrap()
    };
    assert_eq!(repo.total_chunks, 7);
    assert_eq!(repo.last_commit_sha.as_deref(), Some("c0ffee1"));
}

#[tokio::test]
async fn delta_reindex_marks_deleted_file_chunks_removed() {
    let world = build_world();
    seed_scenario_repo(&world);

    world
        .service
        .request_index(world.repo.repo_id, None, None)
        .await
        .unwrap();
    drain_queue(&world).await;

    world.fixture.remove_file("a.py");
    world
        .service
        .request_index(world.repo.repo_id, None, Some(vec!["a.py".into()]))
        .await
        .unwrap();
    drain_queue(&world).await;

    let a_chunks = {
        let store = world.store.lock().await;
        store.chunks_for_file(world.repo.repo_id, "a.py").unwrap()
    };
    assert_eq!(a_chunks.len(), 1);
    assert_eq!(a_chunks[0].delta_type, DeltaType::Removed);

    // Removed chunks drop out of the live counters
    let repo = {
        let store = world.store.lock().await;
        store.get_repo(world.repo.repo_id).unwrap().unwrap()
    };
    assert_eq!(repo.total_chunks, 5);
    assert_eq!(repo.indexed_file_count, 1);
}

#[tokio::test]
async fn full_reindex_prunes_chunks_for_deleted_files() {
    let world = build_world();
    seed_scenario_repo(&world);

    world
        .service
        .request_index(world.repo.repo_id, None, None)
        .await
        .unwrap();
    drain_queue(&world).await;

    world.fixture.remove_file("b.py");
    world
        .service
        .request_index(world.repo.repo_id, None, None)
        .await
        .unwrap();
    drain_queue(&world).await;

    let chunks = {
        let store = world.store.lock().await;
        store.chunks_for_repo(world.repo.repo_id).unwrap()
    };
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].file_path == "a.py");
}

#[tokio::test]
async fn empty_repo_indexes_cleanly() {
    let world = build_world();
    // No files at all

    let job_id = world
        .service
        .request_index(world.repo.repo_id, None, None)
        .await
        .unwrap();
    drain_queue(&world).await;

    let job = world.service.job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let repo = {
        let store = world.store.lock().await;
        store.get_repo(world.repo.repo_id).unwrap().unwrap()
    };
    assert_eq!(repo.total_chunks, 0);
    assert_eq!(repo.indexed_file_count, 0);
    assert!(repo.last_commit_sha.is_some());
}

#[tokio::test]
async fn pinned_commit_is_recorded() {
    let world = build_world();
    seed_scenario_repo(&world);

    world
        .service
        .request_index(world.repo.repo_id, Some("abc1234".into()), None)
        .await
        .unwrap();
    drain_queue(&world).await;

    let repo = {
        let store = world.store.lock().await;
        store.get_repo(world.repo.repo_id).unwrap().unwrap()
    };
    assert_eq!(repo.last_commit_sha.as_deref(), Some("abc1234"));
}
