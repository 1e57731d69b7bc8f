//! End-to-end scenarios across Catalog, TaskQueue, VectorStore, QueryRouter
//! and FusionRanker, exercised without any real model inference — segments
//! and embeddings are synthesized directly so these run without a model
//! download, the same tradeoff the ignored model-requiring tests in this
//! codebase make explicit rather than silently skipping coverage.

use std::collections::HashMap;

use chrono::Utc;
use mm_core::model::{File, Segment};
use mm_core::{
    fuse, Catalog, Modality, ModalityHit, QueryRouter, TaskKind, TaskOutcome, TaskQueue, VectorStore,
};
use uuid::Uuid;

fn unit_vector(seed: u64, dim: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dim).map(|i| (((seed + i as u64) % 7) as f32) + 1.0).collect();
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    v
}

fn sample_file(content_hash: &str, path: &str) -> File {
    let now = Utc::now();
    File {
        file_id: Uuid::new_v4(),
        content_hash: content_hash.to_string(),
        path: path.to_string(),
        ref_paths: vec![path.to_string()],
        size: 1024,
        file_type: "image".into(),
        mtime: now,
        created_at: now,
    }
}

/// Scenario 1 (§8): ingesting the same bytes under two paths yields exactly
/// one `File` row with both paths recorded as `ref_paths`, not two rows.
#[test]
fn dedup_across_paths_yields_one_file_with_both_ref_paths() {
    let mut catalog = Catalog::in_memory().unwrap();
    let file = sample_file("same-bytes", "/a/cat.jpg");
    catalog.insert_file_with_segments(&file, &[], &[]).unwrap();

    // Second ingest of identical bytes under a different path: the
    // orchestrator's dedup check short-circuits to add_ref_path instead of
    // inserting a second row.
    let existing = catalog.get_file_by_hash("same-bytes").unwrap().unwrap();
    assert_eq!(existing.file_id, file.file_id);
    catalog.add_ref_path(existing.file_id, "/b/cat.jpg").unwrap();

    let reloaded = catalog.get_file_by_id(file.file_id).unwrap().unwrap();
    assert_eq!(reloaded.ref_paths, vec!["/a/cat.jpg".to_string(), "/b/cat.jpg".to_string()]);

    // Still exactly one row for this content hash.
    assert!(catalog.get_file_by_hash("same-bytes").unwrap().is_some());
}

/// Scenario 2 (§8), minus real decode/embed: synthesize a video's speech
/// and visual-frame hits around the same timestamp and confirm fusion
/// clusters them and reports a `best_timestamp` window within the 2000ms
/// accuracy requirement.
#[test]
fn video_localization_clusters_speech_and_frame_hits_within_accuracy_window() {
    let file_id = Uuid::new_v4();
    let mut hits_by_modality: HashMap<Modality, Vec<(Uuid, ModalityHit)>> = HashMap::new();
    hits_by_modality.insert(
        Modality::AudioSpeech,
        vec![(
            file_id,
            ModalityHit {
                modality: Modality::AudioSpeech,
                score: 0.9,
                start_ms: 42_000,
                end_ms: 42_800,
            },
        )],
    );
    hits_by_modality.insert(
        Modality::VisualFrame,
        vec![(
            file_id,
            ModalityHit {
                modality: Modality::VisualFrame,
                score: 0.7,
                start_ms: 43_100,
                end_ms: 43_200,
            },
        )],
    );

    let mut weights = HashMap::new();
    weights.insert(Modality::AudioSpeech, 0.7);
    weights.insert(Modality::VisualFrame, 0.3);

    let fused = fuse(&hits_by_modality, &weights);
    assert_eq!(fused.len(), 1);
    let result = &fused[0];
    assert_eq!(result.file_id, file_id);

    let best = result.best_cluster.as_ref().expect("expected a clustered best match");
    assert!(best.start_ms >= 40_000 && best.start_ms <= 44_000);
    assert!(best.end_ms - best.start_ms <= 2000);
    assert!(best.modalities.contains(&Modality::AudioSpeech));
    assert!(best.modalities.contains(&Modality::VisualFrame));
}

/// Scenario 3 (§8): a high-priority task enqueued after a pile of
/// low-priority ones is still the next one `take()` returns.
#[test]
fn priority_task_is_taken_before_earlier_low_priority_backlog() {
    let catalog = std::sync::Arc::new(std::sync::Mutex::new(Catalog::in_memory().unwrap()));
    let queue = TaskQueue::new(catalog);

    for i in 0..100 {
        queue
            .enqueue(TaskKind::IngestFile, &format!("/photos/img{i}.jpg"), 5, vec![])
            .unwrap();
    }
    queue.enqueue(TaskKind::IngestFile, "/videos/clip.mp4", 1, vec![]).unwrap();

    let next = queue.take().unwrap().expect("queue should not be empty");
    assert_eq!(next.target, "/videos/clip.mp4");
    assert_eq!(next.priority, 1);
}

/// Scenario 4 (§8): a task that fails transiently is retried and eventually
/// succeeds, with `attempts` reflecting the failed-then-succeeded history.
#[test]
fn transient_failure_is_retried_then_succeeds() {
    let catalog = std::sync::Arc::new(std::sync::Mutex::new(Catalog::in_memory().unwrap()));
    let queue = TaskQueue::new(catalog);

    let task_id = queue
        .enqueue(TaskKind::IngestFile, "/music/track.mp3", 3, vec![])
        .unwrap();

    let taken = queue.take().unwrap().unwrap();
    assert_eq!(taken.task_id, task_id);
    queue
        .complete(task_id, TaskOutcome::Failed, Some("batch failed: transient".into()))
        .unwrap();

    let retried = queue.take().unwrap().expect("failed task should be retried");
    assert_eq!(retried.task_id, task_id);
    assert_eq!(retried.attempts, 1);
    queue.complete(task_id, TaskOutcome::Succeeded, None).unwrap();

    let done = queue.get(task_id).unwrap().unwrap();
    assert_eq!(done.status, mm_core::TaskStatus::Succeeded);
    assert_eq!(done.attempts, 1);
}

/// Scenario 5 (§8), pending-task half: cancelling a task before it is
/// picked up leaves it `cancelled` and it never surfaces from `take()`.
#[test]
fn cancelling_a_pending_task_removes_it_from_the_queue() {
    let catalog = std::sync::Arc::new(std::sync::Mutex::new(Catalog::in_memory().unwrap()));
    let queue = TaskQueue::new(catalog);

    let task_id = queue
        .enqueue(TaskKind::IngestFile, "/videos/big.mp4", 1, vec![])
        .unwrap();
    queue.cancel(task_id).unwrap();

    assert!(queue.take().unwrap().is_none());
    let task = queue.get(task_id).unwrap().unwrap();
    assert_eq!(task.status, mm_core::TaskStatus::Cancelled);
}

/// Scenario 6 (§8): a person query is routed to `QueryType::Person` and its
/// `candidate_files` are exactly the files that person was tagged in.
#[test]
fn person_query_restricts_candidates_to_tagged_files() {
    let mut catalog = Catalog::in_memory().unwrap();
    let alice_file = sample_file("alice-bytes", "/photos/alice_running.jpg");
    let bob_file = sample_file("bob-bytes", "/photos/bob_running.jpg");
    catalog.insert_file_with_segments(&alice_file, &[], &[]).unwrap();
    catalog.insert_file_with_segments(&bob_file, &[], &[]).unwrap();

    let alice_id = catalog.register_person("Alice", &[]).unwrap();
    catalog.tag_person_in_file(alice_id, alice_file.file_id).unwrap();

    let router = QueryRouter::new(&catalog);
    let plan = router.plan("find Alice running").unwrap();

    assert_eq!(plan.query_type, mm_core::QueryType::Person);
    assert_eq!(plan.candidate_files, vec![alice_file.file_id]);
    assert!(!plan.candidate_files.contains(&bob_file.file_id));
}

/// End-to-end: synthesize an ingested image's segment + vector, then run it
/// through the exact query path (`QueryRouter` -> `VectorStore::search` ->
/// `fuse`) a real search handler would use.
#[test]
fn ingested_image_is_retrievable_through_the_full_query_path() {
    let mut catalog = Catalog::in_memory().unwrap();
    let mut store = VectorStore::in_memory();
    store.create("image", 8);

    let file = sample_file("mountain-bytes", "/photos/mountain.jpg");
    let segment = Segment {
        segment_id: Uuid::new_v4(),
        file_id: file.file_id,
        modality: Modality::Image,
        seq: 0,
        start_ms: 0,
        end_ms: 0,
        quality: 1.0,
        extra: None,
    };
    let vector_id = Uuid::new_v4();
    catalog
        .insert_file_with_segments(&file, &[segment.clone()], &[(vector_id, segment.segment_id, "image".into())])
        .unwrap();

    store
        .upsert(
            "image",
            vector_id,
            unit_vector(1, 8),
            mm_core::model::VectorPayload {
                file_id: file.file_id,
                start_ms: 0,
                end_ms: 0,
                modality: Modality::Image,
                tags: vec![],
            },
        )
        .unwrap();

    let router = QueryRouter::new(&catalog);
    let plan = router.plan("a photo of a mountain at sunset").unwrap();
    assert_eq!(plan.query_type, mm_core::QueryType::Visual);

    let query_embedding = unit_vector(1, 8);
    let hits = store.search("image", &query_embedding, 10, 0.0).unwrap();
    assert_eq!(hits.len(), 1);

    let mut hits_by_modality = HashMap::new();
    hits_by_modality.insert(
        Modality::Image,
        hits.into_iter()
            .map(|h| {
                (
                    h.payload.file_id,
                    ModalityHit {
                        modality: Modality::Image,
                        score: h.score,
                        start_ms: h.payload.start_ms,
                        end_ms: h.payload.end_ms,
                    },
                )
            })
            .collect(),
    );

    let fused = fuse(&hits_by_modality, &plan.weights);
    assert_eq!(fused.len(), 1);
    assert_eq!(fused[0].file_id, file.file_id);
    assert!(fused[0].score > 0.0);
}

/// Boundary B1 (§8): scanning an empty directory worth of tasks (nothing
/// enqueued) succeeds trivially — `take()` finds nothing, no error.
#[test]
fn empty_queue_take_returns_none_without_error() {
    let catalog = std::sync::Arc::new(std::sync::Mutex::new(Catalog::in_memory().unwrap()));
    let queue = TaskQueue::new(catalog);
    assert!(queue.take().unwrap().is_none());
}
