//! Orchestrator (C8): consumes tasks, drives Classifier -> Hasher ->
//! Decomposer -> EncoderPool -> VectorStore/Catalog, and enforces
//! concurrency, cancellation and progress reporting.
//!
//! `N = max_concurrent_tasks` worker loops share one `Arc<Services>` handle,
//! the same shape as the daemon loop this grew from, where every worker
//! closes over the same `Arc<Mutex<_>>` state rather than reaching for
//! globals.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mm_core::decomposer::{
    extract_audio_slice, extract_frame, DecomposeError, DecomposerConfig, MediaDecomposer,
};
use mm_core::file_types::{classify, FileKind};
use mm_core::hasher::hash_file;
use mm_core::model::{File as CatalogFile, Segment};
use mm_core::retry::{retry_blocking, RetryStrategy};
use mm_core::{EncodeError, Modality, TaskKind, TaskOutcome};
use uuid::Uuid;

/// `ModelError::BatchFailed` is retried at batch-of-1 granularity before the
/// whole task is failed and handed back to the TaskQueue's own retry.
fn segment_retry_strategy() -> RetryStrategy {
    RetryStrategy::new(2, Duration::from_millis(200), 2.0, Duration::from_secs(5))
}

use crate::service::{Services, COLLECTIONS};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs `max_concurrent_tasks` worker loops until `shutdown` is set.
pub struct Orchestrator {
    services: Arc<Services>,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub async fn run(&self) {
        let n = self.services.config.max_concurrent_tasks();
        let mut workers = Vec::with_capacity(n);
        for worker_id in 0..n {
            let services = Arc::clone(&self.services);
            let shutdown = Arc::clone(&self.shutdown);
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, services, shutdown).await;
            }));
        }
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(worker_id: usize, services: Arc<Services>, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        let task = {
            let services = Arc::clone(&services);
            tokio::task::spawn_blocking(move || services.task_queue.take())
                .await
                .unwrap_or(Ok(None))
        };

        let Ok(Some(task)) = task else {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };

        tracing::info!(worker_id, task_id = %task.task_id, kind = ?task.kind, target = %task.target, "picked up task");

        let outcome = match task.kind {
            TaskKind::IngestFile => {
                ingest_file(&services, task.task_id, &task.target, &shutdown).await
            }
            TaskKind::ScanDir => scan_dir(&services, &task.target),
            TaskKind::Reindex => {
                ingest_file(&services, task.task_id, &task.target, &shutdown).await
            }
        };

        match outcome {
            Ok(TaskOutcome::Succeeded) => {
                let _ = services.task_queue.complete(task.task_id, TaskOutcome::Succeeded, None);
            }
            Ok(TaskOutcome::Cancelled) => {
                let _ = services.task_queue.complete(task.task_id, TaskOutcome::Cancelled, None);
            }
            Ok(TaskOutcome::Failed) => {
                let _ = services.task_queue.complete(task.task_id, TaskOutcome::Failed, None);
            }
            Err(message) => {
                tracing::error!(task_id = %task.task_id, error = %message, "task failed");
                let _ = services.task_queue.complete(task.task_id, TaskOutcome::Failed, Some(message));
            }
        }
    }
}

/// Walks `root` and enqueues an `ingest_file` task per regular file,
/// recursing exactly as the project-discovery scan this grew from does.
fn scan_dir(services: &Services, root: &str) -> Result<TaskOutcome, String> {
    let path = PathBuf::from(root);
    if !path.is_dir() {
        return Err(format!("not a directory: {root}"));
    }
    walk(services, &path);
    Ok(TaskOutcome::Succeeded)
}

fn walk(services: &Services, dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(services, &path);
        } else if path.is_file() {
            let priority = classify(&path)
                .map(|c| priority_for_kind(c.kind))
                .unwrap_or(5);
            let _ = services.task_queue.enqueue(
                TaskKind::IngestFile,
                &path.to_string_lossy(),
                priority,
                vec![],
            );
        }
    }
}

fn priority_for_kind(kind: FileKind) -> i32 {
    match kind {
        FileKind::Video => mm_core::model::default_priority_for_modality(Modality::VisualFrame),
        FileKind::Audio => mm_core::model::default_priority_for_modality(Modality::AudioSpeech),
        FileKind::Image => mm_core::model::default_priority_for_modality(Modality::Image),
        FileKind::Text => mm_core::model::default_priority_for_modality(Modality::Text),
        FileKind::Unknown => 9,
    }
}

async fn ingest_file(
    services: &Arc<Services>,
    task_id: Uuid,
    target: &str,
    shutdown: &Arc<AtomicBool>,
) -> Result<TaskOutcome, String> {
    let services = Arc::clone(services);
    let target = target.to_string();
    let shutdown = Arc::clone(shutdown);
    tokio::task::spawn_blocking(move || ingest_file_blocking(&services, task_id, &target, &shutdown))
        .await
        .map_err(|e| e.to_string())?
}

fn ingest_file_blocking(
    services: &Services,
    task_id: Uuid,
    target: &str,
    shutdown: &Arc<AtomicBool>,
) -> Result<TaskOutcome, String> {
    let path = Path::new(target);

    let classification = match classify(path) {
        Ok(c) => c,
        Err(e) => return Err(e.to_string()),
    };
    if classification.kind == FileKind::Unknown {
        return Ok(TaskOutcome::Succeeded);
    }

    let content_hash = hash_file(path).map_err(|e| e.to_string())?;

    {
        let catalog = services.catalog.lock().unwrap();
        if let Some(existing) = catalog.get_file_by_hash(&content_hash).map_err(|e| e.to_string())? {
            catalog.add_ref_path(existing.file_id, target).map_err(|e| e.to_string())?;
            return Ok(TaskOutcome::Succeeded);
        }
    }

    let file_id = Uuid::new_v4();
    let decomposer = MediaDecomposer::new(DecomposerConfig {
        frame_interval_secs: services.config.frame_interval_ms() as f64 / 1000.0,
        ..DecomposerConfig::default()
    });
    let decomposition = decomposer
        .decompose(path, file_id, classification.kind)
        .map_err(decompose_err_to_string)?;

    if decomposition.segments.is_empty() {
        return Err("decomposition produced no segments".to_string());
    }

    let metadata = std::fs::metadata(path).map_err(|e| e.to_string())?;
    let mtime = metadata
        .modified()
        .ok()
        .map(chrono::DateTime::<chrono::Utc>::from)
        .unwrap_or_else(chrono::Utc::now);

    let file = CatalogFile {
        file_id,
        content_hash,
        path: target.to_string(),
        ref_paths: vec![],
        size: metadata.len(),
        file_type: classification.kind.to_string(),
        mtime,
        created_at: chrono::Utc::now(),
    };

    let mut vector_mappings: Vec<(Uuid, Uuid, String)> = Vec::new();
    let total = decomposition.segments.len();
    for (done, segment) in decomposition.segments.iter().enumerate() {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(TaskOutcome::Cancelled);
        }
        tracing::debug!(task_id = %task_id, done, total, "embedding segment");

        let embedding = retry_blocking(segment_retry_strategy(), || embed_segment(services, path, segment))
            .map_err(|e: EncodeError| e.to_string())?;
        let Some(embedding) = embedding else {
            continue;
        };

        let collection = collection_name(segment.modality);
        let vector_id = Uuid::new_v4();
        let payload = mm_core::model::VectorPayload {
            file_id,
            start_ms: segment.start_ms,
            end_ms: segment.end_ms,
            modality: segment.modality,
            tags: vec![],
        };

        let mut store = services.vector_store.lock().unwrap();
        store
            .upsert(collection, vector_id, embedding, payload)
            .map_err(|e| e.to_string())?;
        drop(store);

        vector_mappings.push((vector_id, segment.segment_id, collection.to_string()));
    }

    let mut catalog = services.catalog.lock().unwrap();
    catalog
        .insert_file_with_segments(&file, &decomposition.segments, &vector_mappings)
        .map_err(|e| e.to_string())?;

    Ok(TaskOutcome::Succeeded)
}

fn embed_segment(
    services: &Services,
    path: &Path,
    segment: &Segment,
) -> Result<Option<Vec<f32>>, mm_core::EncodeError> {
    match segment.modality {
        // The whole file *is* the image here (no container to slice into).
        Modality::Image => services.encoder_pool.embed_image_file(path).map(|o| Some(o.embedding)),
        Modality::VisualFrame => embed_visual_frame(services, path, segment),
        Modality::Text => {
            let text = std::fs::read_to_string(path).unwrap_or_default();
            let mut out = services.encoder_pool.embed_text_batch(Modality::Text, &[text])?;
            Ok(out.pop().map(|o| o.embedding))
        }
        Modality::AudioSpeech => embed_audio_speech(services, path, segment),
        // No dedicated music model is wired into the encoder pool; running
        // music through the speech transcriber would mislabel the segment
        // and transcribe silence/noise. Left unembedded until a music
        // encoder lands, same as `Face` below.
        Modality::AudioMusic => Ok(None),
        Modality::Face => Ok(None),
    }
}

/// Extracts the single decoded frame this segment's `[start_ms,end_ms]`
/// window names, embeds *that*, and cleans up the scratch file — never
/// hands the video container itself to `embed_image_file`, which can't
/// decode one.
fn embed_visual_frame(
    services: &Services,
    path: &Path,
    segment: &Segment,
) -> Result<Option<Vec<f32>>, mm_core::EncodeError> {
    let cache_dir = services.data_dir.join("cache");
    let at_secs = segment.start_ms as f64 / 1000.0;
    let frame_name = format!("{}_{}.png", segment.file_id, segment.segment_id);

    let frame_path = extract_frame(path, at_secs, &cache_dir, &frame_name)
        .map_err(|e| mm_core::EncodeError::BatchFailed(e.to_string()))?;
    let result = services.encoder_pool.embed_image_file(&frame_path).map(|o| Some(o.embedding));
    let _ = std::fs::remove_file(&frame_path);
    result
}

/// Cuts this segment's own `[start_ms,end_ms]` audio window out of the
/// source file and transcribes only that slice, instead of transcribing the
/// entire track once per segment.
fn embed_audio_speech(
    services: &Services,
    path: &Path,
    segment: &Segment,
) -> Result<Option<Vec<f32>>, mm_core::EncodeError> {
    let cache_dir = services.data_dir.join("cache");
    let start_secs = segment.start_ms as f64 / 1000.0;
    let duration_secs = (segment.end_ms - segment.start_ms).max(0) as f64 / 1000.0;
    let clip_name = format!("{}_{}.wav", segment.file_id, segment.segment_id);

    let clip_path = extract_audio_slice(path, start_secs, duration_secs, &cache_dir, &clip_name)
        .map_err(|e| mm_core::EncodeError::BatchFailed(e.to_string()))?;
    let result = services.encoder_pool.transcribe_and_embed(&clip_path).map(|o| Some(o.embedding));
    let _ = std::fs::remove_file(&clip_path);
    result
}

fn collection_name(modality: Modality) -> &'static str {
    COLLECTIONS
        .iter()
        .find(|(_, m, _)| *m == modality)
        .map(|(name, _, _)| *name)
        .unwrap_or("text")
}

fn decompose_err_to_string(e: DecomposeError) -> String {
    e.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ranks_video_above_text() {
        assert!(priority_for_kind(FileKind::Video) < priority_for_kind(FileKind::Text));
    }

    #[test]
    fn collection_name_resolves_known_modalities() {
        assert_eq!(collection_name(Modality::Image), "image");
        assert_eq!(collection_name(Modality::AudioSpeech), "audio_speech");
    }

    #[test]
    fn segment_retry_allows_one_retry_before_giving_up() {
        let strategy = segment_retry_strategy();
        assert!(strategy.should_retry(1));
        assert!(!strategy.should_retry(2));
    }
}
