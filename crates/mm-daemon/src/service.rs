//! Services: the explicit, constructed context (Catalog, VectorStore,
//! EncoderPool, TaskQueue, config) that every component is built from,
//! replacing the ad-hoc module-level globals the daemon this grew from used
//! to reach for. One instance is shared via `Arc` across the socket
//! listener and every worker loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use mm_core::{Catalog, EncoderPool, Modality, QueryRouter, TaskKind, TaskQueue, VectorStore};
use rusqlite::Connection;
use uuid::Uuid;

use crate::config::Config;
use crate::protocol::{
    ClusterWire, IndexStatusWire, OkPayload, Request, Response, SearchResponse, SearchResultWire,
    TaskWire, TimestampWire,
};

pub const COLLECTIONS: &[(&str, Modality, usize)] = &[
    ("image", Modality::Image, 512),
    ("visual_frame", Modality::VisualFrame, 512),
    ("audio_music", Modality::AudioMusic, 512),
    ("audio_speech", Modality::AudioSpeech, 512),
    ("text", Modality::Text, 512),
    ("face", Modality::Face, 512),
];

pub struct Services {
    pub catalog: Arc<Mutex<Catalog>>,
    pub vector_store: Mutex<VectorStore>,
    pub encoder_pool: Arc<EncoderPool>,
    pub task_queue: Arc<TaskQueue>,
    pub config: Config,
    pub data_dir: PathBuf,
}

impl Services {
    pub fn open(config: Config) -> anyhow::Result<Arc<Self>> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)?;

        let catalog_conn = Connection::open(data_dir.join("catalog.db"))?;
        let catalog = Arc::new(Mutex::new(Catalog::open(catalog_conn)?));

        let vector_conn = Connection::open(data_dir.join("vectors.db"))?;
        let mut vector_store = VectorStore::open(vector_conn)?;
        for (name, _, dim) in COLLECTIONS {
            vector_store.create(name, *dim);
        }

        if config.device() == "cuda" {
            std::env::set_var("DEVICE", "cuda");
        }
        let encoder_pool = Arc::new(EncoderPool::new(mm_core::make_device()));

        let task_queue = Arc::new(TaskQueue::new(Arc::clone(&catalog)));

        Ok(Arc::new(Self {
            catalog,
            vector_store: Mutex::new(vector_store),
            encoder_pool,
            task_queue,
            config,
            data_dir,
        }))
    }

    pub fn dispatch(&self, req: Request) -> Response {
        match req {
            Request::SearchText {
                query,
                top_k,
                threshold,
                person,
            } => self.handle_search_text(query, top_k, threshold, person),
            Request::SearchImage { .. } => {
                Response::error("not_implemented", "image-query search is not wired to this transport yet")
            }
            Request::SearchAudio { .. } => {
                Response::error("not_implemented", "audio-query search is not wired to this transport yet")
            }
            Request::IndexFile { path } => self.handle_index_file(path),
            Request::IndexDirectory { path, recursive } => self.handle_index_directory(path, recursive),
            Request::ListTasks { status, kind, limit } => self.handle_list_tasks(status, kind, limit),
            Request::GetTask { task_id } => self.handle_get_task(task_id),
            Request::CancelTask { task_id } => self.handle_cancel_task(task_id),
            Request::SetTaskPriority { task_id, priority } => self.handle_set_priority(task_id, priority),
            Request::RetryTask { task_id } => self.handle_retry_task(task_id),
            Request::CancelAllTasks { cancel_running } => self.handle_cancel_all(cancel_running.unwrap_or(false)),
            Request::IndexStatus => self.handle_index_status(),
            Request::Status => Response::Ok(OkPayload::Empty),
            Request::Shutdown => Response::Ok(OkPayload::Empty),
        }
    }

    fn handle_search_text(
        &self,
        query: String,
        top_k: Option<usize>,
        threshold: Option<f32>,
        _person: Option<String>,
    ) -> Response {
        let started = std::time::Instant::now();
        let k = top_k.unwrap_or(mm_core::constants::DEFAULT_QUERY_LIMIT);
        let threshold = threshold.unwrap_or(0.0);

        let plan = {
            let catalog = self.catalog.lock().unwrap();
            let router = QueryRouter::new(&catalog);
            match router.plan(&query) {
                Ok(p) => p,
                Err(e) => return Response::error("storage_error", e.to_string()),
            }
        };

        let embedding = match self.encoder_pool.embed_query_text(&plan.query_text) {
            Ok(embedding) => embedding,
            Err(e) => return Response::error("model_error", e.to_string()),
        };

        let mut hits_by_modality: HashMap<Modality, Vec<(Uuid, mm_core::ModalityHit)>> = HashMap::new();
        {
            let mut store = self.vector_store.lock().unwrap();
            for (name, modality, _dim) in COLLECTIONS {
                if !plan.weights.contains_key(modality) {
                    continue;
                }
                let raw_hits = match store.search(name, &embedding, k * 4, threshold) {
                    Ok(hits) => hits,
                    Err(_) => continue,
                };
                for hit in raw_hits {
                    let file_id = hit.payload.file_id;
                    if !plan.candidate_files.is_empty() && !plan.candidate_files.contains(&file_id) {
                        continue;
                    }
                    hits_by_modality.entry(*modality).or_default().push((
                        file_id,
                        mm_core::ModalityHit {
                            modality: *modality,
                            score: hit.score,
                            start_ms: hit.payload.start_ms,
                            end_ms: hit.payload.end_ms,
                        },
                    ));
                }
            }
        }

        let mut fused = mm_core::fuse(&hits_by_modality, &plan.weights);
        fused.truncate(k);

        let catalog = self.catalog.lock().unwrap();
        let wire_results: Vec<SearchResultWire> = fused
            .into_iter()
            .map(|result| {
                let path = catalog
                    .get_file_by_id(result.file_id)
                    .ok()
                    .flatten()
                    .map(|f| f.path)
                    .unwrap_or_default();
                SearchResultWire {
                    file_id: result.file_id,
                    path,
                    score: result.score,
                    best_timestamp: result.best_cluster.as_ref().map(|c| TimestampWire {
                        start_ms: c.start_ms,
                        end_ms: c.end_ms,
                        confidence: c.confidence,
                    }),
                    clusters: result
                        .clusters
                        .into_iter()
                        .map(|c| ClusterWire {
                            start_ms: c.start_ms,
                            end_ms: c.end_ms,
                            confidence: c.confidence,
                            modalities: c.modalities.iter().map(|m| m.to_string()).collect(),
                        })
                        .collect(),
                    modality_scores: result
                        .modality_scores
                        .into_iter()
                        .map(|(m, s)| (m.to_string(), s))
                        .collect(),
                }
            })
            .collect();

        Response::Ok(OkPayload::Search(SearchResponse {
            query,
            took_ms: started.elapsed().as_millis() as u64,
            results: wire_results,
        }))
    }

    fn handle_index_file(&self, path: String) -> Response {
        let priority = mm_core::model::default_priority_for_modality(Modality::Text);
        match self
            .task_queue
            .enqueue(TaskKind::IngestFile, &path, priority, vec![])
        {
            Ok(task_id) => Response::Ok(OkPayload::TaskId { task_id }),
            Err(e) => Response::error("storage_error", e.to_string()),
        }
    }

    fn handle_index_directory(&self, path: String, _recursive: Option<bool>) -> Response {
        match self.task_queue.enqueue(TaskKind::ScanDir, &path, 0, vec![]) {
            Ok(task_id) => Response::Ok(OkPayload::TaskId { task_id }),
            Err(e) => Response::error("storage_error", e.to_string()),
        }
    }

    fn handle_list_tasks(&self, status: Option<String>, kind: Option<String>, limit: Option<usize>) -> Response {
        let status = status.and_then(|s| mm_core::TaskStatus::parse(&s));
        let kind = kind.and_then(|k| TaskKind::parse(&k));
        match self
            .task_queue
            .list(status, kind, limit.unwrap_or(100))
        {
            Ok(tasks) => Response::Ok(OkPayload::TaskList(tasks.into_iter().map(task_to_wire).collect())),
            Err(e) => Response::error("storage_error", e.to_string()),
        }
    }

    fn handle_get_task(&self, task_id: Uuid) -> Response {
        match self.task_queue.get(task_id) {
            Ok(Some(task)) => Response::Ok(OkPayload::Task(task_to_wire(task))),
            Ok(None) => Response::error("not_found", format!("no task {task_id}")),
            Err(e) => Response::error("storage_error", e.to_string()),
        }
    }

    fn handle_cancel_task(&self, task_id: Uuid) -> Response {
        match self.task_queue.cancel(task_id) {
            Ok(()) => Response::Ok(OkPayload::Empty),
            Err(e) => Response::error("storage_error", e.to_string()),
        }
    }

    fn handle_set_priority(&self, task_id: Uuid, priority: i32) -> Response {
        match self.task_queue.get(task_id) {
            Ok(Some(task)) => {
                match self.task_queue.enqueue(task.kind, &task.target, priority, task.depends_on) {
                    Ok(_) => Response::Ok(OkPayload::Empty),
                    Err(e) => Response::error("storage_error", e.to_string()),
                }
            }
            Ok(None) => Response::error("not_found", format!("no task {task_id}")),
            Err(e) => Response::error("storage_error", e.to_string()),
        }
    }

    fn handle_retry_task(&self, task_id: Uuid) -> Response {
        match self.task_queue.get(task_id) {
            Ok(Some(task)) => {
                match self
                    .task_queue
                    .enqueue(task.kind, &task.target, task.priority, vec![])
                {
                    Ok(_) => Response::Ok(OkPayload::Empty),
                    Err(e) => Response::error("storage_error", e.to_string()),
                }
            }
            Ok(None) => Response::error("not_found", format!("no task {task_id}")),
            Err(e) => Response::error("storage_error", e.to_string()),
        }
    }

    fn handle_cancel_all(&self, cancel_running: bool) -> Response {
        let statuses = if cancel_running {
            vec![mm_core::TaskStatus::Pending, mm_core::TaskStatus::Running]
        } else {
            vec![mm_core::TaskStatus::Pending]
        };
        for status in statuses {
            let tasks = match self.task_queue.list(Some(status), None, 10_000) {
                Ok(t) => t,
                Err(e) => return Response::error("storage_error", e.to_string()),
            };
            for task in tasks {
                if let Err(e) = self.task_queue.cancel(task.task_id) {
                    return Response::error("storage_error", e.to_string());
                }
            }
        }
        Response::Ok(OkPayload::Empty)
    }

    fn handle_index_status(&self) -> Response {
        let files_total = self.catalog.lock().unwrap().count_files().unwrap_or(0);

        let mut by_modality = HashMap::new();
        for (name, _, _) in COLLECTIONS {
            let store = self.vector_store.lock().unwrap();
            by_modality.insert(name.to_string(), store.len(name) as u64);
        }
        let by_status = [
            mm_core::TaskStatus::Pending,
            mm_core::TaskStatus::Running,
            mm_core::TaskStatus::Succeeded,
            mm_core::TaskStatus::Failed,
            mm_core::TaskStatus::Cancelled,
        ]
        .into_iter()
        .filter_map(|s| {
            self.task_queue
                .list(Some(s), None, 1_000_000)
                .ok()
                .map(|tasks| (s.as_str().to_string(), tasks.len() as u64))
        })
        .collect();

        Response::Ok(OkPayload::IndexStatus(IndexStatusWire {
            files_total,
            by_modality,
            by_status,
        }))
    }
}

fn task_to_wire(task: mm_core::Task) -> TaskWire {
    TaskWire {
        task_id: task.task_id,
        kind: task.kind.as_str().to_string(),
        target: task.target,
        priority: task.priority,
        status: task.status.as_str().to_string(),
        attempts: task.attempts,
        last_error: task.last_error,
    }
}
