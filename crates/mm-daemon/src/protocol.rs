//! Wire protocol for the search/admin API (§6): newline-delimited JSON
//! request/response pairs over a Unix domain socket, matching the daemon
//! architecture this grew from (one request per line, one response per
//! line, socket permissions restricted to the owning user).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SearchText {
        query: String,
        top_k: Option<usize>,
        threshold: Option<f32>,
        person: Option<String>,
    },
    SearchImage {
        image: Vec<u8>,
        top_k: Option<usize>,
    },
    SearchAudio {
        audio: Vec<u8>,
        top_k: Option<usize>,
    },
    IndexFile {
        path: String,
    },
    IndexDirectory {
        path: String,
        recursive: Option<bool>,
    },
    ListTasks {
        status: Option<String>,
        kind: Option<String>,
        limit: Option<usize>,
    },
    GetTask {
        task_id: Uuid,
    },
    CancelTask {
        task_id: Uuid,
    },
    SetTaskPriority {
        task_id: Uuid,
        priority: i32,
    },
    RetryTask {
        task_id: Uuid,
    },
    CancelAllTasks {
        cancel_running: Option<bool>,
    },
    IndexStatus,
    Status,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok(OkPayload),
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OkPayload {
    Search(SearchResponse),
    Task(TaskWire),
    TaskList(Vec<TaskWire>),
    TaskId { task_id: Uuid },
    IndexStatus(IndexStatusWire),
    Daemon(DaemonStatusWire),
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_ms: u64,
    pub results: Vec<SearchResultWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultWire {
    pub file_id: Uuid,
    pub path: String,
    pub score: f32,
    pub best_timestamp: Option<TimestampWire>,
    pub clusters: Vec<ClusterWire>,
    pub modality_scores: HashMap<String, f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampWire {
    pub start_ms: i64,
    pub end_ms: i64,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterWire {
    pub start_ms: i64,
    pub end_ms: i64,
    pub confidence: f32,
    pub modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWire {
    pub task_id: Uuid,
    pub kind: String,
    pub target: String,
    pub priority: i32,
    pub status: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexStatusWire {
    pub files_total: u64,
    pub by_modality: HashMap<String, u64>,
    pub by_status: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatusWire {
    pub uptime_secs: u64,
    pub pending_tasks: u64,
    pub running_tasks: u64,
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// CLI wrapper exit codes, §6.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_USER_ERROR: i32 = 1;
pub const EXIT_BACKEND_UNREACHABLE: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;
