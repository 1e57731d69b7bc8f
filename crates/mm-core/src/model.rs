//! Domain entities shared by the Catalog, VectorStore and query path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The modality a segment/vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Image,
    VisualFrame,
    AudioMusic,
    AudioSpeech,
    Text,
    Face,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Image => "image",
            Modality::VisualFrame => "visual_frame",
            Modality::AudioMusic => "audio_music",
            Modality::AudioSpeech => "audio_speech",
            Modality::Text => "text",
            Modality::Face => "face",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "image" => Modality::Image,
            "visual_frame" => Modality::VisualFrame,
            "audio_music" => Modality::AudioMusic,
            "audio_speech" => Modality::AudioSpeech,
            "text" => Modality::Text,
            "face" => Modality::Face,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record per distinct content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub file_id: Uuid,
    pub content_hash: String,
    pub path: String,
    pub ref_paths: Vec<String>,
    pub size: u64,
    pub file_type: String,
    pub mtime: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A unit that owns at most one embedding per modality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: Uuid,
    pub file_id: Uuid,
    pub modality: Modality,
    pub seq: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub quality: f32,
    pub extra: Option<serde_json::Value>,
}

impl Segment {
    pub fn validate(&self) -> Result<(), String> {
        if self.start_ms < 0 || self.start_ms > self.end_ms {
            return Err(format!(
                "invalid segment window [{}, {}]",
                self.start_ms, self.end_ms
            ));
        }
        Ok(())
    }
}

/// Denormalized fields carried alongside a stored embedding for cheap
/// filtering without a Catalog round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub file_id: Uuid,
    pub start_ms: i64,
    pub end_ms: i64,
    pub modality: Modality,
    pub tags: Vec<String>,
}

/// A dense embedding tied to exactly one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vector {
    pub vector_id: Uuid,
    pub segment_id: Uuid,
    pub modality: Modality,
    pub dim: usize,
    pub embedding: Vec<f32>,
    pub payload: VectorPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ScanDir,
    IngestFile,
    Reindex,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ScanDir => "scan_dir",
            TaskKind::IngestFile => "ingest_file",
            TaskKind::Reindex => "reindex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "scan_dir" => TaskKind::ScanDir,
            "ingest_file" => TaskKind::IngestFile,
            "reindex" => TaskKind::Reindex,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => TaskStatus::Pending,
            "running" => TaskStatus::Running,
            "succeeded" => TaskStatus::Succeeded,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Cancelled)
            || matches!(self, TaskStatus::Failed)
    }
}

/// A unit of ingestion work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub target: String,
    pub priority: i32,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub depends_on: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Default queue priority by file-type policy; smaller runs sooner.
pub fn default_priority_for_modality(modality: Modality) -> i32 {
    match modality {
        Modality::VisualFrame => 1,
        Modality::AudioSpeech => 2,
        Modality::AudioMusic => 3,
        Modality::Image => 5,
        Modality::Text => 7,
        Modality::Face => 4,
    }
}

/// A named person for face-tagged retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub person_id: Uuid,
    pub name: String,
    pub aliases: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_round_trips_through_its_string_form() {
        for m in [
            Modality::Image,
            Modality::VisualFrame,
            Modality::AudioMusic,
            Modality::AudioSpeech,
            Modality::Text,
            Modality::Face,
        ] {
            assert_eq!(Modality::parse(m.as_str()), Some(m));
        }
    }

    #[test]
    fn segment_rejects_inverted_window() {
        let seg = Segment {
            segment_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            modality: Modality::VisualFrame,
            seq: 0,
            start_ms: 500,
            end_ms: 100,
            quality: 1.0,
            extra: None,
        };
        assert!(seg.validate().is_err());
    }

    #[test]
    fn priority_ranks_visual_frame_above_text() {
        assert!(
            default_priority_for_modality(Modality::VisualFrame)
                < default_priority_for_modality(Modality::Text)
        );
    }
}
