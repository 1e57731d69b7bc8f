//! mm-core: core library for local multimodal search.
//!
//! This crate provides:
//! - File type classification and text encoding detection
//! - Media decomposition into timestamped segments
//! - Local CLIP/Whisper inference behind a lazily-loaded encoder pool
//! - Flat + HNSW vector storage and a SQLite-backed catalog
//! - A durable task queue, query routing and multimodal result fusion

pub mod catalog;
pub mod constants;
pub mod decomposer;
pub mod embedder_clip;
pub mod encoder_pool;
pub mod encoding;
pub mod error;
pub mod file_types;
pub mod fusion;
pub mod hasher;
pub mod hnsw;
pub mod model;
pub mod query_cache;
pub mod query_router;
pub mod retry;
pub mod task_queue;
pub mod vector_store;
pub mod whisper;

pub use catalog::Catalog;
pub use encoder_pool::{make_device, EncodeError, EncoderPool, EngineHealth};
pub use error::{IngestError, QueryError, StorageError};
pub use file_types::{classify, ClassifyError, Classification, FileKind};
pub use fusion::{fuse, FusedResult, ModalityHit, TimeCluster, WeightMap};
pub use model::{File, Modality, Person, Segment, Task, TaskKind, TaskStatus, Vector, VectorPayload};
pub use query_router::{QueryPlan, QueryRouter, QueryType};
pub use task_queue::{TaskOutcome, TaskQueue};
pub use vector_store::{SearchHit, VectorStore, VectorStoreError};
