//! Tunable constants shared across components.

/// Maximum time a single-modality query is expected to take before results
/// are returned from whatever modalities have answered so far.
pub const ACCURACY_REQUIREMENT_MS: u64 = 2000;

/// Acceptable drift between a video segment's visual and audio timestamps
/// before they are treated as unrelated events for fusion purposes.
pub const SYNC_TOLERANCE_MS: i64 = 500;

/// Overlap window applied between consecutive video chunks so a sentence or
/// action spanning a chunk boundary is not missed by either segment.
pub const VIDEO_CHUNK_OVERLAP_MS: i64 = 2000;

/// Default number of results returned to the CLI/API when not specified.
pub const DEFAULT_QUERY_LIMIT: usize = 20;

/// Default debounce window for directory-watcher events.
pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 500;

/// Default maximum number of concurrently running ingestion tasks.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Default number of retries before a task is marked permanently failed.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;

/// Base backoff delay for retried tasks; doubles per attempt.
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Minimum number of whitelisted candidate files a person query must resolve
/// to before face/visual-heavy weights are used; below this the query falls
/// back to generic weights instead of over-trusting a thin or empty match.
pub const PERSON_MIN_COVERAGE: usize = 1;
