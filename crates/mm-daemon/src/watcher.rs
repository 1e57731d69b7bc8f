//! DirectoryWatcher (C11): debounced filesystem notifications feeding the
//! ingest TaskQueue.
//!
//! Wraps `notify` plus a debounce map exactly as the file watcher this grew
//! from: raw events are merged by path (`Created+Deleted→Deleted`,
//! `Created+Modified→Created`, `Deleted+Created→Modified`, else latest-wins)
//! and only surfaced once their pending age exceeds the debounce window.

use anyhow::Result;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

const DEFAULT_DEBOUNCE_MS: u64 = mm_core::constants::DEFAULT_WATCH_DEBOUNCE_MS;

const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "vendor",
    "__pycache__",
    ".idea",
    ".vscode",
];

/// Filesystem watcher for tracking changes with debouncing.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Result<Event, notify::Error>>,
    watched_paths: Vec<PathBuf>,
    pending: HashMap<PathBuf, PendingEvent>,
    debounce: Duration,
    /// The data directory itself is never indexed even if it sits inside a
    /// watched tree (catalog.db/vectors churn would otherwise self-trigger).
    data_dir: Option<PathBuf>,
}

struct PendingEvent {
    kind: FileEventKind,
    last_seen: Instant,
}

impl FileWatcher {
    pub fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        Self::with_debounce(Duration::from_millis(DEFAULT_DEBOUNCE_MS), data_dir)
    }

    pub fn with_debounce(debounce: Duration, data_dir: Option<PathBuf>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let watcher = notify::recommended_watcher(tx)?;

        Ok(Self {
            watcher,
            rx,
            watched_paths: Vec::new(),
            pending: HashMap::new(),
            debounce,
            data_dir: data_dir.map(|p| p.canonicalize().unwrap_or(p)),
        })
    }

    pub fn watch(&mut self, path: &Path) -> Result<()> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.watched_paths.contains(&canonical) {
            return Ok(());
        }
        self.watcher.watch(&canonical, RecursiveMode::Recursive)?;
        self.watched_paths.push(canonical);
        Ok(())
    }

    pub fn unwatch(&mut self, path: &Path) -> Result<()> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !self.watched_paths.contains(&canonical) {
            return Ok(());
        }
        self.watcher.unwatch(&canonical)?;
        self.watched_paths.retain(|p| p != &canonical);
        Ok(())
    }

    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.watched_paths
    }

    /// Drain raw notify events, merge by path, and return events whose
    /// pending age has exceeded the debounce window.
    pub fn poll_events(&mut self) -> Vec<FileEvent> {
        let now = Instant::now();

        while let Ok(result) = self.rx.try_recv() {
            if let Ok(event) = result {
                self.process_raw_event(event, now);
            }
        }

        let mut ready = Vec::new();
        let mut still_pending = HashMap::new();

        for (path, pending) in self.pending.drain() {
            if now.duration_since(pending.last_seen) >= self.debounce {
                ready.push(FileEvent {
                    path,
                    kind: pending.kind,
                });
            } else {
                still_pending.insert(path, pending);
            }
        }

        self.pending = still_pending;
        ready
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn process_raw_event(&mut self, event: Event, now: Instant) {
        use notify::EventKind;

        let kind = match event.kind {
            EventKind::Create(_) => FileEventKind::Created,
            EventKind::Modify(_) => FileEventKind::Modified,
            EventKind::Remove(_) => FileEventKind::Deleted,
            _ => return,
        };

        for path in event.paths {
            if !self.should_index(&path) {
                continue;
            }

            if let Some(existing) = self.pending.get_mut(&path) {
                existing.kind = merge_event_kinds(existing.kind, kind);
                existing.last_seen = now;
            } else {
                self.pending.insert(
                    path,
                    PendingEvent {
                        kind,
                        last_seen: now,
                    },
                );
            }
        }
    }

    fn should_index(&self, path: &Path) -> bool {
        if path.is_dir() {
            return false;
        }
        if let Some(data_dir) = &self.data_dir {
            if path.starts_with(data_dir) {
                return false;
            }
        }
        if is_system_temp_path(path) {
            return false;
        }
        for component in path.components() {
            if let Some(name) = component.as_os_str().to_str() {
                if should_skip_dir(name) {
                    return false;
                }
            }
        }
        true
    }
}

fn should_skip_dir(name: &str) -> bool {
    SKIP_DIRS.contains(&name)
}

fn is_system_temp_path(path: &Path) -> bool {
    let s = path.to_string_lossy();
    s.starts_with("/tmp/")
        || s.starts_with("/private/tmp/")
        || s.starts_with("/var/tmp/")
        || s.starts_with("/var/folders/")
}

fn merge_event_kinds(old: FileEventKind, new: FileEventKind) -> FileEventKind {
    match (old, new) {
        (FileEventKind::Created, FileEventKind::Deleted) => FileEventKind::Deleted,
        (FileEventKind::Created, FileEventKind::Modified) => FileEventKind::Created,
        (FileEventKind::Deleted, FileEventKind::Created) => FileEventKind::Modified,
        (_, new) => new,
    }
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_skip_common_dirs() {
        let watcher = FileWatcher::new(None).unwrap();
        assert!(!watcher.should_index(Path::new("/test/node_modules/pkg/index.js")));
        assert!(!watcher.should_index(Path::new("/test/target/debug/main.rs")));
        assert!(!watcher.should_index(Path::new("/test/.git/config")));
    }

    #[test]
    fn should_skip_system_temp_dirs() {
        let watcher = FileWatcher::new(None).unwrap();
        assert!(!watcher.should_index(Path::new("/tmp/some_file.jpg")));
        assert!(!watcher.should_index(Path::new("/var/folders/abc/def/T/file.png")));
    }

    #[test]
    fn ordinary_media_files_are_indexable() {
        let watcher = FileWatcher::new(None).unwrap();
        assert!(watcher.should_index(Path::new("/home/user/photos/cat.jpg")));
        assert!(watcher.should_index(Path::new("/home/user/videos/clip.mp4")));
    }

    #[test]
    fn merge_event_kinds_follows_the_documented_table() {
        assert_eq!(
            merge_event_kinds(FileEventKind::Created, FileEventKind::Modified),
            FileEventKind::Created
        );
        assert_eq!(
            merge_event_kinds(FileEventKind::Created, FileEventKind::Deleted),
            FileEventKind::Deleted
        );
        assert_eq!(
            merge_event_kinds(FileEventKind::Deleted, FileEventKind::Created),
            FileEventKind::Modified
        );
        assert_eq!(
            merge_event_kinds(FileEventKind::Modified, FileEventKind::Modified),
            FileEventKind::Modified
        );
    }

    #[test]
    fn watch_then_unwatch_round_trips_watched_paths() {
        let mut watcher = FileWatcher::new(None).unwrap();
        let temp_dir = tempfile::TempDir::new().unwrap();

        watcher.watch(temp_dir.path()).unwrap();
        assert_eq!(watcher.watched_paths().len(), 1);

        watcher.unwatch(temp_dir.path()).unwrap();
        assert!(watcher.watched_paths().is_empty());
    }

    #[test]
    fn watch_prevents_duplicate_paths() {
        let mut watcher = FileWatcher::new(None).unwrap();
        let temp_dir = tempfile::TempDir::new().unwrap();

        watcher.watch(temp_dir.path()).unwrap();
        watcher.watch(temp_dir.path()).unwrap();
        assert_eq!(watcher.watched_paths().len(), 1);
    }

    #[test]
    fn data_dir_is_never_indexed() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let watcher = FileWatcher::new(Some(data_dir.clone())).unwrap();
        assert!(!watcher.should_index(&data_dir.join("catalog.db")));
    }
}
