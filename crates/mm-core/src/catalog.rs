//! Catalog (C6): the authoritative relational store (SQLite) holding File,
//! Segment, the Vector->Segment map, Task and Person rows.
//!
//! Schema creation and forward-only migrations run once at open time,
//! checking `sqlite_master`/`pragma_table_info` before altering an existing
//! installation in place, the same pattern the SQLite-backed store this
//! grew from uses for its own schema evolution.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::StorageError;
use crate::model::{File, Modality, Segment, Task, TaskKind, TaskStatus};

const SCHEMA_VERSION: i64 = 1;

pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn open(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        let catalog = Self { conn };
        catalog.migrate()?;
        Ok(catalog)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::open(Connection::open_in_memory()?)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);",
        )?;
        let current: Option<i64> = self
            .conn
            .query_row("SELECT version FROM schema_meta LIMIT 1", [], |r| r.get(0))
            .optional()?;

        if current.is_none() {
            self.create_v1_schema()?;
            self.conn.execute(
                "INSERT INTO schema_meta (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Ok(())
    }

    fn create_v1_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                file_id TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL UNIQUE,
                path TEXT NOT NULL,
                ref_paths TEXT NOT NULL DEFAULT '[]',
                size INTEGER NOT NULL,
                file_type TEXT NOT NULL,
                mtime TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS segments (
                segment_id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL REFERENCES files(file_id),
                modality TEXT NOT NULL,
                seq INTEGER NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER NOT NULL,
                quality REAL NOT NULL,
                extra TEXT,
                UNIQUE(file_id, modality, seq)
            );

            CREATE TABLE IF NOT EXISTS vector_segment_map (
                vector_id TEXT PRIMARY KEY,
                segment_id TEXT NOT NULL REFERENCES segments(segment_id),
                collection TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                target TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                depends_on TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(kind, target, status)
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority);

            CREATE TABLE IF NOT EXISTS persons (
                person_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                aliases TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS person_files (
                person_id TEXT NOT NULL REFERENCES persons(person_id),
                file_id TEXT NOT NULL REFERENCES files(file_id),
                PRIMARY KEY (person_id, file_id)
            );",
        )?;
        Ok(())
    }

    pub fn get_file_by_hash(&self, content_hash: &str) -> Result<Option<File>, StorageError> {
        self.conn
            .query_row(
                "SELECT file_id, content_hash, path, ref_paths, size, file_type, mtime, created_at
                 FROM files WHERE content_hash = ?1",
                params![content_hash],
                row_to_file,
            )
            .optional()
            .map_err(StorageError::from)
    }

    pub fn get_file_by_id(&self, file_id: Uuid) -> Result<Option<File>, StorageError> {
        self.conn
            .query_row(
                "SELECT file_id, content_hash, path, ref_paths, size, file_type, mtime, created_at
                 FROM files WHERE file_id = ?1",
                params![file_id.to_string()],
                row_to_file,
            )
            .optional()
            .map_err(StorageError::from)
    }

    /// Insert a file plus its segments (and vector->segment mappings) in one
    /// SQLite SAVEPOINT, the same batched-insert-with-rollback pattern the
    /// storage layer this grew from uses for its own batch inserts. A crash
    /// mid-task leaves no orphan rows.
    pub fn insert_file_with_segments(
        &mut self,
        file: &File,
        segments: &[Segment],
        vector_mappings: &[(Uuid, Uuid, String)], // (vector_id, segment_id, collection)
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO files (file_id, content_hash, path, ref_paths, size, file_type, mtime, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(content_hash) DO UPDATE SET path=excluded.path, ref_paths=excluded.ref_paths",
            params![
                file.file_id.to_string(),
                file.content_hash,
                file.path,
                serde_json::to_string(&file.ref_paths).unwrap_or_default(),
                file.size as i64,
                file.file_type,
                file.mtime.to_rfc3339(),
                file.created_at.to_rfc3339(),
            ],
        )?;

        for segment in segments {
            tx.execute(
                "INSERT INTO segments (segment_id, file_id, modality, seq, start_ms, end_ms, quality, extra)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    segment.segment_id.to_string(),
                    segment.file_id.to_string(),
                    segment.modality.as_str(),
                    segment.seq,
                    segment.start_ms,
                    segment.end_ms,
                    segment.quality,
                    segment.extra.as_ref().map(|v| v.to_string()),
                ],
            )?;
        }

        for (vector_id, segment_id, collection) in vector_mappings {
            tx.execute(
                "INSERT INTO vector_segment_map (vector_id, segment_id, collection) VALUES (?1, ?2, ?3)",
                params![vector_id.to_string(), segment_id.to_string(), collection],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn add_ref_path(&self, file_id: Uuid, path: &str) -> Result<(), StorageError> {
        let existing: String = self.conn.query_row(
            "SELECT ref_paths FROM files WHERE file_id = ?1",
            params![file_id.to_string()],
            |r| r.get(0),
        )?;
        let mut paths: Vec<String> = serde_json::from_str(&existing).unwrap_or_default();
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
        self.conn.execute(
            "UPDATE files SET ref_paths = ?1 WHERE file_id = ?2",
            params![serde_json::to_string(&paths).unwrap_or_default(), file_id.to_string()],
        )?;
        Ok(())
    }

    pub fn list_segments_by_file(&self, file_id: Uuid) -> Result<Vec<Segment>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT segment_id, file_id, modality, seq, start_ms, end_ms, quality, extra
             FROM segments WHERE file_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![file_id.to_string()], row_to_segment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn resolve_vector_to_timestamp(
        &self,
        vector_id: Uuid,
    ) -> Result<Option<(Uuid, i64, i64)>, StorageError> {
        self.conn
            .query_row(
                "SELECT s.file_id, s.start_ms, s.end_ms
                 FROM vector_segment_map vm
                 JOIN segments s ON s.segment_id = vm.segment_id
                 WHERE vm.vector_id = ?1",
                params![vector_id.to_string()],
                |row| {
                    let file_id: String = row.get(0)?;
                    Ok((
                        Uuid::parse_str(&file_id).unwrap_or_default(),
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(StorageError::from)
    }

    /// Registers a person by name, idempotent on exact name match so
    /// re-registration just returns the existing id.
    pub fn register_person(&self, name: &str, aliases: &[String]) -> Result<Uuid, StorageError> {
        if let Some(existing) = self
            .conn
            .query_row(
                "SELECT person_id FROM persons WHERE name = ?1",
                params![name],
                |row| row.get::<_, String>(0),
            )
            .optional()?
        {
            return Ok(Uuid::parse_str(&existing).unwrap_or_default());
        }

        let person_id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO persons (person_id, name, aliases) VALUES (?1, ?2, ?3)",
            params![person_id.to_string(), name, serde_json::to_string(aliases).unwrap_or_default()],
        )?;
        Ok(person_id)
    }

    /// Records that `person_id` appears in `file_id`, e.g. after a reference
    /// face match during ingestion or an explicit tagging call.
    pub fn tag_person_in_file(&self, person_id: Uuid, file_id: Uuid) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO person_files (person_id, file_id) VALUES (?1, ?2)",
            params![person_id.to_string(), file_id.to_string()],
        )?;
        Ok(())
    }

    /// Total number of distinct files registered in the catalog, used to
    /// report index progress without scanning the filesystem.
    pub fn count_files(&self) -> Result<u64, StorageError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .map(|n: i64| n as u64)
            .map_err(StorageError::from)
    }

    pub fn get_files_containing_person(&self, name_or_alias: &str) -> Result<Vec<Uuid>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT pf.file_id FROM person_files pf
             JOIN persons p ON p.person_id = pf.person_id
             WHERE p.name = ?1 OR p.aliases LIKE ?2",
        )?;
        let like = format!("%{name_or_alias}%");
        let rows = stmt
            .query_map(params![name_or_alias, like], |row| {
                let id: String = row.get(0)?;
                Ok(id)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|id| Uuid::parse_str(&id).ok())
            .collect())
    }

    // --- Task queue rows live in this same database, per §4.7 ---

    pub fn upsert_task(&self, task: &Task) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO tasks (task_id, kind, target, priority, status, attempts, last_error, depends_on, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(kind, target, status) DO UPDATE SET priority = MAX(priority, excluded.priority), updated_at = excluded.updated_at",
            params![
                task.task_id.to_string(),
                task.kind.as_str(),
                task.target,
                task.priority,
                task.status.as_str(),
                task.attempts,
                task.last_error,
                serde_json::to_string(&task.depends_on).unwrap_or_default(),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_pending_duplicate(
        &self,
        kind: TaskKind,
        target: &str,
    ) -> Result<Option<Task>, StorageError> {
        self.conn
            .query_row(
                "SELECT task_id, kind, target, priority, status, attempts, last_error, depends_on, created_at, updated_at
                 FROM tasks WHERE kind = ?1 AND target = ?2 AND status IN ('pending', 'running')",
                params![kind.as_str(), target],
                row_to_task,
            )
            .optional()
            .map_err(StorageError::from)
    }

    pub fn get_task(&self, task_id: Uuid) -> Result<Option<Task>, StorageError> {
        self.conn
            .query_row(
                "SELECT task_id, kind, target, priority, status, attempts, last_error, depends_on, created_at, updated_at
                 FROM tasks WHERE task_id = ?1",
                params![task_id.to_string()],
                row_to_task,
            )
            .optional()
            .map_err(StorageError::from)
    }

    pub fn take_next_pending(&self) -> Result<Option<Task>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, kind, target, priority, status, attempts, last_error, depends_on, created_at, updated_at
             FROM tasks WHERE status = 'pending' ORDER BY priority ASC, created_at ASC",
        )?;
        let mut rows = stmt.query_map([], row_to_task)?;
        while let Some(row) = rows.next() {
            let task = row?;
            let deps_terminal = task.depends_on.iter().all(|dep| {
                self.get_task(*dep)
                    .ok()
                    .flatten()
                    .map(|t| t.status.is_terminal())
                    .unwrap_or(true)
            });
            if deps_terminal {
                self.conn.execute(
                    "UPDATE tasks SET status = 'running', updated_at = ?1 WHERE task_id = ?2",
                    params![Utc::now().to_rfc3339(), task.task_id.to_string()],
                )?;
                return Ok(Some(Task {
                    status: TaskStatus::Running,
                    ..task
                }));
            }
        }
        Ok(None)
    }

    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        kind: Option<TaskKind>,
        limit: usize,
    ) -> Result<Vec<Task>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, kind, target, priority, status, attempts, last_error, depends_on, created_at, updated_at
             FROM tasks ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .filter(|t| kind.map_or(true, |k| t.kind == k))
            .collect())
    }
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<File> {
    let file_id: String = row.get(0)?;
    let ref_paths: String = row.get(3)?;
    let mtime: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    Ok(File {
        file_id: Uuid::parse_str(&file_id).unwrap_or_default(),
        content_hash: row.get(1)?,
        path: row.get(2)?,
        ref_paths: serde_json::from_str(&ref_paths).unwrap_or_default(),
        size: row.get::<_, i64>(4)? as u64,
        file_type: row.get(5)?,
        mtime: parse_rfc3339(&mtime),
        created_at: parse_rfc3339(&created_at),
    })
}

fn row_to_segment(row: &rusqlite::Row) -> rusqlite::Result<Segment> {
    let segment_id: String = row.get(0)?;
    let file_id: String = row.get(1)?;
    let modality: String = row.get(2)?;
    let extra: Option<String> = row.get(7)?;
    Ok(Segment {
        segment_id: Uuid::parse_str(&segment_id).unwrap_or_default(),
        file_id: Uuid::parse_str(&file_id).unwrap_or_default(),
        modality: Modality::parse(&modality).unwrap_or(Modality::Text),
        seq: row.get(3)?,
        start_ms: row.get(4)?,
        end_ms: row.get(5)?,
        quality: row.get(6)?,
        extra: extra.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let task_id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let status: String = row.get(4)?;
    let depends_on: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(Task {
        task_id: Uuid::parse_str(&task_id).unwrap_or_default(),
        kind: TaskKind::parse(&kind).unwrap_or(TaskKind::IngestFile),
        target: row.get(2)?,
        priority: row.get(3)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        attempts: row.get::<_, i64>(5)? as u32,
        last_error: row.get(6)?,
        depends_on: serde_json::from_str::<Vec<String>>(&depends_on)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect(),
        created_at: parse_rfc3339(&created_at),
        updated_at: parse_rfc3339(&updated_at),
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}
