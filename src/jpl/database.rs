//! SQLite-backed storage for [`Job`]s and their [`WorkItem`] lists.
//!
//! Every public method opens a fresh connection, runs inside a transaction,
//! and closes it again — there is no long-lived connection to go stale
//! across a suspend/resume cycle. Per the crash-recovery design, a failure
//! here must never take down an in-progress operation: every method other
//! than [`Jpl::open`] swallows its own SQL errors, logs them, and no-ops,
//! letting the in-memory operation continue with `ev_nodb` semantics.

use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::job::{ConflictPolicy, DirFinalizeEntry, Job, JobStatus, Operation, WorkItem, WorkItemStatus};

#[derive(Debug)]
pub enum JplError {
    Open { path: PathBuf, message: String },
}

impl fmt::Display for JplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JplError::Open { path, message } => write!(f, "cannot open job database {}: {message}", path.display()),
        }
    }
}

impl std::error::Error for JplError {}

/// Handle to the job database. Cheap to clone (just a path).
#[derive(Debug, Clone)]
pub struct Jpl {
    path: PathBuf,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY,
    operation TEXT NOT NULL,
    cwd TEXT NOT NULL,
    dest TEXT,
    on_conflict TEXT,
    scan_error TEXT NOT NULL DEFAULT '[]',
    scan_skipped TEXT NOT NULL DEFAULT '[]',
    dir_list TEXT NOT NULL DEFAULT '[]',
    rename_dir_stack TEXT NOT NULL DEFAULT '[]',
    skip_dir_stack TEXT NOT NULL DEFAULT '[]',
    replace_first_path INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    file TEXT NOT NULL,
    is_dir INTEGER NOT NULL,
    is_symlink INTEGER NOT NULL,
    status TEXT NOT NULL,
    message TEXT,
    cur_target TEXT,
    target_is_dir INTEGER NOT NULL DEFAULT 0,
    target_is_symlink INTEGER NOT NULL DEFAULT 0
);
";

impl Jpl {
    /// Opens (creating if necessary) the database at `path` and ensures the
    /// schema exists. This is the one call allowed to fail loudly; callers
    /// map a failure here onto `--nodb` behavior for the rest of the run.
    pub fn open(path: &Path) -> Result<Self, JplError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(|e| JplError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(|e| JplError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        conn.execute_batch(SCHEMA).map_err(|e| JplError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self { path: path.to_path_buf() })
    }

    /// A handle that can never open a connection, for callers that have
    /// already determined the job database is unavailable (`--nodb`, or a
    /// failed [`Jpl::open`]) but still need a `Jpl` value to satisfy a
    /// worker's constructor. Every method behaves exactly as it does for
    /// any other database failure: it logs and no-ops.
    pub fn detached() -> Self {
        Self { path: PathBuf::from("\0") }
    }

    fn connect(&self) -> Option<Connection> {
        match Connection::open(&self.path) {
            Ok(conn) => {
                if conn.execute_batch("PRAGMA foreign_keys = ON;").is_err() {
                    log::warn!("jpl: failed to enable foreign keys on {}", self.path.display());
                }
                Some(conn)
            }
            Err(err) => {
                log::warn!("jpl: failed to open {}: {err}", self.path.display());
                None
            }
        }
    }

    /// Inserts a new job row and one file row per work item. Decorates
    /// each item with its assigned row id and `ToDo` status. On any SQL
    /// failure, the items are returned decorated with synthetic in-memory
    /// ids (negative, so they can never collide with a real row) and the
    /// job silently runs without persistence.
    #[allow(clippy::too_many_arguments)]
    pub fn new_job(
        &self,
        operation: Operation,
        cwd: &Path,
        destination: Option<&Path>,
        conflict_policy: Option<ConflictPolicy>,
        scan_error: &[(PathBuf, String)],
        scan_skipped: &[(PathBuf, String)],
        mut items: Vec<WorkItem>,
    ) -> (i64, Vec<WorkItem>) {
        let Some(mut conn) = self.connect() else {
            for (i, item) in items.iter_mut().enumerate() {
                item.id = Some(-(i as i64 + 1));
            }
            return (-1, items);
        };

        let result = (|| -> rusqlite::Result<(i64, Vec<WorkItem>)> {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO jobs (operation, cwd, dest, on_conflict, scan_error, scan_skipped, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    operation_str(operation),
                    cwd.to_string_lossy(),
                    destination.map(|d| d.to_string_lossy().to_string()),
                    conflict_policy.map(conflict_policy_str),
                    serde_json::to_string(scan_error).unwrap_or_else(|_| "[]".to_string()),
                    serde_json::to_string(scan_skipped).unwrap_or_else(|_| "[]".to_string()),
                    job_status_str(JobStatus::InProgress),
                ],
            )?;
            let job_id = tx.last_insert_rowid();

            for item in items.iter_mut() {
                tx.execute(
                    "INSERT INTO files (job_id, file, is_dir, is_symlink, status, message, cur_target, target_is_dir, target_is_symlink)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        job_id,
                        item.file.to_string_lossy(),
                        item.is_dir,
                        item.is_symlink,
                        work_item_status_str(item.status),
                        item.message,
                        item.cur_target.as_ref().map(|p| p.to_string_lossy().to_string()),
                        item.target_is_dir,
                        item.target_is_symlink,
                    ],
                )?;
                item.id = Some(tx.last_insert_rowid());
            }
            tx.commit()?;
            Ok((job_id, items))
        })();

        match result {
            Ok((job_id, items)) => (job_id, items),
            Err(err) => {
                log::warn!("jpl: new_job failed, continuing without persistence: {err}");
                for (i, item) in items.iter_mut().enumerate() {
                    item.id = Some(-(i as i64 + 1));
                }
                (-1, items)
            }
        }
    }

    /// Rewrites one file row's status, message, and target fields.
    pub fn update_file(&self, item: &WorkItem) {
        let Some(id) = item.id else { return };
        if id < 0 {
            return;
        }
        let Some(conn) = self.connect() else { return };
        let outcome = conn.execute(
            "UPDATE files SET status = ?1, message = ?2, cur_target = ?3, target_is_dir = ?4, target_is_symlink = ?5 WHERE id = ?6",
            rusqlite::params![
                work_item_status_str(item.status),
                item.message,
                item.cur_target.as_ref().map(|p| p.to_string_lossy().to_string()),
                item.target_is_dir,
                item.target_is_symlink,
                id,
            ],
        );
        if let Err(err) = outcome {
            log::warn!("jpl: update_file({id}) failed: {err}");
        }
    }

    pub fn set_job_status(&self, job_id: i64, status: JobStatus) {
        if job_id < 0 {
            return;
        }
        let Some(conn) = self.connect() else { return };
        if let Err(err) = conn.execute(
            "UPDATE jobs SET status = ?1 WHERE id = ?2",
            rusqlite::params![job_status_str(status), job_id],
        ) {
            log::warn!("jpl: set_job_status({job_id}) failed: {err}");
        }
    }

    pub fn delete_job(&self, job_id: i64) {
        if job_id < 0 {
            return;
        }
        let Some(conn) = self.connect() else { return };
        if let Err(err) = conn.execute("DELETE FROM jobs WHERE id = ?1", rusqlite::params![job_id]) {
            log::warn!("jpl: delete_job({job_id}) failed: {err}");
        }
    }

    pub fn set_dir_list(&self, job_id: i64, dir_list: &[DirFinalizeEntry]) {
        self.set_job_json_column(job_id, "dir_list", dir_list);
    }

    pub fn get_dir_list(&self, job_id: i64) -> Vec<DirFinalizeEntry> {
        self.get_job_json_column(job_id, "dir_list").unwrap_or_default()
    }

    pub fn set_rename_dir_stack(&self, job_id: i64, stack: &[(PathBuf, PathBuf)]) {
        self.set_job_json_column(job_id, "rename_dir_stack", stack);
    }

    pub fn get_rename_dir_stack(&self, job_id: i64) -> Vec<(PathBuf, PathBuf)> {
        self.get_job_json_column(job_id, "rename_dir_stack").unwrap_or_default()
    }

    pub fn set_skip_dir_stack(&self, job_id: i64, stack: &[PathBuf]) {
        self.set_job_json_column(job_id, "skip_dir_stack", stack);
    }

    pub fn get_skip_dir_stack(&self, job_id: i64) -> Vec<PathBuf> {
        self.get_job_json_column(job_id, "skip_dir_stack").unwrap_or_default()
    }

    pub fn set_replace_first_path(&self, job_id: i64, value: bool) {
        if job_id < 0 {
            return;
        }
        let Some(conn) = self.connect() else { return };
        if let Err(err) = conn.execute(
            "UPDATE jobs SET replace_first_path = ?1 WHERE id = ?2",
            rusqlite::params![value, job_id],
        ) {
            log::warn!("jpl: set_replace_first_path({job_id}) failed: {err}");
        }
    }

    pub fn get_replace_first_path(&self, job_id: i64) -> bool {
        if job_id < 0 {
            return false;
        }
        let Some(conn) = self.connect() else { return false };
        conn.query_row(
            "SELECT replace_first_path FROM jobs WHERE id = ?1",
            rusqlite::params![job_id],
            |row| row.get::<_, bool>(0),
        )
        .unwrap_or(false)
    }

    fn set_job_json_column<T: Serialize>(&self, job_id: i64, column: &'static str, value: &T) {
        if job_id < 0 {
            return;
        }
        let Some(conn) = self.connect() else { return };
        let Ok(json) = serde_json::to_string(value) else {
            log::warn!("jpl: failed to serialize {column} for job {job_id}");
            return;
        };
        let sql = format!("UPDATE jobs SET {column} = ?1 WHERE id = ?2");
        if let Err(err) = conn.execute(&sql, rusqlite::params![json, job_id]) {
            log::warn!("jpl: set {column} for job {job_id} failed: {err}");
        }
    }

    fn get_job_json_column<T: for<'de> Deserialize<'de>>(&self, job_id: i64, column: &'static str) -> Option<T> {
        if job_id < 0 {
            return None;
        }
        let conn = self.connect()?;
        let sql = format!("SELECT {column} FROM jobs WHERE id = ?1");
        let raw: String = conn
            .query_row(&sql, rusqlite::params![job_id], |row| row.get(0))
            .inspect_err(|err| log::warn!("jpl: get {column} for job {job_id} failed: {err}"))
            .ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// All jobs still `InProgress`, for the restart-time pending-jobs
    /// prompt.
    pub fn get_jobs(&self) -> Vec<Job> {
        let Some(conn) = self.connect() else { return Vec::new() };
        let result = (|| -> rusqlite::Result<Vec<Job>> {
            let mut stmt = conn.prepare(
                "SELECT id, operation, cwd, dest, on_conflict, scan_error, scan_skipped, dir_list, rename_dir_stack, skip_dir_stack, replace_first_path, status
                 FROM jobs WHERE status = ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![job_status_str(JobStatus::InProgress)], row_to_job)?;
            rows.collect()
        })();
        result.unwrap_or_else(|err| {
            log::warn!("jpl: get_jobs failed: {err}");
            Vec::new()
        })
    }

    /// Reconstructs the persisted work list for `job_id`, in insertion
    /// order.
    pub fn get_file_list(&self, job_id: i64) -> Vec<WorkItem> {
        if job_id < 0 {
            return Vec::new();
        }
        let Some(conn) = self.connect() else { return Vec::new() };
        let result = (|| -> rusqlite::Result<Vec<WorkItem>> {
            let mut stmt = conn.prepare(
                "SELECT id, file, is_dir, is_symlink, status, message, cur_target, target_is_dir, target_is_symlink
                 FROM files WHERE job_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(rusqlite::params![job_id], row_to_work_item)?;
            rows.collect()
        })();
        result.unwrap_or_else(|err| {
            log::warn!("jpl: get_file_list({job_id}) failed: {err}");
            Vec::new()
        })
    }
}

fn row_to_work_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkItem> {
    let file: String = row.get(1)?;
    let cur_target: Option<String> = row.get(6)?;
    Ok(WorkItem {
        id: Some(row.get(0)?),
        file: PathBuf::from(file),
        is_dir: row.get(2)?,
        is_symlink: row.get(3)?,
        status: parse_work_item_status(&row.get::<_, String>(4)?),
        message: row.get(5)?,
        cur_target: cur_target.map(PathBuf::from),
        target_is_dir: row.get(7)?,
        target_is_symlink: row.get(8)?,
    })
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let dest: Option<String> = row.get(3)?;
    let on_conflict: Option<String> = row.get(4)?;
    let scan_error: String = row.get(5)?;
    let scan_skipped: String = row.get(6)?;
    let dir_list: String = row.get(7)?;
    let rename_dir_stack: String = row.get(8)?;
    let skip_dir_stack: String = row.get(9)?;
    Ok(Job {
        id: row.get(0)?,
        operation: parse_operation(&row.get::<_, String>(1)?),
        cwd: PathBuf::from(row.get::<_, String>(2)?),
        destination: dest.map(PathBuf::from),
        conflict_policy: on_conflict.as_deref().map(parse_conflict_policy),
        scan_error: serde_json::from_str(&scan_error).unwrap_or_default(),
        scan_skipped: serde_json::from_str(&scan_skipped).unwrap_or_default(),
        dir_list: serde_json::from_str(&dir_list).unwrap_or_default(),
        rename_dir_stack: serde_json::from_str(&rename_dir_stack).unwrap_or_default(),
        skip_dir_stack: serde_json::from_str(&skip_dir_stack).unwrap_or_default(),
        replace_first_path: row.get(10)?,
        status: parse_job_status(&row.get::<_, String>(11)?),
    })
}

fn operation_str(op: Operation) -> &'static str {
    match op {
        Operation::Copy => "copy",
        Operation::Move => "move",
        Operation::Delete => "delete",
    }
}

fn parse_operation(s: &str) -> Operation {
    match s {
        "move" => Operation::Move,
        "delete" => Operation::Delete,
        _ => Operation::Copy,
    }
}

fn conflict_policy_str(policy: ConflictPolicy) -> &'static str {
    match policy {
        ConflictPolicy::Overwrite => "overwrite",
        ConflictPolicy::Skip => "skip",
        ConflictPolicy::RenameExisting => "rename_existing",
        ConflictPolicy::RenameCopy => "rename_copy",
    }
}

fn parse_conflict_policy(s: &str) -> ConflictPolicy {
    match s {
        "skip" => ConflictPolicy::Skip,
        "rename_copy" => ConflictPolicy::RenameCopy,
        "rename_existing" => ConflictPolicy::RenameExisting,
        _ => ConflictPolicy::Overwrite,
    }
}

fn job_status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::InProgress => "in_progress",
        JobStatus::Done => "done",
        JobStatus::Aborted => "aborted",
    }
}

fn parse_job_status(s: &str) -> JobStatus {
    match s {
        "done" => JobStatus::Done,
        "aborted" => JobStatus::Aborted,
        _ => JobStatus::InProgress,
    }
}

fn work_item_status_str(status: WorkItemStatus) -> &'static str {
    match status {
        WorkItemStatus::ToDo => "to_do",
        WorkItemStatus::InProgress => "in_progress",
        WorkItemStatus::Done => "done",
        WorkItemStatus::Error => "error",
        WorkItemStatus::Skipped => "skipped",
        WorkItemStatus::Aborted => "aborted",
    }
}

fn parse_work_item_status(s: &str) -> WorkItemStatus {
    match s {
        "in_progress" => WorkItemStatus::InProgress,
        "done" => WorkItemStatus::Done,
        "error" => WorkItemStatus::Error,
        "skipped" => WorkItemStatus::Skipped,
        "aborted" => WorkItemStatus::Aborted,
        _ => WorkItemStatus::ToDo,
    }
}
