//! Copy/Move Executor: walks a sorted work list, applies the conflict
//! policy, performs each action, and finalizes directories in post-order
//! once every descendant has been attempted.

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use filetime::FileTime;

use crate::jpl::{ConflictPolicy, DirFinalizeEntry, Job, Jpl, JobStatus, Operation, WorkItem, WorkItemStatus};
use crate::progress::{entries_from_paths, ControlEvents, ControlSignal, CopyMoveSample, FinalResult, ProgressMessage, ProgressProducer, ReportEntry};

use super::block_copy::{copy_file, CopyOutcome, CopySignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Copy,
    Move,
}

pub struct CopyMoveExecutor {
    jpl: Jpl,
    job_id: i64,
    mode: Mode,
    cwd: PathBuf,
    destination: PathBuf,
    conflict_policy: ConflictPolicy,
    replace_first_path: bool,
    control: Arc<ControlEvents>,
    progress: ProgressProducer,
    rename_dir_stack: Vec<(PathBuf, PathBuf)>,
    skip_dir_stack: Vec<PathBuf>,
    dir_list: Vec<DirFinalizeEntry>,
    scan_error: Vec<ReportEntry>,
    scan_skipped: Vec<ReportEntry>,
}

impl CopyMoveExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jpl: Jpl,
        job_id: i64,
        mode: Mode,
        cwd: PathBuf,
        destination: PathBuf,
        conflict_policy: ConflictPolicy,
        replace_first_path: bool,
        control: Arc<ControlEvents>,
        progress: ProgressProducer,
    ) -> Self {
        Self {
            jpl,
            job_id,
            mode,
            cwd,
            destination,
            conflict_policy,
            replace_first_path,
            control,
            progress,
            rename_dir_stack: Vec::new(),
            skip_dir_stack: Vec::new(),
            dir_list: Vec::new(),
            scan_error: Vec::new(),
            scan_skipped: Vec::new(),
        }
    }

    /// Resumes state (rename/skip stacks, finalize list) previously
    /// persisted for this job, used when the Controller reopens a job on
    /// restart.
    pub fn resume_from(mut self, job: &Job) -> Self {
        self.rename_dir_stack = job.rename_dir_stack.clone();
        self.skip_dir_stack = job.skip_dir_stack.clone();
        self.dir_list = job.dir_list.clone();
        self.scan_error = entries_from_paths(&job.scan_error);
        self.scan_skipped = entries_from_paths(&job.scan_skipped);
        self
    }

    /// Carries the Scanner's `scan_error`/`scan_skipped` side-bands into the
    /// final report so they surface alongside per-file outcomes.
    pub fn seed_scan_side_bands(&mut self, scan_error: &[(PathBuf, String)], scan_skipped: &[(PathBuf, String)]) {
        self.scan_error = entries_from_paths(scan_error);
        self.scan_skipped = entries_from_paths(scan_skipped);
    }

    /// Runs the job to completion. `items` must be sorted ascending by
    /// path (parents before children) by the caller.
    pub fn run(mut self, mut items: Vec<WorkItem>) -> FinalResult {
        let start = Instant::now();
        let mut result = FinalResult {
            error: self.scan_error.clone(),
            skipped: self.scan_skipped.clone(),
            ..FinalResult::default()
        };
        let mut files_done: u64 = 0;
        let mut bytes_done: u64 = 0;

        for item in items.iter_mut() {
            if matches!(item.status, WorkItemStatus::Done | WorkItemStatus::Error | WorkItemStatus::Skipped) {
                push_outcome(&mut result, item);
                if item.status == WorkItemStatus::Done {
                    files_done += 1;
                }
                continue;
            }

            match self.control.poll() {
                ControlSignal::Interrupt => return result,
                ControlSignal::Abort => {
                    item.status = WorkItemStatus::Aborted;
                    self.jpl.update_file(item);
                    result.aborted.push(entry_for(item, ""));
                    self.jpl.set_job_status(self.job_id, JobStatus::Aborted);
                    return result;
                }
                ControlSignal::Skip => {
                    item.status = WorkItemStatus::Skipped;
                    item.message = Some("Skipped by user".to_string());
                    self.jpl.update_file(item);
                    result.skipped.push(entry_for(item, "Skipped by user"));
                    continue;
                }
                ControlSignal::Continue => {}
            }

            let resuming = item.status == WorkItemStatus::InProgress && item.cur_target.is_some();
            let mut warning = if resuming { "Resumed".to_string() } else { String::new() };

            let skip_due_to_mv_rename = self.skip_dir_stack.iter().any(|skipped| {
                item.file == *skipped || item.file.starts_with(skipped)
            });
            if skip_due_to_mv_rename {
                item.status = WorkItemStatus::Done;
                item.message = Some("Moved with parent directory".to_string());
                self.jpl.update_file(item);
                push_outcome(&mut result, item);
                files_done += 1;
                continue;
            }

            let mut target = if resuming {
                item.cur_target.clone().unwrap()
            } else {
                self.compute_target(&item.file)
            };

            let mut source = item.file.clone();
            if !resuming {
                match self.resolve_conflict(&item.file, &target, item.is_dir) {
                    ConflictOutcome::Proceed { new_target, new_source, note } => {
                        target = new_target;
                        warning = note;
                        if let Some(rebound) = new_source {
                            source = rebound;
                        }
                    }
                    ConflictOutcome::Skip(message) => {
                        item.status = WorkItemStatus::Skipped;
                        item.message = Some(message.clone());
                        self.jpl.update_file(item);
                        result.skipped.push(entry_for(item, &message));
                        continue;
                    }
                }
            }

            item.status = WorkItemStatus::InProgress;
            item.cur_target = Some(target.clone());
            if !warning.is_empty() {
                item.message = Some(warning.clone());
            }
            self.jpl.update_file(item);

            let outcome = self.perform(item, &source, &target, &start, &mut bytes_done);

            match outcome {
                PerformOutcome::Done => {
                    item.status = WorkItemStatus::Done;
                    if !warning.is_empty() && item.message.as_deref() != Some(warning.as_str()) {
                        item.message = Some(warning);
                    }
                    files_done += 1;
                }
                PerformOutcome::Error(message) => {
                    item.status = WorkItemStatus::Error;
                    item.message = Some(message);
                }
                PerformOutcome::Skipped(message) => {
                    item.status = WorkItemStatus::Skipped;
                    item.message = Some(message);
                }
                PerformOutcome::Aborted => {
                    item.status = WorkItemStatus::Aborted;
                    self.jpl.update_file(item);
                    result.aborted.push(entry_for(item, ""));
                    self.jpl.set_job_status(self.job_id, JobStatus::Aborted);
                    return result;
                }
                PerformOutcome::Interrupted => {
                    self.jpl.update_file(item);
                    return result;
                }
            }

            self.jpl.update_file(item);
            push_outcome(&mut result, item);

            self.progress.push_throttled(ProgressMessage::CopyMove(CopyMoveSample {
                cur_source: item.file.to_string_lossy().to_string(),
                cur_target: target.to_string_lossy().to_string(),
                cur_size: 0,
                cur_bytes: 0,
                cur_time: 0.0,
                files: files_done,
                bytes: bytes_done,
                time: start.elapsed().as_secs_f64(),
            }));
        }

        self.finalize_directories();
        self.jpl.set_job_status(self.job_id, JobStatus::Done);
        self.progress.push(ProgressMessage::Done(result.clone()));
        result
    }

    fn compute_target(&self, source: &Path) -> PathBuf {
        let relative = source.strip_prefix(&self.cwd).unwrap_or(source);
        let relative = if self.replace_first_path {
            let mut components = relative.components();
            components.next();
            components.as_path().to_path_buf()
        } else {
            relative.to_path_buf()
        };
        let mut target = self.destination.join(&relative);

        // Outermost-match-wins remap through renamed ancestor directories.
        for (old_target, new_target) in &self.rename_dir_stack {
            if let Ok(rest) = target.strip_prefix(old_target) {
                target = new_target.join(rest);
                break;
            }
        }
        target
    }

    fn resolve_conflict(&mut self, source: &Path, target: &Path, source_is_dir: bool) -> ConflictOutcome {
        let Ok(target_meta) = fs::symlink_metadata(target) else {
            return ConflictOutcome::Proceed { new_target: target.to_path_buf(), new_source: None, note: String::new() };
        };

        if is_same_file(source, target) {
            return match self.conflict_policy {
                ConflictPolicy::RenameExisting => {
                    let renamed = self.rename_aside(target);
                    ConflictOutcome::Proceed {
                        new_target: target.to_path_buf(),
                        new_source: Some(renamed.clone()),
                        note: format!("Renamed to {}", basename(&renamed)),
                    }
                }
                _ => ConflictOutcome::Skip("Same file".to_string()),
            };
        }

        let target_is_dir = target_meta.is_dir();
        let merges_as_directory = source_is_dir && target_is_dir;

        match self.conflict_policy {
            ConflictPolicy::Overwrite => {
                let note = if !merges_as_directory && !target_is_dir {
                    let _ = fs::remove_file(target);
                    "Overwrite".to_string()
                } else {
                    String::new()
                };
                ConflictOutcome::Proceed { new_target: target.to_path_buf(), new_source: None, note }
            }
            ConflictPolicy::Skip if merges_as_directory => {
                ConflictOutcome::Proceed { new_target: target.to_path_buf(), new_source: None, note: String::new() }
            }
            ConflictPolicy::Skip => ConflictOutcome::Skip("Target exists".to_string()),
            ConflictPolicy::RenameExisting => {
                let renamed = self.rename_aside(target);
                ConflictOutcome::Proceed {
                    new_target: target.to_path_buf(),
                    new_source: None,
                    note: format!("Renamed to {}", basename(&renamed)),
                }
            }
            ConflictPolicy::RenameCopy => {
                let new_target = self.next_free_name(target, "rnrnew");
                if source_is_dir {
                    self.rename_dir_stack.push((target.to_path_buf(), new_target.clone()));
                }
                ConflictOutcome::Proceed {
                    new_target: new_target.clone(),
                    new_source: None,
                    note: format!("Renamed to {}", basename(&new_target)),
                }
            }
        }
    }

    fn rename_aside(&self, target: &Path) -> PathBuf {
        let renamed = self.next_free_name(target, "rnrsave");
        let _ = fs::rename(target, &renamed);
        renamed
    }

    fn next_free_name(&self, base: &Path, suffix: &str) -> PathBuf {
        let file_name = base.file_name().unwrap_or_default().to_string_lossy().to_string();
        let parent = base.parent().unwrap_or_else(|| Path::new("."));
        for i in 0.. {
            let candidate = parent.join(format!("{file_name}.{suffix}{i}"));
            if fs::symlink_metadata(&candidate).is_err() {
                return candidate;
            }
        }
        unreachable!("exhausted all candidate suffixes")
    }

    fn perform(&mut self, item: &WorkItem, source: &Path, target: &Path, start: &Instant, bytes_done: &mut u64) -> PerformOutcome {
        if self.mode == Mode::Move && !item.is_dir {
            if fs::rename(source, target).is_ok() {
                return PerformOutcome::Done;
            }
            // EXDEV or any other rename failure: fall through to copy+remove.
        } else if self.mode == Mode::Move && item.is_dir {
            if !target.exists() && fs::rename(source, target).is_ok() {
                self.skip_dir_stack.push(source.to_path_buf());
                return PerformOutcome::Done;
            }
        }

        if item.is_symlink {
            return self.recreate_symlink(source, target);
        }
        if item.is_dir {
            return self.create_directory(source, target);
        }

        match copy_file(source, target, &self.control, |_n| {
            self.progress.push_throttled(ProgressMessage::CopyMove(CopyMoveSample {
                cur_source: source.to_string_lossy().to_string(),
                cur_target: target.to_string_lossy().to_string(),
                cur_size: 0,
                cur_bytes: _n,
                cur_time: start.elapsed().as_secs_f64(),
                files: 0,
                bytes: *bytes_done,
                time: start.elapsed().as_secs_f64(),
            }));
        }) {
            Ok(Ok(CopyOutcome::Completed)) => {
                *bytes_done += fs::metadata(source).map(|m| m.len()).unwrap_or(0);
                self.preserve_metadata(source, target);
                if self.mode == Mode::Move {
                    let _ = fs::remove_file(source);
                    fsync_parent(source);
                }
                PerformOutcome::Done
            }
            Ok(Ok(CopyOutcome::Skipped)) => PerformOutcome::Skipped("Skipped by user".to_string()),
            Ok(Err(CopySignal::Abort)) => PerformOutcome::Aborted,
            Ok(Err(CopySignal::Interrupt)) => PerformOutcome::Interrupted,
            Err(err) => PerformOutcome::Error(format!("(copyfile) {err} ({})", err.raw_os_error().unwrap_or(0))),
        }
    }

    fn recreate_symlink(&mut self, source: &Path, target: &Path) -> PerformOutcome {
        match fs::read_link(source) {
            Ok(link_target) => match std::os::unix::fs::symlink(&link_target, target) {
                Ok(()) => {
                    if self.mode == Mode::Move {
                        let _ = fs::remove_file(source);
                    }
                    PerformOutcome::Done
                }
                Err(err) => PerformOutcome::Error(format!("(symlink) {err} ({})", err.raw_os_error().unwrap_or(0))),
            },
            Err(err) => PerformOutcome::Error(format!("(readlink) {err} ({})", err.raw_os_error().unwrap_or(0))),
        }
    }

    fn create_directory(&mut self, source: &Path, target: &Path) -> PerformOutcome {
        let newly_created = !target.exists();
        if newly_created {
            if let Err(err) = fs::create_dir(target) {
                if err.kind() != std::io::ErrorKind::AlreadyExists {
                    return PerformOutcome::Error(format!("(mkdir) {err} ({})", err.raw_os_error().unwrap_or(0)));
                }
            }
        }
        self.dir_list.push(DirFinalizeEntry {
            cur_file: source.to_path_buf(),
            cur_target: target.to_path_buf(),
            newly_created,
        });
        self.jpl.set_dir_list(self.job_id, &self.dir_list);
        PerformOutcome::Done
    }

    fn preserve_metadata(&self, source: &Path, target: &Path) {
        if let Ok(meta) = fs::symlink_metadata(source) {
            lchown(target, meta.uid(), meta.gid());
            let _ = fs::set_permissions(target, fs::Permissions::from_mode(meta.mode()));
            let atime = FileTime::from_last_access_time(&meta);
            let mtime = FileTime::from_last_modification_time(&meta);
            let _ = filetime::set_file_times(target, atime, mtime);
        }
        fsync_parent(target);
    }

    /// Post-order finalization: process the most-recently-created
    /// directories first so a child's timestamps are written before its
    /// parent's mtime is set by its own finalize entry.
    fn finalize_directories(&mut self) {
        for entry in self.dir_list.iter().rev() {
            if entry.newly_created {
                self.preserve_metadata(&entry.cur_file, &entry.cur_target);
            }
            if self.mode == Mode::Move {
                if fs::remove_dir(&entry.cur_file).is_ok() {
                    fsync_parent(&entry.cur_file);
                }
            }
        }
    }
}

enum ConflictOutcome {
    Proceed { new_target: PathBuf, new_source: Option<PathBuf>, note: String },
    Skip(String),
}

fn basename(path: &Path) -> String {
    path.file_name().unwrap_or_default().to_string_lossy().to_string()
}

enum PerformOutcome {
    Done,
    Error(String),
    Skipped(String),
    Aborted,
    Interrupted,
}

fn entry_for(item: &WorkItem, fallback_message: &str) -> ReportEntry {
    ReportEntry {
        file: item.file.to_string_lossy().to_string(),
        message: item.message.clone().unwrap_or_else(|| fallback_message.to_string()),
    }
}

fn push_outcome(result: &mut FinalResult, item: &WorkItem) {
    let entry = entry_for(item, "");
    match item.status {
        WorkItemStatus::Done => result.result.push(entry),
        WorkItemStatus::Error => result.error.push(entry),
        WorkItemStatus::Skipped => result.skipped.push(entry),
        WorkItemStatus::Aborted => result.aborted.push(entry),
        WorkItemStatus::ToDo | WorkItemStatus::InProgress => {}
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

fn lchown(path: &Path, uid: u32, gid: u32) {
    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else { return };
    unsafe {
        if libc::lchown(c_path.as_ptr(), uid, gid) != 0 {
            // Retry with group-only change, then give up silently: a
            // non-root process commonly can't change ownership at all.
            let _ = libc::lchown(c_path.as_ptr(), u32::MAX, gid);
        }
    }
}

fn fsync_parent(path: &Path) {
    let Some(parent) = path.parent() else { return };
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
}

impl From<Operation> for Mode {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Move => Mode::Move,
            _ => Mode::Copy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpl::Operation;

    fn new_executor(dir: &Path, mode: Mode, policy: ConflictPolicy) -> (Jpl, i64, CopyMoveExecutor, crate::progress::ProgressConsumer) {
        let jpl = Jpl::open(&dir.join("jobs.db")).unwrap();
        let control = ControlEvents::new();
        let (producer, consumer) = crate::progress::channel(Arc::new(|| {}));
        let destination = dir.join("dst");
        fs::create_dir_all(&destination).unwrap();
        let (job_id, _items) = jpl.new_job(
            if mode == Mode::Move { Operation::Move } else { Operation::Copy },
            &dir.join("src"),
            Some(&destination),
            Some(policy),
            &[],
            &[],
            Vec::new(),
        );
        let executor = CopyMoveExecutor::new(
            jpl.clone(),
            job_id,
            mode,
            dir.join("src"),
            destination,
            policy,
            false,
            control,
            producer,
        );
        (jpl, job_id, executor, consumer)
    }

    #[test]
    fn copies_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("src");
        fs::create_dir_all(&src_dir).unwrap();
        let data: Vec<u8> = (0..1_048_577u32).map(|i| (i % 251) as u8).collect();
        fs::write(src_dir.join("src.bin"), &data).unwrap();

        let (_jpl, _job_id, executor, _consumer) = new_executor(dir.path(), Mode::Copy, ConflictPolicy::Overwrite);
        let items = vec![WorkItem::new(src_dir.join("src.bin"), false, false)];
        let result = executor.run(items);

        assert_eq!(result.result.len(), 1);
        assert!(result.error.is_empty());
        assert_eq!(fs::read(dir.path().join("dst/src.bin")).unwrap(), data);
    }

    #[test]
    fn moves_directory_tree_same_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("src");
        let a = src_dir.join("a");
        fs::create_dir_all(a.join("sub")).unwrap();
        fs::write(a.join("f1"), b"1").unwrap();
        fs::write(a.join("sub").join("f2"), b"2").unwrap();

        let (_jpl, _job_id, executor, _consumer) = new_executor(dir.path(), Mode::Move, ConflictPolicy::Overwrite);
        let mut items = vec![
            WorkItem::new(a.clone(), true, false),
            WorkItem::new(a.join("sub"), true, false),
            WorkItem::new(a.join("f1"), false, false),
            WorkItem::new(a.join("sub").join("f2"), false, false),
        ];
        items.sort_by_key(|i| i.sort_key());
        let result = executor.run(items);

        assert!(result.error.is_empty());
        assert!(dir.path().join("dst/a/f1").exists());
        assert!(dir.path().join("dst/a/sub/f2").exists());
        assert!(!a.exists());
    }

    #[test]
    fn rename_existing_policy_renames_prior_target_aside() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("src");
        fs::create_dir_all(src_dir.join("tree")).unwrap();
        fs::write(src_dir.join("tree").join("new.txt"), b"new").unwrap();

        let dst_tree = dir.path().join("dst").join("tree");
        fs::create_dir_all(&dst_tree).unwrap();
        fs::write(dst_tree.join("old.txt"), b"old").unwrap();

        let (_jpl, _job_id, executor, _consumer) = new_executor(dir.path(), Mode::Copy, ConflictPolicy::RenameExisting);
        let mut items = vec![
            WorkItem::new(src_dir.join("tree"), true, false),
            WorkItem::new(src_dir.join("tree").join("new.txt"), false, false),
        ];
        items.sort_by_key(|i| i.sort_key());
        let result = executor.run(items);

        assert!(result.error.is_empty());
        assert!(dir.path().join("dst/tree.rnrsave0/old.txt").exists());
        assert!(dir.path().join("dst/tree/new.txt").exists());

        let dir_entry = result.result.iter().find(|e| e.file.ends_with("tree")).unwrap();
        assert_eq!(dir_entry.message, "Renamed to tree.rnrsave0");
    }

    #[test]
    fn overwrite_policy_records_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("src");
        fs::create_dir_all(&src_dir).unwrap();
        fs::write(src_dir.join("f.txt"), b"new").unwrap();

        let dst_dir = dir.path().join("dst");
        fs::create_dir_all(&dst_dir).unwrap();
        fs::write(dst_dir.join("f.txt"), b"old").unwrap();

        let (_jpl, _job_id, executor, _consumer) = new_executor(dir.path(), Mode::Copy, ConflictPolicy::Overwrite);
        let items = vec![WorkItem::new(src_dir.join("f.txt"), false, false)];
        let result = executor.run(items);

        assert!(result.error.is_empty());
        assert_eq!(fs::read(dst_dir.join("f.txt")).unwrap(), b"new");
        assert_eq!(result.result[0].message, "Overwrite");
    }

    #[test]
    fn same_file_rename_existing_rebinds_source_to_the_renamed_aside_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("shared");
        fs::create_dir_all(&src_dir).unwrap();
        fs::write(src_dir.join("f.txt"), b"content").unwrap();

        let (jpl, job_id, _executor, _consumer) = new_executor(dir.path(), Mode::Copy, ConflictPolicy::RenameExisting);
        // Source and destination coincide: same cwd and destination.
        let executor = CopyMoveExecutor::new(
            jpl,
            job_id,
            Mode::Copy,
            src_dir.clone(),
            src_dir.clone(),
            ConflictPolicy::RenameExisting,
            false,
            ControlEvents::new(),
            crate::progress::channel(Arc::new(|| {})).0,
        );
        let items = vec![WorkItem::new(src_dir.join("f.txt"), false, false)];
        let result = executor.run(items);

        assert!(result.error.is_empty(), "expected no errors, got {:?}", result.error);
        assert_eq!(result.result[0].message, "Renamed to f.txt.rnrsave0");
        assert_eq!(fs::read(src_dir.join("f.txt")).unwrap(), b"content");
        assert_eq!(fs::read(src_dir.join("f.txt.rnrsave0")).unwrap(), b"content");
    }
}
