//! Delete Executor: removes a work list in reverse path order so children
//! are always gone before their parent is removed.

use std::fs;
use std::sync::Arc;
use std::time::Instant;

use crate::jpl::{Jpl, JobStatus, WorkItem, WorkItemStatus};
use crate::progress::{entries_from_paths, ControlEvents, ControlSignal, DeleteSample, FinalResult, ProgressProducer, ProgressMessage, ReportEntry};

pub struct DeleteExecutor {
    jpl: Jpl,
    job_id: i64,
    control: Arc<ControlEvents>,
    progress: ProgressProducer,
    scan_error: Vec<ReportEntry>,
    scan_skipped: Vec<ReportEntry>,
}

impl DeleteExecutor {
    pub fn new(jpl: Jpl, job_id: i64, control: Arc<ControlEvents>, progress: ProgressProducer) -> Self {
        Self { jpl, job_id, control, progress, scan_error: Vec::new(), scan_skipped: Vec::new() }
    }

    /// Carries the Scanner's `scan_error`/`scan_skipped` side-bands into the
    /// final report so they surface alongside per-file outcomes.
    pub fn seed_scan_side_bands(&mut self, scan_error: &[(std::path::PathBuf, String)], scan_skipped: &[(std::path::PathBuf, String)]) {
        self.scan_error = entries_from_paths(scan_error);
        self.scan_skipped = entries_from_paths(scan_skipped);
    }

    /// Runs the delete job to completion (or until interrupted/aborted).
    /// `items` must already be sorted descending by path (children before
    /// parents) by the caller.
    pub fn run(&self, mut items: Vec<WorkItem>) -> FinalResult {
        let start = Instant::now();
        let mut result = FinalResult {
            error: self.scan_error.clone(),
            skipped: self.scan_skipped.clone(),
            ..FinalResult::default()
        };
        let mut files_done: u64 = 0;
        let mut bytes_done: u64 = 0;

        for (idx, item) in items.iter_mut().enumerate() {
            if !matches!(item.status, WorkItemStatus::ToDo) {
                push_outcome(&mut result, item);
                continue;
            }

            match self.control.poll() {
                ControlSignal::Interrupt => {
                    return result;
                }
                ControlSignal::Abort => {
                    item.status = WorkItemStatus::Aborted;
                    self.jpl.update_file(item);
                    result.aborted.push(ReportEntry {
                        file: item.file.to_string_lossy().to_string(),
                        message: String::new(),
                    });
                    for later in items.iter().skip(idx + 1) {
                        result.aborted.push(ReportEntry {
                            file: later.file.to_string_lossy().to_string(),
                            message: String::new(),
                        });
                    }
                    self.jpl.set_job_status(self.job_id, JobStatus::Aborted);
                    return result;
                }
                ControlSignal::Skip => {
                    item.status = WorkItemStatus::Skipped;
                    self.jpl.update_file(item);
                    result.skipped.push(ReportEntry {
                        file: item.file.to_string_lossy().to_string(),
                        message: "Skipped by user".to_string(),
                    });
                    continue;
                }
                ControlSignal::Continue => {}
            }

            item.status = WorkItemStatus::InProgress;
            self.jpl.update_file(item);

            let remove_result = if item.is_dir {
                fs::remove_dir(&item.file)
            } else {
                fs::remove_file(&item.file)
            };

            match remove_result {
                Ok(()) => {
                    item.status = WorkItemStatus::Done;
                    fsync_parent(&item.file);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    item.status = WorkItemStatus::Done;
                }
                Err(err) => {
                    item.status = WorkItemStatus::Error;
                    item.message = Some(format!("{err} ({})", err.raw_os_error().unwrap_or(0)));
                }
            }
            self.jpl.update_file(item);
            push_outcome(&mut result, item);

            files_done += 1;
            bytes_done += 0;

            self.progress.push_throttled(ProgressMessage::Delete(DeleteSample {
                current: item.file.to_string_lossy().to_string(),
                files: files_done,
                bytes: bytes_done,
                time: start.elapsed().as_secs_f64(),
            }));
        }

        self.jpl.set_job_status(self.job_id, JobStatus::Done);
        self.progress.push(ProgressMessage::Done(result.clone()));
        result
    }
}

fn push_outcome(result: &mut FinalResult, item: &WorkItem) {
    let entry = ReportEntry {
        file: item.file.to_string_lossy().to_string(),
        message: item.message.clone().unwrap_or_default(),
    };
    match item.status {
        WorkItemStatus::Done => result.result.push(entry),
        WorkItemStatus::Error => result.error.push(entry),
        WorkItemStatus::Skipped => result.skipped.push(entry),
        WorkItemStatus::Aborted => result.aborted.push(entry),
        WorkItemStatus::ToDo | WorkItemStatus::InProgress => {}
    }
}

fn fsync_parent(path: &std::path::Path) {
    let Some(parent) = path.parent() else { return };
    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpl::Operation;

    fn setup(dir: &std::path::Path) -> (Jpl, i64, Vec<WorkItem>) {
        let db_path = dir.join("jobs.db");
        let jpl = Jpl::open(&db_path).unwrap();

        let x = dir.join("x");
        std::fs::create_dir(&x).unwrap();
        std::fs::write(x.join("y"), b"y").unwrap();
        std::fs::write(x.join("z"), b"z").unwrap();

        let mut items = vec![
            WorkItem::new(x.clone(), true, false),
            WorkItem::new(x.join("y"), false, false),
            WorkItem::new(x.join("z"), false, false),
        ];
        items.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        let (job_id, items) = jpl.new_job(Operation::Delete, dir, None, None, &[], &[], items);
        (jpl, job_id, items)
    }

    #[test]
    fn deletes_children_before_parent() {
        let dir = tempfile::tempdir().unwrap();
        let (jpl, job_id, items) = setup(dir.path());
        let control = ControlEvents::new();
        let (producer, _consumer) = crate::progress::channel(std::sync::Arc::new(|| {}));
        let executor = DeleteExecutor::new(jpl, job_id, control, producer);

        let result = executor.run(items);
        assert_eq!(result.result.len(), 3);
        assert!(!dir.path().join("x").exists());
    }

    #[test]
    fn missing_target_is_treated_as_already_done() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("jobs.db");
        let jpl = Jpl::open(&db_path).unwrap();
        let missing = dir.path().join("ghost");
        let items = vec![WorkItem::new(missing, false, false)];
        let (job_id, items) = jpl.new_job(Operation::Delete, dir.path(), None, None, &[], &[], items);

        let control = ControlEvents::new();
        let (producer, _consumer) = crate::progress::channel(std::sync::Arc::new(|| {}));
        let executor = DeleteExecutor::new(jpl, job_id, control, producer);
        let result = executor.run(items);
        assert_eq!(result.result.len(), 1);
        assert!(result.error.is_empty());
    }

    #[test]
    fn abort_marks_remaining_items_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let (jpl, job_id, items) = setup(dir.path());
        let control = ControlEvents::new();
        control.request_abort();
        let (producer, _consumer) = crate::progress::channel(std::sync::Arc::new(|| {}));
        let executor = DeleteExecutor::new(jpl, job_id, control, producer);

        let result = executor.run(items);
        assert_eq!(result.aborted.len(), 3);
    }
}
