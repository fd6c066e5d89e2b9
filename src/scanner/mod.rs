//! Scanner: walks a user selection into the flat, ordered work list a
//! [`crate::executor`] consumes. Two phases per top-level entry: an lstat of
//! the entry itself, then (for a directory) a recursive walk of its
//! contents. Symlinks are recorded but never followed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::jpl::WorkItem;
use crate::progress::{ControlEvents, ControlSignal, ScanSample};

#[derive(Debug)]
pub enum ScanError {
    Aborted,
    Interrupted,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Aborted => write!(f, "scan aborted by user"),
            ScanError::Interrupted => write!(f, "scan interrupted"),
        }
    }
}

impl std::error::Error for ScanError {}

/// Everything a scan produced: the work list plus two side-bands of
/// entries that did not make it in and why.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub items: Vec<WorkItem>,
    pub scan_error: Vec<(PathBuf, String)>,
    pub scan_skipped: Vec<(PathBuf, String)>,
}

/// Scans every path in `sources`, honoring `control`'s cooperative signals
/// and pushing a throttled [`ScanSample`] through `on_progress` as entries
/// accumulate. A per-source user skip discards that source's subtree into
/// `scan_skipped` and continues with the next source; abort or interrupt
/// stops the whole scan and returns what has been found so far (abort) or
/// an error (interrupt).
pub fn scan_sources(
    sources: &[PathBuf],
    control: &Arc<ControlEvents>,
    mut on_progress: impl FnMut(ScanSample),
) -> Result<ScanResult, ScanError> {
    let mut result = ScanResult::default();
    let mut files: u64 = 0;
    let mut bytes: u64 = 0;

    for source in sources {
        match control.poll() {
            ControlSignal::Interrupt => return Err(ScanError::Interrupted),
            ControlSignal::Abort => return Ok(result),
            ControlSignal::Skip => {
                result.scan_skipped.push((source.clone(), "Skipped by user".to_string()));
                continue;
            }
            ControlSignal::Continue => {}
        }

        let top_meta = match std::fs::symlink_metadata(source) {
            Ok(meta) => meta,
            Err(err) => {
                result.scan_error.push((source.clone(), err.to_string()));
                continue;
            }
        };

        let is_symlink = top_meta.file_type().is_symlink();
        let is_dir = !is_symlink && top_meta.is_dir();
        result.items.push(WorkItem::new(source.clone(), is_dir, is_symlink));
        files += 1;
        bytes += if is_dir { 0 } else { top_meta.len() };

        if !is_dir || is_symlink {
            on_progress(ScanSample {
                current: source.to_string_lossy().to_string(),
                files,
                bytes,
            });
            continue;
        }

        if let Err(err) = walk_directory(source, control, &mut result, &mut files, &mut bytes, &mut on_progress) {
            match err {
                ScanError::Interrupted => return Err(err),
                ScanError::Aborted => return Ok(result),
            }
        }
    }

    control.wait_if_suspended();
    Ok(result)
}

/// Walks `root`'s subtree into `result`. Entries are accumulated locally and
/// only merged into `result.items` if the whole subtree enumerates cleanly;
/// an OS error anywhere in the walk discards everything collected for this
/// subtree so far (the error itself still lands in `result.scan_error`).
fn walk_directory(
    root: &Path,
    control: &Arc<ControlEvents>,
    result: &mut ScanResult,
    files: &mut u64,
    bytes: &mut u64,
    on_progress: &mut impl FnMut(ScanSample),
) -> Result<(), ScanError> {
    let walker = WalkDir::new(root).min_depth(1).follow_links(false).into_iter();

    let mut local_items = Vec::new();
    let mut local_files = *files;
    let mut local_bytes = *bytes;
    let mut subtree_failed = false;

    for entry in walker {
        match control.poll() {
            ControlSignal::Interrupt => return Err(ScanError::Interrupted),
            ControlSignal::Abort => return Err(ScanError::Aborted),
            ControlSignal::Skip => {
                result.scan_skipped.push((root.to_path_buf(), "Skipped by user".to_string()));
                return Ok(());
            }
            ControlSignal::Continue => {}
        }
        control.wait_if_suspended();

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                result.scan_error.push((path, err.to_string()));
                subtree_failed = true;
                continue;
            }
        };

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                result.scan_error.push((entry.path().to_path_buf(), err.to_string()));
                subtree_failed = true;
                continue;
            }
        };

        let is_symlink = meta.file_type().is_symlink();
        let is_dir = !is_symlink && meta.is_dir();
        local_items.push(WorkItem::new(entry.path().to_path_buf(), is_dir, is_symlink));
        local_files += 1;
        local_bytes += if is_dir { 0 } else { meta.len() };

        on_progress(ScanSample {
            current: entry.path().to_string_lossy().to_string(),
            files: local_files,
            bytes: local_bytes,
        });
    }

    if subtree_failed {
        return Ok(());
    }

    result.items.extend(local_items);
    *files = local_files;
    *bytes = local_bytes;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn scans_a_directory_tree_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("a");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("f1"), b"hello").unwrap();
        std::fs::create_dir(sub.join("sub")).unwrap();
        std::fs::write(sub.join("sub").join("f2"), b"world").unwrap();

        let control = ControlEvents::new();
        let result = scan_sources(&[sub.clone()], &control, |_| {}).unwrap();

        assert_eq!(result.items.len(), 4);
        assert!(result.scan_error.is_empty());
        let paths: Vec<_> = result.items.iter().map(|i| i.file.clone()).collect();
        assert!(paths.contains(&sub));
        assert!(paths.contains(&sub.join("f1")));
        assert!(paths.contains(&sub.join("sub")));
        assert!(paths.contains(&sub.join("sub").join("f2")));
    }

    #[test]
    fn missing_source_is_recorded_as_scan_error_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ghost");
        let control = ControlEvents::new();
        let result = scan_sources(&[missing.clone()], &control, |_| {}).unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.scan_error.len(), 1);
        assert_eq!(result.scan_error[0].0, missing);
    }

    #[test]
    fn abort_stops_the_scan_and_returns_what_was_found() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("a");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("f1"), b"x").unwrap();

        let control = ControlEvents::new();
        control.request_abort();
        let result = scan_sources(&[sub], &control, |_| {}).unwrap();
        assert!(result.items.is_empty());
    }

    #[test]
    fn a_failing_subtree_is_discarded_rather_than_partially_recorded() {
        // Skip if running as root (root bypasses permission checks)
        if unsafe { libc::geteuid() } == 0 {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("a");
        let locked = sub.join("locked");
        std::fs::create_dir(&sub).unwrap();
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("inner"), b"x").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        let control = ControlEvents::new();
        let result = scan_sources(&[sub.clone()], &control, |_| {}).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(!result.scan_error.is_empty());
        // Only the top-level selection itself survives; the `locked` entry
        // and anything under it were enumerated as part of the subtree whose
        // own scan failed, so none of them belong in the work list.
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].file, sub);
    }

    #[test]
    fn symlinks_are_recorded_but_not_recursed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("inner"), b"x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let control = ControlEvents::new();
        let result = scan_sources(&[link.clone()], &control, |_| {}).unwrap();
        assert_eq!(result.items.len(), 1);
        assert!(result.items[0].is_symlink);
    }
}
