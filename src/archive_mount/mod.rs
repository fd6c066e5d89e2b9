//! Archive Mount Layer: launches and tracks an external `archivemount`
//! process so a compressed archive's contents appear as an ordinary
//! directory under a temporary mount point.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::path_translator::{ArchiveMount, MountSnapshot, PathTranslator};

/// Opaque handle identifying a panel for reference counting; the UI owns
/// the real panel identity and just needs this to be stable and
/// comparable.
pub type PanelId = u32;

#[derive(Debug)]
pub enum MountError {
    SpawnFailed { message: String },
    ExecutableMissing,
    ProcessFailed { stderr: String },
    Cancelled,
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountError::SpawnFailed { message } => write!(f, "failed to launch archivemount: {message}"),
            MountError::ExecutableMissing => write!(f, "archivemount is not installed"),
            MountError::ProcessFailed { stderr } => write!(f, "archivemount failed: {stderr}"),
            MountError::Cancelled => write!(f, "mount cancelled by user"),
        }
    }
}

impl std::error::Error for MountError {}

struct ActiveMount {
    mount: ArchiveMount,
    referencing_panels: HashSet<PanelId>,
}

/// An in-flight mount attempt: a running `archivemount` child, polled for
/// completion roughly every 50ms.
pub struct PendingMount {
    archive_file: PathBuf,
    temp_dir: PathBuf,
    child: Child,
    started_at: Instant,
}

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    StillRunning,
    Mounted,
    Failed,
}

/// Owns the append-ordered list of active mounts. Mutated only from the UI
/// thread; workers receive an immutable [`MountSnapshot`].
pub struct ArchiveMountLayer {
    mounts: Vec<ActiveMount>,
}

impl Default for ArchiveMountLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveMountLayer {
    pub fn new() -> Self {
        Self { mounts: Vec::new() }
    }

    pub fn snapshot(&self) -> MountSnapshot {
        MountSnapshot::new(self.mounts.iter().map(|m| m.mount.clone()).collect())
    }

    /// Starts mounting `archive_file` on behalf of `panel`. If the archive
    /// is already mounted, simply adds `panel` to its reference set and
    /// returns `None` (nothing to poll). Otherwise spawns `archivemount`
    /// and returns a [`PendingMount`] the caller must drive with
    /// [`ArchiveMountLayer::poll`].
    pub fn begin_mount(&mut self, archive_file: &Path, panel: PanelId) -> Result<Option<PendingMount>, MountError> {
        if let Some(existing) = self.mounts.iter_mut().find(|m| m.mount.archive_file == archive_file) {
            existing.referencing_panels.insert(panel);
            return Ok(None);
        }

        if which("archivemount").is_none() {
            return Err(MountError::ExecutableMissing);
        }

        let temp_dir = tempfile::Builder::new()
            .prefix("twinpane-mount-")
            .tempdir()
            .map_err(|e| MountError::SpawnFailed { message: e.to_string() })?
            .into_path();

        let child = Command::new("archivemount")
            .arg("-o")
            .arg("ro")
            .arg(archive_file)
            .arg(&temp_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MountError::SpawnFailed { message: e.to_string() })?;

        Ok(Some(PendingMount {
            archive_file: archive_file.to_path_buf(),
            temp_dir,
            child,
            started_at: Instant::now(),
        }))
    }

    /// Non-blocking poll of a [`PendingMount`]. On [`PollOutcome::Mounted`]
    /// the mount has already been recorded and `panel` added as its first
    /// referent; on [`PollOutcome::Failed`] the temp directory has already
    /// been cleaned up.
    pub fn poll(&mut self, pending: &mut PendingMount, panel: PanelId) -> PollOutcome {
        match pending.child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    self.mounts.push(ActiveMount {
                        mount: ArchiveMount {
                            archive_file: pending.archive_file.clone(),
                            temp_dir: pending.temp_dir.clone(),
                        },
                        referencing_panels: HashSet::from([panel]),
                    });
                    PollOutcome::Mounted
                } else {
                    self.cleanup_failed_mount(&pending.temp_dir);
                    PollOutcome::Failed
                }
            }
            Ok(None) => PollOutcome::StillRunning,
            Err(_) => {
                self.cleanup_failed_mount(&pending.temp_dir);
                PollOutcome::Failed
            }
        }
    }

    pub fn elapsed(&self, pending: &PendingMount) -> Duration {
        pending.started_at.elapsed()
    }

    /// Terminates a still-running mount attempt at the user's request.
    pub fn cancel(&mut self, mut pending: PendingMount) {
        let _ = pending.child.kill();
        let _ = pending.child.wait();
        self.cleanup_failed_mount(&pending.temp_dir);
    }

    fn cleanup_failed_mount(&self, temp_dir: &Path) {
        let _ = unmount_fs(temp_dir);
        let _ = std::fs::remove_dir(temp_dir);
    }

    /// Drops `panel`'s reference to every mount at or under `path`; any
    /// mount whose reference set becomes empty is unmounted and its temp
    /// directory removed.
    pub fn release(&mut self, path: &Path, panel: PanelId) {
        let mut to_remove = Vec::new();
        for (idx, active) in self.mounts.iter_mut().enumerate() {
            if active.mount.archive_file == path || path.starts_with(&active.mount.archive_file) {
                active.referencing_panels.remove(&panel);
                if active.referencing_panels.is_empty() {
                    to_remove.push(idx);
                }
            }
        }
        // Remove back-to-front so earlier indices stay valid.
        for idx in to_remove.into_iter().rev() {
            let active = self.mounts.remove(idx);
            let _ = unmount_fs(&active.mount.temp_dir);
            let _ = std::fs::remove_dir(&active.mount.temp_dir);
        }
    }

    /// Unmounts everything, as if every panel had navigated out to the
    /// nearest non-archive ancestor. Called on quit.
    pub fn quit(&mut self) {
        for active in self.mounts.drain(..) {
            let _ = unmount_fs(&active.mount.temp_dir);
            let _ = std::fs::remove_dir(&active.mount.temp_dir);
        }
    }

    pub fn is_mounted(&self, archive_file: &Path) -> bool {
        self.mounts.iter().any(|m| m.mount.archive_file == archive_file)
    }
}

fn unmount_fs(temp_dir: &Path) -> std::io::Result<()> {
    let status = Command::new("umount").arg(temp_dir).stdout(Stdio::null()).stderr(Stdio::null()).status();
    match status {
        Ok(status) if status.success() => return Ok(()),
        _ => {}
    }
    Command::new("fusermount")
        .arg("-u")
        .arg(temp_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|_| ())
}

fn which(program: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).map(|dir| dir.join(program)).find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_mount_errors_when_archivemount_missing() {
        // SAFETY: test-only process-wide PATH override, restored before
        // returning; no other thread in this test touches the environment.
        let original = std::env::var_os("PATH");
        unsafe { std::env::set_var("PATH", "") };
        let mut layer = ArchiveMountLayer::new();
        let result = layer.begin_mount(Path::new("/tmp/archive.zip"), 1);
        if let Some(original) = original {
            unsafe { std::env::set_var("PATH", original) };
        }
        assert!(matches!(result, Err(MountError::ExecutableMissing)));
    }

    #[test]
    fn release_is_a_no_op_when_nothing_is_mounted() {
        let mut layer = ArchiveMountLayer::new();
        layer.release(Path::new("/tmp/whatever"), 1);
        assert!(!layer.is_mounted(Path::new("/tmp/whatever")));
    }

    #[test]
    fn snapshot_reflects_translator_trait() {
        let layer = ArchiveMountLayer::new();
        let snapshot = layer.snapshot();
        let (real, m) = snapshot.unarchive(Path::new("/a/b"), true);
        assert_eq!(real, PathBuf::from("/a/b"));
        assert!(m.is_none());
    }
}
