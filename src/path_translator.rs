//! Translates paths across mounted archive roots.
//!
//! A logical path may point inside a mounted archive; a real path is always
//! directly addressable by the OS. Translation is pure prefix substitution
//! over the current set of [`ArchiveMount`] entries, with no component
//! renaming.

use std::path::{Path, PathBuf};

/// One active archive mount: `archive_file` is the logical path of the
/// archive itself, `temp_dir` is where its contents are mounted.
#[derive(Debug, Clone)]
pub struct ArchiveMount {
    pub archive_file: PathBuf,
    pub temp_dir: PathBuf,
}

/// Read-only view over the current archive mounts, used by the scanner and
/// executor so they depend on an abstraction rather than the concrete
/// mutable mount list the archive mount layer owns.
pub trait PathTranslator: Send + Sync {
    /// Maps a logical path to its real, directly-addressable path. Returns
    /// the matching mount, if any, alongside the translated path.
    fn unarchive(&self, logical: &Path, include_self: bool) -> (PathBuf, Option<ArchiveMount>);

    /// Inverse of [`PathTranslator::unarchive`]: maps a real path back to
    /// its logical form.
    fn archive(&self, real: &Path, include_self: bool) -> (PathBuf, Option<ArchiveMount>);
}

/// A translator with no archives mounted; every path passes through
/// unchanged. Used by callers that never deal with archives.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslator;

impl PathTranslator for IdentityTranslator {
    fn unarchive(&self, logical: &Path, _include_self: bool) -> (PathBuf, Option<ArchiveMount>) {
        (logical.to_path_buf(), None)
    }

    fn archive(&self, real: &Path, _include_self: bool) -> (PathBuf, Option<ArchiveMount>) {
        (real.to_path_buf(), None)
    }
}

/// An immutable snapshot of the mount list at the moment a worker thread
/// started, so workers never race the UI thread's mutations of the live
/// list owned by [`crate::archive_mount::ArchiveMountLayer`].
#[derive(Debug, Clone, Default)]
pub struct MountSnapshot {
    /// Kept sorted by `archive_file` using NUL-substituted separators so
    /// nested archive paths group together and the innermost mount for a
    /// given prefix can be found by scanning in reverse.
    mounts: Vec<ArchiveMount>,
}

impl MountSnapshot {
    pub fn new(mut mounts: Vec<ArchiveMount>) -> Self {
        mounts.sort_by(|a, b| sort_key(&a.archive_file).cmp(&sort_key(&b.archive_file)));
        Self { mounts }
    }

    pub fn mounts(&self) -> &[ArchiveMount] {
        &self.mounts
    }
}

/// NUL-substitutes the path separator so that `a/b` sorts strictly between
/// `a` and `a0`, keeping a directory's descendants adjacent to it.
fn sort_key(path: &Path) -> Vec<u8> {
    path.to_string_lossy()
        .bytes()
        .map(|b| if b == b'/' { 0u8 } else { b })
        .collect()
}

impl PathTranslator for MountSnapshot {
    fn unarchive(&self, logical: &Path, include_self: bool) -> (PathBuf, Option<ArchiveMount>) {
        // Innermost first: scan in reverse since the list is sorted by
        // archive_file and a nested archive's file path sorts after its
        // parent's.
        for mount in self.mounts.iter().rev() {
            if let Some(rest) = relative_under(logical, &mount.archive_file, include_self) {
                let translated = match rest {
                    Some(rest) => mount.temp_dir.join(rest),
                    None => mount.temp_dir.clone(),
                };
                return (translated, Some(mount.clone()));
            }
        }
        (logical.to_path_buf(), None)
    }

    fn archive(&self, real: &Path, include_self: bool) -> (PathBuf, Option<ArchiveMount>) {
        // Outermost first: scan forward.
        for mount in self.mounts.iter() {
            if let Some(rest) = relative_under(real, &mount.temp_dir, include_self) {
                let translated = match rest {
                    Some(rest) => mount.archive_file.join(rest),
                    None => mount.archive_file.clone(),
                };
                return (translated, Some(mount.clone()));
            }
        }
        (real.to_path_buf(), None)
    }
}

/// If `path` equals `prefix` or is a descendant of it, returns `Some(None)`
/// for the exact-match case (only when `include_self`) or `Some(Some(rest))`
/// with the remaining relative components. Returns `None` if `path` is not
/// under `prefix` at all.
fn relative_under(path: &Path, prefix: &Path, include_self: bool) -> Option<Option<PathBuf>> {
    if path == prefix {
        return include_self.then_some(None);
    }
    path.strip_prefix(prefix).ok().map(|rel| Some(rel.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(archive: &str, temp: &str) -> ArchiveMount {
        ArchiveMount {
            archive_file: PathBuf::from(archive),
            temp_dir: PathBuf::from(temp),
        }
    }

    #[test]
    fn unarchive_translates_descendant_path() {
        let snap = MountSnapshot::new(vec![mount("/home/u/archive.zip", "/tmp/mnt1")]);
        let (real, m) = snap.unarchive(Path::new("/home/u/archive.zip/inside/readme.txt"), true);
        assert_eq!(real, PathBuf::from("/tmp/mnt1/inside/readme.txt"));
        assert!(m.is_some());
    }

    #[test]
    fn unarchive_include_self_false_skips_exact_match() {
        let snap = MountSnapshot::new(vec![mount("/home/u/archive.zip", "/tmp/mnt1")]);
        let (real, m) = snap.unarchive(Path::new("/home/u/archive.zip"), false);
        assert_eq!(real, PathBuf::from("/home/u/archive.zip"));
        assert!(m.is_none());
    }

    #[test]
    fn nested_archives_translate_innermost_first() {
        let snap = MountSnapshot::new(vec![
            mount("/home/u/outer.zip", "/tmp/outer"),
            mount("/home/u/outer.zip/inner.zip", "/tmp/inner"),
        ]);
        // Path inside the inner archive should resolve via the inner mount,
        // not get stuck translating only the outer prefix.
        let (real, _) = snap.unarchive(Path::new("/home/u/outer.zip/inner.zip/data.txt"), true);
        assert_eq!(real, PathBuf::from("/tmp/inner/data.txt"));
    }

    #[test]
    fn archive_is_the_inverse_of_unarchive() {
        let snap = MountSnapshot::new(vec![mount("/home/u/archive.zip", "/tmp/mnt1")]);
        let (logical, _) = snap.archive(Path::new("/tmp/mnt1/inside/readme.txt"), true);
        assert_eq!(logical, PathBuf::from("/home/u/archive.zip/inside/readme.txt"));
    }

    #[test]
    fn identity_translator_passes_through() {
        let id = IdentityTranslator;
        let (real, m) = id.unarchive(Path::new("/a/b"), true);
        assert_eq!(real, PathBuf::from("/a/b"));
        assert!(m.is_none());
    }
}
