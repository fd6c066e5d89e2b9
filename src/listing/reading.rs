//! Enumerates a directory's immediate children into [`FileEntry`] values.

use std::fmt;
use std::path::Path;

use super::metadata::{classify, EntryKind, FileEntry};
use super::sorting::{sort_entries, SortColumn, SortOrder};

#[derive(Debug)]
pub struct ListingError {
    pub path: std::path::PathBuf,
    pub message: String,
}

impl fmt::Display for ListingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot list {}: {}", self.path.display(), self.message)
    }
}

impl std::error::Error for ListingError {}

/// Lists `path`, returning entries sorted by name with directories first.
/// Directory entry counts are filled in only when `count_directories` is
/// set, since counting every subdirectory's children is an extra
/// `read_dir` per entry.
pub fn list_directory(path: &Path, count_directories: bool) -> Result<Vec<FileEntry>, ListingError> {
    let read_dir = std::fs::read_dir(path).map_err(|e| ListingError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut entries = Vec::new();
    for dir_entry in read_dir {
        let Ok(dir_entry) = dir_entry else { continue };
        let name = dir_entry.file_name().to_string_lossy().to_string();
        match classify(path, &name) {
            Some(mut entry) => {
                if count_directories && entry.kind.is_dir_like() {
                    entry.length = directory_entry_count(&entry.path);
                }
                entries.push(entry);
            }
            None => log::debug!("list_directory: entry vanished during listing: {}/{name}", path.display()),
        }
    }

    sort_entries(&mut entries, SortColumn::Name, SortOrder::Ascending);
    Ok(entries)
}

/// Number of children in a directory, or `None` on `EACCES`/`ENOENT` so the
/// caller can render `?` instead of a count.
fn directory_entry_count(path: &Path) -> Option<u64> {
    std::fs::read_dir(path).ok().map(|rd| rd.count() as u64)
}

/// Classifies a single path, used when only one entry's metadata is needed
/// (e.g. resolving a symlink target for display).
pub fn get_single_entry(path: &Path) -> Option<FileEntry> {
    let parent = path.parent().unwrap_or(Path::new("/"));
    let name = path.file_name()?.to_string_lossy().to_string();
    classify(parent, &name)
}

pub fn is_directory_like(entry: &FileEntry) -> bool {
    matches!(entry.kind, EntryKind::Directory | EntryKind::SymlinkToDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn list_directory_sorts_dirs_first_then_natural_order() {
        let dir = create_temp_dir();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b10.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("b2.txt"), b"x").unwrap();

        let entries = list_directory(dir.path(), false).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["sub", "b2.txt", "b10.txt"]);
    }

    #[test]
    fn list_directory_counts_directory_entries_when_requested() {
        let dir = create_temp_dir();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("a"), b"x").unwrap();
        std::fs::write(sub.join("b"), b"x").unwrap();

        let entries = list_directory(dir.path(), true).unwrap();
        assert_eq!(entries[0].length, Some(2));
    }

    #[test]
    fn list_directory_errors_on_missing_path() {
        let dir = create_temp_dir();
        let missing = dir.path().join("does-not-exist");
        assert!(list_directory(&missing, false).is_err());
    }
}
