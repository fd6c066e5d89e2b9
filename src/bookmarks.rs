//! Bookmarks storage: a flat `key:path` file, written atomically.
//!
//! Presentation (the fuzzy-finder "go to bookmark" dialog) is an external
//! collaborator; this module only owns the on-disk format.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum BookmarksError {
    Read { path: PathBuf, message: String },
    Write { path: PathBuf, message: String },
    InvalidKey { key: String },
}

impl fmt::Display for BookmarksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookmarksError::Read { path, message } => write!(f, "cannot read bookmarks {}: {message}", path.display()),
            BookmarksError::Write { path, message } => write!(f, "cannot write bookmarks {}: {message}", path.display()),
            BookmarksError::InvalidKey { key } => write!(f, "bookmark key {key:?} must be ASCII letters and digits"),
        }
    }
}

impl std::error::Error for BookmarksError {}

#[derive(Debug, Default, Clone)]
pub struct Bookmarks {
    entries: BTreeMap<String, PathBuf>,
}

impl Bookmarks {
    pub fn default_path() -> Option<PathBuf> {
        crate::config::Config::config_dir().map(|d| d.join("bookmarks"))
    }

    pub fn load(path: &Path) -> Result<Self, BookmarksError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| BookmarksError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut entries = BTreeMap::new();
        for line in raw.lines() {
            if let Some((key, value)) = line.split_once(':') {
                entries.insert(key.to_string(), PathBuf::from(value));
            }
        }
        Ok(Self { entries })
    }

    pub fn set(&mut self, key: &str, path: PathBuf) -> Result<(), BookmarksError> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BookmarksError::InvalidKey { key: key.to_string() });
        }
        self.entries.insert(key.to_string(), path);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn get(&self, key: &str) -> Option<&Path> {
        self.entries.get(key).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    /// Writes the bookmarks file atomically: write to a sibling temp file,
    /// fsync, then rename over the target so a crash mid-write never
    /// leaves a truncated file in place.
    pub fn save(&self, path: &Path) -> Result<(), BookmarksError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| BookmarksError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let tmp_path = parent.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("bookmarks")
        ));
        let write_result = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            for (key, value) in &self.entries {
                writeln!(file, "{key}:{}", value.display())?;
            }
            file.sync_all()?;
            std::fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        write_result.map_err(|e| BookmarksError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_rejects_non_alphanumeric_keys() {
        let mut bookmarks = Bookmarks::default();
        assert!(bookmarks.set("a-b", PathBuf::from("/x")).is_err());
        assert!(bookmarks.set("ab1", PathBuf::from("/x")).is_ok());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bookmarks");
        let mut bookmarks = Bookmarks::default();
        bookmarks.set("h", PathBuf::from("/home/user")).unwrap();
        bookmarks.set("d", PathBuf::from("/home/user/Downloads")).unwrap();
        bookmarks.save(&path).unwrap();

        let reloaded = Bookmarks::load(&path).unwrap();
        assert_eq!(reloaded.get("h"), Some(Path::new("/home/user")));
        assert_eq!(reloaded.get("d"), Some(Path::new("/home/user/Downloads")));
    }

    #[test]
    fn load_of_missing_file_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bookmarks = Bookmarks::load(&dir.path().join("nope")).unwrap();
        assert_eq!(bookmarks.iter().count(), 0);
    }
}
