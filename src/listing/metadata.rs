//! [`FileEntry`]: the unit the Directory Lister emits for one child of a
//! directory, and the small helpers used to build it.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Coarse classification of a directory entry, used to pick a display
/// glyph/palette and to decide whether an entry can be recursed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Regular,
    Executable,
    Directory,
    SymlinkToDir,
    SymlinkToFile,
    StaleSymlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl EntryKind {
    pub fn is_dir_like(self) -> bool {
        matches!(self, EntryKind::Directory | EntryKind::SymlinkToDir)
    }

    /// The single character the original panel uses as a label prefix.
    pub fn label(self) -> char {
        match self {
            EntryKind::Regular => '-',
            EntryKind::Executable => '*',
            EntryKind::Directory => '/',
            EntryKind::SymlinkToDir => '~',
            EntryKind::SymlinkToFile => '@',
            EntryKind::StaleSymlink => '!',
            EntryKind::CharDevice => 'c',
            EntryKind::BlockDevice => 'b',
            EntryKind::Fifo => '|',
            EntryKind::Socket => '=',
        }
    }
}

/// A directory entry ready for display or sorting.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub path: std::path::PathBuf,
    pub kind: EntryKind,
    pub is_symlink: bool,
    pub link_target: Option<std::path::PathBuf>,
    /// `Some(file size)` for regular files, `Some(entry count)` for
    /// directories (when counting is enabled), `None` when unavailable
    /// (e.g. `EACCES` while counting a directory).
    pub length: Option<u64>,
    pub device_numbers: Option<(u32, u32)>,
    pub mode: u32,
    pub nlink: u64,
    pub owner: String,
    pub group: String,
    pub modified: Option<u64>,
    pub created: Option<u64>,
}

impl FileEntry {
    /// Natural-sort key for the entry's name.
    pub fn sort_key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Human-readable size, e.g. `1.2M`, with up to four significant
    /// digits and a one-letter SI suffix.
    pub fn human_size(&self) -> String {
        match self.length {
            Some(n) => human_size(n),
            None => "?".to_string(),
        }
    }

    /// `mode nlink user group` plus an optional link target, as shown in the
    /// details column.
    pub fn details(&self) -> String {
        let mode_str = mode_string(self.mode, self.kind);
        let mut s = format!("{mode_str} {} {} {}", self.nlink, self.owner, self.group);
        if let Some(target) = &self.link_target {
            s.push_str(" -> ");
            s.push_str(&target.to_string_lossy());
        }
        s
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 9] = ["", "K", "M", "G", "T", "P", "E", "Z", "Y"];
    if bytes < 1000 {
        return bytes.to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    // Trim precision so the result fits in four significant digits.
    let precision = if value >= 100.0 {
        0
    } else if value >= 10.0 {
        1
    } else {
        2
    };
    format!("{value:.precision$}{}", UNITS[unit])
}

fn mode_string(mode: u32, kind: EntryKind) -> String {
    let file_type = match kind {
        EntryKind::Directory => 'd',
        EntryKind::SymlinkToDir | EntryKind::SymlinkToFile | EntryKind::StaleSymlink => 'l',
        EntryKind::CharDevice => 'c',
        EntryKind::BlockDevice => 'b',
        EntryKind::Fifo => 'p',
        EntryKind::Socket => 's',
        EntryKind::Regular | EntryKind::Executable => '-',
    };
    let perm = |bit: u32, c: char| if mode & bit != 0 { c } else { '-' };
    format!(
        "{file_type}{}{}{}{}{}{}{}{}{}",
        perm(0o400, 'r'),
        perm(0o200, 'w'),
        perm(0o100, 'x'),
        perm(0o040, 'r'),
        perm(0o020, 'w'),
        perm(0o010, 'x'),
        perm(0o004, 'r'),
        perm(0o002, 'w'),
        perm(0o001, 'x'),
    )
}

/// Process-wide cache of uid/gid to resolved name, refreshed lazily.
/// Falls back to the decimal id when the lookup fails.
static OWNER_CACHE: RwLock<Option<HashMap<u32, String>>> = RwLock::new(None);
static GROUP_CACHE: RwLock<Option<HashMap<u32, String>>> = RwLock::new(None);

pub fn owner_name(uid: u32) -> String {
    cached_lookup(&OWNER_CACHE, uid, || {
        uzers::get_user_by_uid(uid).map(|u| u.name().to_string_lossy().to_string())
    })
}

pub fn group_name(gid: u32) -> String {
    cached_lookup(&GROUP_CACHE, gid, || {
        uzers::get_group_by_gid(gid).map(|g| g.name().to_string_lossy().to_string())
    })
}

fn cached_lookup(cache: &RwLock<Option<HashMap<u32, String>>>, id: u32, resolve: impl FnOnce() -> Option<String>) -> String {
    if let Some(name) = cache.read().ok().and_then(|c| c.as_ref()?.get(&id).cloned()) {
        return name;
    }
    let name = resolve().unwrap_or_else(|| id.to_string());
    if let Ok(mut guard) = cache.write() {
        guard.get_or_insert_with(HashMap::new).insert(id, name.clone());
    }
    name
}

/// Classifies a single child of `parent` named `name`, resolving its lstat
/// (and, for symlinks, following stat) to build a [`FileEntry`].
///
/// Returns `None` only when even `lstat` fails (e.g. a race where the entry
/// disappeared between `read_dir` and this call); callers fall back to a
/// minimal placeholder entry in that case, mirroring how the original lister
/// tolerates a vanishing entry rather than aborting the whole listing.
pub fn classify(parent: &Path, name: &str) -> Option<FileEntry> {
    let path = parent.join(name);
    let lstat = fs::symlink_metadata(&path).ok()?;
    let is_symlink = lstat.file_type().is_symlink();

    let (kind, length, device_numbers, link_target, stat_for_display) = if is_symlink {
        let link_target = fs::read_link(&path).ok();
        match fs::metadata(&path) {
            Ok(target_stat) if target_stat.is_dir() => {
                (EntryKind::SymlinkToDir, None, None, link_target, Some(target_stat))
            }
            Ok(target_stat) => (
                EntryKind::SymlinkToFile,
                Some(target_stat.len()),
                None,
                link_target,
                Some(target_stat),
            ),
            Err(_) => (EntryKind::StaleSymlink, None, None, link_target, None),
        }
    } else if lstat.is_dir() {
        (EntryKind::Directory, None, None, None, None)
    } else if lstat.file_type().is_char_device() {
        (EntryKind::CharDevice, None, Some(dev_numbers(&lstat)), None, None)
    } else if lstat.file_type().is_block_device() {
        (EntryKind::BlockDevice, None, Some(dev_numbers(&lstat)), None, None)
    } else if lstat.file_type().is_fifo() {
        (EntryKind::Fifo, None, None, None, None)
    } else if lstat.file_type().is_socket() {
        (EntryKind::Socket, None, None, None, None)
    } else {
        let executable_kind = if lstat.permissions().mode() & 0o111 != 0 {
            EntryKind::Executable
        } else {
            EntryKind::Regular
        };
        (executable_kind, Some(lstat.len()), None, None, None)
    };

    let display_stat = stat_for_display.as_ref().unwrap_or(&lstat);
    let modified = mtime_secs(display_stat);
    let created = ctime_secs(display_stat);

    Some(FileEntry {
        name: name.to_string(),
        path,
        kind,
        is_symlink,
        link_target,
        length,
        device_numbers,
        mode: lstat.permissions().mode(),
        nlink: lstat.nlink(),
        owner: owner_name(lstat.uid()),
        group: group_name(lstat.gid()),
        modified,
        created,
    })
}

fn dev_numbers(meta: &fs::Metadata) -> (u32, u32) {
    let rdev = meta.rdev();
    // major/minor encoding matches glibc's makedev layout.
    let major = ((rdev >> 8) & 0xfff) as u32;
    let minor = (rdev & 0xff) as u32 | (((rdev >> 20) & 0xfff) << 8) as u32;
    (major, minor)
}

fn mtime_secs(meta: &fs::Metadata) -> Option<u64> {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}

fn ctime_secs(meta: &fs::Metadata) -> Option<u64> {
    meta.created()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_size_formats_with_si_suffix() {
        assert_eq!(human_size(500), "500");
        assert_eq!(human_size(2048), "2.00K");
    }

    #[test]
    fn classify_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"hello").unwrap();
        let entry = classify(dir.path(), "f.txt").unwrap();
        assert_eq!(entry.kind, EntryKind::Regular);
        assert_eq!(entry.length, Some(5));
    }

    #[test]
    fn classify_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let entry = classify(dir.path(), "sub").unwrap();
        assert_eq!(entry.kind, EntryKind::Directory);
        assert!(entry.kind.is_dir_like());
    }

    #[test]
    fn classify_symlink_to_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("target.txt"), b"x").unwrap();
        std::os::unix::fs::symlink("target.txt", dir.path().join("link")).unwrap();
        let entry = classify(dir.path(), "link").unwrap();
        assert_eq!(entry.kind, EntryKind::SymlinkToFile);
        assert!(entry.is_symlink);
    }

    #[test]
    fn classify_stale_symlink() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("nonexistent", dir.path().join("link")).unwrap();
        let entry = classify(dir.path(), "link").unwrap();
        assert_eq!(entry.kind, EntryKind::StaleSymlink);
    }

    #[test]
    fn owner_name_falls_back_to_numeric_id_for_unknown_uid() {
        // A uid unlikely to exist on the test host.
        let name = owner_name(4_000_111_222);
        assert_eq!(name, "4000111222");
    }
}
