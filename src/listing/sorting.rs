//! Sort keys and ordering for directory listings.

use super::metadata::FileEntry;

/// Column to sort a listing by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortColumn {
    #[default]
    Name,
    Extension,
    Size,
    Date,
}

/// Ascending or descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Returns `(is_dotfile, has_extension, extension_lowercase)`. Dotfiles sort
/// first, then extensionless names, then by extension.
fn extract_extension(name: &str) -> (bool, bool, String) {
    if name.starts_with('.') && !name[1..].contains('.') {
        return (true, false, String::new());
    }
    if let Some(dot) = name.rfind('.') {
        if dot > 0 && dot < name.len() - 1 {
            return (false, true, name[dot + 1..].to_lowercase());
        }
    }
    (false, false, String::new())
}

/// Sorts entries by `sort_by`/`sort_order`. Directories are always grouped
/// before non-directories, matching the two-pane panel's display
/// convention; within each group entries compare using natural
/// (digit-aware) ordering so `file2` sorts before `file10`.
pub fn sort_entries(entries: &mut [FileEntry], sort_by: SortColumn, sort_order: SortOrder) {
    entries.sort_by(|a, b| {
        let dir_order = match (a.kind.is_dir_like(), b.kind.is_dir_like()) {
            (true, false) => Some(std::cmp::Ordering::Less),
            (false, true) => Some(std::cmp::Ordering::Greater),
            _ => None,
        };
        if let Some(ordering) = dir_order {
            return match sort_order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            };
        }

        let primary = match sort_by {
            SortColumn::Name => alphanumeric_sort::compare_str(a.sort_key(), b.sort_key()),
            SortColumn::Extension => {
                let (a_dot, a_has, a_ext) = extract_extension(&a.name);
                let (b_dot, b_has, b_ext) = extract_extension(&b.name);
                match (a_dot, b_dot) {
                    (true, false) => std::cmp::Ordering::Less,
                    (false, true) => std::cmp::Ordering::Greater,
                    (true, true) => alphanumeric_sort::compare_str(a.sort_key(), b.sort_key()),
                    (false, false) => match (a_has, b_has) {
                        (false, true) => std::cmp::Ordering::Less,
                        (true, false) => std::cmp::Ordering::Greater,
                        (false, false) => alphanumeric_sort::compare_str(a.sort_key(), b.sort_key()),
                        (true, true) => {
                            let cmp = alphanumeric_sort::compare_str(&a_ext, &b_ext);
                            if cmp == std::cmp::Ordering::Equal {
                                alphanumeric_sort::compare_str(a.sort_key(), b.sort_key())
                            } else {
                                cmp
                            }
                        }
                    },
                }
            }
            SortColumn::Size => match (a.length, b.length) {
                (None, None) => alphanumeric_sort::compare_str(a.sort_key(), b.sort_key()),
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(a_len), Some(b_len)) => a_len.cmp(&b_len),
            },
            SortColumn::Date => match (a.modified, b.modified) {
                (None, None) => alphanumeric_sort::compare_str(a.sort_key(), b.sort_key()),
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(a_t), Some(b_t)) => a_t.cmp(&b_t),
            },
        };

        match sort_order {
            SortOrder::Ascending => primary,
            SortOrder::Descending => primary.reverse(),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::metadata::EntryKind;
    use std::path::PathBuf;

    fn entry(name: &str, kind: EntryKind, length: Option<u64>) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            path: PathBuf::from(name),
            kind,
            is_symlink: false,
            link_target: None,
            length,
            device_numbers: None,
            mode: 0o644,
            nlink: 1,
            owner: "u".to_string(),
            group: "g".to_string(),
            modified: None,
            created: None,
        }
    }

    #[test]
    fn natural_sort_orders_digit_runs_numerically() {
        let mut entries = vec![
            entry("file10", EntryKind::Regular, Some(1)),
            entry("file2", EntryKind::Regular, Some(1)),
        ];
        sort_entries(&mut entries, SortColumn::Name, SortOrder::Ascending);
        assert_eq!(entries[0].name, "file2");
        assert_eq!(entries[1].name, "file10");
    }

    #[test]
    fn directories_sort_before_files_regardless_of_name() {
        let mut entries = vec![
            entry("zzz_file", EntryKind::Regular, Some(1)),
            entry("aaa_dir", EntryKind::Directory, None),
        ];
        sort_entries(&mut entries, SortColumn::Name, SortOrder::Ascending);
        assert_eq!(entries[0].name, "aaa_dir");
    }

    #[test]
    fn descending_reverses_both_the_comparison_and_dir_precedence() {
        // A `reverse` flag inverts both the directories-first rule and the
        // comparison, so files come first and sort from Z to A.
        let mut entries = vec![
            entry("a_dir", EntryKind::Directory, None),
            entry("b_file", EntryKind::Regular, Some(1)),
            entry("c_dir", EntryKind::Directory, None),
        ];
        sort_entries(&mut entries, SortColumn::Name, SortOrder::Descending);
        assert_eq!(entries[0].name, "b_file");
        assert_eq!(entries[1].name, "c_dir");
        assert_eq!(entries[2].name, "a_dir");
    }
}
