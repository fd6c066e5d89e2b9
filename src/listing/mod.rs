//! Directory listing: enumerates a directory and classifies its entries for
//! display.

pub mod metadata;
pub mod reading;
pub mod sorting;

pub use metadata::{EntryKind, FileEntry};
pub use reading::{list_directory, ListingError};
pub use sorting::{sort_entries, SortColumn, SortOrder};
