//! Command-line argument parsing.
//!
//! Intentionally thin: this is the one external collaborator the core must
//! still own, since a binary needs *some* entry point to exercise it
//! end-to-end. Parsing has no business logic; it just hands a [`Cli`] to the
//! [`crate::controller::Controller`].

use std::path::{Path, PathBuf};

use clap::Parser;

/// A two-panel, keyboard-driven terminal file manager.
#[derive(Debug, Parser)]
#[command(name = "twinpane", disable_version_flag = true)]
pub struct Cli {
    /// Print the version and exit.
    #[arg(short = 'V', long = "version")]
    pub version: bool,

    /// On quit, write the focused panel's working directory to this file.
    #[arg(short = 'P', long = "printwd", value_name = "FILE")]
    pub printwd: Option<PathBuf>,

    /// Path to the job persistence database (default: under the user's data dir).
    #[arg(short = 'D', long = "database", value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Disable the job persistence layer entirely.
    #[arg(short = 'n', long = "nodb")]
    pub nodb: bool,

    /// Disable color output.
    #[arg(short = 'b', long = "nocolor")]
    pub nocolor: bool,

    /// Tab size used by the internal viewer.
    #[arg(short = 't', long = "tabsize", default_value_t = 4)]
    pub tabsize: u32,

    /// Write a debug log under the user's home directory.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Starting directory for the left panel.
    #[arg(value_name = "PATH")]
    pub start_path: Option<PathBuf>,
}

impl Cli {
    /// Path to a user config file to load instead of the platform default.
    /// No flag currently selects one; `Config::load` falls back to the
    /// platform default location when this is `None`.
    pub fn config_override(&self) -> Option<&Path> {
        None
    }
}
