//! Core engine for a two-panel, keyboard-driven terminal file manager.
//!
//! This crate owns the subsystems that do the hard work: scanning directory
//! trees, running resumable bulk copy/move/delete jobs, persisting job state
//! so a crash or SIGTERM can be resumed, and mounting compressed archives so
//! they behave like ordinary directories. Everything outside of that (the
//! TUI widgets, the syntax-highlighting viewer, the fuzzy finder) is an
//! external collaborator that talks to this crate only through the types in
//! [`progress`] and [`controller`].

#![deny(clippy::print_stdout, clippy::print_stderr)]
#![warn(unused_qualifications)]

pub mod archive_mount;
pub mod bookmarks;
pub mod cli;
pub mod config;
pub mod controller;
pub mod executor;
pub mod jpl;
pub mod listing;
pub mod logging;
pub mod path_translator;
pub mod progress;
pub mod scanner;

pub use config::Config;
pub use controller::Controller;
