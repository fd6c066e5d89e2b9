//! Logging setup.
//!
//! Normal runs log warnings and above to stderr. `--debug` additionally
//! writes a verbose log under the user's home directory, matching the
//! original `-d/--debug` flag's behavior.

use std::io::Write;

use env_logger::Builder;
use log::LevelFilter;

/// Initializes the global logger. Safe to call once at process start.
pub fn init(debug: bool) {
    let mut builder = Builder::new();
    builder.format(|buf, record| {
        writeln!(buf, "{} [{}] {}", record.target(), record.level(), record.args())
    });

    if debug {
        builder.filter_level(LevelFilter::Debug);
        if let Some(path) = debug_log_path() {
            if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }
    } else {
        builder.filter_level(LevelFilter::Warn);
    }

    let _ = builder.try_init();
}

fn debug_log_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|home| home.join(".twinpane.log"))
}
