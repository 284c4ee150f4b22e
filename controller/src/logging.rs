use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::Mutex,
};

use heihei_common::Configuration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

pub const LOG_FILENAME: &str = "heihei.log";

/// Installs the global subscriber and returns the log file in use, if any.
///
/// Unless the configuration asks for stdout, records are appended to
/// [`LOG_FILENAME`] in `dir`; stdout is the fallback when it cannot be opened.
pub fn init(config: &Configuration, dir: &Path) -> Option<PathBuf> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if !config.log_to_stdout {
        let path = dir.join(LOG_FILENAME);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true)
                    .init();
                return Some(path);
            }
            Err(err) => {
                tracing_subscriber::fmt().with_env_filter(filter()).init();
                warn!("failed to open log file {}: {err}", path.display());
                return None;
            }
        }
    }

    tracing_subscriber::fmt().with_env_filter(filter()).init();
    None
}
