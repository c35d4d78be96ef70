//! Logging setup for the orchestrator
//! Routes the `log` facade to a dated file and handles 7-day retention

use crate::utils::get_logs_dir;
use log::info;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::time::{Duration, SystemTime};

const LOG_RETENTION_DAYS: u64 = 7;
const DEFAULT_FILTER: &str = "info";

/// Installs `env_logger` once. `RUST_LOG` overrides the default filter.
/// Falls back to stderr when the log file cannot be opened.
pub fn init_logging() {
    let logs_dir = get_logs_dir();
    let file_name = format!("orchestrator-{}.log", chrono::Local::now().format("%Y-%m-%d"));

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_FILTER));

    let file = fs::create_dir_all(&logs_dir).ok().and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(logs_dir.join(&file_name))
            .ok()
    });

    if let Some(file) = file {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    // A second init (tests, embedding apps) keeps the first logger.
    let _ = builder.try_init();
}

pub fn cleanup_old_logs() {
    cleanup_logs_in(&get_logs_dir(), SystemTime::now());
}

fn cleanup_logs_in(logs_dir: &Path, now: SystemTime) -> usize {
    if !logs_dir.exists() {
        return 0;
    }

    let retention = Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);
    let mut removed = 0;

    let Ok(entries) = fs::read_dir(logs_dir) else {
        return 0;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "log") {
            continue;
        }

        let age = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());

        if matches!(age, Some(age) if age > retention) && fs::remove_file(&path).is_ok() {
            info!("Cleaned up old log: {:?}", path.file_name());
            removed += 1;
        }
    }

    removed
}
