pub mod bridge;
pub mod commands;
pub mod error;
pub mod file_manager;
pub mod gateway;
pub mod job_poller;
pub mod logging;
pub mod machining;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod slot_queue;
pub mod upload;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::OrchestratorError;
pub use models::ApiEnvelope;
pub use orchestrator::{Collaborators, Orchestrator};

use file_manager::initialize_json_file;
use log::info;
use models::{Machine, Settings};
use std::collections::BTreeMap;
use utils::{get_machines_json_path, get_settings_json_path, initialize_data_directories};

/// Creates the data directories and default JSON files on first run.
pub fn initialize_app_data() -> Result<(), String> {
    initialize_data_directories()?;

    initialize_json_file(&get_settings_json_path(), &Settings::default())?;
    initialize_json_file(&get_machines_json_path(), &BTreeMap::<String, Machine>::new())?;

    Ok(())
}

/// Full startup: data dirs, logging, log retention, settings, then the
/// orchestrator wired to the configured bridge. Call from inside a tokio
/// runtime.
pub fn bootstrap() -> Result<Orchestrator, String> {
    initialize_app_data()?;
    logging::init_logging();
    logging::cleanup_old_logs();

    let settings = commands::settings::load_settings(&get_settings_json_path()).map_err(|e| e.to_string())?;
    info!(
        "Starting CNC orchestrator {} against {}",
        env!("CARGO_PKG_VERSION"),
        settings.bridge_base_url
    );

    Orchestrator::from_settings(settings).map_err(|e| e.to_string())
}
