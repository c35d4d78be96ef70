// Settings command handlers - file-backed, partial updates
use crate::error::OrchestratorError;
use crate::file_manager::{read_json_file_or_default, write_json_file};
use crate::models::{ApiEnvelope, Settings};
use crate::orchestrator::Orchestrator;
use crate::utils::get_settings_json_path;
use log::debug;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSettingsParams {
    pub bridge_base_url: Option<String>,
    pub bridge_shared_secret: Option<String>,
    pub storage_base_url: Option<String>,
    pub cooldown_secs: Option<u64>,
    pub backoff_secs: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub control_timeout_ms: Option<u64>,
    pub program_fetch_attempts: Option<u32>,
    pub program_fetch_retry_delay_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub poll_max_retries: Option<u32>,
    pub state_refresh_secs: Option<u64>,
    pub tick_stale_ms: Option<u64>,
}

/// Get current settings from the JSON file
pub fn get_settings() -> ApiEnvelope<Settings> {
    load_settings(&get_settings_json_path()).into()
}

/// Partially update settings, persist them, and hand them to the running
/// orchestrator.
pub fn update_settings(orchestrator: &Orchestrator, params: UpdateSettingsParams) -> ApiEnvelope<Settings> {
    let path = get_settings_json_path();
    let result = load_settings(&path)
        .and_then(|current| apply_update(current, params))
        .and_then(|updated| {
            write_json_file(&path, &updated).map_err(OrchestratorError::Persistence)?;
            Ok(updated)
        })
        .map(|updated| {
            orchestrator.apply_settings(updated.clone());
            debug!("Updated settings: {:?}", updated);
            updated
        });
    result.into()
}

pub(crate) fn load_settings(path: &Path) -> Result<Settings, OrchestratorError> {
    read_json_file_or_default(path).map_err(OrchestratorError::Persistence)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn positive<T: PartialOrd + Default>(field: &str, value: T) -> Result<T, OrchestratorError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(OrchestratorError::malformed("update settings", field, "must be > 0"))
    }
}

pub(crate) fn apply_update(mut current: Settings, params: UpdateSettingsParams) -> Result<Settings, OrchestratorError> {
    if let Some(bridge_base_url) = params.bridge_base_url {
        let url = non_empty(bridge_base_url)
            .ok_or_else(|| OrchestratorError::malformed("update settings", "bridge_base_url", "is required"))?;
        url::Url::parse(&url)
            .map_err(|e| OrchestratorError::malformed("update settings", "bridge_base_url", e.to_string()))?;
        current.bridge_base_url = url;
    }
    if let Some(secret) = params.bridge_shared_secret {
        current.bridge_shared_secret = non_empty(secret);
    }
    if let Some(storage_base_url) = params.storage_base_url {
        current.storage_base_url = non_empty(storage_base_url);
    }
    if let Some(cooldown_secs) = params.cooldown_secs {
        current.cooldown_secs = cooldown_secs;
    }
    if let Some(backoff_secs) = params.backoff_secs {
        current.backoff_secs = backoff_secs;
    }
    if let Some(read_timeout_ms) = params.read_timeout_ms {
        current.read_timeout_ms = positive("read_timeout_ms", read_timeout_ms)?;
    }
    if let Some(control_timeout_ms) = params.control_timeout_ms {
        current.control_timeout_ms = positive("control_timeout_ms", control_timeout_ms)?;
    }
    if let Some(attempts) = params.program_fetch_attempts {
        current.program_fetch_attempts = positive("program_fetch_attempts", attempts)?;
    }
    if let Some(delay) = params.program_fetch_retry_delay_ms {
        current.program_fetch_retry_delay_ms = delay;
    }
    if let Some(poll_interval_ms) = params.poll_interval_ms {
        current.poll_interval_ms = positive("poll_interval_ms", poll_interval_ms)?;
    }
    if let Some(poll_max_retries) = params.poll_max_retries {
        current.poll_max_retries = positive("poll_max_retries", poll_max_retries)?;
    }
    if let Some(state_refresh_secs) = params.state_refresh_secs {
        current.state_refresh_secs = positive("state_refresh_secs", state_refresh_secs)?;
    }
    if let Some(tick_stale_ms) = params.tick_stale_ms {
        current.tick_stale_ms = tick_stale_ms;
    }

    Ok(current)
}
