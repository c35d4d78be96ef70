// Settings data models
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub bridge_base_url: String,
    #[serde(default)]
    pub bridge_shared_secret: Option<String>,
    #[serde(default)]
    pub storage_base_url: Option<String>,
    pub cooldown_secs: u64,
    pub backoff_secs: u64,
    pub read_timeout_ms: u64,
    pub control_timeout_ms: u64,
    pub program_fetch_attempts: u32,
    pub program_fetch_retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_max_retries: u32,
    #[serde(default = "default_state_refresh_secs")]
    pub state_refresh_secs: u64,
    #[serde(default = "default_tick_stale_ms")]
    pub tick_stale_ms: u64,
}

fn default_state_refresh_secs() -> u64 {
    10
}

fn default_tick_stale_ms() -> u64 {
    1000
}

impl Settings {
    /// Storage falls back to the bridge host when no dedicated backend is set.
    pub fn storage_url(&self) -> &str {
        self.storage_base_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.bridge_base_url)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bridge_base_url: String::from("http://localhost:8002"),
            bridge_shared_secret: None,
            storage_base_url: None,
            cooldown_secs: 5,
            backoff_secs: 30,
            read_timeout_ms: 3000,
            control_timeout_ms: 5000,
            program_fetch_attempts: 3,
            program_fetch_retry_delay_ms: 200,
            poll_interval_ms: 1000,
            poll_max_retries: 300,
            state_refresh_secs: default_state_refresh_secs(),
            tick_stale_ms: default_tick_stale_ms(),
        }
    }
}
