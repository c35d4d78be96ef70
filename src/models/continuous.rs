// Continuous machining data models
use serde::{Deserialize, Serialize};

/// Program slots the bridge alternates between while machining back to back.
pub const DEFAULT_CURRENT_SLOT: u32 = 3000;
pub const DEFAULT_NEXT_SLOT: u32 = 3001;

/// Live state of one machine as the bridge reports it (`/continuous/state`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousState {
    pub machine_id: String,
    pub current_slot: u32,
    pub next_slot: u32,
    pub is_running: bool,
    pub current_job: Option<String>,
    pub next_job: Option<String>,
    pub elapsed_seconds: u64,
}

impl ContinuousState {
    pub fn idle(machine_id: &str) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            current_slot: DEFAULT_CURRENT_SLOT,
            next_slot: DEFAULT_NEXT_SLOT,
            is_running: false,
            current_job: None,
            next_job: None,
            elapsed_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MachiningPhase {
    Idle,
    Running,
    Completed,
}

/// Push-channel progress report for a running job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachiningTick {
    pub machine_id: String,
    pub elapsed_seconds: u64,
    pub is_running: bool,
}

/// Events consumed from the machine event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MachineEvent {
    Tick(MachiningTick),
    Completed { machine_id: String },
}

impl MachineEvent {
    pub fn machine_id(&self) -> &str {
        match self {
            MachineEvent::Tick(tick) => &tick.machine_id,
            MachineEvent::Completed { machine_id } => machine_id,
        }
    }
}
