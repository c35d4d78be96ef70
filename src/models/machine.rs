// Machine registry data models
use serde::{Deserialize, Serialize};

/// Network address the bridge uses to reach a CNC controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineAddress {
    pub host: String,
    pub port: u16,
}

impl Default for MachineAddress {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8193,
        }
    }
}

/// Operator permission switches for a machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MachineFlags {
    pub allow_job_start: bool,
    pub allow_program_delete: bool,
    pub allow_auto_machining: bool,
}

impl Default for MachineFlags {
    fn default() -> Self {
        Self {
            allow_job_start: true,
            allow_program_delete: true,
            allow_auto_machining: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    pub uid: String,
    pub name: String,
    pub address: MachineAddress,
    #[serde(default)]
    pub flags: MachineFlags,
    pub updated_at: String,
}

impl Machine {
    pub fn new(uid: String, address: MachineAddress) -> Self {
        Self {
            name: uid.clone(),
            uid,
            address,
            flags: MachineFlags::default(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
