// Bridge command data models
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every operation the bridge understands. Names match the bridge's
/// `dataType` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    #[serde(rename = "GetOPStatus")]
    GetOpStatus,
    GetProgListInfo,
    GetActivateProgInfo,
    GetMotorTemperature,
    GetToolLifeInfo,
    GetMachineList,
    GetProgDataInfo,
    UpdateProgram,
    UpdateToolLife,
    UpdateActivateProg,
    DeleteProgram,
    ResetButton,
    StartMachining,
    DeleteMachine,
    AddMachine,
}

impl CommandKind {
    pub const ALL: [CommandKind; 15] = [
        CommandKind::GetOpStatus,
        CommandKind::GetProgListInfo,
        CommandKind::GetActivateProgInfo,
        CommandKind::GetMotorTemperature,
        CommandKind::GetToolLifeInfo,
        CommandKind::GetMachineList,
        CommandKind::GetProgDataInfo,
        CommandKind::UpdateProgram,
        CommandKind::UpdateToolLife,
        CommandKind::UpdateActivateProg,
        CommandKind::DeleteProgram,
        CommandKind::ResetButton,
        CommandKind::StartMachining,
        CommandKind::DeleteMachine,
        CommandKind::AddMachine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::GetOpStatus => "GetOPStatus",
            CommandKind::GetProgListInfo => "GetProgListInfo",
            CommandKind::GetActivateProgInfo => "GetActivateProgInfo",
            CommandKind::GetMotorTemperature => "GetMotorTemperature",
            CommandKind::GetToolLifeInfo => "GetToolLifeInfo",
            CommandKind::GetMachineList => "GetMachineList",
            CommandKind::GetProgDataInfo => "GetProgDataInfo",
            CommandKind::UpdateProgram => "UpdateProgram",
            CommandKind::UpdateToolLife => "UpdateToolLife",
            CommandKind::UpdateActivateProg => "UpdateActivateProg",
            CommandKind::DeleteProgram => "DeleteProgram",
            CommandKind::ResetButton => "ResetButton",
            CommandKind::StartMachining => "StartMachining",
            CommandKind::DeleteMachine => "DeleteMachine",
            CommandKind::AddMachine => "AddMachine",
        }
    }

    /// Status-style reads that share the per-(uid, kind) cooldown and backoff.
    pub fn is_cooldown_guarded(&self) -> bool {
        matches!(
            self,
            CommandKind::GetOpStatus
                | CommandKind::GetProgListInfo
                | CommandKind::GetActivateProgInfo
                | CommandKind::GetMotorTemperature
                | CommandKind::GetToolLifeInfo
                | CommandKind::GetMachineList
        )
    }

    /// Commands that change controller state. These never overlap on one machine.
    pub fn is_control(&self) -> bool {
        !self.is_cooldown_guarded() && *self != CommandKind::GetProgDataInfo
    }

    /// Responses (or requests) of these kinds carry NC program text.
    pub fn carries_program_text(&self) -> bool {
        matches!(
            self,
            CommandKind::GetProgDataInfo | CommandKind::UpdateProgram
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        CommandKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("Unknown command kind: {}", trimmed))
    }
}

/// What a gateway call produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The bridge answered with a success code.
    Completed {
        kind: CommandKind,
        result_code: Option<i32>,
        data: serde_json::Value,
    },
    /// Dropped without contacting the bridge because the upstream asked us
    /// to back off. Background pollers treat this as "nothing new".
    Suppressed { kind: CommandKind },
}

impl CommandOutcome {
    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            CommandOutcome::Completed { data, .. } => Some(data),
            CommandOutcome::Suppressed { .. } => None,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, CommandOutcome::Suppressed { .. })
    }
}
