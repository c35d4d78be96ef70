// Typed command payloads
// Each bridge command gets one variant with a checked payload; raw JSON from
// callers is validated here, before anything reaches the transport.
use crate::error::OrchestratorError;
use crate::models::{CommandKind, MachineAddress};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Program location on the controller. `head_type` 0 is the main head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRef {
    pub head_type: i16,
    pub program_no: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramUpdate {
    pub head_type: i16,
    pub program_no: i32,
    pub program_data: String,
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetOpStatus,
    GetProgListInfo { head_type: i16 },
    GetActivateProgInfo,
    GetMotorTemperature,
    GetToolLifeInfo,
    GetMachineList,
    GetProgDataInfo(ProgramRef),
    UpdateProgram(ProgramUpdate),
    /// Tool-life rows are forwarded as the controller reported them.
    UpdateToolLife(Vec<Map<String, Value>>),
    UpdateActivateProg(ProgramRef),
    DeleteProgram(ProgramRef),
    ResetButton,
    StartMachining,
    DeleteMachine,
    AddMachine(MachineAddress),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::GetOpStatus => CommandKind::GetOpStatus,
            Command::GetProgListInfo { .. } => CommandKind::GetProgListInfo,
            Command::GetActivateProgInfo => CommandKind::GetActivateProgInfo,
            Command::GetMotorTemperature => CommandKind::GetMotorTemperature,
            Command::GetToolLifeInfo => CommandKind::GetToolLifeInfo,
            Command::GetMachineList => CommandKind::GetMachineList,
            Command::GetProgDataInfo(_) => CommandKind::GetProgDataInfo,
            Command::UpdateProgram(_) => CommandKind::UpdateProgram,
            Command::UpdateToolLife(_) => CommandKind::UpdateToolLife,
            Command::UpdateActivateProg(_) => CommandKind::UpdateActivateProg,
            Command::DeleteProgram(_) => CommandKind::DeleteProgram,
            Command::ResetButton => CommandKind::ResetButton,
            Command::StartMachining => CommandKind::StartMachining,
            Command::DeleteMachine => CommandKind::DeleteMachine,
            Command::AddMachine(_) => CommandKind::AddMachine,
        }
    }

    /// Builds a command from a caller's kind name and raw JSON payload.
    pub fn parse(kind: CommandKind, payload: &Value) -> Result<Command, OrchestratorError> {
        let ctx = kind.as_str();
        let command = match kind {
            CommandKind::GetOpStatus => Command::GetOpStatus,
            CommandKind::GetActivateProgInfo => Command::GetActivateProgInfo,
            CommandKind::GetMotorTemperature => Command::GetMotorTemperature,
            CommandKind::GetToolLifeInfo => Command::GetToolLifeInfo,
            CommandKind::GetMachineList => Command::GetMachineList,
            CommandKind::ResetButton => Command::ResetButton,
            CommandKind::StartMachining => Command::StartMachining,
            CommandKind::DeleteMachine => Command::DeleteMachine,
            CommandKind::GetProgListInfo => Command::GetProgListInfo {
                head_type: head_type_from(ctx, "payload", payload)?,
            },
            CommandKind::GetProgDataInfo => {
                let inner = payload
                    .get("machineProgramData")
                    .filter(|v| v.is_object())
                    .ok_or_else(|| OrchestratorError::malformed(ctx, "machineProgramData", "is required"))?;
                Command::GetProgDataInfo(program_ref(ctx, "machineProgramData.", inner)?)
            }
            CommandKind::UpdateProgram => {
                let program = program_ref(ctx, "", object(ctx, payload)?)?;
                let program_data = payload
                    .get("programData")
                    .and_then(Value::as_str)
                    .filter(|text| !text.trim().is_empty())
                    .ok_or_else(|| OrchestratorError::malformed(ctx, "programData", "must be a non-empty string"))?;
                Command::UpdateProgram(ProgramUpdate {
                    head_type: program.head_type,
                    program_no: program.program_no,
                    program_data: program_data.to_string(),
                    is_new: payload.get("isNew").and_then(Value::as_bool).unwrap_or(false),
                })
            }
            CommandKind::UpdateToolLife => {
                let rows = payload
                    .as_array()
                    .filter(|rows| !rows.is_empty())
                    .ok_or_else(|| OrchestratorError::malformed(ctx, "payload", "must be a non-empty tool list"))?;
                let tools = rows
                    .iter()
                    .enumerate()
                    .map(|(i, row)| {
                        row.as_object()
                            .cloned()
                            .ok_or_else(|| OrchestratorError::malformed(ctx, format!("payload[{}]", i), "must be an object"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Command::UpdateToolLife(tools)
            }
            CommandKind::UpdateActivateProg => {
                Command::UpdateActivateProg(program_ref(ctx, "", object(ctx, payload)?)?)
            }
            CommandKind::DeleteProgram => Command::DeleteProgram(program_ref(ctx, "", object(ctx, payload)?)?),
            CommandKind::AddMachine => {
                let host = payload
                    .get("ip")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .ok_or_else(|| OrchestratorError::malformed(ctx, "ip", "is required"))?;
                let port = match payload.get("port") {
                    None | Some(Value::Null) => MachineAddress::default().port,
                    Some(value) => value
                        .as_u64()
                        .and_then(|p| u16::try_from(p).ok())
                        .filter(|p| *p > 0)
                        .ok_or_else(|| OrchestratorError::malformed(ctx, "port", "must be between 1 and 65535"))?,
                };
                Command::AddMachine(MachineAddress {
                    host: host.to_string(),
                    port,
                })
            }
        };
        Ok(command)
    }

    /// Payload exactly as the bridge expects it for this command.
    pub fn wire_payload(&self) -> Value {
        match self {
            Command::GetProgListInfo { head_type } => json!(head_type),
            Command::GetProgDataInfo(program) => json!({ "machineProgramData": program }),
            Command::UpdateProgram(update) => json!(update),
            Command::UpdateToolLife(tools) => json!(tools),
            Command::UpdateActivateProg(program) | Command::DeleteProgram(program) => json!(program),
            Command::AddMachine(address) => json!({ "ip": address.host, "port": address.port }),
            _ => Value::Null,
        }
    }
}

fn object<'a>(ctx: &str, payload: &'a Value) -> Result<&'a Value, OrchestratorError> {
    if payload.is_object() {
        Ok(payload)
    } else {
        Err(OrchestratorError::malformed(ctx, "payload", "must be an object"))
    }
}

fn program_ref(ctx: &str, prefix: &str, value: &Value) -> Result<ProgramRef, OrchestratorError> {
    let field = format!("{}programNo", prefix);
    let program_no = value
        .get("programNo")
        .ok_or_else(|| OrchestratorError::malformed(ctx, field.as_str(), "is required"))?
        .as_i64()
        .ok_or_else(|| OrchestratorError::malformed(ctx, field.as_str(), "must be an integer"))?;
    if program_no <= 0 {
        return Err(OrchestratorError::malformed(ctx, field, "must be > 0"));
    }
    let program_no = i32::try_from(program_no)
        .map_err(|_| OrchestratorError::malformed(ctx, format!("{}programNo", prefix), "is out of range"))?;

    let head_type = match value.get("headType") {
        None | Some(Value::Null) => 0,
        Some(raw) => head_type_from(ctx, &format!("{}headType", prefix), raw)?,
    };

    Ok(ProgramRef { head_type, program_no })
}

/// Head types travel as JSON numbers or numeric strings; the bridge wants
/// a 16-bit value. A missing value means the main head.
fn head_type_from(ctx: &str, field: &str, value: &Value) -> Result<i16, OrchestratorError> {
    let wide = match value {
        Value::Null => return Ok(0),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| OrchestratorError::malformed(ctx, field, "must be an integer"))?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| OrchestratorError::malformed(ctx, field, "must be a numeric string"))?,
        _ => return Err(OrchestratorError::malformed(ctx, field, "must be an integer")),
    };
    i16::try_from(wide).map_err(|_| OrchestratorError::malformed(ctx, field, "does not fit in 16 bits"))
}
