// Raw bridge command handler
use crate::error::OrchestratorError;
use crate::models::{ApiEnvelope, CommandKind, CommandOutcome};
use crate::orchestrator::Orchestrator;
use serde_json::Value;
use std::time::Duration;

/// Sends one command by its bridge name (`dataType`). Rate-limited calls
/// come back with status 429 so pollers can stay quiet.
pub async fn send_command(
    orchestrator: &Orchestrator,
    uid: String,
    data_type: String,
    payload: Option<Value>,
    timeout_ms: Option<u64>,
) -> ApiEnvelope<CommandOutcome> {
    let kind = match data_type.parse::<CommandKind>() {
        Ok(kind) => kind,
        Err(reason) => {
            return ApiEnvelope::from_error(&OrchestratorError::malformed("send command", "dataType", reason));
        }
    };
    let payload = payload.unwrap_or(Value::Null);
    let timeout = timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis);

    orchestrator
        .send_command(&uid, kind, &payload, timeout)
        .await
        .into()
}
