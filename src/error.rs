//! Error taxonomy shared by every orchestration component.

use crate::models::CommandKind;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Cooldown or backoff window active for this (uid, kind).
    #[error("{kind} for machine {uid} is temporarily rate-limited")]
    RateLimited { uid: String, kind: CommandKind },

    /// The bridge forgot this machine. Re-registration has already been tried;
    /// the next call is expected to succeed.
    #[error("machine {uid} is not registered with the bridge (code {code}); re-registration attempted")]
    DeviceUnregistered { uid: String, code: i32 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid payload for {context}: `{field}` {reason}")]
    MalformedPayload {
        context: String,
        field: String,
        reason: String,
    },

    #[error("{message} (code {code})")]
    UpstreamRejected { code: i32, message: String },

    #[error("queue invariant violated: {0}")]
    QueueInvariantViolation(String),

    #[error("unknown machine: {0}")]
    UnknownMachine(String),

    #[error("{kind} is blocked by the permission flags of machine {uid}")]
    JobStartBlocked { uid: String, kind: CommandKind },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl OrchestratorError {
    pub fn malformed(context: impl Into<String>, field: impl Into<String>, reason: impl Into<String>) -> Self {
        OrchestratorError::MalformedPayload {
            context: context.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// HTTP-equivalent status for envelopes.
    pub fn status_code(&self) -> u16 {
        match self {
            OrchestratorError::RateLimited { .. } => 429,
            OrchestratorError::MalformedPayload { .. } => 400,
            OrchestratorError::UnknownMachine(_) => 404,
            OrchestratorError::JobStartBlocked { .. } => 403,
            OrchestratorError::DeviceUnregistered { .. } => 503,
            OrchestratorError::Transport(_) => 504,
            OrchestratorError::UpstreamRejected { .. } => 502,
            OrchestratorError::QueueInvariantViolation(_)
            | OrchestratorError::Storage(_)
            | OrchestratorError::Persistence(_) => 500,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            OrchestratorError::RateLimited { .. } => "rate_limited",
            OrchestratorError::DeviceUnregistered { .. } => "device_unregistered",
            OrchestratorError::Transport(_) => "transport_error",
            OrchestratorError::MalformedPayload { .. } => "malformed_payload",
            OrchestratorError::UpstreamRejected { .. } => "upstream_rejected",
            OrchestratorError::QueueInvariantViolation(_) => "queue_invariant_violation",
            OrchestratorError::UnknownMachine(_) => "unknown_machine",
            OrchestratorError::JobStartBlocked { .. } => "job_start_blocked",
            OrchestratorError::Storage(_) => "storage_error",
            OrchestratorError::Persistence(_) => "persistence_error",
        }
    }

    /// Recoverable locally; callers should not escalate these to the user.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            OrchestratorError::RateLimited { .. } | OrchestratorError::DeviceUnregistered { .. }
        )
    }
}
