// Bridge collaborator interfaces
// The hardware bridge is an opaque request/response executor; everything the
// orchestrator needs from it goes through these traits.

pub mod codes;
pub mod http;

pub use codes::{is_unregistered, result_message, ALREADY_REGISTERED};
pub use http::HttpBridge;

use crate::error::OrchestratorError;
use crate::models::{CommandKind, ContinuousState, JobResult};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeRequest {
    pub uid: String,
    pub kind: CommandKind,
    pub payload: serde_json::Value,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeReply {
    /// DLL result code; `None` when the command has no result code.
    pub result_code: Option<i32>,
    pub data: serde_json::Value,
    pub message: Option<String>,
}

impl BridgeReply {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            result_code: Some(0),
            data,
            message: None,
        }
    }

    pub fn code(code: i32) -> Self {
        Self {
            result_code: Some(code),
            data: serde_json::Value::Null,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// The bridge itself answered 429.
    #[error("bridge is rate limiting requests")]
    RateLimited,
    #[error("{0}")]
    Transport(String),
    #[error("bridge returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
}

impl From<BridgeError> for OrchestratorError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Http { status, message } if (400..500).contains(&status) => {
                OrchestratorError::UpstreamRejected {
                    code: i32::from(status),
                    message,
                }
            }
            other => OrchestratorError::Transport(other.to_string()),
        }
    }
}

/// Executes one command against a machine. Blocking; callers run it on the
/// blocking pool with their own timeout.
pub trait Bridge: Send + Sync {
    fn request(&self, request: &BridgeRequest) -> Result<BridgeReply, BridgeError>;
}

pub trait JobResultSource: Send + Sync {
    fn fetch_job_result(&self, machine_id: &str, job_id: &str) -> Result<JobResult, BridgeError>;
}

/// Pull channel for the continuous-machining state.
pub trait StateSource: Send + Sync {
    fn fetch_continuous_state(&self, machine_id: &str) -> Result<ContinuousState, BridgeError>;
}
