// Caller-facing response envelope
use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};

/// Uniform success/error wrapper returned by every `commands::` function.
/// `status` mirrors an HTTP status so callers can stay quiet on 429.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub status: u16,
    pub data: Option<T>,
    pub message: Option<String>,
    pub error_kind: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            status: 200,
            data: Some(data),
            message: None,
            error_kind: None,
        }
    }

    pub fn from_error(error: &OrchestratorError) -> Self {
        Self {
            success: false,
            status: error.status_code(),
            data: None,
            message: Some(error.to_string()),
            error_kind: Some(error.kind_name().to_string()),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self.message.unwrap_or_else(|| "Unknown error".to_string())),
        }
    }
}

impl<T> From<Result<T, OrchestratorError>> for ApiEnvelope<T> {
    fn from(result: Result<T, OrchestratorError>) -> Self {
        match result {
            Ok(data) => ApiEnvelope::ok(data),
            Err(error) => ApiEnvelope::from_error(&error),
        }
    }
}
