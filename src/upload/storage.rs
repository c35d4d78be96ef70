// Object storage collaborator
use super::naming::make_storage_key;
use crate::error::OrchestratorError;
use crate::models::{DownloadLocation, UploadLocation};
use serde_json::{json, Value};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

const PRESIGN_TIMEOUT: Duration = Duration::from_secs(10);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);
const CHUNK_SIZE: usize = 64 * 1024;
const TRANSFER_CANCELLED: &str = "transfer cancelled";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("{0}")]
    Transport(String),
    #[error("storage returned HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("transfer cancelled")]
    Cancelled,
}

impl From<StorageError> for OrchestratorError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Transport(message) => OrchestratorError::Transport(message),
            other => OrchestratorError::Storage(other.to_string()),
        }
    }
}

/// Blocking object-storage operations. Transfers report `(sent, total)`
/// through `progress` and stop early once `cancel` is set.
pub trait ObjectStorage: Send + Sync {
    fn request_upload_location(
        &self,
        machine_id: &str,
        file_name: &str,
        content_type: &str,
        size: u64,
    ) -> Result<UploadLocation, StorageError>;

    fn transfer(
        &self,
        location: &UploadLocation,
        content_type: &str,
        bytes: &[u8],
        progress: &mut dyn FnMut(u64, u64),
        cancel: &AtomicBool,
    ) -> Result<(), StorageError>;

    fn request_download_location(&self, storage_key: &str) -> Result<DownloadLocation, StorageError>;
}

/// Reader over an in-memory body that reports progress per chunk and fails
/// once cancelled. The error kind must not be `Interrupted`: `io::copy` and
/// `read_to_end` retry that kind forever.
pub(crate) struct ProgressReader<'a, F: FnMut(u64, u64)> {
    bytes: &'a [u8],
    sent: usize,
    on_progress: F,
    cancel: &'a AtomicBool,
}

impl<'a, F: FnMut(u64, u64)> ProgressReader<'a, F> {
    pub(crate) fn new(bytes: &'a [u8], cancel: &'a AtomicBool, on_progress: F) -> Self {
        Self {
            bytes,
            sent: 0,
            on_progress,
            cancel,
        }
    }
}

impl<F: FnMut(u64, u64)> Read for ProgressReader<'_, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, TRANSFER_CANCELLED));
        }
        let remaining = &self.bytes[self.sent..];
        let n = remaining.len().min(buf.len()).min(CHUNK_SIZE);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.sent += n;
        if n > 0 {
            (self.on_progress)(self.sent as u64, self.bytes.len() as u64);
        }
        Ok(n)
    }
}

/// Presigned-URL storage behind the orchestration backend.
pub struct HttpStorage {
    base: Url,
    secret: Option<String>,
    agent: ureq::Agent,
}

impl HttpStorage {
    pub fn new(base_url: &str, secret: Option<String>) -> Result<Self, String> {
        let base = Url::parse(base_url.trim())
            .map_err(|e| format!("Invalid storage URL {}: {}", base_url, e))?;
        if base.cannot_be_a_base() {
            return Err(format!("Storage URL cannot be used as a base: {}", base_url));
        }
        Ok(Self {
            base,
            secret: secret.filter(|s| !s.is_empty()),
            agent: ureq::AgentBuilder::new().build(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Transport(format!("Invalid storage URL: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: ureq::Request) -> ureq::Request {
        match &self.secret {
            Some(secret) => request.set("X-Bridge-Secret", secret),
            None => request,
        }
    }
}

fn map_error(error: ureq::Error) -> StorageError {
    match error {
        ureq::Error::Status(status, response) => StorageError::Rejected {
            status,
            message: response
                .into_string()
                .unwrap_or_else(|_| "Unknown error".to_string()),
        },
        ureq::Error::Transport(transport) => StorageError::Transport(transport.to_string()),
    }
}

fn parse_data<T: serde::de::DeserializeOwned>(response: ureq::Response) -> Result<T, StorageError> {
    let body: Value = response
        .into_json()
        .map_err(|e| StorageError::Transport(format!("Failed to parse storage response: {}", e)))?;
    let data = body.get("data").cloned().unwrap_or(body);
    serde_json::from_value(data)
        .map_err(|e| StorageError::Transport(format!("Unexpected storage response: {}", e)))
}

impl ObjectStorage for HttpStorage {
    fn request_upload_location(
        &self,
        machine_id: &str,
        file_name: &str,
        content_type: &str,
        size: u64,
    ) -> Result<UploadLocation, StorageError> {
        let url = self.endpoint(&["api", "cnc", "machines", machine_id, "direct", "presign"])?;
        let body = json!({
            "fileName": file_name,
            "contentType": content_type,
            "fileSize": size,
            "key": make_storage_key(machine_id, file_name),
        });

        let request = self.authorized(self.agent.request_url("POST", &url).timeout(PRESIGN_TIMEOUT));
        let response = request.send_json(body).map_err(map_error)?;
        parse_data(response)
    }

    fn transfer(
        &self,
        location: &UploadLocation,
        content_type: &str,
        bytes: &[u8],
        progress: &mut dyn FnMut(u64, u64),
        cancel: &AtomicBool,
    ) -> Result<(), StorageError> {
        if cancel.load(Ordering::SeqCst) {
            return Err(StorageError::Cancelled);
        }

        let reader = ProgressReader::new(bytes, cancel, |sent, total| progress(sent, total));
        let result = self
            .agent
            .put(&location.upload_url)
            .timeout(TRANSFER_TIMEOUT)
            .set("Content-Type", content_type)
            .set("Content-Length", &bytes.len().to_string())
            .send(reader);

        match result {
            Ok(_) => Ok(()),
            Err(_) if cancel.load(Ordering::SeqCst) => Err(StorageError::Cancelled),
            Err(e) => Err(map_error(e)),
        }
    }

    fn request_download_location(&self, storage_key: &str) -> Result<DownloadLocation, StorageError> {
        let mut url = self.endpoint(&["api", "cnc", "direct", "presign-download"])?;
        url.query_pairs_mut().append_pair("s3Key", storage_key);

        let request = self.authorized(self.agent.request_url("GET", &url).timeout(PRESIGN_TIMEOUT));
        parse_data(request.call().map_err(map_error)?)
    }
}
