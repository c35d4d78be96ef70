// Upload pipeline data models
use serde::{Deserialize, Serialize};

/// Time-bounded write target handed out by object storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadLocation {
    pub upload_url: String,
    #[serde(alias = "s3Key")]
    pub storage_key: String,
    #[serde(default, alias = "s3Bucket")]
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLocation {
    pub download_url: String,
    #[serde(alias = "s3Key")]
    pub storage_key: String,
}

/// One local file headed for a machine queue.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub machine_id: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub qty: u32,
    pub order_ref: Option<String>,
}

impl UploadJob {
    pub fn new(machine_id: &str, file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            file_name: file_name.to_string(),
            content_type: String::from("application/octet-stream"),
            bytes,
            qty: 1,
            order_ref: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadProgress {
    pub file_name: String,
    pub sent: u64,
    pub total: u64,
}
