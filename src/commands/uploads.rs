// Upload command handlers
use crate::models::{ApiEnvelope, DownloadLocation, QueueItem, UploadJob, UploadProgress};
use crate::orchestrator::Orchestrator;
use crate::upload::Placement;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Presign, transfer, then append to the machine queue.
pub async fn upload_and_enqueue(
    orchestrator: &Orchestrator,
    job: UploadJob,
    progress: Option<mpsc::Sender<UploadProgress>>,
    cancel: Arc<AtomicBool>,
) -> ApiEnvelope<QueueItem> {
    orchestrator
        .upload(job, Placement::Tail, progress, cancel)
        .await
        .into()
}

/// Same pipeline, but the program lands right after the current slot.
pub async fn upload_and_insert_manual(
    orchestrator: &Orchestrator,
    job: UploadJob,
    progress: Option<mpsc::Sender<UploadProgress>>,
    cancel: Arc<AtomicBool>,
) -> ApiEnvelope<QueueItem> {
    orchestrator
        .upload(job, Placement::AfterCurrent, progress, cancel)
        .await
        .into()
}

/// One envelope per file, in input order.
pub async fn upload_batch(
    orchestrator: &Orchestrator,
    jobs: Vec<UploadJob>,
    manual_insert: bool,
    progress: Option<mpsc::Sender<UploadProgress>>,
    cancel: Arc<AtomicBool>,
) -> Vec<ApiEnvelope<QueueItem>> {
    let placement = if manual_insert {
        Placement::AfterCurrent
    } else {
        Placement::Tail
    };
    orchestrator
        .upload_batch(jobs, placement, progress, cancel)
        .await
        .into_iter()
        .map(ApiEnvelope::from)
        .collect()
}

pub async fn request_download_location(
    orchestrator: &Orchestrator,
    storage_key: String,
) -> ApiEnvelope<DownloadLocation> {
    orchestrator.request_download_location(&storage_key).await.into()
}
