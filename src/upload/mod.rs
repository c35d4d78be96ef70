// Upload pipeline: presign, transfer, then queue
pub mod naming;
pub mod storage;

pub use naming::{make_storage_key, safe_file_stem};
pub use storage::{HttpStorage, ObjectStorage, StorageError};

use crate::error::OrchestratorError;
use crate::models::{DownloadLocation, QueueItem, QueueItemDraft, UploadJob, UploadLocation, UploadProgress};
use crate::registry::MachineRegistry;
use crate::slot_queue::SlotQueue;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Where a finished upload lands in the machine queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Tail,
    /// Manual insert: right after the current slot.
    AfterCurrent,
}

pub struct UploadPipeline {
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<SlotQueue>,
    registry: Arc<MachineRegistry>,
}

impl UploadPipeline {
    pub fn new(storage: Arc<dyn ObjectStorage>, queue: Arc<SlotQueue>, registry: Arc<MachineRegistry>) -> Self {
        Self {
            storage,
            queue,
            registry,
        }
    }

    pub async fn request_upload_location(
        &self,
        machine_id: &str,
        file_name: &str,
        content_type: &str,
        size: u64,
    ) -> Result<UploadLocation, OrchestratorError> {
        let storage = self.storage.clone();
        let (machine_id, file_name, content_type) =
            (machine_id.to_string(), file_name.to_string(), content_type.to_string());

        run_blocking(move || {
            storage.request_upload_location(&machine_id, &file_name, &content_type, size)
        })
        .await
    }

    pub async fn request_download_location(&self, storage_key: &str) -> Result<DownloadLocation, OrchestratorError> {
        let storage = self.storage.clone();
        let storage_key = storage_key.to_string();
        run_blocking(move || storage.request_download_location(&storage_key)).await
    }

    /// Writes the bytes to the presigned location. Progress is best-effort:
    /// updates are dropped when the receiver lags.
    pub async fn transfer(
        &self,
        location: UploadLocation,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        progress: Option<mpsc::Sender<UploadProgress>>,
        cancel: Arc<AtomicBool>,
    ) -> Result<(), OrchestratorError> {
        let storage = self.storage.clone();
        let file_name = file_name.to_string();
        let content_type = content_type.to_string();

        run_blocking(move || {
            let mut report = |sent: u64, total: u64| {
                if let Some(tx) = &progress {
                    let _ = tx.try_send(UploadProgress {
                        file_name: file_name.clone(),
                        sent,
                        total,
                    });
                }
            };
            storage.transfer(&location, &content_type, &bytes, &mut report, &cancel)
        })
        .await
    }

    /// Only step that touches the queue. Callers must have transferred first.
    /// The machine is re-checked under its membership guard, so a machine
    /// removed during the transfer never gets the item.
    pub async fn enqueue(
        &self,
        machine_id: &str,
        draft: QueueItemDraft,
        placement: Placement,
    ) -> Result<QueueItem, OrchestratorError> {
        let _membership = self.registry.membership(machine_id).await;
        self.registry.require(machine_id)?;
        match placement {
            Placement::Tail => self.queue.enqueue(machine_id, draft),
            Placement::AfterCurrent => self.queue.insert_manual(machine_id, draft),
        }
    }

    /// Full pipeline for one file. Any failure or cancellation before the
    /// final step leaves the queue untouched.
    pub async fn upload(
        &self,
        job: UploadJob,
        placement: Placement,
        progress: Option<mpsc::Sender<UploadProgress>>,
        cancel: Arc<AtomicBool>,
    ) -> Result<QueueItem, OrchestratorError> {
        if job.file_name.trim().is_empty() {
            return Err(OrchestratorError::malformed("upload", "fileName", "is required"));
        }
        if job.machine_id.trim().is_empty() {
            return Err(OrchestratorError::malformed("upload", "machineId", "is required"));
        }
        ensure_not_cancelled(&cancel)?;

        let size = job.bytes.len() as u64;
        let location = self
            .request_upload_location(&job.machine_id, &job.file_name, &job.content_type, size)
            .await?;
        debug!("Upload location for {} -> {}", job.file_name, location.storage_key);

        let UploadJob {
            machine_id,
            file_name,
            content_type,
            bytes,
            qty,
            order_ref,
        } = job;

        self.transfer(
            location.clone(),
            &file_name,
            &content_type,
            bytes,
            progress,
            cancel.clone(),
        )
        .await?;
        ensure_not_cancelled(&cancel)?;

        let draft = QueueItemDraft {
            file_name,
            storage_key: location.storage_key,
            bucket: location.bucket,
            content_type,
            size,
            qty,
            order_ref,
        };
        let item = self.enqueue(&machine_id, draft, placement).await?;
        info!(
            "Uploaded {} ({} bytes) to {} at position {}",
            item.file_name, item.size, machine_id, item.position
        );
        Ok(item)
    }

    /// Files run one after another and fail independently. With
    /// `AfterCurrent` each file is inserted right after the current slot,
    /// so the last file of the batch ends up next.
    pub async fn upload_batch(
        &self,
        jobs: Vec<UploadJob>,
        placement: Placement,
        progress: Option<mpsc::Sender<UploadProgress>>,
        cancel: Arc<AtomicBool>,
    ) -> Vec<Result<QueueItem, OrchestratorError>> {
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            let file_name = job.file_name.clone();
            let result = self.upload(job, placement, progress.clone(), cancel.clone()).await;
            if let Err(e) = &result {
                warn!("Upload of {} failed: {}", file_name, e);
            }
            results.push(result);
        }
        results
    }
}

fn ensure_not_cancelled(cancel: &AtomicBool) -> Result<(), OrchestratorError> {
    if cancel.load(Ordering::SeqCst) {
        Err(StorageError::Cancelled.into())
    } else {
        Ok(())
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, OrchestratorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| OrchestratorError::Storage(format!("Storage task failed: {}", e)))?
        .map_err(OrchestratorError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MachineAddress, QueueSource};
    use crate::test_support::FakeStorage;

    fn pipeline(storage: Arc<FakeStorage>) -> (UploadPipeline, Arc<SlotQueue>) {
        let queue = Arc::new(SlotQueue::in_memory());
        let registry = Arc::new(MachineRegistry::in_memory());
        registry.upsert("M1", MachineAddress::default()).unwrap();
        (UploadPipeline::new(storage, queue.clone(), registry), queue)
    }

    #[tokio::test]
    async fn test_upload_runs_three_steps_in_order() {
        let storage = Arc::new(FakeStorage::new());
        let (pipeline, queue) = pipeline(storage.clone());
        let (tx, mut rx) = mpsc::channel(16);

        let job = UploadJob::new("M1", "job1.nc", vec![1u8; 100]);
        let item = pipeline
            .upload(job, Placement::Tail, Some(tx), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(storage.steps(), ["presign:job1.nc", "transfer:job1.nc"]);
        assert!(item.storage_key.starts_with("M1_job1_"));
        assert_eq!(item.size, 100);
        assert_eq!(queue.len("M1"), 1);

        let last = rx.recv().await.unwrap();
        assert_eq!(last.total, 100);
    }

    #[tokio::test]
    async fn test_failed_transfer_never_enqueues() {
        let storage = Arc::new(FakeStorage::new());
        storage.fail_transfer_for("bad.nc");
        let (pipeline, queue) = pipeline(storage.clone());

        let jobs = vec![
            UploadJob::new("M1", "bad.nc", vec![0u8; 10]),
            UploadJob::new("M1", "good.nc", vec![0u8; 10]),
        ];
        let results = pipeline
            .upload_batch(jobs, Placement::Tail, None, Arc::new(AtomicBool::new(false)))
            .await;

        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().file_name, "good.nc");
        assert_eq!(queue.len("M1"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_queue_untouched() {
        let storage = Arc::new(FakeStorage::new());
        let (pipeline, queue) = pipeline(storage.clone());
        let cancel = Arc::new(AtomicBool::new(true));

        let result = pipeline
            .upload(UploadJob::new("M1", "job.nc", vec![1]), Placement::Tail, None, cancel)
            .await;

        assert!(matches!(result, Err(OrchestratorError::Storage(_))));
        assert!(storage.steps().is_empty());
        assert!(queue.is_empty("M1"));
    }

    #[tokio::test]
    async fn test_manual_insert_placement() {
        let storage = Arc::new(FakeStorage::new());
        let (pipeline, queue) = pipeline(storage);
        let cancel = Arc::new(AtomicBool::new(false));

        for name in ["A.nc", "B.nc"] {
            pipeline
                .upload(UploadJob::new("M1", name, vec![1]), Placement::Tail, None, cancel.clone())
                .await
                .unwrap();
        }
        let x = pipeline
            .upload(UploadJob::new("M1", "X.nc", vec![1]), Placement::AfterCurrent, None, cancel)
            .await
            .unwrap();

        assert_eq!(x.source, QueueSource::ManualInsert);
        assert_eq!(queue.get_slots("M1").next_slot.unwrap().id, x.id);
    }

    #[tokio::test]
    async fn test_rejects_missing_file_name() {
        let (pipeline, _) = pipeline(Arc::new(FakeStorage::new()));
        let result = pipeline
            .upload(UploadJob::new("M1", " ", vec![1]), Placement::Tail, None, Arc::new(AtomicBool::new(false)))
            .await;
        assert!(matches!(result, Err(OrchestratorError::MalformedPayload { .. })));
    }

    #[tokio::test]
    async fn test_machine_missing_at_enqueue_gets_nothing() {
        let storage = Arc::new(FakeStorage::new());
        let (pipeline, queue) = pipeline(storage.clone());

        let result = pipeline
            .upload(UploadJob::new("M9", "job.nc", vec![1]), Placement::Tail, None, Arc::new(AtomicBool::new(false)))
            .await;

        assert!(matches!(result, Err(OrchestratorError::UnknownMachine(_))));
        assert_eq!(storage.steps(), ["presign:job.nc", "transfer:job.nc"]);
        assert!(queue.is_empty("M9"));
    }
}
