// Job result polling for asynchronous bridge commands
use crate::bridge::JobResultSource;
use crate::models::{JobResult, JobStatus, Settings};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_retries: u32,
    pub request_timeout: Duration,
}

impl PollOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: Duration::from_millis(settings.poll_interval_ms),
            max_retries: settings.poll_max_retries.max(1),
            request_timeout: Duration::from_millis(settings.read_timeout_ms),
        }
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PollFailure {
    /// The job reached FAILED.
    Failed(JobResult),
    /// No terminal state within `max_retries` polls.
    Exhausted { attempts: u32 },
}

/// Cancels a running poll. Stopping is idempotent and also safe after the
/// poll finished on its own. Dropping the handle does not stop polling.
pub struct PollHandle {
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    /// True once a callback fired or `stop` was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Polls `(machine_id, job_id)` every `interval` until a terminal status.
/// Exactly one of the callbacks fires, at most once. PROCESSING replies and
/// transport errors both count toward `max_retries`.
pub fn poll_job_result<C, E>(
    source: Arc<dyn JobResultSource>,
    machine_id: &str,
    job_id: &str,
    on_complete: C,
    on_error: E,
    options: PollOptions,
) -> PollHandle
where
    C: FnOnce(JobResult) + Send + 'static,
    E: FnOnce(PollFailure) + Send + 'static,
{
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();
    let machine_id = machine_id.to_string();
    let job_id = job_id.to_string();

    let task = tokio::spawn(async move {
        let mut attempts = 0u32;
        debug!("Polling job {} on {}", job_id, machine_id);

        loop {
            tokio::time::sleep(options.interval).await;
            if flag.load(Ordering::SeqCst) {
                return;
            }

            let fetched = fetch(&source, &machine_id, &job_id, options.request_timeout).await;
            if flag.load(Ordering::SeqCst) {
                return;
            }

            match fetched {
                Ok(result) if result.status == JobStatus::Completed => {
                    if !flag.swap(true, Ordering::SeqCst) {
                        info!("Job {} on {} completed", job_id, machine_id);
                        on_complete(result);
                    }
                    return;
                }
                Ok(result) if result.status == JobStatus::Failed => {
                    if !flag.swap(true, Ordering::SeqCst) {
                        warn!("Job {} on {} failed", job_id, machine_id);
                        on_error(PollFailure::Failed(result));
                    }
                    return;
                }
                Ok(_) => attempts += 1,
                Err(e) => {
                    debug!("Poll {} for job {} failed: {}", attempts + 1, job_id, e);
                    attempts += 1;
                }
            }

            if attempts >= options.max_retries {
                if !flag.swap(true, Ordering::SeqCst) {
                    warn!(
                        "Gave up on job {} on {} after {} polls",
                        job_id, machine_id, attempts
                    );
                    on_error(PollFailure::Exhausted { attempts });
                }
                return;
            }
        }
    });

    PollHandle { stopped, task }
}

async fn fetch(
    source: &Arc<dyn JobResultSource>,
    machine_id: &str,
    job_id: &str,
    timeout: Duration,
) -> Result<JobResult, String> {
    let source = source.clone();
    let (machine_id, job_id) = (machine_id.to_string(), job_id.to_string());
    let task = tokio::task::spawn_blocking(move || source.fetch_job_result(&machine_id, &job_id));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result.map_err(|e| e.to_string()),
        Ok(Err(e)) => Err(format!("Poll task failed: {}", e)),
        Err(_) => Err(format!("Poll timed out after {}ms", timeout.as_millis())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeJobSource;
    use std::sync::atomic::AtomicUsize;

    fn fast(max_retries: u32) -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(5),
            max_retries,
            request_timeout: Duration::from_secs(1),
        }
    }

    struct Counters {
        completed: Arc<AtomicUsize>,
        errored: Arc<AtomicUsize>,
        exhausted_at: Arc<AtomicUsize>,
    }

    fn start(source: Arc<FakeJobSource>, options: PollOptions) -> (PollHandle, Counters) {
        let counters = Counters {
            completed: Arc::new(AtomicUsize::new(0)),
            errored: Arc::new(AtomicUsize::new(0)),
            exhausted_at: Arc::new(AtomicUsize::new(0)),
        };
        let completed = counters.completed.clone();
        let errored = counters.errored.clone();
        let exhausted_at = counters.exhausted_at.clone();

        let handle = poll_job_result(
            source,
            "M1",
            "job-1",
            move |_| {
                completed.fetch_add(1, Ordering::SeqCst);
            },
            move |failure| {
                errored.fetch_add(1, Ordering::SeqCst);
                if let PollFailure::Exhausted { attempts } = failure {
                    exhausted_at.store(attempts as usize, Ordering::SeqCst);
                }
            },
            options,
        );
        (handle, counters)
    }

    #[tokio::test]
    async fn test_always_processing_exhausts_after_max_retries() {
        let source = Arc::new(FakeJobSource::always(JobStatus::Processing));
        let (handle, counters) = start(source.clone(), fast(7));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(source.fetch_count(), 7);
        assert_eq!(counters.errored.load(Ordering::SeqCst), 1);
        assert_eq!(counters.exhausted_at.load(Ordering::SeqCst), 7);
        assert_eq!(counters.completed.load(Ordering::SeqCst), 0);
        assert!(handle.is_stopped());

        // Stop after natural termination is harmless.
        handle.stop();
        handle.stop();
    }

    #[tokio::test]
    async fn test_completes_on_third_poll_and_stops() {
        let source = Arc::new(FakeJobSource::completes_on(3));
        let (_handle, counters) = start(source.clone(), fast(300));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counters.completed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.errored.load(Ordering::SeqCst), 0);
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_status_reports_once() {
        let source = Arc::new(FakeJobSource::always(JobStatus::Failed));
        let (_handle, counters) = start(source.clone(), fast(300));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counters.errored.load(Ordering::SeqCst), 1);
        assert_eq!(counters.exhausted_at.load(Ordering::SeqCst), 0);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_count_as_attempts() {
        let source = Arc::new(FakeJobSource::failing());
        let (_handle, counters) = start(source.clone(), fast(4));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.fetch_count(), 4);
        assert_eq!(counters.exhausted_at.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stop_cancels_before_any_callback() {
        let source = Arc::new(FakeJobSource::always(JobStatus::Processing));
        let options = PollOptions {
            interval: Duration::from_millis(50),
            ..fast(300)
        };
        let (handle, counters) = start(source.clone(), options);

        handle.stop();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(source.fetch_count(), 0);
        assert_eq!(counters.errored.load(Ordering::SeqCst), 0);
        assert_eq!(counters.completed.load(Ordering::SeqCst), 0);
    }
}
