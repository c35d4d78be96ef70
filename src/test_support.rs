// In-memory collaborators for unit tests
use crate::bridge::{Bridge, BridgeError, BridgeReply, BridgeRequest, JobResultSource, StateSource};
use crate::models::{CommandKind, ContinuousState, DownloadLocation, JobResult, JobStatus, UploadLocation};
use crate::upload::{make_storage_key, ObjectStorage, StorageError};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Bridge that answers from per-kind scripts, then with a default success.
pub(crate) struct FakeBridge {
    calls: Mutex<Vec<BridgeRequest>>,
    scripts: Mutex<HashMap<CommandKind, VecDeque<Result<BridgeReply, BridgeError>>>>,
    delay: Mutex<Option<Duration>>,
    in_flight: Mutex<InFlight>,
}

/// Concurrent requests per uid, with the highest counts seen.
#[derive(Default)]
struct InFlight {
    now: HashMap<String, usize>,
    peak: HashMap<String, usize>,
    total: usize,
    peak_total: usize,
}

impl FakeBridge {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    pub(crate) fn peak_in_flight(&self, uid: &str) -> usize {
        self.in_flight.lock().peak.get(uid).copied().unwrap_or(0)
    }

    pub(crate) fn peak_in_flight_total(&self) -> usize {
        self.in_flight.lock().peak_total
    }

    pub(crate) fn script(&self, kind: CommandKind, reply: Result<BridgeReply, BridgeError>) {
        self.scripts.lock().entry(kind).or_default().push_back(reply);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub(crate) fn calls_for(&self, kind: CommandKind) -> usize {
        self.calls.lock().iter().filter(|call| call.kind == kind).count()
    }

    pub(crate) fn last_call_for(&self, kind: CommandKind) -> Option<BridgeRequest> {
        self.calls.lock().iter().rev().find(|call| call.kind == kind).cloned()
    }
}

impl Bridge for FakeBridge {
    fn request(&self, request: &BridgeRequest) -> Result<BridgeReply, BridgeError> {
        self.calls.lock().push(request.clone());
        {
            let mut guard = self.in_flight.lock();
            let in_flight = &mut *guard;
            let now = in_flight.now.entry(request.uid.clone()).or_default();
            *now += 1;
            let peak = in_flight.peak.entry(request.uid.clone()).or_default();
            *peak = (*peak).max(*now);
            in_flight.total += 1;
            in_flight.peak_total = in_flight.peak_total.max(in_flight.total);
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        {
            let mut guard = self.in_flight.lock();
            let in_flight = &mut *guard;
            if let Some(now) = in_flight.now.get_mut(&request.uid) {
                *now -= 1;
            }
            in_flight.total -= 1;
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(&request.kind)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(match request.kind {
                CommandKind::GetProgDataInfo => BridgeReply::ok(json!({
                    "machineProgramData": {"headType": 0, "programNo": 1, "programData": "%\nO0001\n%"}
                })),
                kind => BridgeReply::ok(json!({"kind": kind.as_str()})),
            })
        })
    }
}

/// Storage that records each step and can fail transfers by file name.
pub(crate) struct FakeStorage {
    steps: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeStorage {
    pub(crate) fn new() -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn fail_transfer_for(&self, file_name: &str) {
        self.failing.lock().insert(file_name.to_string());
    }

    pub(crate) fn steps(&self) -> Vec<String> {
        self.steps.lock().clone()
    }
}

impl ObjectStorage for FakeStorage {
    fn request_upload_location(
        &self,
        machine_id: &str,
        file_name: &str,
        _content_type: &str,
        _size: u64,
    ) -> Result<UploadLocation, StorageError> {
        self.steps.lock().push(format!("presign:{}", file_name));
        let storage_key = make_storage_key(machine_id, file_name);
        Ok(UploadLocation {
            upload_url: format!("memory://{}", storage_key),
            storage_key,
            bucket: Some("test-bucket".to_string()),
        })
    }

    fn transfer(
        &self,
        location: &UploadLocation,
        _content_type: &str,
        bytes: &[u8],
        progress: &mut dyn FnMut(u64, u64),
        cancel: &AtomicBool,
    ) -> Result<(), StorageError> {
        if cancel.load(Ordering::SeqCst) {
            return Err(StorageError::Cancelled);
        }
        let file_name = self
            .steps
            .lock()
            .iter()
            .rev()
            .find_map(|step| step.strip_prefix("presign:").map(String::from))
            .unwrap_or_default();
        self.steps.lock().push(format!("transfer:{}", file_name));

        if self.failing.lock().contains(&file_name) {
            return Err(StorageError::Transport(format!("upload to {} failed", location.upload_url)));
        }
        progress(bytes.len() as u64, bytes.len() as u64);
        Ok(())
    }

    fn request_download_location(&self, storage_key: &str) -> Result<DownloadLocation, StorageError> {
        Ok(DownloadLocation {
            download_url: format!("memory://{}", storage_key),
            storage_key: storage_key.to_string(),
        })
    }
}

/// Job source that reports PROCESSING until a given poll, or errors.
pub(crate) struct FakeJobSource {
    fetches: AtomicUsize,
    status: Option<JobStatus>,
    completes_on: Option<usize>,
}

impl FakeJobSource {
    pub(crate) fn always(status: JobStatus) -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            status: Some(status),
            completes_on: None,
        }
    }

    pub(crate) fn completes_on(poll: usize) -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            status: Some(JobStatus::Processing),
            completes_on: Some(poll),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            status: None,
            completes_on: None,
        }
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl JobResultSource for FakeJobSource {
    fn fetch_job_result(&self, _machine_id: &str, job_id: &str) -> Result<JobResult, BridgeError> {
        let poll = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let status = match (self.status, self.completes_on) {
            (None, _) => return Err(BridgeError::Transport("connection refused".to_string())),
            (Some(_), Some(done)) if poll >= done => JobStatus::Completed,
            (Some(status), _) => status,
        };
        Ok(JobResult {
            status,
            ..JobResult::processing(job_id)
        })
    }
}

/// State source returning a settable state, optionally failing.
pub(crate) struct FakeStateSource {
    state: Mutex<ContinuousState>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl FakeStateSource {
    pub(crate) fn new(state: ContinuousState) -> Self {
        Self {
            state: Mutex::new(state),
            failing: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: ContinuousState) {
        *self.state.lock() = state;
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl StateSource for FakeStateSource {
    fn fetch_continuous_state(&self, _machine_id: &str) -> Result<ContinuousState, BridgeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("bridge offline".to_string()));
        }
        Ok(self.state.lock().clone())
    }
}
