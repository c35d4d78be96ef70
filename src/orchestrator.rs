// Orchestrator state shared by every caller-facing command
use crate::bridge::{Bridge, HttpBridge, JobResultSource, StateSource};
use crate::error::OrchestratorError;
use crate::gateway::{Command, CommandGateway, GatewayConfig};
use crate::job_poller::{poll_job_result, PollFailure, PollHandle, PollOptions};
use crate::machining::{MachiningSubscription, SubscriptionConfig};
use crate::models::{
    CommandKind, CommandOutcome, ContinuousState, DownloadLocation, JobResult, Machine, MachineEvent,
    MachineFlags, QueueItem, QueueItemDraft, Settings, SlotView, UploadJob, UploadProgress,
};
use crate::registry::MachineRegistry;
use crate::slot_queue::SlotQueue;
use crate::upload::{HttpStorage, ObjectStorage, Placement, UploadPipeline};
use crate::utils::{get_machines_json_path, get_queues_dir};
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

const EVENT_BUFFER: usize = 256;

/// External systems the orchestrator talks to.
pub struct Collaborators {
    pub bridge: Arc<dyn Bridge>,
    pub job_results: Arc<dyn JobResultSource>,
    pub states: Arc<dyn StateSource>,
    pub storage: Arc<dyn ObjectStorage>,
    pub registry: Arc<MachineRegistry>,
    pub queue: Arc<SlotQueue>,
}

pub struct Orchestrator {
    gateway: CommandGateway,
    registry: Arc<MachineRegistry>,
    queue: Arc<SlotQueue>,
    uploads: UploadPipeline,
    job_results: Arc<dyn JobResultSource>,
    states: Arc<dyn StateSource>,
    events: broadcast::Sender<MachineEvent>,
    subscriptions: Mutex<HashMap<String, MachiningSubscription>>,
    settings: RwLock<Settings>,
}

impl Orchestrator {
    /// Production wiring: HTTP bridge and storage, registry and queues under
    /// the app data dir.
    pub fn from_settings(settings: Settings) -> Result<Self, OrchestratorError> {
        let bridge = Arc::new(
            HttpBridge::new(&settings.bridge_base_url, settings.bridge_shared_secret.clone())
                .map_err(OrchestratorError::Persistence)?,
        );
        let storage = Arc::new(
            HttpStorage::new(settings.storage_url(), settings.bridge_shared_secret.clone())
                .map_err(OrchestratorError::Persistence)?,
        );

        let collaborators = Collaborators {
            bridge: bridge.clone(),
            job_results: bridge.clone(),
            states: bridge,
            storage,
            registry: Arc::new(MachineRegistry::load(&get_machines_json_path())?),
            queue: Arc::new(SlotQueue::persistent(&get_queues_dir())?),
        };
        Ok(Self::with_collaborators(collaborators, settings))
    }

    pub fn with_collaborators(collaborators: Collaborators, settings: Settings) -> Self {
        let Collaborators {
            bridge,
            job_results,
            states,
            storage,
            registry,
            queue,
        } = collaborators;

        let gateway = CommandGateway::new(bridge, registry.clone(), GatewayConfig::from_settings(&settings));
        let uploads = UploadPipeline::new(storage, queue.clone(), registry.clone());
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            gateway,
            registry,
            queue,
            uploads,
            job_results,
            states,
            events,
            subscriptions: Mutex::new(HashMap::new()),
            settings: RwLock::new(settings),
        }
    }

    pub fn gateway(&self) -> &CommandGateway {
        &self.gateway
    }

    pub fn registry(&self) -> &Arc<MachineRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<SlotQueue> {
        &self.queue
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Gateway and subscription timings are fixed at construction; poll
    /// options are read per call and pick this up immediately.
    pub fn apply_settings(&self, settings: Settings) {
        *self.settings.write() = settings;
    }

    // Commands

    pub async fn send_command(
        &self,
        uid: &str,
        kind: CommandKind,
        payload: &Value,
        timeout: Option<Duration>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.gateway.send_raw(uid, kind, payload, timeout).await
    }

    // Machines

    pub fn list_machines(&self) -> Vec<Machine> {
        self.registry.list()
    }

    /// Saves the machine, then registers it with the bridge. A failed
    /// registration is only logged: the gateway re-registers on demand.
    pub async fn upsert_machine(&self, machine: Machine) -> Result<Machine, OrchestratorError> {
        let saved = self.registry.upsert_machine(machine)?;
        if let Err(e) = self.gateway.register_machine(&saved.uid).await {
            warn!("Saved {} but bridge registration failed: {}", saved.uid, e);
        }
        Ok(saved)
    }

    pub fn set_machine_flags(&self, uid: &str, flags: MachineFlags) -> Result<Machine, OrchestratorError> {
        self.registry.set_flags(uid, flags)
    }

    /// Refused while the machine still has queued programs. The membership
    /// guard keeps uploads from queueing between the check and the removal.
    pub async fn remove_machine(&self, uid: &str) -> Result<Machine, OrchestratorError> {
        let _membership = self.registry.membership(uid).await;
        self.registry.require(uid)?;
        let queued = self.queue.len(uid);
        if queued > 0 {
            return Err(OrchestratorError::QueueInvariantViolation(format!(
                "machine {} still has {} queued item(s)",
                uid, queued
            )));
        }

        if let Err(e) = self.gateway.send(uid, Command::DeleteMachine, None).await {
            warn!("Bridge DeleteMachine for {} failed: {}", uid, e);
        }
        self.unsubscribe(uid);
        let removed = self.registry.remove(uid)?;
        info!("Removed machine {}", uid);
        Ok(removed)
    }

    // Uploads and queue

    pub async fn upload(
        &self,
        job: UploadJob,
        placement: Placement,
        progress: Option<mpsc::Sender<UploadProgress>>,
        cancel: Arc<AtomicBool>,
    ) -> Result<QueueItem, OrchestratorError> {
        self.registry.require(&job.machine_id)?;
        self.uploads.upload(job, placement, progress, cancel).await
    }

    pub async fn upload_batch(
        &self,
        jobs: Vec<UploadJob>,
        placement: Placement,
        progress: Option<mpsc::Sender<UploadProgress>>,
        cancel: Arc<AtomicBool>,
    ) -> Vec<Result<QueueItem, OrchestratorError>> {
        let mut known = Vec::with_capacity(jobs.len());
        let mut rejected = HashMap::new();
        for (index, job) in jobs.into_iter().enumerate() {
            match self.registry.require(&job.machine_id) {
                Ok(_) => known.push((index, job)),
                Err(e) => {
                    rejected.insert(index, e);
                }
            }
        }

        let total = known.len() + rejected.len();
        let (indexes, jobs): (Vec<_>, Vec<_>) = known.into_iter().unzip();
        let mut uploaded: HashMap<usize, Result<QueueItem, OrchestratorError>> = indexes
            .into_iter()
            .zip(self.uploads.upload_batch(jobs, placement, progress, cancel).await)
            .collect();

        (0..total)
            .map(|index| match rejected.remove(&index) {
                Some(e) => Err(e),
                None => uploaded.remove(&index).unwrap_or_else(|| {
                    Err(OrchestratorError::Storage(format!("upload {} produced no result", index)))
                }),
            })
            .collect()
    }

    pub async fn request_download_location(&self, storage_key: &str) -> Result<DownloadLocation, OrchestratorError> {
        self.uploads.request_download_location(storage_key).await
    }

    pub fn get_slots(&self, machine_id: &str) -> Result<SlotView, OrchestratorError> {
        self.registry.require(machine_id)?;
        Ok(self.queue.get_slots(machine_id))
    }

    pub fn advance_queue(&self, machine_id: &str) -> Result<QueueItem, OrchestratorError> {
        self.registry.require(machine_id)?;
        self.queue.advance(machine_id)
    }

    /// Swaps the whole queue. Adds items, so it takes the membership guard.
    pub async fn replace_queue(
        &self,
        machine_id: &str,
        drafts: Vec<QueueItemDraft>,
    ) -> Result<Vec<QueueItem>, OrchestratorError> {
        let _membership = self.registry.membership(machine_id).await;
        self.registry.require(machine_id)?;
        self.queue.replace(machine_id, drafts)
    }

    // Machine events and live state

    /// Entry point for the machine event stream. Completion signals also
    /// consume the current slot.
    pub fn handle_machine_event(&self, event: MachineEvent) -> Result<Option<QueueItem>, OrchestratorError> {
        let completed = match &event {
            MachineEvent::Completed { machine_id } => Some(machine_id.clone()),
            MachineEvent::Tick(_) => None,
        };
        // No receivers just means nobody is subscribed.
        let _ = self.events.send(event);

        match completed {
            Some(machine_id) => {
                let consumed = self.queue.advance(&machine_id)?;
                Ok(Some(consumed))
            }
            None => Ok(None),
        }
    }

    /// Joins the machine's live subscription, starting one when none is
    /// running. The subscription ends by itself once every receiver is gone.
    pub fn subscribe_continuous_state(
        &self,
        machine_id: &str,
    ) -> Result<watch::Receiver<ContinuousState>, OrchestratorError> {
        self.registry.require(machine_id)?;
        let config = SubscriptionConfig::from_settings(&self.settings.read());

        let mut subscriptions = self.live_subscriptions();
        if let Some(existing) = subscriptions.get(machine_id) {
            let receiver = existing.watch();
            if existing.is_active() {
                return Ok(receiver);
            }
        }

        let (subscription, receiver) =
            MachiningSubscription::spawn(machine_id, self.states.clone(), self.events.subscribe(), config);
        subscriptions.insert(machine_id.to_string(), subscription);
        Ok(receiver)
    }

    /// Tears down the machine's subscription. Returns false when none existed.
    pub fn unsubscribe(&self, machine_id: &str) -> bool {
        self.subscriptions.lock().remove(machine_id).is_some()
    }

    /// Subscription map with finished tasks dropped.
    fn live_subscriptions(&self) -> MutexGuard<'_, HashMap<String, MachiningSubscription>> {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|machine_id, subscription| {
            let finished = subscription.is_finished();
            if finished {
                debug!("Pruning ended subscription for {}", machine_id);
            }
            !finished
        });
        subscriptions
    }

    /// Live state when subscribed, otherwise one pull from the bridge.
    pub async fn get_continuous_state(&self, machine_id: &str) -> Result<ContinuousState, OrchestratorError> {
        self.registry.require(machine_id)?;
        let live = self
            .live_subscriptions()
            .get(machine_id)
            .map(MachiningSubscription::state);
        if let Some(state) = live {
            return Ok(state);
        }

        let source = self.states.clone();
        let id = machine_id.to_string();
        let timeout = Duration::from_millis(self.settings.read().read_timeout_ms);
        let task = tokio::task::spawn_blocking(move || source.fetch_continuous_state(&id));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result.map_err(OrchestratorError::from),
            Ok(Err(e)) => Err(OrchestratorError::Transport(format!("State task failed: {}", e))),
            Err(_) => Err(OrchestratorError::Transport(format!(
                "Continuous state for {} timed out",
                machine_id
            ))),
        }
    }

    // Jobs

    pub fn poll_job_result<C, E>(
        &self,
        machine_id: &str,
        job_id: &str,
        on_complete: C,
        on_error: E,
    ) -> Result<PollHandle, OrchestratorError>
    where
        C: FnOnce(JobResult) + Send + 'static,
        E: FnOnce(PollFailure) + Send + 'static,
    {
        self.registry.require(machine_id)?;
        if job_id.trim().is_empty() {
            return Err(OrchestratorError::malformed("poll job result", "jobId", "is required"));
        }
        let options = PollOptions::from_settings(&self.settings.read());
        Ok(poll_job_result(
            self.job_results.clone(),
            machine_id,
            job_id,
            on_complete,
            on_error,
            options,
        ))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let count = self.subscriptions.get_mut().len();
        if count > 0 {
            info!("Stopping {} continuous state subscription(s)", count);
        }
    }
}
