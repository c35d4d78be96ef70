// Live state subscription for one machine
use super::tracker::{Applied, MachiningTracker, StateUpdate};
use crate::bridge::StateSource;
use crate::models::{ContinuousState, MachineEvent, Settings};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionConfig {
    pub refresh_interval: Duration,
    pub interpolation_interval: Duration,
    pub tick_stale: Duration,
    pub fetch_timeout: Duration,
}

impl SubscriptionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            refresh_interval: Duration::from_secs(settings.state_refresh_secs.max(1)),
            interpolation_interval: Duration::from_secs(1),
            tick_stale: Duration::from_millis(settings.tick_stale_ms),
            fetch_timeout: Duration::from_millis(settings.read_timeout_ms),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// One background task that merges the event stream, the interpolation
/// timer and the periodic pull into a single tracker, publishing every
/// visible change on a watch channel. The task ends once every receiver is
/// gone; dropping the subscription stops it as well.
pub struct MachiningSubscription {
    machine_id: String,
    state: Arc<watch::Sender<ContinuousState>>,
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MachiningSubscription {
    /// Starts the task and hands back its first observer. The subscription
    /// itself holds no receiver, so it lives only while observers do.
    pub fn spawn(
        machine_id: &str,
        source: Arc<dyn StateSource>,
        events: broadcast::Receiver<MachineEvent>,
        config: SubscriptionConfig,
    ) -> (Self, watch::Receiver<ContinuousState>) {
        let (tx, rx) = watch::channel(ContinuousState::idle(machine_id));
        let tx = Arc::new(tx);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            tracker: MachiningTracker::new(machine_id, config.tick_stale),
            source,
            tx: tx.clone(),
            config,
        };
        let task = tokio::spawn(worker.run(events, stop.clone()));
        info!("Subscribed to continuous state for {}", machine_id);

        let subscription = Self {
            machine_id: machine_id.to_string(),
            state: tx,
            stop,
            task,
        };
        (subscription, rx)
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn state(&self) -> ContinuousState {
        self.state.borrow().clone()
    }

    /// New observer. Check `is_active` afterwards: a task that just saw its
    /// last observer leave will not pick this one up.
    pub fn watch(&self) -> watch::Receiver<ContinuousState> {
        self.state.subscribe()
    }

    pub fn observers(&self) -> usize {
        self.state.receiver_count()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn is_active(&self) -> bool {
        !self.stop.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            debug!("Stopped continuous state subscription for {}", self.machine_id);
        }
        self.task.abort();
    }
}

impl Drop for MachiningSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    tracker: MachiningTracker,
    source: Arc<dyn StateSource>,
    tx: Arc<watch::Sender<ContinuousState>>,
    config: SubscriptionConfig,
}

impl Worker {
    async fn run(mut self, mut events: broadcast::Receiver<MachineEvent>, stop: Arc<AtomicBool>) {
        self.pull().await;

        let start = tokio::time::Instant::now();
        let mut interpolation =
            tokio::time::interval_at(start + self.config.interpolation_interval, self.config.interpolation_interval);
        let mut refresh = tokio::time::interval_at(start + self.config.refresh_interval, self.config.refresh_interval);
        interpolation.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut events_open = true;
        let tx = self.tx.clone();

        while !stop.load(Ordering::SeqCst) {
            tokio::select! {
                _ = tx.closed() => {
                    // Flag first, then recount: a concurrent `watch` either
                    // sees the flag or is counted here.
                    stop.store(true, Ordering::SeqCst);
                    if tx.receiver_count() == 0 {
                        info!("No observers left for {}, ending subscription", self.tracker.machine_id());
                        break;
                    }
                    stop.store(false, Ordering::SeqCst);
                }
                _ = interpolation.tick() => {
                    self.apply(StateUpdate::Interpolate);
                }
                _ = refresh.tick() => {
                    self.pull().await;
                }
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.on_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("{} missed {} machine event(s), refreshing", self.tracker.machine_id(), missed);
                        self.pull().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event stream closed for {}", self.tracker.machine_id());
                        events_open = false;
                    }
                },
            }
        }
    }

    async fn on_event(&mut self, event: MachineEvent) {
        if event.machine_id() != self.tracker.machine_id() {
            return;
        }
        let update = match event {
            MachineEvent::Tick(tick) => StateUpdate::Tick(tick),
            MachineEvent::Completed { machine_id } => StateUpdate::Completion { machine_id },
        };
        if self.apply(update) == Applied::RefreshRequired {
            self.pull().await;
        }
    }

    fn apply(&mut self, update: StateUpdate) -> Applied {
        let applied = self.tracker.apply(update, Instant::now());
        if matches!(applied, Applied::Changed | Applied::RefreshRequired) {
            self.tx.send_replace(self.tracker.state().clone());
        }
        applied
    }

    /// Failed pulls keep the last visible state.
    async fn pull(&mut self) {
        let source = self.source.clone();
        let machine_id = self.tracker.machine_id().to_string();
        let task = tokio::task::spawn_blocking(move || source.fetch_continuous_state(&machine_id));

        match tokio::time::timeout(self.config.fetch_timeout, task).await {
            Ok(Ok(Ok(state))) => {
                self.apply(StateUpdate::Refresh(state));
            }
            Ok(Ok(Err(e))) => warn!("Continuous state refresh for {} failed: {}", self.tracker.machine_id(), e),
            Ok(Err(e)) => warn!("Continuous state task for {} failed: {}", self.tracker.machine_id(), e),
            Err(_) => warn!("Continuous state refresh for {} timed out", self.tracker.machine_id()),
        }
    }
}
