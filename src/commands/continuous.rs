// Continuous machining command handlers
use crate::models::{ApiEnvelope, ContinuousState, MachineEvent, QueueItem};
use crate::orchestrator::Orchestrator;
use tokio::sync::watch;

pub async fn get_continuous_state(orchestrator: &Orchestrator, machine_id: String) -> ApiEnvelope<ContinuousState> {
    orchestrator.get_continuous_state(&machine_id).await.into()
}

/// Starts (or joins) the machine's live subscription.
pub fn subscribe_continuous_state(
    orchestrator: &Orchestrator,
    machine_id: String,
) -> ApiEnvelope<watch::Receiver<ContinuousState>> {
    orchestrator.subscribe_continuous_state(&machine_id).into()
}

pub fn unsubscribe_continuous_state(orchestrator: &Orchestrator, machine_id: String) -> ApiEnvelope<bool> {
    ApiEnvelope::ok(orchestrator.unsubscribe(&machine_id))
}

/// Feeds one event from the machine event stream. A completion returns the
/// program that was consumed from the queue.
pub fn notify_machine_event(orchestrator: &Orchestrator, event: MachineEvent) -> ApiEnvelope<Option<QueueItem>> {
    orchestrator.handle_machine_event(event).into()
}
