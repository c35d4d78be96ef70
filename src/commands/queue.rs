// Slot queue command handlers
use crate::models::{ApiEnvelope, QueueItem, QueueItemDraft, SlotView};
use crate::orchestrator::Orchestrator;
use std::collections::BTreeMap;

const DEFAULT_SNAPSHOT_LIMIT: usize = 50;

pub fn get_slots(orchestrator: &Orchestrator, machine_id: String) -> ApiEnvelope<SlotView> {
    orchestrator.get_slots(&machine_id).into()
}

pub fn advance_queue(orchestrator: &Orchestrator, machine_id: String) -> ApiEnvelope<QueueItem> {
    orchestrator.advance_queue(&machine_id).into()
}

pub fn get_queue(orchestrator: &Orchestrator, machine_id: String) -> ApiEnvelope<Vec<QueueItem>> {
    orchestrator
        .registry()
        .require(&machine_id)
        .map(|_| orchestrator.queue().snapshot(&machine_id))
        .into()
}

pub fn set_queue_qty(
    orchestrator: &Orchestrator,
    machine_id: String,
    item_id: String,
    qty: u32,
) -> ApiEnvelope<QueueItem> {
    orchestrator.queue().set_qty(&machine_id, &item_id, qty).into()
}

pub fn remove_queue_item(orchestrator: &Orchestrator, machine_id: String, item_id: String) -> ApiEnvelope<QueueItem> {
    orchestrator.queue().remove(&machine_id, &item_id).into()
}

pub fn clear_queue(orchestrator: &Orchestrator, machine_id: String) -> ApiEnvelope<usize> {
    orchestrator.queue().clear(&machine_id).into()
}

/// Holds or releases one program without moving it.
pub fn set_queue_paused(
    orchestrator: &Orchestrator,
    machine_id: String,
    item_id: String,
    paused: bool,
) -> ApiEnvelope<QueueItem> {
    orchestrator.queue().set_paused(&machine_id, &item_id, paused).into()
}

/// Reorders everything behind the current slot by item id.
pub fn reorder_queue(orchestrator: &Orchestrator, machine_id: String, order: Vec<String>) -> ApiEnvelope<Vec<QueueItem>> {
    orchestrator
        .registry()
        .require(&machine_id)
        .and_then(|_| orchestrator.queue().reorder(&machine_id, &order))
        .into()
}

pub async fn replace_queue(
    orchestrator: &Orchestrator,
    machine_id: String,
    drafts: Vec<QueueItemDraft>,
) -> ApiEnvelope<Vec<QueueItem>> {
    orchestrator.replace_queue(&machine_id, drafts).await.into()
}

/// Every non-empty queue, at most `limit` items each (50 when unset).
pub fn get_all_queues(orchestrator: &Orchestrator, limit: Option<usize>) -> ApiEnvelope<BTreeMap<String, Vec<QueueItem>>> {
    ApiEnvelope::ok(orchestrator.queue().snapshot_all(limit.unwrap_or(DEFAULT_SNAPSHOT_LIMIT)))
}
