// Slot queue data models
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueSource {
    Upload,
    ManualInsert,
}

/// Everything needed to queue a stored program, before it gets an id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItemDraft {
    pub file_name: String,
    pub storage_key: String,
    pub bucket: Option<String>,
    pub content_type: String,
    pub size: u64,
    pub qty: u32,
    pub order_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub id: String,
    pub machine_id: String,
    pub file_name: String,
    pub storage_key: String,
    pub bucket: Option<String>,
    pub content_type: String,
    pub size: u64,
    pub qty: u32,
    pub order_ref: Option<String>,
    pub position: usize,
    pub source: QueueSource,
    /// Held items stay in place but are not started automatically.
    #[serde(default)]
    pub paused: bool,
    pub created_at: String,
}

impl QueueItem {
    pub fn from_draft(machine_id: &str, draft: QueueItemDraft, source: QueueSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            machine_id: machine_id.to_string(),
            file_name: draft.file_name,
            storage_key: draft.storage_key,
            bucket: draft.bucket,
            content_type: draft.content_type,
            size: draft.size,
            qty: draft.qty.max(1),
            order_ref: draft.order_ref,
            position: 0,
            source,
            paused: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Projection of a machine queue: head is loaded/running, second runs next.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SlotView {
    pub current_slot: Option<QueueItem>,
    pub next_slot: Option<QueueItem>,
}

impl SlotView {
    pub fn from_items(items: &[QueueItem]) -> Self {
        Self {
            current_slot: items.first().cloned(),
            next_slot: items.get(1).cloned(),
        }
    }
}
