// Per-machine program queue with current/next slot projection
use crate::error::OrchestratorError;
use crate::file_manager::{read_json_file, remove_json_file, write_json_file};
use crate::models::{QueueItem, QueueItemDraft, QueueSource, SlotView};
use crate::utils::queue_snapshot_file_name;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type MachineQueue = Arc<Mutex<Vec<QueueItem>>>;

/// Ordered program queues, one per machine. Each machine's list has its own
/// lock, so mutations for one machine are serialized without touching others.
pub struct SlotQueue {
    dir: Option<PathBuf>,
    queues: Mutex<HashMap<String, MachineQueue>>,
}

impl SlotQueue {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Queue backed by one snapshot file per machine under `dir`. Existing
    /// snapshots are loaded; unreadable ones are skipped with a warning.
    pub fn persistent(dir: &Path) -> Result<Self, OrchestratorError> {
        fs::create_dir_all(dir)
            .map_err(|e| OrchestratorError::Persistence(format!("Failed to create {:?}: {}", dir, e)))?;

        let mut queues = HashMap::new();
        let entries = fs::read_dir(dir)
            .map_err(|e| OrchestratorError::Persistence(format!("Failed to read {:?}: {}", dir, e)))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match read_json_file::<Vec<QueueItem>>(&path) {
                Ok(items) => {
                    if let Some(machine_id) = items.first().map(|item| item.machine_id.clone()) {
                        queues.insert(machine_id, Arc::new(Mutex::new(items)));
                    }
                }
                Err(e) => warn!("Skipping queue snapshot {:?}: {}", path, e),
            }
        }

        info!("Loaded {} machine queue(s) from {:?}", queues.len(), dir);
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            queues: Mutex::new(queues),
        })
    }

    /// Appends to the tail.
    pub fn enqueue(&self, machine_id: &str, draft: QueueItemDraft) -> Result<QueueItem, OrchestratorError> {
        let mut item = QueueItem::from_draft(machine_id, draft, QueueSource::Upload);
        let item = self.mutate(machine_id, |items| {
            item.position = items.len();
            items.push(item.clone());
            Ok(item)
        })?;
        info!("Queued {} for {} ({})", item.file_name, machine_id, item.id);
        Ok(item)
    }

    /// Places the item right after the current slot. On an empty queue it
    /// becomes the current slot.
    pub fn insert_manual(&self, machine_id: &str, draft: QueueItemDraft) -> Result<QueueItem, OrchestratorError> {
        let mut item = QueueItem::from_draft(machine_id, draft, QueueSource::ManualInsert);
        let item = self.mutate(machine_id, |items| {
            item.position = items.len().min(1);
            items.insert(item.position, item.clone());
            Ok(item)
        })?;
        info!("Manually inserted {} for {} ({})", item.file_name, machine_id, item.id);
        Ok(item)
    }

    /// Replaces the whole queue with fresh items built from `drafts`, in order.
    pub fn replace(&self, machine_id: &str, drafts: Vec<QueueItemDraft>) -> Result<Vec<QueueItem>, OrchestratorError> {
        let replaced = self.mutate(machine_id, |items| {
            *items = drafts
                .into_iter()
                .map(|draft| QueueItem::from_draft(machine_id, draft, QueueSource::Upload))
                .collect();
            renumber(items);
            Ok(items.clone())
        })?;
        info!("Replaced queue for {} with {} item(s)", machine_id, replaced.len());
        Ok(replaced)
    }

    /// Reorders everything behind the current slot to follow `order` (item
    /// ids). The current slot never moves. Unknown or repeated ids are
    /// ignored; unlisted items keep their relative order after the listed ones.
    pub fn reorder(&self, machine_id: &str, order: &[String]) -> Result<Vec<QueueItem>, OrchestratorError> {
        self.mutate(machine_id, |items| {
            if items.len() > 2 {
                let mut rest: Vec<QueueItem> = items.drain(1..).collect();
                for id in order {
                    let id = id.trim();
                    if let Some(index) = rest.iter().position(|item| item.id.eq_ignore_ascii_case(id)) {
                        items.push(rest.remove(index));
                    }
                }
                items.append(&mut rest);
            }
            renumber(items);
            Ok(items.clone())
        })
    }

    pub fn get_slots(&self, machine_id: &str) -> SlotView {
        let queue = self.queue(machine_id);
        let items = queue.lock();
        SlotView::from_items(&items)
    }

    /// Consumes the current slot and returns it. Advancing an empty queue
    /// is a logic error upstream.
    pub fn advance(&self, machine_id: &str) -> Result<QueueItem, OrchestratorError> {
        let consumed = self.mutate(machine_id, |items| {
            if items.is_empty() {
                error!("Advance requested on empty queue for {}", machine_id);
                return Err(OrchestratorError::QueueInvariantViolation(format!(
                    "cannot advance empty queue for machine {}",
                    machine_id
                )));
            }
            Ok(items.remove(0))
        })?;
        info!("Advanced queue for {}: consumed {}", machine_id, consumed.file_name);
        Ok(consumed)
    }

    pub fn snapshot(&self, machine_id: &str) -> Vec<QueueItem> {
        self.queue(machine_id).lock().clone()
    }

    pub fn set_qty(&self, machine_id: &str, item_id: &str, qty: u32) -> Result<QueueItem, OrchestratorError> {
        if qty == 0 {
            return Err(OrchestratorError::malformed("set queue quantity", "qty", "must be >= 1"));
        }
        self.mutate(machine_id, |items| {
            let item = items
                .iter_mut()
                .find(|item| item.id == item_id)
                .ok_or_else(|| missing_item(machine_id, item_id))?;
            item.qty = qty;
            Ok(item.clone())
        })
    }

    pub fn remove(&self, machine_id: &str, item_id: &str) -> Result<QueueItem, OrchestratorError> {
        self.mutate(machine_id, |items| {
            let index = items
                .iter()
                .position(|item| item.id == item_id)
                .ok_or_else(|| missing_item(machine_id, item_id))?;
            Ok(items.remove(index))
        })
    }

    /// Holds or releases an item without moving it.
    pub fn set_paused(&self, machine_id: &str, item_id: &str, paused: bool) -> Result<QueueItem, OrchestratorError> {
        self.mutate(machine_id, |items| {
            let item = items
                .iter_mut()
                .find(|item| item.id == item_id)
                .ok_or_else(|| missing_item(machine_id, item_id))?;
            item.paused = paused;
            Ok(item.clone())
        })
    }

    /// Empties the queue and returns how many items were dropped.
    pub fn clear(&self, machine_id: &str) -> Result<usize, OrchestratorError> {
        self.mutate(machine_id, |items| {
            let dropped = items.len();
            items.clear();
            Ok(dropped)
        })
    }

    pub fn len(&self, machine_id: &str) -> usize {
        self.queue(machine_id).lock().len()
    }

    pub fn is_empty(&self, machine_id: &str) -> bool {
        self.len(machine_id) == 0
    }

    /// Non-empty queues by machine, each cut to its first `max_per_machine`
    /// items.
    pub fn snapshot_all(&self, max_per_machine: usize) -> BTreeMap<String, Vec<QueueItem>> {
        let queues: Vec<(String, MachineQueue)> = self
            .queues
            .lock()
            .iter()
            .map(|(machine_id, queue)| (machine_id.clone(), queue.clone()))
            .collect();

        queues
            .into_iter()
            .filter_map(|(machine_id, queue)| {
                let items: Vec<QueueItem> = queue.lock().iter().take(max_per_machine).cloned().collect();
                if items.is_empty() {
                    return None;
                }
                Some((machine_id, items))
            })
            .collect()
    }

    fn queue(&self, machine_id: &str) -> MachineQueue {
        self.queues
            .lock()
            .entry(machine_id.to_string())
            .or_default()
            .clone()
    }

    /// Single-writer step for one machine: edit a copy, renumber, persist,
    /// then commit. A failed write leaves the live list unchanged.
    fn mutate<T>(
        &self,
        machine_id: &str,
        change: impl FnOnce(&mut Vec<QueueItem>) -> Result<T, OrchestratorError>,
    ) -> Result<T, OrchestratorError> {
        let queue = self.queue(machine_id);
        let mut items = queue.lock();

        let mut next = items.clone();
        let out = change(&mut next)?;
        renumber(&mut next);

        self.persist(machine_id, &next)?;
        *items = next;
        debug!("Queue for {} now holds {} item(s)", machine_id, items.len());
        Ok(out)
    }

    fn persist(&self, machine_id: &str, items: &[QueueItem]) -> Result<(), OrchestratorError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(queue_snapshot_file_name(machine_id));
        let result = if items.is_empty() {
            remove_json_file(&path)
        } else {
            write_json_file(&path, &items)
        };
        result.map_err(OrchestratorError::Persistence)
    }
}

fn renumber(items: &mut [QueueItem]) {
    for (position, item) in items.iter_mut().enumerate() {
        item.position = position;
    }
}

fn missing_item(machine_id: &str, item_id: &str) -> OrchestratorError {
    error!("Queue item {} not found for {}", item_id, machine_id);
    OrchestratorError::QueueInvariantViolation(format!(
        "item {} is not queued for machine {}",
        item_id, machine_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str) -> QueueItemDraft {
        QueueItemDraft {
            file_name: name.to_string(),
            storage_key: format!("M1_{}", name),
            bucket: None,
            content_type: "text/plain".to_string(),
            size: 10,
            qty: 1,
            order_ref: None,
        }
    }

    fn names(queue: &SlotQueue) -> Vec<String> {
        queue
            .snapshot("M1")
            .into_iter()
            .map(|item| item.file_name)
            .collect()
    }

    #[test]
    fn test_slot_projection_for_various_lengths() {
        for n in [0usize, 1, 2, 5] {
            let queue = SlotQueue::in_memory();
            for i in 0..n {
                queue.enqueue("M1", draft(&format!("job{}.nc", i))).unwrap();
            }
            let items = queue.snapshot("M1");
            let slots = queue.get_slots("M1");

            assert_eq!(slots.current_slot.is_none(), n == 0, "n = {}", n);
            assert_eq!(slots.next_slot.is_none(), n < 2, "n = {}", n);
            assert_eq!(slots.current_slot.as_ref(), items.first());
            assert_eq!(slots.next_slot.as_ref(), items.get(1));
        }
    }

    #[test]
    fn test_manual_insert_never_displaces_current() {
        let queue = SlotQueue::in_memory();
        for name in ["A", "B", "C"] {
            queue.enqueue("M1", draft(name)).unwrap();
        }
        let current_id = queue.get_slots("M1").current_slot.unwrap().id;

        let x = queue.insert_manual("M1", draft("X")).unwrap();

        assert_eq!(names(&queue), ["A", "X", "B", "C"]);
        let slots = queue.get_slots("M1");
        assert_eq!(slots.current_slot.unwrap().id, current_id);
        assert_eq!(slots.next_slot.unwrap().id, x.id);
        assert_eq!(x.position, 1);
        assert_eq!(x.source, QueueSource::ManualInsert);
    }

    #[test]
    fn test_manual_insert_into_empty_queue_becomes_current() {
        let queue = SlotQueue::in_memory();
        let item = queue.insert_manual("M1", draft("job1.nc")).unwrap();
        assert_eq!(item.position, 0);
        assert_eq!(queue.get_slots("M1").current_slot.unwrap().id, item.id);
    }

    #[test]
    fn test_advance_promotes_next_and_rejects_empty() {
        let queue = SlotQueue::in_memory();
        queue.enqueue("M1", draft("A")).unwrap();
        queue.enqueue("M1", draft("B")).unwrap();

        assert_eq!(queue.advance("M1").unwrap().file_name, "A");
        let current = queue.get_slots("M1").current_slot.unwrap();
        assert_eq!(current.file_name, "B");
        assert_eq!(current.position, 0);

        queue.advance("M1").unwrap();
        assert!(matches!(
            queue.advance("M1"),
            Err(OrchestratorError::QueueInvariantViolation(_))
        ));
    }

    #[test]
    fn test_qty_remove_and_clear() {
        let queue = SlotQueue::in_memory();
        let a = queue.enqueue("M1", draft("A")).unwrap();
        let b = queue.enqueue("M1", draft("B")).unwrap();
        queue.enqueue("M2", draft("other")).unwrap();

        assert_eq!(queue.set_qty("M1", &a.id, 4).unwrap().qty, 4);
        assert!(queue.set_qty("M1", &a.id, 0).is_err());
        assert!(matches!(
            queue.remove("M1", "missing"),
            Err(OrchestratorError::QueueInvariantViolation(_))
        ));

        queue.remove("M1", &a.id).unwrap();
        assert_eq!(queue.snapshot("M1")[0].id, b.id);
        assert_eq!(queue.snapshot("M1")[0].position, 0);

        assert_eq!(queue.clear("M1").unwrap(), 1);
        assert!(queue.is_empty("M1"));
        assert_eq!(queue.len("M2"), 1);
    }

    #[test]
    fn test_persistent_queue_reloads() {
        let dir = std::env::temp_dir().join(format!("cnc-orchestrator-queues-{}", uuid::Uuid::new_v4()));
        {
            let queue = SlotQueue::persistent(&dir).unwrap();
            queue.enqueue("M1", draft("A")).unwrap();
            queue.insert_manual("M1", draft("X")).unwrap();
            queue.enqueue("M2", draft("B")).unwrap();
            queue.clear("M2").unwrap();
        }

        let reloaded = SlotQueue::persistent(&dir).unwrap();
        assert_eq!(names(&reloaded), ["A", "X"]);
        assert!(reloaded.is_empty("M2"));
        assert!(!dir.join(queue_snapshot_file_name("M2")).exists());
    }

    #[test]
    fn test_similar_machine_ids_keep_separate_snapshots() {
        let dir = std::env::temp_dir().join(format!("cnc-orchestrator-queues-{}", uuid::Uuid::new_v4()));
        {
            let queue = SlotQueue::persistent(&dir).unwrap();
            queue.enqueue("M/1", draft("slash.nc")).unwrap();
            queue.enqueue("M_1", draft("underscore.nc")).unwrap();
            queue.enqueue("m_1", draft("lower.nc")).unwrap();
        }

        let reloaded = SlotQueue::persistent(&dir).unwrap();
        assert_eq!(reloaded.snapshot("M/1")[0].file_name, "slash.nc");
        assert_eq!(reloaded.snapshot("M_1")[0].file_name, "underscore.nc");
        assert_eq!(reloaded.snapshot("m_1")[0].file_name, "lower.nc");
    }

    #[test]
    fn test_reorder_keeps_current_slot() {
        let queue = SlotQueue::in_memory();
        let ids: Vec<String> = ["A", "B", "C", "D"]
            .iter()
            .map(|name| queue.enqueue("M1", draft(name)).unwrap().id)
            .collect();

        // current id, a repeat and an unknown id are ignored
        let order = vec![
            ids[3].to_uppercase(),
            ids[0].clone(),
            "missing".to_string(),
            ids[3].clone(),
        ];
        let reordered = queue.reorder("M1", &order).unwrap();

        assert_eq!(names(&queue), ["A", "D", "B", "C"]);
        let positions: Vec<usize> = reordered.iter().map(|item| item.position).collect();
        assert_eq!(positions, [0, 1, 2, 3]);
        assert_eq!(reordered, queue.snapshot("M1"));
    }

    #[test]
    fn test_paused_flag_and_replace() {
        let queue = SlotQueue::in_memory();
        let a = queue.enqueue("M1", draft("A")).unwrap();
        queue.enqueue("M1", draft("B")).unwrap();

        let held = queue.set_paused("M1", &a.id, true).unwrap();
        assert!(held.paused);
        assert_eq!(held.position, 0);
        assert!(queue.get_slots("M1").current_slot.unwrap().paused);
        assert!(queue.set_paused("M1", "missing", true).is_err());

        let replaced = queue.replace("M1", vec![draft("X"), draft("Y")]).unwrap();
        assert_eq!(names(&queue), ["X", "Y"]);
        assert_eq!(replaced[1].position, 1);
        assert!(replaced.iter().all(|item| !item.paused));
    }

    #[test]
    fn test_snapshot_all_skips_empty_and_caps() {
        let queue = SlotQueue::in_memory();
        for i in 0..3 {
            queue.enqueue("M1", draft(&format!("job{}.nc", i))).unwrap();
        }
        queue.enqueue("M2", draft("other.nc")).unwrap();
        queue.clear("M2").unwrap();
        let _ = queue.get_slots("M3");

        let all = queue.snapshot_all(2);
        assert_eq!(all.len(), 1);
        assert_eq!(all["M1"].len(), 2);
    }

    #[test]
    fn test_enqueue_returns_committed_item_under_contention() {
        let queue = Arc::new(SlotQueue::in_memory());
        for i in 0..50 {
            queue.enqueue("M1", draft(&format!("seed{}.nc", i))).unwrap();
        }

        let advancer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    queue.advance("M1").unwrap();
                }
            })
        };
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let item = queue.enqueue("M1", draft(&format!("w{}-{}.nc", t, i))).unwrap();
                        assert_eq!(item.machine_id, "M1");
                    }
                })
            })
            .collect();

        advancer.join().unwrap();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(queue.len("M1"), 100);
    }
}
