// Caller-facing command handlers - one file per domain
pub mod bridge;
pub mod continuous;
pub mod jobs;
pub mod machines;
pub mod queue;
pub mod settings;
pub mod uploads;

pub use bridge::send_command;
pub use continuous::{get_continuous_state, notify_machine_event, subscribe_continuous_state, unsubscribe_continuous_state};
pub use jobs::poll_job_result;
pub use machines::{list_machines, register_machine, remove_machine, set_machine_flags, upsert_machine};
pub use queue::{
    advance_queue, clear_queue, get_all_queues, get_queue, get_slots, remove_queue_item, reorder_queue, replace_queue,
    set_queue_paused, set_queue_qty,
};
pub use settings::{get_settings, update_settings, UpdateSettingsParams};
pub use uploads::{request_download_location, upload_and_enqueue, upload_and_insert_manual, upload_batch};
