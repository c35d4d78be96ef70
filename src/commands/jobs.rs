// Job result command handlers
use crate::job_poller::{PollFailure, PollHandle};
use crate::models::{ApiEnvelope, JobResult};
use crate::orchestrator::Orchestrator;

/// Starts polling; keep the handle to cancel.
pub fn poll_job_result<C, E>(
    orchestrator: &Orchestrator,
    machine_id: String,
    job_id: String,
    on_complete: C,
    on_error: E,
) -> ApiEnvelope<PollHandle>
where
    C: FnOnce(JobResult) + Send + 'static,
    E: FnOnce(PollFailure) + Send + 'static,
{
    orchestrator
        .poll_job_result(&machine_id, &job_id, on_complete, on_error)
        .into()
}
