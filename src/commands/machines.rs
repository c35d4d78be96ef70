// Machine command handlers
use crate::models::{ApiEnvelope, CommandOutcome, Machine, MachineFlags};
use crate::orchestrator::Orchestrator;

pub fn list_machines(orchestrator: &Orchestrator) -> ApiEnvelope<Vec<Machine>> {
    ApiEnvelope::ok(orchestrator.list_machines())
}

pub async fn upsert_machine(orchestrator: &Orchestrator, machine: Machine) -> ApiEnvelope<Machine> {
    orchestrator.upsert_machine(machine).await.into()
}

pub fn set_machine_flags(orchestrator: &Orchestrator, uid: String, flags: MachineFlags) -> ApiEnvelope<Machine> {
    orchestrator.set_machine_flags(&uid, flags).into()
}

pub async fn remove_machine(orchestrator: &Orchestrator, uid: String) -> ApiEnvelope<Machine> {
    orchestrator.remove_machine(&uid).await.into()
}

/// Re-sends AddMachine from the stored address.
pub async fn register_machine(orchestrator: &Orchestrator, uid: String) -> ApiEnvelope<CommandOutcome> {
    orchestrator.gateway().register_machine(&uid).await.into()
}
