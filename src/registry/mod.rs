// Machine registry
// Persisted machine configuration, looked up by uid. The gateway reads
// addresses from here when it has to re-register a machine with the bridge.
use crate::error::OrchestratorError;
use crate::file_manager::{read_json_file_or_default, write_json_file};
use crate::models::{Machine, MachineAddress, MachineFlags};
use log::info;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

pub struct MachineRegistry {
    path: Option<PathBuf>,
    machines: RwLock<BTreeMap<String, Machine>>,
    membership: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MachineRegistry {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            machines: RwLock::new(BTreeMap::new()),
            membership: Mutex::new(HashMap::new()),
        }
    }

    /// Loads `machines.json`; a missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let machines: BTreeMap<String, Machine> =
            read_json_file_or_default(path).map_err(OrchestratorError::Persistence)?;
        info!("Loaded {} machine(s) from {:?}", machines.len(), path);

        Ok(Self {
            path: Some(path.to_path_buf()),
            machines: RwLock::new(machines),
            membership: Mutex::new(HashMap::new()),
        })
    }

    pub fn get(&self, uid: &str) -> Option<Machine> {
        self.machines.read().get(uid).cloned()
    }

    pub fn require(&self, uid: &str) -> Result<Machine, OrchestratorError> {
        self.get(uid)
            .ok_or_else(|| OrchestratorError::UnknownMachine(uid.to_string()))
    }

    pub fn list(&self) -> Vec<Machine> {
        self.machines.read().values().cloned().collect()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.machines.read().contains_key(uid)
    }

    /// Creates the machine or updates its address in place, keeping name and flags.
    pub fn upsert(&self, uid: &str, address: MachineAddress) -> Result<Machine, OrchestratorError> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(OrchestratorError::malformed("upsert machine", "uid", "is required"));
        }

        self.mutate(|machines| {
            let machine = machines
                .entry(uid.to_string())
                .and_modify(|existing| {
                    existing.address = address.clone();
                    existing.updated_at = chrono::Utc::now().to_rfc3339();
                })
                .or_insert_with(|| Machine::new(uid.to_string(), address.clone()));
            Ok(machine.clone())
        })
    }

    /// Replaces the whole record (operator edit screen).
    pub fn upsert_machine(&self, mut machine: Machine) -> Result<Machine, OrchestratorError> {
        machine.uid = machine.uid.trim().to_string();
        if machine.uid.is_empty() {
            return Err(OrchestratorError::malformed("upsert machine", "uid", "is required"));
        }
        if machine.name.trim().is_empty() {
            machine.name = machine.uid.clone();
        }
        machine.updated_at = chrono::Utc::now().to_rfc3339();

        self.mutate(|machines| {
            machines.insert(machine.uid.clone(), machine.clone());
            Ok(machine.clone())
        })
    }

    pub fn set_flags(&self, uid: &str, flags: MachineFlags) -> Result<Machine, OrchestratorError> {
        self.mutate(|machines| {
            let machine = machines
                .get_mut(uid)
                .ok_or_else(|| OrchestratorError::UnknownMachine(uid.to_string()))?;
            machine.flags = flags;
            machine.updated_at = chrono::Utc::now().to_rfc3339();
            Ok(machine.clone())
        })
    }

    /// Callers must check the machine has no queued items first.
    pub fn remove(&self, uid: &str) -> Result<Machine, OrchestratorError> {
        self.mutate(|machines| {
            machines
                .remove(uid)
                .ok_or_else(|| OrchestratorError::UnknownMachine(uid.to_string()))
        })
    }

    /// Per-machine guard held while something that depends on the machine
    /// existing (queue admission, removal) checks and acts. Holders may
    /// await while holding it.
    pub async fn membership(&self, uid: &str) -> OwnedMutexGuard<()> {
        let lock = self.membership.lock().entry(uid.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Applies `change` to a copy, persists it, then commits. A failed write
    /// leaves the in-memory registry untouched.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, Machine>) -> Result<T, OrchestratorError>,
    ) -> Result<T, OrchestratorError> {
        let mut machines = self.machines.write();
        let mut next = machines.clone();
        let out = change(&mut next)?;

        if let Some(path) = &self.path {
            write_json_file(path, &next).map_err(OrchestratorError::Persistence)?;
        }

        *machines = next;
        Ok(out)
    }
}
