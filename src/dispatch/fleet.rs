//! Fleet registry
//!
//! Owns one record per registered machine plus the adapter used to reach it.
//! Claims are compare-and-set under the registry lock: a machine holds at most
//! one job and a job is held by at most one machine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::FabError;
use crate::machines::{CanonicalState, MachineAdapter, MachineStatus, Vendor};
use crate::workflow::{JobId, MachineId, Method};

#[derive(Debug, Clone, PartialEq)]
pub struct MachineSpec {
    pub id: MachineId,
    pub name: String,
    pub method: Method,
    pub vendor: Vendor,
    pub build_volume: Option<[f64; 3]>,
}

impl MachineSpec {
    pub fn new(id: impl Into<String>, method: Method, vendor: Vendor) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: MachineId::new(id),
            method,
            vendor,
            build_volume: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_build_volume(mut self, build_volume: [f64; 3]) -> Self {
        self.build_volume = Some(build_volume);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MachineStats {
    pub jobs_dispatched: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineRecord {
    pub id: MachineId,
    pub name: String,
    pub method: Method,
    pub vendor: Vendor,
    pub build_volume: Option<[f64; 3]>,
    pub online: bool,
    /// Idle, online and holding no job as of the last poll
    pub available: bool,
    pub state: CanonicalState,
    pub reported: Option<String>,
    pub current_job: Option<JobId>,
    /// Artifact uploaded but `start` not yet accepted
    pub pending_start: bool,
    pub stats: MachineStats,
}

impl MachineRecord {
    fn from_spec(spec: MachineSpec) -> Self {
        Self {
            id: spec.id,
            name: spec.name,
            method: spec.method,
            vendor: spec.vendor,
            build_volume: spec.build_volume,
            online: false,
            available: false,
            state: CanonicalState::Unknown,
            reported: None,
            current_job: None,
            pending_start: false,
            stats: MachineStats::default(),
        }
    }

    fn refresh_availability(&mut self) {
        self.available =
            self.online && self.state == CanonicalState::Idle && self.current_job.is_none();
    }
}

struct Slot {
    record: MachineRecord,
    adapter: Arc<dyn MachineAdapter>,
}

#[derive(Default)]
pub struct FleetRegistry {
    slots: Mutex<Vec<Slot>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        spec: MachineSpec,
        adapter: Arc<dyn MachineAdapter>,
    ) -> Result<(), FabError> {
        let mut slots = self.slots.lock().await;
        if slots.iter().any(|slot| slot.record.id == spec.id) {
            return Err(FabError::Validation(format!(
                "machine {} is already registered",
                spec.id
            )));
        }
        info!(machine.id = %spec.id, method = %spec.method, vendor = ?spec.vendor, "Registered machine");
        slots.push(Slot {
            record: MachineRecord::from_spec(spec),
            adapter,
        });
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// Records in registration order.
    pub async fn snapshot(&self) -> Vec<MachineRecord> {
        self.slots
            .lock()
            .await
            .iter()
            .map(|slot| slot.record.clone())
            .collect()
    }

    pub async fn snapshot_method(&self, method: Method) -> Vec<MachineRecord> {
        self.slots
            .lock()
            .await
            .iter()
            .filter(|slot| slot.record.method == method)
            .map(|slot| slot.record.clone())
            .collect()
    }

    pub async fn get(&self, machine_id: &MachineId) -> Result<MachineRecord, FabError> {
        self.slots
            .lock()
            .await
            .iter()
            .find(|slot| &slot.record.id == machine_id)
            .map(|slot| slot.record.clone())
            .ok_or_else(|| FabError::machine_not_found(machine_id))
    }

    pub async fn adapter(&self, machine_id: &MachineId) -> Result<Arc<dyn MachineAdapter>, FabError> {
        self.slots
            .lock()
            .await
            .iter()
            .find(|slot| &slot.record.id == machine_id)
            .map(|slot| slot.adapter.clone())
            .ok_or_else(|| FabError::machine_not_found(machine_id))
    }

    /// Adapters of every machine serving `method`, or of the whole fleet.
    pub async fn adapters(
        &self,
        method: Option<Method>,
    ) -> Vec<(MachineId, Arc<dyn MachineAdapter>)> {
        self.slots
            .lock()
            .await
            .iter()
            .filter(|slot| method.map_or(true, |m| slot.record.method == m))
            .map(|slot| (slot.record.id.clone(), slot.adapter.clone()))
            .collect()
    }

    /// Apply a poll result; `None` means the machine did not answer in time.
    pub async fn record_poll(&self, machine_id: &MachineId, status: Option<&MachineStatus>) {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.iter_mut().find(|slot| &slot.record.id == machine_id) else {
            return;
        };
        let record = &mut slot.record;
        match status {
            Some(status) => {
                record.online = status.state != CanonicalState::Offline;
                record.state = status.state;
                record.reported = Some(status.reported.clone());
                record.stats.last_seen = Some(Utc::now());
            }
            None => {
                record.online = false;
                record.state = CanonicalState::Offline;
            }
        }
        record.refresh_availability();
    }

    pub async fn set_online(&self, machine_id: &MachineId, online: bool) {
        self.update(machine_id, |record| {
            record.online = online;
            if !online {
                record.state = CanonicalState::Offline;
            }
        })
        .await;
    }

    /// Reserve `machine_id` for `job_id` before any I/O happens.
    ///
    /// Fails if the machine already holds a job or the job is held elsewhere.
    pub async fn claim(&self, machine_id: &MachineId, job_id: &JobId) -> bool {
        let mut slots = self.slots.lock().await;
        if slots
            .iter()
            .any(|slot| slot.record.current_job.as_ref() == Some(job_id))
        {
            debug!(job.id = %job_id, "Job already held by a machine");
            return false;
        }
        let Some(slot) = slots.iter_mut().find(|slot| &slot.record.id == machine_id) else {
            return false;
        };
        if slot.record.current_job.is_some() {
            return false;
        }
        slot.record.current_job = Some(job_id.clone());
        slot.record.refresh_availability();
        true
    }

    /// Drop the claim if `machine_id` still holds `job_id`.
    pub async fn release(&self, machine_id: &MachineId, job_id: &JobId) -> bool {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.iter_mut().find(|slot| &slot.record.id == machine_id) else {
            return false;
        };
        if slot.record.current_job.as_ref() != Some(job_id) {
            return false;
        }
        slot.record.current_job = None;
        slot.record.pending_start = false;
        slot.record.refresh_availability();
        true
    }

    pub async fn holder_of(&self, job_id: &JobId) -> Option<MachineId> {
        self.slots
            .lock()
            .await
            .iter()
            .find(|slot| slot.record.current_job.as_ref() == Some(job_id))
            .map(|slot| slot.record.id.clone())
    }

    pub async fn set_pending_start(&self, machine_id: &MachineId, pending: bool) {
        self.update(machine_id, |record| record.pending_start = pending)
            .await;
    }

    pub async fn note_dispatched(&self, machine_id: &MachineId) {
        self.update(machine_id, |record| record.stats.jobs_dispatched += 1)
            .await;
    }

    pub async fn note_completed(&self, machine_id: &MachineId) {
        self.update(machine_id, |record| record.stats.jobs_completed += 1)
            .await;
    }

    pub async fn note_failed(&self, machine_id: &MachineId) {
        self.update(machine_id, |record| record.stats.jobs_failed += 1)
            .await;
    }

    async fn update(&self, machine_id: &MachineId, apply: impl FnOnce(&mut MachineRecord)) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|slot| &slot.record.id == machine_id) {
            apply(&mut slot.record);
            slot.record.refresh_availability();
        }
    }
}
