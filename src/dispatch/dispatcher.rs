//! Fleet dispatcher
//!
//! A dispatch pass for one method polls that method's machines, reconciles
//! finished work, claims an idle machine for the next queued job and then
//! delivers the job's artifact: fetch, upload, readiness re-check, start and
//! stage advance. Passes for the same method are serialized; passes for
//! different methods run independently.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};

use crate::dispatch::fleet::{FleetRegistry, MachineRecord};
use crate::dispatch::outcome::{CancelReport, DispatchFailure, DispatchOutcome, DispatchStep};
use crate::error::FabError;
use crate::machines::{AdapterError, ArtifactStore, CanonicalState, MachineAdapter, MachineStatus};
use crate::telemetry::{create_dispatch_span, create_fleet_span, generate_correlation_id};
use crate::workflow::{
    JobId, JobQueue, MachineId, ManufacturingJob, Method, Stage, WorkflowStateMachine,
};

/// Timeouts applied to machine and artifact I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Bound on one status poll; a machine that misses it counts as offline
    pub poll_timeout: Duration,
    /// Bound on fetch, upload, start and the other adapter commands
    pub io_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(5000),
            io_timeout: Duration::from_secs(120),
        }
    }
}

type Polled = Vec<(MachineId, Option<MachineStatus>)>;

pub struct FleetDispatcher {
    workflow: Arc<WorkflowStateMachine>,
    fleet: Arc<FleetRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
    settings: DispatchSettings,
    method_locks: [Mutex<()>; 4],
}

fn lock_index(method: Method) -> usize {
    match method {
        Method::Fdm => 0,
        Method::Sls => 1,
        Method::Cfc => 2,
        Method::Cnc => 3,
    }
}

impl FleetDispatcher {
    pub fn new(
        workflow: Arc<WorkflowStateMachine>,
        fleet: Arc<FleetRegistry>,
        artifacts: Arc<dyn ArtifactStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            workflow,
            fleet,
            artifacts,
            settings,
            method_locks: Default::default(),
        }
    }

    pub fn workflow(&self) -> &Arc<WorkflowStateMachine> {
        &self.workflow
    }

    pub fn fleet(&self) -> &Arc<FleetRegistry> {
        &self.fleet
    }

    /// Run one dispatch pass for `method`.
    ///
    /// Machine and artifact failures come back as `DispatchOutcome::Failed`;
    /// `Err` is reserved for job store and workflow errors.
    pub async fn try_dispatch(&self, method: Method) -> Result<DispatchOutcome, FabError> {
        let _serial = self.method_locks[lock_index(method)].lock().await;
        let correlation_id = generate_correlation_id();
        let span = create_dispatch_span(method, &correlation_id);
        self.dispatch_pass(method).instrument(span).await
    }

    async fn dispatch_pass(&self, method: Method) -> Result<DispatchOutcome, FabError> {
        let polled = self.poll(method).await;
        for (machine_id, status) in &polled {
            self.fleet.record_poll(machine_id, status.as_ref()).await;
        }
        self.reconcile(&polled).await;

        let candidates: Vec<MachineRecord> = self
            .fleet
            .snapshot_method(method)
            .await
            .into_iter()
            .filter(|record| record.available)
            .collect();
        if candidates.is_empty() {
            debug!(method = %method, machines = polled.len(), "No idle machine available");
            return Ok(DispatchOutcome::NoCapacity);
        }

        let Some(job) = self.next_unclaimed(method).await? else {
            debug!(method = %method, "No queued job to dispatch");
            return Ok(DispatchOutcome::NothingToDispatch);
        };

        // Claim before any I/O; bounded by the number of machines polled
        let mut claimed = None;
        for record in candidates.iter().take(polled.len()) {
            if self.fleet.claim(&record.id, &job.job_id).await {
                claimed = Some(record.id.clone());
                break;
            }
            debug!(machine.id = %record.id, "Claim lost, trying next machine");
        }
        let Some(machine_id) = claimed else {
            return Ok(DispatchOutcome::NoCapacity);
        };
        info!(job.id = %job.job_id, machine.id = %machine_id, "Claimed machine for job");

        let adapter = self.fleet.adapter(&machine_id).await?;
        self.deliver(job, machine_id, adapter).await
    }

    async fn next_unclaimed(&self, method: Method) -> Result<Option<ManufacturingJob>, FabError> {
        let queued = self
            .workflow
            .query_by_stage(method, method.dispatch_stage())
            .await?;
        for job in JobQueue::ordered(&queued, method) {
            if self.fleet.holder_of(&job.job_id).await.is_none() {
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn deliver(
        &self,
        job: ManufacturingJob,
        machine_id: MachineId,
        adapter: Arc<dyn MachineAdapter>,
    ) -> Result<DispatchOutcome, FabError> {
        let file_name = job.artifact_file_name();

        let bytes = match job.source_artifact() {
            None => {
                return Ok(self
                    .fail(&job, &machine_id, DispatchStep::Fetch, "job has no source artifact".to_string())
                    .await)
            }
            Some(url) => match timeout(self.settings.io_timeout, self.artifacts.fetch(url)).await {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    return Ok(self
                        .fail(&job, &machine_id, DispatchStep::Fetch, e.to_string())
                        .await)
                }
                Err(_) => {
                    let reason = format!(
                        "artifact fetch timed out after {}s",
                        self.settings.io_timeout.as_secs()
                    );
                    return Ok(self.fail(&job, &machine_id, DispatchStep::Fetch, reason).await);
                }
            },
        };

        if let Err(e) = self.call("upload", adapter.upload(&bytes, &file_name)).await {
            return Ok(self
                .fail(&job, &machine_id, DispatchStep::Upload, e.to_string())
                .await);
        }
        debug!(job.id = %job.job_id, machine.id = %machine_id, file = %file_name, "Uploaded artifact");

        let ready = matches!(
            self.call("status", adapter.status()).await,
            Ok(MachineStatus {
                state: CanonicalState::Idle,
                ..
            })
        );
        if !ready {
            let note = format!("Uploaded {file_name} to {machine_id}; waiting for the machine to become idle");
            if let Some(outcome) = self.advance_dispatched(&job, &machine_id, &note, None).await? {
                return Ok(outcome);
            }
            self.fleet.set_pending_start(&machine_id, true).await;
            self.fleet.note_dispatched(&machine_id).await;
            warn!(job.id = %job.job_id, machine.id = %machine_id, "Machine busy after upload, start deferred");
            return Ok(DispatchOutcome::UploadedNotStarted {
                job_id: job.job_id,
                machine_id,
            });
        }

        if let Some(stage) = self.withdrawn(&job, &machine_id).await? {
            let reason = format!("job moved to {stage} while its artifact was in flight");
            return Ok(self
                .fail_at(&job, &machine_id, stage, DispatchStep::Start, reason)
                .await);
        }

        if let Err(e) = self.call("start", adapter.start(&file_name)).await {
            return Ok(self
                .fail(&job, &machine_id, DispatchStep::Start, e.to_string())
                .await);
        }

        let note = format!("Started {file_name} on {machine_id}");
        if let Some(outcome) = self
            .advance_dispatched(&job, &machine_id, &note, Some(&adapter))
            .await?
        {
            return Ok(outcome);
        }
        self.fleet.note_dispatched(&machine_id).await;
        info!(job.id = %job.job_id, machine.id = %machine_id, "Job started on machine");
        Ok(DispatchOutcome::Started {
            job_id: job.job_id,
            machine_id,
        })
    }

    /// Stage the job has moved to if it is no longer ours to start: the claim
    /// was released or the job left its dispatch stage.
    async fn withdrawn(
        &self,
        job: &ManufacturingJob,
        machine_id: &MachineId,
    ) -> Result<Option<Stage>, FabError> {
        let current = self.workflow.get(&job.job_id).await?;
        let held = self.fleet.holder_of(&job.job_id).await.as_ref() == Some(machine_id);
        if held && current.current_stage == job.method.dispatch_stage() {
            return Ok(None);
        }
        Ok(Some(current.current_stage))
    }

    /// Move the job into fabrication.
    ///
    /// A job cancelled while its artifact was in flight yields a failed
    /// outcome; if the machine was already started it is stopped first.
    async fn advance_dispatched(
        &self,
        job: &ManufacturingJob,
        machine_id: &MachineId,
        note: &str,
        started: Option<&Arc<dyn MachineAdapter>>,
    ) -> Result<Option<DispatchOutcome>, FabError> {
        let err = match self
            .workflow
            .begin_fabrication(&job.job_id, machine_id, note)
            .await
        {
            Ok(_) => return Ok(None),
            Err(e) => e,
        };

        if let Some(adapter) = started {
            match self.call("stop", adapter.stop()).await {
                Ok(()) => info!(job.id = %job.job_id, machine.id = %machine_id, "Stopped machine for withdrawn job"),
                Err(e) => warn!(job.id = %job.job_id, machine.id = %machine_id, error = %e, "Stop for withdrawn job not acknowledged"),
            }
        }

        if !matches!(err, FabError::InvalidTransition { .. }) {
            self.fleet.release(machine_id, &job.job_id).await;
            return Err(err);
        }
        let stage = self
            .workflow
            .get(&job.job_id)
            .await
            .map(|current| current.current_stage)
            .unwrap_or(job.current_stage);
        Ok(Some(
            self.fail_at(job, machine_id, stage, DispatchStep::Start, err.to_string())
                .await,
        ))
    }

    /// Release the claim and describe the failed step; the job stays queued.
    async fn fail(
        &self,
        job: &ManufacturingJob,
        machine_id: &MachineId,
        step: DispatchStep,
        reason: String,
    ) -> DispatchOutcome {
        self.fail_at(job, machine_id, job.current_stage, step, reason)
            .await
    }

    async fn fail_at(
        &self,
        job: &ManufacturingJob,
        machine_id: &MachineId,
        stage: Stage,
        step: DispatchStep,
        reason: String,
    ) -> DispatchOutcome {
        self.fleet.release(machine_id, &job.job_id).await;
        let failure = DispatchFailure {
            job_id: job.job_id.clone(),
            machine_id: machine_id.clone(),
            stage,
            step,
            reason,
        };
        warn!(job.id = %job.job_id, machine.id = %machine_id, step = %step, "{failure}");
        DispatchOutcome::Failed(failure)
    }

    async fn call<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, AdapterError>>,
    ) -> Result<T, AdapterError> {
        match timeout(self.settings.io_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                operation: operation.to_string(),
                seconds: self.settings.io_timeout.as_secs(),
            }),
        }
    }

    /// Poll every machine of `method` in parallel. `None` marks a machine
    /// that errored or missed the poll timeout.
    async fn poll(&self, method: Method) -> Polled {
        let adapters = self.fleet.adapters(Some(method)).await;
        let poll_timeout = self.settings.poll_timeout;

        let mut set = JoinSet::new();
        for (machine_id, adapter) in adapters {
            set.spawn(async move {
                let status = match timeout(poll_timeout, adapter.status()).await {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(e)) => {
                        warn!(machine.id = %machine_id, error = %e, "Status poll failed, treating machine as offline");
                        None
                    }
                    Err(_) => {
                        warn!(machine.id = %machine_id, "Status poll timed out, treating machine as offline");
                        None
                    }
                };
                (machine_id, status)
            });
        }

        let mut polled = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => polled.push(entry),
                Err(e) => warn!(error = %e, "Status poll task aborted"),
            }
        }
        polled
    }

    /// Settle machines that hold a job: finished or failed work releases the
    /// machine, and deferred starts are retried on idle machines.
    async fn reconcile(&self, polled: &Polled) {
        for (machine_id, status) in polled {
            let Some(status) = status else { continue };
            let Ok(record) = self.fleet.get(machine_id).await else {
                continue;
            };
            let Some(job_id) = record.current_job.clone() else {
                continue;
            };

            match status.state {
                CanonicalState::Complete if !record.pending_start => {
                    let note = format!("{machine_id} reported {}", status.reported);
                    match self.workflow.finish_fabrication(&job_id, &note).await {
                        Ok(job) => {
                            info!(job.id = %job_id, machine.id = %machine_id, stage = %job.current_stage, "Machine finished job")
                        }
                        Err(e) => warn!(job.id = %job_id, error = %e, "Could not record finished job"),
                    }
                    self.fleet.release(machine_id, &job_id).await;
                    self.fleet.note_completed(machine_id).await;
                }
                // A pending start means the failure belongs to someone else's run
                CanonicalState::Failed if !record.pending_start => {
                    let reason = format!("{machine_id} reported {}", status.reported);
                    if let Err(e) = self.workflow.mark_failed(&job_id, &reason).await {
                        warn!(job.id = %job_id, error = %e, "Could not mark job failed");
                    }
                    self.fleet.release(machine_id, &job_id).await;
                    self.fleet.note_failed(machine_id).await;
                }
                CanonicalState::Idle if record.pending_start => {
                    self.retry_start(machine_id, &job_id).await;
                }
                _ => {}
            }
        }
    }

    async fn retry_start(&self, machine_id: &MachineId, job_id: &JobId) {
        let job = match self.workflow.get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job.id = %job_id, error = %e, "Pending start for unreadable job");
                return;
            }
        };
        let Ok(adapter) = self.fleet.adapter(machine_id).await else {
            return;
        };
        match self.call("start", adapter.start(&job.artifact_file_name())).await {
            Ok(()) => {
                self.fleet.set_pending_start(machine_id, false).await;
                info!(job.id = %job_id, machine.id = %machine_id, "Deferred start issued");
            }
            Err(e) => {
                warn!(job.id = %job_id, machine.id = %machine_id, error = %e, "Deferred start failed, will retry")
            }
        }
    }

    /// First idle, unclaimed machine of `method`, without touching the registry.
    pub async fn find_available(&self, method: Method) -> Option<MachineRecord> {
        let polled = self.poll(method).await;
        let records = self.fleet.snapshot_method(method).await;
        records.into_iter().find(|record| {
            record.current_job.is_none()
                && polled.iter().any(|(id, status)| {
                    id == &record.id
                        && matches!(status, Some(s) if s.state == CanonicalState::Idle)
                })
        })
    }

    /// Cancel a job.
    ///
    /// Jobs that have not reached a machine are cancelled outright. A job
    /// holding a machine, including one whose artifact is still being
    /// delivered, gets a best-effort stop first; the machine may finish its
    /// current operation before honoring it.
    pub async fn cancel_job(&self, job_id: &JobId, reason: &str) -> Result<CancelReport, FabError> {
        let span = create_fleet_span("cancel_job", Some(job_id.as_str()));
        self.cancel_in_span(job_id, reason).instrument(span).await
    }

    async fn cancel_in_span(&self, job_id: &JobId, reason: &str) -> Result<CancelReport, FabError> {
        let job = self.workflow.get(job_id).await?;
        let holder = self.fleet.holder_of(job_id).await;

        if holder.is_none() && job.method.is_pre_fabrication(job.current_stage) {
            let job = self.workflow.cancel(job_id, reason).await?;
            return Ok(CancelReport {
                job,
                machine_id: None,
                stop_acknowledged: None,
            });
        }

        let Some(machine_id) = holder else {
            return Err(FabError::InvalidTransition {
                job_id: job_id.to_string(),
                stage: job.current_stage.to_string(),
                reason: "job is past fabrication and holds no machine".to_string(),
            });
        };

        let adapter = self.fleet.adapter(&machine_id).await?;
        let acknowledged = match self.call("stop", adapter.stop()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(machine.id = %machine_id, error = %e, "Stop not acknowledged");
                false
            }
        };
        self.fleet.release(&machine_id, job_id).await;
        let job = self
            .workflow
            .cancel_after_stop(job_id, &format!("{reason} (stop sent to {machine_id})"))
            .await?;
        info!(job.id = %job_id, machine.id = %machine_id, acknowledged, "Cancelled running job");
        Ok(CancelReport {
            job,
            machine_id: Some(machine_id),
            stop_acknowledged: Some(acknowledged),
        })
    }

    /// Connect every machine; failures mark the machine offline.
    pub async fn connect_all(&self) -> Vec<(MachineId, Result<(), AdapterError>)> {
        let mut results = Vec::new();
        for (machine_id, adapter) in self.fleet.adapters(None).await {
            let result = self.call("connect", adapter.connect()).await;
            match &result {
                Ok(()) => self.fleet.set_online(&machine_id, true).await,
                Err(e) => {
                    warn!(machine.id = %machine_id, error = %e, "Connection failed");
                    self.fleet.set_online(&machine_id, false).await;
                }
            }
            results.push((machine_id, result));
        }
        results
    }

    pub async fn disconnect_all(&self) {
        for (machine_id, adapter) in self.fleet.adapters(None).await {
            if let Err(e) = self.call("disconnect", adapter.disconnect()).await {
                warn!(machine.id = %machine_id, error = %e, "Disconnect failed");
            }
            self.fleet.set_online(&machine_id, false).await;
        }
    }

    pub async fn pause_machine(&self, machine_id: &MachineId) -> Result<(), FabError> {
        let adapter = self.fleet.adapter(machine_id).await?;
        self.call("pause", adapter.pause())
            .await
            .map_err(|e| transient("pause", e))
    }

    pub async fn resume_machine(&self, machine_id: &MachineId) -> Result<(), FabError> {
        let adapter = self.fleet.adapter(machine_id).await?;
        self.call("resume", adapter.resume())
            .await
            .map_err(|e| transient("resume", e))
    }

    /// Registry records as of the most recent polls.
    pub async fn machine_statuses(&self) -> Vec<MachineRecord> {
        self.fleet.snapshot().await
    }
}

fn transient(operation: &str, error: AdapterError) -> FabError {
    FabError::Transient {
        operation: operation.to_string(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::fleet::MachineSpec;
    use crate::machines::{InMemoryArtifactStore, MockMachineAdapter, Vendor};
    use crate::workflow::{InMemoryJobStore, Stage};

    async fn dispatcher_with(adapter: MockMachineAdapter) -> (FleetDispatcher, JobId) {
        let workflow = Arc::new(WorkflowStateMachine::new(Arc::new(InMemoryJobStore::new())));
        let fleet = Arc::new(FleetRegistry::new());
        fleet
            .register(
                MachineSpec::new("p1s-1", Method::Fdm, Vendor::Bambu),
                Arc::new(adapter),
            )
            .await
            .unwrap();
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        artifacts.insert("mem://part.stl", b"solid part".to_vec()).await;

        let job = workflow
            .create(
                ManufacturingJob::new(Method::Fdm, "proc", "user", "proj")
                    .with_id("fdm-001")
                    .with_model_url("mem://part.stl"),
            )
            .await
            .unwrap();
        let dispatcher =
            FleetDispatcher::new(workflow, fleet, artifacts, DispatchSettings::default());
        (dispatcher, job.job_id)
    }

    fn idle() -> Result<MachineStatus, AdapterError> {
        Ok(MachineStatus::new(CanonicalState::Idle, "IDLE"))
    }

    #[tokio::test]
    async fn test_upload_failure_releases_claim_and_keeps_stage() {
        let mut adapter = MockMachineAdapter::new();
        adapter.expect_status().returning(idle);
        adapter
            .expect_upload()
            .times(1)
            .returning(|_, _| Err(AdapterError::rejected("upload", "storage full")));
        adapter.expect_start().never();

        let (dispatcher, job_id) = dispatcher_with(adapter).await;
        let outcome = dispatcher.try_dispatch(Method::Fdm).await.unwrap();

        match outcome {
            DispatchOutcome::Failed(failure) => {
                assert_eq!(failure.step, DispatchStep::Upload);
                assert_eq!(failure.stage, Stage::Queued);
                assert!(failure.reason.contains("storage full"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let job = dispatcher.workflow().get(&job_id).await.unwrap();
        assert_eq!(job.current_stage, Stage::Queued);
        assert!(dispatcher.fleet().holder_of(&job_id).await.is_none());
    }

    #[tokio::test]
    async fn test_start_uses_uploaded_file_name() {
        let mut adapter = MockMachineAdapter::new();
        adapter.expect_status().returning(idle);
        adapter
            .expect_upload()
            .withf(|bytes, name| bytes.to_vec() == b"solid part".to_vec() && name.to_string() == "proj_fdm-001.stl")
            .times(1)
            .returning(|_, _| Ok(()));
        adapter
            .expect_start()
            .withf(|name| name.to_string() == "proj_fdm-001.stl")
            .times(1)
            .returning(|_| Ok(()));

        let (dispatcher, job_id) = dispatcher_with(adapter).await;
        let outcome = dispatcher.try_dispatch(Method::Fdm).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Started {
                job_id: job_id.clone(),
                machine_id: MachineId::from("p1s-1"),
            }
        );

        let job = dispatcher.workflow().get(&job_id).await.unwrap();
        assert_eq!(job.current_stage, Stage::Printing);
        assert_eq!(job.machine_id, Some(MachineId::from("p1s-1")));
        let record = dispatcher.fleet().get(&MachineId::from("p1s-1")).await.unwrap();
        assert_eq!(record.stats.jobs_dispatched, 1);
    }

    #[tokio::test]
    async fn test_status_error_counts_as_offline() {
        let mut adapter = MockMachineAdapter::new();
        adapter
            .expect_status()
            .returning(|| Err(AdapterError::Unreachable("no route".to_string())));
        adapter.expect_upload().never();

        let (dispatcher, _) = dispatcher_with(adapter).await;
        let outcome = dispatcher.try_dispatch(Method::Fdm).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::NoCapacity);
        let record = dispatcher.fleet().get(&MachineId::from("p1s-1")).await.unwrap();
        assert!(!record.online);
    }
}
