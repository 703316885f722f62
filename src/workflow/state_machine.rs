// Workflow state machine for manufacturing jobs
// Jobs only move forward through their method's table; failed/cancelled are the only side exits.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::FabError;
use crate::workflow::job::{JobId, MachineId, ManufacturingJob};
use crate::workflow::queue::JobQueue;
use crate::workflow::stages::{Method, Stage};
use crate::workflow::store::JobStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageCount {
    pub stage: Stage,
    pub count: usize,
    pub jobs: Vec<JobId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodQueueSummary {
    pub total_jobs: usize,
    pub stages: Vec<StageCount>,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean age in hours of non-terminal jobs, `None` when there are none
    pub mean_age_hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSummary {
    pub generated_at: DateTime<Utc>,
    pub methods: BTreeMap<Method, MethodQueueSummary>,
}

pub struct WorkflowStateMachine {
    store: Arc<dyn JobStore>,
    // One async lock per job id so concurrent callers never interleave on a record
    job_locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
}

impl WorkflowStateMachine {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            job_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_job(&self, job_id: &JobId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.job_locks.lock().await;
            locks
                .entry(job_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Lock and load an existing job. Unknown ids fail before a lock entry
    /// is created for them; jobs are never removed from the store.
    async fn lock_and_load(
        &self,
        job_id: &JobId,
    ) -> Result<(OwnedMutexGuard<()>, ManufacturingJob), FabError> {
        if self.store.get(job_id).await?.is_none() {
            return Err(FabError::job_not_found(job_id));
        }
        let guard = self.lock_job(job_id).await;
        let job = self.load(job_id).await?;
        Ok((guard, job))
    }

    async fn load(&self, job_id: &JobId) -> Result<ManufacturingJob, FabError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| FabError::job_not_found(job_id))?;
        if !job.method.contains(job.current_stage) {
            return Err(FabError::InvariantViolation(format!(
                "job {} is at stage {} which is not part of the {} workflow",
                job.job_id, job.current_stage, job.method
            )));
        }
        Ok(job)
    }

    pub async fn create(&self, job: ManufacturingJob) -> Result<ManufacturingJob, FabError> {
        self.create_at(job, Utc::now()).await
    }

    /// Register a job at its method's first stage with the creation time `now`.
    pub async fn create_at(
        &self,
        mut job: ManufacturingJob,
        now: DateTime<Utc>,
    ) -> Result<ManufacturingJob, FabError> {
        let _guard = self.lock_job(&job.job_id).await;
        if self.store.get(&job.job_id).await?.is_some() {
            return Err(FabError::Validation(format!(
                "job {} already exists",
                job.job_id
            )));
        }

        job.current_stage = job.method.initial_stage();
        job.created_at = now;
        job.estimated_completion = now + job.method.lead_time();
        job.machine_id = None;
        job.started_at = None;
        job.completed_at = None;

        self.store.save(&job).await?;
        info!(
            job.id = %job.job_id,
            method = %job.method,
            priority = %job.priority,
            stage = %job.current_stage,
            "Created manufacturing job"
        );
        Ok(job)
    }

    pub async fn get(&self, job_id: &JobId) -> Result<ManufacturingJob, FabError> {
        self.load(job_id).await
    }

    /// Move a job to the next stage of its method, appending `notes` when given.
    ///
    /// At a terminal stage this is a no-op and the job is returned unchanged.
    pub async fn advance(
        &self,
        job_id: &JobId,
        notes: Option<&str>,
    ) -> Result<ManufacturingJob, FabError> {
        let (_guard, mut job) = self.lock_and_load(job_id).await?;

        let Some(next) = job.method.next_stage(job.current_stage)? else {
            debug!(job.id = %job.job_id, stage = %job.current_stage, "Job already terminal, advance ignored");
            return Ok(job);
        };

        let now = Utc::now();
        self.enter_stage(&mut job, next, now);
        if let Some(text) = notes {
            job.push_note(now, text);
        }
        self.store.save(&job).await?;
        Ok(job)
    }

    fn enter_stage(&self, job: &mut ManufacturingJob, next: Stage, now: DateTime<Utc>) {
        info!(
            job.id = %job.job_id,
            method = %job.method,
            from = %job.current_stage,
            to = %next,
            "Stage transition"
        );
        job.current_stage = next;
        if next == job.method.fabrication_stage() && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if next == Stage::Completed {
            job.completed_at = Some(now);
        }
    }

    /// Attach the refined STEP geometry to a CFC/CNC job waiting for it.
    pub async fn receive_refined_geometry(
        &self,
        job_id: &JobId,
        url: &str,
    ) -> Result<ManufacturingJob, FabError> {
        let (_guard, mut job) = self.lock_and_load(job_id).await?;

        if !job.method.requires_refined_geometry() || job.current_stage != Stage::AwaitingStep {
            return Err(FabError::InvalidTransition {
                job_id: job.job_id.to_string(),
                stage: job.current_stage.to_string(),
                reason: "job is not awaiting a refined STEP file".to_string(),
            });
        }

        let now = Utc::now();
        job.refined_geometry_url = Some(url.to_string());
        self.enter_stage(&mut job, Stage::StepReceived, now);
        job.push_note(now, format!("Received refined geometry: {url}"));
        self.store.save(&job).await?;
        Ok(job)
    }

    /// Cancel a job that no machine has started on yet.
    pub async fn cancel(&self, job_id: &JobId, reason: &str) -> Result<ManufacturingJob, FabError> {
        let (_guard, mut job) = self.lock_and_load(job_id).await?;

        if !job.method.is_pre_fabrication(job.current_stage) {
            return Err(FabError::InvalidTransition {
                job_id: job.job_id.to_string(),
                stage: job.current_stage.to_string(),
                reason: "cancellation is only possible before fabrication starts".to_string(),
            });
        }
        self.exit(&mut job, Stage::Cancelled, reason).await?;
        Ok(job)
    }

    pub async fn mark_failed(
        &self,
        job_id: &JobId,
        reason: &str,
    ) -> Result<ManufacturingJob, FabError> {
        let (_guard, mut job) = self.lock_and_load(job_id).await?;
        if job.is_terminal() {
            return Err(FabError::InvalidTransition {
                job_id: job.job_id.to_string(),
                stage: job.current_stage.to_string(),
                reason: "job is already terminal".to_string(),
            });
        }
        self.exit(&mut job, Stage::Failed, reason).await?;
        Ok(job)
    }

    /// Cancel a job whose machine has been told to stop.
    pub(crate) async fn cancel_after_stop(
        &self,
        job_id: &JobId,
        reason: &str,
    ) -> Result<ManufacturingJob, FabError> {
        let (_guard, mut job) = self.lock_and_load(job_id).await?;
        if job.is_terminal() {
            return Ok(job);
        }
        self.exit(&mut job, Stage::Cancelled, reason).await?;
        Ok(job)
    }

    async fn exit(
        &self,
        job: &mut ManufacturingJob,
        terminal: Stage,
        reason: &str,
    ) -> Result<(), FabError> {
        let now = Utc::now();
        warn!(
            job.id = %job.job_id,
            method = %job.method,
            from = %job.current_stage,
            to = %terminal,
            reason = %reason,
            "Job left its workflow"
        );
        job.current_stage = terminal;
        job.push_note(now, format!("{terminal}: {reason}"));
        self.store.save(job).await
    }

    /// Record the machine assignment and enter the fabrication stage.
    ///
    /// Only valid from the method's dispatch stage.
    pub(crate) async fn begin_fabrication(
        &self,
        job_id: &JobId,
        machine_id: &MachineId,
        note: &str,
    ) -> Result<ManufacturingJob, FabError> {
        let (_guard, mut job) = self.lock_and_load(job_id).await?;

        if job.current_stage != job.method.dispatch_stage() {
            return Err(FabError::InvalidTransition {
                job_id: job.job_id.to_string(),
                stage: job.current_stage.to_string(),
                reason: format!("expected stage {}", job.method.dispatch_stage()),
            });
        }

        let now = Utc::now();
        let fabrication = job.method.fabrication_stage();
        job.machine_id = Some(machine_id.clone());
        self.enter_stage(&mut job, fabrication, now);
        job.push_note(now, note);
        self.store.save(&job).await?;
        Ok(job)
    }

    /// Leave the fabrication stage once the machine reports the part done.
    ///
    /// Jobs that have already moved on are returned unchanged.
    pub(crate) async fn finish_fabrication(
        &self,
        job_id: &JobId,
        note: &str,
    ) -> Result<ManufacturingJob, FabError> {
        let (_guard, mut job) = self.lock_and_load(job_id).await?;
        if job.current_stage != job.method.fabrication_stage() {
            return Ok(job);
        }
        if let Some(next) = job.method.next_stage(job.current_stage)? {
            let now = Utc::now();
            self.enter_stage(&mut job, next, now);
            job.push_note(now, note);
            self.store.save(&job).await?;
        }
        Ok(job)
    }

    pub async fn query_by_method(&self, method: Method) -> Result<Vec<ManufacturingJob>, FabError> {
        let mut jobs: Vec<ManufacturingJob> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|job| job.method == method)
            .collect();
        jobs.sort_by(|a, b| (a.created_at, &a.job_id).cmp(&(b.created_at, &b.job_id)));
        Ok(jobs)
    }

    pub async fn query_by_stage(
        &self,
        method: Method,
        stage: Stage,
    ) -> Result<Vec<ManufacturingJob>, FabError> {
        Ok(self
            .query_by_method(method)
            .await?
            .into_iter()
            .filter(|job| job.current_stage == stage)
            .collect())
    }

    /// Highest-priority, oldest job waiting at `method`'s dispatch stage.
    pub async fn next_eligible(&self, method: Method) -> Result<Option<ManufacturingJob>, FabError> {
        let jobs = self.store.list().await?;
        Ok(JobQueue::next_eligible(&jobs, method).cloned())
    }

    pub async fn queue_summary(&self) -> Result<QueueSummary, FabError> {
        self.queue_summary_at(Utc::now()).await
    }

    pub async fn queue_summary_at(&self, now: DateTime<Utc>) -> Result<QueueSummary, FabError> {
        let jobs = self.store.list().await?;
        let mut methods = BTreeMap::new();

        for method in Method::ALL {
            let mut of_method: Vec<&ManufacturingJob> =
                jobs.iter().filter(|job| job.method == method).collect();
            of_method.sort_by(|a, b| (a.created_at, &a.job_id).cmp(&(b.created_at, &b.job_id)));

            let stages = method
                .stages()
                .iter()
                .map(|stage| {
                    let ids: Vec<JobId> = of_method
                        .iter()
                        .filter(|job| job.current_stage == *stage)
                        .map(|job| job.job_id.clone())
                        .collect();
                    StageCount {
                        stage: *stage,
                        count: ids.len(),
                        jobs: ids,
                    }
                })
                .collect();

            let active_ages: Vec<f64> = of_method
                .iter()
                .filter(|job| !job.is_terminal())
                .map(|job| job.age_hours(now))
                .collect();
            let mean_age_hours = if active_ages.is_empty() {
                None
            } else {
                Some(active_ages.iter().sum::<f64>() / active_ages.len() as f64)
            };

            methods.insert(
                method,
                MethodQueueSummary {
                    total_jobs: of_method.len(),
                    stages,
                    failed: of_method
                        .iter()
                        .filter(|job| job.current_stage == Stage::Failed)
                        .count(),
                    cancelled: of_method
                        .iter()
                        .filter(|job| job.current_stage == Stage::Cancelled)
                        .count(),
                    mean_age_hours,
                },
            );
        }

        Ok(QueueSummary {
            generated_at: now,
            methods,
        })
    }
}
