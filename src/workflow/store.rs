//! Job persistence boundary
//!
//! The workflow core never owns job records; it reads and writes them through
//! a `JobStore`. Implementations must give read-your-writes visibility within
//! a process. `InMemoryJobStore` backs tests and the simulator.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::FabError;
use crate::workflow::job::{JobId, ManufacturingJob};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch one job, `None` if the id is unknown
    async fn get(&self, job_id: &JobId) -> Result<Option<ManufacturingJob>, FabError>;

    /// Insert or replace a job record
    async fn save(&self, job: &ManufacturingJob) -> Result<(), FabError>;

    /// All jobs currently known to the store
    async fn list(&self) -> Result<Vec<ManufacturingJob>, FabError>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, ManufacturingJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, job_id: &JobId) -> Result<Option<ManufacturingJob>, FabError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn save(&self, job: &ManufacturingJob) -> Result<(), FabError> {
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ManufacturingJob>, FabError> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }
}
