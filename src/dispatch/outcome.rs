use serde::Serialize;
use std::fmt;

use crate::workflow::{JobId, MachineId, ManufacturingJob, Stage};

/// Step of the delivery sequence that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStep {
    Fetch,
    Upload,
    Start,
}

impl fmt::Display for DispatchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchStep::Fetch => write!(f, "fetch"),
            DispatchStep::Upload => write!(f, "upload"),
            DispatchStep::Start => write!(f, "start"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchFailure {
    pub job_id: JobId,
    pub machine_id: MachineId,
    /// Stage the job was left at
    pub stage: Stage,
    pub step: DispatchStep,
    pub reason: String,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job {} at stage {} failed during {}: {}",
            self.job_id, self.stage, self.step, self.reason
        )
    }
}

/// Result of one dispatch pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// No idle, unclaimed machine; retry on a later pass
    NoCapacity,
    NothingToDispatch,
    Started {
        job_id: JobId,
        machine_id: MachineId,
    },
    /// Artifact is on the machine but it was busy; start is retried on later passes
    UploadedNotStarted {
        job_id: JobId,
        machine_id: MachineId,
    },
    Failed(DispatchFailure),
}

impl DispatchOutcome {
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Started { .. } | DispatchOutcome::UploadedNotStarted { .. }
        )
    }

    /// `(job, machine)` pair when the pass assigned a job.
    pub fn assignment(&self) -> Option<(&JobId, &MachineId)> {
        match self {
            DispatchOutcome::Started { job_id, machine_id }
            | DispatchOutcome::UploadedNotStarted { job_id, machine_id } => {
                Some((job_id, machine_id))
            }
            _ => None,
        }
    }
}

/// Result of `FleetDispatcher::cancel_job`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelReport {
    pub job: ManufacturingJob,
    /// Machine that was told to stop, if the job was on one
    pub machine_id: Option<MachineId>,
    /// `Some(true)` when the machine acknowledged the stop request
    pub stop_acknowledged: Option<bool>,
}
