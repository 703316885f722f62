use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::priority::JobPriority;
use crate::workflow::stages::{Method, Stage};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id prefixed with the method, e.g. `fdm-3f2a...`.
    pub fn generate(method: Method) -> Self {
        Self(format!("{method}-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MachineId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobNote {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// A part committed to one manufacturing method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManufacturingJob {
    pub job_id: JobId,
    pub method: Method,
    pub processing_job_id: String,
    pub user_id: String,
    pub project_id: String,

    /// Mesh export (STL) produced by the processing pipeline
    pub model_url: Option<String>,
    /// Refined STEP geometry, required before CFC/CNC planning
    pub refined_geometry_url: Option<String>,

    pub priority: JobPriority,
    pub current_stage: Stage,
    pub machine_id: Option<MachineId>,

    pub created_at: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub user_notes: Option<String>,
    pub notes: Vec<JobNote>,
}

impl ManufacturingJob {
    pub fn new(
        method: Method,
        processing_job_id: impl Into<String>,
        user_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::generate(method),
            method,
            processing_job_id: processing_job_id.into(),
            user_id: user_id.into(),
            project_id: project_id.into(),
            model_url: None,
            refined_geometry_url: None,
            priority: JobPriority::Normal,
            current_stage: method.initial_stage(),
            machine_id: None,
            created_at: now,
            estimated_completion: now + method.lead_time(),
            started_at: None,
            completed_at: None,
            user_notes: None,
            notes: Vec::new(),
        }
    }

    pub fn with_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_model_url(mut self, url: impl Into<String>) -> Self {
        self.model_url = Some(url.into());
        self
    }

    pub fn with_refined_geometry(mut self, url: impl Into<String>) -> Self {
        self.refined_geometry_url = Some(url.into());
        self
    }

    pub fn with_user_notes(mut self, notes: impl Into<String>) -> Self {
        self.user_notes = Some(notes.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.method.is_terminal(self.current_stage)
    }

    /// Artifact the dispatcher pushes to a machine.
    pub fn source_artifact(&self) -> Option<&str> {
        if self.method.requires_refined_geometry() {
            self.refined_geometry_url.as_deref()
        } else {
            self.model_url.as_deref()
        }
    }

    /// Name the artifact is stored under on the machine.
    pub fn artifact_file_name(&self) -> String {
        let extension = if self.method.requires_refined_geometry() {
            "step"
        } else {
            "stl"
        };
        format!("{}_{}.{}", self.project_id, self.job_id, extension)
    }

    pub fn push_note(&mut self, at: DateTime<Utc>, text: impl Into<String>) {
        self.notes.push(JobNote {
            at,
            text: text.into(),
        });
    }

    /// Hours since creation as seen at `now`.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / 3_600_000.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
