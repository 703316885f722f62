//! Manufacturing job workflow
//!
//! Jobs, their per-method stage tables, the dispatch ordering and the state
//! machine that moves jobs forward through a `JobStore`.

pub mod job;
pub mod queue;
pub mod stages;
pub mod state_machine;
pub mod store;

pub use job::{JobId, JobNote, MachineId, ManufacturingJob};
pub use queue::JobQueue;
pub use stages::{Method, Stage};
pub use state_machine::{MethodQueueSummary, QueueSummary, StageCount, WorkflowStateMachine};
pub use store::{InMemoryJobStore, JobStore};
