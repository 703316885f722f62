//! Machine capability boundary
//!
//! The dispatcher talks to every machine through `MachineAdapter`, whatever
//! vendor protocol sits behind it. All operations are fallible and report a
//! reason; none may panic across this boundary.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::machines::state::CanonicalState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("machine unreachable: {0}")]
    Unreachable(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },

    #[error("not connected")]
    NotConnected,
}

impl AdapterError {
    pub fn rejected(operation: &str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Point-in-time status of one machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineStatus {
    pub state: CanonicalState,
    /// Vendor-native state string as reported
    pub reported: String,
    pub telemetry: Value,
}

impl MachineStatus {
    pub fn new(state: CanonicalState, reported: impl Into<String>) -> Self {
        Self {
            state,
            reported: reported.into(),
            telemetry: Value::Null,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Value) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn offline(reason: impl Into<String>) -> Self {
        Self::new(CanonicalState::Offline, reason)
    }
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait MachineAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), AdapterError>;

    async fn disconnect(&self) -> Result<(), AdapterError>;

    /// Current state mapped through the adapter's vendor vocabulary
    async fn status(&self) -> Result<MachineStatus, AdapterError>;

    /// Store `artifact` on the machine under `name`
    async fn upload(&self, artifact: &[u8], name: &str) -> Result<(), AdapterError>;

    /// Begin fabricating a previously uploaded file
    async fn start(&self, name: &str) -> Result<(), AdapterError>;

    async fn pause(&self) -> Result<(), AdapterError>;

    async fn resume(&self) -> Result<(), AdapterError>;

    /// Best effort; the machine may finish its current move first
    async fn stop(&self) -> Result<(), AdapterError>;
}
