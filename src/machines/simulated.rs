//! In-process machine used by the `simulate`/`run` commands and by tests.
//!
//! Reports native strings from the configured vendor vocabulary so that the
//! same canonicalization path is exercised as with real hardware.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::machines::adapter::{AdapterError, MachineAdapter, MachineStatus};
use crate::machines::state::{CanonicalState, StateVocabulary, Vendor};

#[derive(Debug)]
struct SimState {
    connected: bool,
    unreachable: bool,
    reported: String,
    files: Vec<String>,
    started: Vec<String>,
    current_file: Option<String>,
    stops: usize,
    failures: HashMap<String, String>,
}

#[derive(Debug)]
pub struct SimulatedMachine {
    vocabulary: &'static StateVocabulary,
    latency: Duration,
    state: Mutex<SimState>,
}

impl SimulatedMachine {
    /// A connected, idle machine speaking `vendor`'s state vocabulary.
    pub fn new(vendor: Vendor) -> Self {
        let vocabulary = vendor.vocabulary();
        Self {
            vocabulary,
            latency: Duration::ZERO,
            state: Mutex::new(SimState {
                connected: true,
                unreachable: false,
                reported: vocabulary.native(CanonicalState::Idle).to_string(),
                files: Vec::new(),
                started: Vec::new(),
                current_file: None,
                stops: 0,
                failures: HashMap::new(),
            }),
        }
    }

    /// Delay applied to every adapter call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn set_state(&self, state: CanonicalState) {
        self.state.lock().await.reported = self.vocabulary.native(state).to_string();
    }

    /// Report a raw vendor string.
    pub async fn set_reported(&self, reported: &str) {
        self.state.lock().await.reported = reported.to_string();
    }

    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Make `operation` fail with `reason` until cleared.
    pub async fn fail_on(&self, operation: &str, reason: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert(operation.to_string(), reason.to_string());
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    pub async fn uploads(&self) -> Vec<String> {
        self.state.lock().await.files.clone()
    }

    pub async fn started(&self) -> Vec<String> {
        self.state.lock().await.started.clone()
    }

    pub async fn stop_count(&self) -> usize {
        self.state.lock().await.stops
    }

    pub async fn canonical_state(&self) -> CanonicalState {
        let state = self.state.lock().await;
        self.vocabulary.canonicalize(&state.reported)
    }

    /// Finish the running file; the machine then reports complete.
    pub async fn finish(&self) {
        let mut state = self.state.lock().await;
        if self.vocabulary.canonicalize(&state.reported) == CanonicalState::Running {
            state.reported = self.vocabulary.native(CanonicalState::Complete).to_string();
        }
    }

    /// Operator collects the finished part; a complete machine goes back to idle.
    pub async fn collect(&self) {
        let mut state = self.state.lock().await;
        if self.vocabulary.canonicalize(&state.reported) == CanonicalState::Complete {
            state.reported = self.vocabulary.native(CanonicalState::Idle).to_string();
            state.current_file = None;
        }
    }

    async fn enter(&self, operation: &str) -> Result<tokio::sync::MutexGuard<'_, SimState>, AdapterError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let state = self.state.lock().await;
        if state.unreachable {
            return Err(AdapterError::Unreachable(format!(
                "simulated {} machine not responding",
                self.vocabulary.name
            )));
        }
        if let Some(reason) = state.failures.get(operation) {
            return Err(AdapterError::rejected(operation, reason.clone()));
        }
        Ok(state)
    }

    async fn enter_connected(
        &self,
        operation: &str,
    ) -> Result<tokio::sync::MutexGuard<'_, SimState>, AdapterError> {
        let state = self.enter(operation).await?;
        if !state.connected {
            return Err(AdapterError::NotConnected);
        }
        Ok(state)
    }

    fn canonical(&self, state: &SimState) -> CanonicalState {
        self.vocabulary.canonicalize(&state.reported)
    }
}

#[async_trait]
impl MachineAdapter for SimulatedMachine {
    async fn connect(&self) -> Result<(), AdapterError> {
        let mut state = self.enter("connect").await?;
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        let mut state = self.enter("disconnect").await?;
        state.connected = false;
        Ok(())
    }

    async fn status(&self) -> Result<MachineStatus, AdapterError> {
        let state = self.enter_connected("status").await?;
        Ok(MachineStatus::new(self.canonical(&state), state.reported.clone()).with_telemetry(
            json!({
                "current_file": state.current_file,
                "stored_files": state.files.len(),
            }),
        ))
    }

    async fn upload(&self, artifact: &[u8], name: &str) -> Result<(), AdapterError> {
        let mut state = self.enter_connected("upload").await?;
        if artifact.is_empty() {
            return Err(AdapterError::rejected("upload", "empty artifact"));
        }
        state.files.push(name.to_string());
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), AdapterError> {
        let mut state = self.enter_connected("start").await?;
        if self.canonical(&state) != CanonicalState::Idle {
            return Err(AdapterError::rejected(
                "start",
                format!("machine busy ({})", state.reported),
            ));
        }
        if !state.files.iter().any(|file| file == name) {
            return Err(AdapterError::rejected(
                "start",
                format!("file {name} not found on machine"),
            ));
        }
        state.reported = self.vocabulary.native(CanonicalState::Running).to_string();
        state.current_file = Some(name.to_string());
        state.started.push(name.to_string());
        Ok(())
    }

    async fn pause(&self) -> Result<(), AdapterError> {
        let mut state = self.enter_connected("pause").await?;
        if self.canonical(&state) != CanonicalState::Running {
            return Err(AdapterError::rejected("pause", "nothing running"));
        }
        state.reported = self.vocabulary.native(CanonicalState::Paused).to_string();
        Ok(())
    }

    async fn resume(&self) -> Result<(), AdapterError> {
        let mut state = self.enter_connected("resume").await?;
        if self.canonical(&state) != CanonicalState::Paused {
            return Err(AdapterError::rejected("resume", "machine is not paused"));
        }
        state.reported = self.vocabulary.native(CanonicalState::Running).to_string();
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        let mut state = self.enter_connected("stop").await?;
        state.stops += 1;
        state.current_file = None;
        state.reported = self.vocabulary.native(CanonicalState::Idle).to_string();
        Ok(())
    }
}
