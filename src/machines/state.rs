//! Canonical machine states and per-vendor vocabularies
//!
//! Vendors report free-form state strings. Each vocabulary is an ordered
//! table of case-insensitive substrings; the first rule contained in the
//! reported string decides the canonical state.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalState {
    Idle,
    Running,
    Paused,
    Complete,
    Failed,
    Offline,
    Unknown,
}

impl fmt::Display for CanonicalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CanonicalState::Idle => "idle",
            CanonicalState::Running => "running",
            CanonicalState::Paused => "paused",
            CanonicalState::Complete => "complete",
            CanonicalState::Failed => "failed",
            CanonicalState::Offline => "offline",
            CanonicalState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Bambu,
    OctoPrint,
    Generic,
}

impl Vendor {
    pub fn vocabulary(self) -> &'static StateVocabulary {
        match self {
            Vendor::Bambu => &BAMBU,
            Vendor::OctoPrint => &OCTOPRINT,
            Vendor::Generic => &GENERIC,
        }
    }
}

#[derive(Debug)]
pub struct StateVocabulary {
    pub name: &'static str,
    rules: &'static [(&'static str, CanonicalState)],
}

/// Bambu Lab MQTT `gcode_state` words
pub static BAMBU: StateVocabulary = StateVocabulary {
    name: "bambu",
    rules: &[
        ("IDLE", CanonicalState::Idle),
        ("READY", CanonicalState::Idle),
        ("PREPARE", CanonicalState::Running),
        ("RUNNING", CanonicalState::Running),
        ("PRINTING", CanonicalState::Running),
        ("PAUSE", CanonicalState::Paused),
        ("FINISH", CanonicalState::Complete),
        ("COMPLETE", CanonicalState::Complete),
        ("FAILED", CanonicalState::Failed),
        ("ERROR", CanonicalState::Failed),
        ("OFFLINE", CanonicalState::Offline),
    ],
};

/// OctoPrint `state.text`; offline and error texts are matched first.
pub static OCTOPRINT: StateVocabulary = StateVocabulary {
    name: "octoprint",
    rules: &[
        ("Offline", CanonicalState::Offline),
        ("Closed", CanonicalState::Offline),
        ("Error", CanonicalState::Failed),
        ("Cancelling", CanonicalState::Running),
        ("Printing", CanonicalState::Running),
        ("Pausing", CanonicalState::Paused),
        ("Paused", CanonicalState::Paused),
        ("Finishing", CanonicalState::Complete),
        ("Operational", CanonicalState::Idle),
        ("Ready", CanonicalState::Idle),
    ],
};

pub static GENERIC: StateVocabulary = StateVocabulary {
    name: "generic",
    rules: &[
        ("IDLE", CanonicalState::Idle),
        ("READY", CanonicalState::Idle),
        ("RUNNING", CanonicalState::Running),
        ("PRINTING", CanonicalState::Running),
        ("MACHINING", CanonicalState::Running),
        ("BUSY", CanonicalState::Running),
        ("PAUSED", CanonicalState::Paused),
        ("COMPLETE", CanonicalState::Complete),
        ("FINISHED", CanonicalState::Complete),
        ("DONE", CanonicalState::Complete),
        ("FAILED", CanonicalState::Failed),
        ("ERROR", CanonicalState::Failed),
        ("OFFLINE", CanonicalState::Offline),
        ("DISCONNECTED", CanonicalState::Offline),
    ],
};

impl StateVocabulary {
    pub fn canonicalize(&self, reported: &str) -> CanonicalState {
        let reported = reported.to_ascii_uppercase();
        self.rules
            .iter()
            .find(|(needle, _)| reported.contains(&needle.to_ascii_uppercase()))
            .map(|(_, state)| *state)
            .unwrap_or(CanonicalState::Unknown)
    }

    /// First native word for `state`, used by simulators to report in-vocabulary strings.
    pub fn native(&self, state: CanonicalState) -> &'static str {
        self.rules
            .iter()
            .find(|(_, candidate)| *candidate == state)
            .map(|(word, _)| *word)
            .unwrap_or("UNKNOWN")
    }
}
