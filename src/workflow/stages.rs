// Per-method stage tables
// Every method walks a fixed, ordered sequence; failed/cancelled are terminal side exits.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FabError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Fdm,
    Sls,
    Cfc,
    Cnc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Printing,
    Depowdering,
    PostProcess,
    AwaitingStep,
    StepReceived,
    Planning,
    Fabrication,
    Completed,
    Failed,
    Cancelled,
}

const FDM_STAGES: &[Stage] = &[Stage::Queued, Stage::Printing, Stage::Completed];

const SLS_STAGES: &[Stage] = &[
    Stage::Queued,
    Stage::Printing,
    Stage::Depowdering,
    Stage::PostProcess,
    Stage::Completed,
];

const REFINED_STAGES: &[Stage] = &[
    Stage::AwaitingStep,
    Stage::StepReceived,
    Stage::Planning,
    Stage::Fabrication,
    Stage::PostProcess,
    Stage::Completed,
];

const SLS_POST_PROCESS: &[&str] = &[
    "Remove from build chamber (wait for cooldown)",
    "Depowder part (brush + air blast)",
    "Media blast surface finish",
    "Inspect dimensions",
    "Quality check",
    "Package for delivery",
];

const CFC_FIBER_PLANNING: &[&str] = &[
    "Identify load-bearing surfaces",
    "Plan fiber orientation for max strength",
    "Check build chamber compatibility",
    "Estimate fiber spool requirements",
    "Plan support structures",
];

const CNC_CAM_PLANNING: &[&str] = &[
    "Import STEP file to CAM software",
    "Define stock material and dimensions",
    "Set work coordinate system (WCS)",
    "Plan toolpaths (roughing + finishing)",
    "Select cutting tools",
    "Set feeds and speeds",
    "Generate G-code",
    "Simulate toolpaths",
    "Verify collision detection",
    "Export to machine controller",
];

impl Method {
    /// All methods in tie-break order.
    pub const ALL: [Method; 4] = [Method::Fdm, Method::Sls, Method::Cfc, Method::Cnc];

    /// Ordered stage sequence for this method.
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Method::Fdm => FDM_STAGES,
            Method::Sls => SLS_STAGES,
            Method::Cfc | Method::Cnc => REFINED_STAGES,
        }
    }

    pub fn initial_stage(self) -> Stage {
        self.stages()[0]
    }

    pub fn final_stage(self) -> Stage {
        self.stages()[self.stages().len() - 1]
    }

    /// Stage at which a job is ready to be handed to a machine.
    pub fn dispatch_stage(self) -> Stage {
        match self {
            Method::Fdm | Method::Sls => Stage::Queued,
            Method::Cfc | Method::Cnc => Stage::Planning,
        }
    }

    /// Stage a job enters once its artifact is on a machine.
    pub fn fabrication_stage(self) -> Stage {
        match self {
            Method::Fdm | Method::Sls => Stage::Printing,
            Method::Cfc | Method::Cnc => Stage::Fabrication,
        }
    }

    /// Offset from creation to the estimated completion.
    pub fn lead_time(self) -> Duration {
        match self {
            Method::Fdm => Duration::hours(8),
            Method::Sls => Duration::hours(36),
            Method::Cfc => Duration::hours(60),
            Method::Cnc => Duration::hours(36),
        }
    }

    /// Methods that need a refined STEP geometry before planning.
    pub fn requires_refined_geometry(self) -> bool {
        matches!(self, Method::Cfc | Method::Cnc)
    }

    pub fn label(self) -> &'static str {
        match self {
            Method::Fdm => "FDM",
            Method::Sls => "SLS",
            Method::Cfc => "CFC",
            Method::Cnc => "CNC",
        }
    }

    /// Position of `stage` in this method's table.
    pub fn stage_index(self, stage: Stage) -> Option<usize> {
        self.stages().iter().position(|s| *s == stage)
    }

    pub fn contains(self, stage: Stage) -> bool {
        stage.is_exit() || self.stage_index(stage).is_some()
    }

    /// Next stage in sequence, `None` at any terminal stage.
    ///
    /// A stage outside the method's table is an invariant violation.
    pub fn next_stage(self, stage: Stage) -> Result<Option<Stage>, FabError> {
        if stage.is_exit() {
            return Ok(None);
        }
        let index = self.stage_index(stage).ok_or_else(|| {
            FabError::InvariantViolation(format!("stage {stage} is not part of the {self} workflow"))
        })?;
        Ok(self.stages().get(index + 1).copied())
    }

    pub fn is_terminal(self, stage: Stage) -> bool {
        stage.is_exit() || stage == self.final_stage()
    }

    /// True while no machine has started on the job.
    pub fn is_pre_fabrication(self, stage: Stage) -> bool {
        match (self.stage_index(stage), self.stage_index(self.fabrication_stage())) {
            (Some(current), Some(fabrication)) => current < fabrication,
            _ => false,
        }
    }

    /// Operator checklist for a stage, empty when the stage has none.
    pub fn checklist(self, stage: Stage) -> &'static [&'static str] {
        match (self, stage) {
            (Method::Sls, Stage::PostProcess) | (Method::Sls, Stage::Depowdering) => SLS_POST_PROCESS,
            (Method::Cfc, Stage::Planning) => CFC_FIBER_PLANNING,
            (Method::Cnc, Stage::Planning) => CNC_CAM_PLANNING,
            _ => &[],
        }
    }
}

impl Stage {
    /// Failure and cancellation, valid for every method.
    pub fn is_exit(self) -> bool {
        matches!(self, Stage::Failed | Stage::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Printing => "printing",
            Stage::Depowdering => "depowdering",
            Stage::PostProcess => "post_process",
            Stage::AwaitingStep => "awaiting_step",
            Stage::StepReceived => "step_received",
            Stage::Planning => "planning",
            Stage::Fabrication => "fabrication",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Fdm => "fdm",
            Method::Sls => "sls",
            Method::Cfc => "cfc",
            Method::Cnc => "cnc",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Method {
    type Err = FabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fdm" => Ok(Method::Fdm),
            "sls" => Ok(Method::Sls),
            "cfc" => Ok(Method::Cfc),
            "cnc" => Ok(Method::Cnc),
            other => Err(FabError::Validation(format!(
                "unknown manufacturing method '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tables() {
        assert_eq!(
            Method::Fdm.stages(),
            &[Stage::Queued, Stage::Printing, Stage::Completed]
        );
        assert_eq!(Method::Sls.stages().len(), 5);
        assert_eq!(Method::Cfc.stages(), Method::Cnc.stages());
        assert_eq!(Method::Cnc.initial_stage(), Stage::AwaitingStep);
        for method in Method::ALL {
            assert_eq!(method.final_stage(), Stage::Completed);
        }
    }

    #[test]
    fn test_lead_times() {
        assert_eq!(Method::Fdm.lead_time(), Duration::hours(8));
        assert_eq!(Method::Sls.lead_time(), Duration::hours(36));
        assert_eq!(Method::Cfc.lead_time(), Duration::hours(60));
        assert_eq!(Method::Cnc.lead_time(), Duration::hours(36));
    }

    #[test]
    fn test_next_stage_walks_table_and_stops() {
        assert_eq!(
            Method::Sls.next_stage(Stage::Printing).unwrap(),
            Some(Stage::Depowdering)
        );
        assert_eq!(Method::Fdm.next_stage(Stage::Completed).unwrap(), None);
        assert_eq!(Method::Cnc.next_stage(Stage::Cancelled).unwrap(), None);
    }

    #[test]
    fn test_foreign_stage_is_invariant_violation() {
        let err = Method::Fdm.next_stage(Stage::Depowdering).unwrap_err();
        assert!(matches!(err, FabError::InvariantViolation(_)));
    }

    #[test]
    fn test_dispatch_and_fabrication_stages_are_adjacent() {
        for method in Method::ALL {
            let dispatch = method.stage_index(method.dispatch_stage()).unwrap();
            let fabrication = method.stage_index(method.fabrication_stage()).unwrap();
            assert_eq!(dispatch + 1, fabrication, "{method}");
        }
    }

    #[test]
    fn test_pre_fabrication() {
        assert!(Method::Cfc.is_pre_fabrication(Stage::AwaitingStep));
        assert!(Method::Cfc.is_pre_fabrication(Stage::Planning));
        assert!(!Method::Cfc.is_pre_fabrication(Stage::Fabrication));
        assert!(!Method::Sls.is_pre_fabrication(Stage::Depowdering));
        assert!(!Method::Fdm.is_pre_fabrication(Stage::Cancelled));
    }

    #[test]
    fn test_method_parse_is_case_insensitive() {
        assert_eq!("FDM".parse::<Method>().unwrap(), Method::Fdm);
        assert_eq!(" cnc ".parse::<Method>().unwrap(), Method::Cnc);
        assert!("sla".parse::<Method>().is_err());
    }

    #[test]
    fn test_checklists() {
        assert_eq!(Method::Cnc.checklist(Stage::Planning).len(), 10);
        assert!(!Method::Cfc.checklist(Stage::Planning).is_empty());
        assert!(Method::Fdm.checklist(Stage::Printing).is_empty());
    }
}
