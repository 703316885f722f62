//! Fleet dispatch: machine registry, dispatch passes and their schedule.

pub mod dispatcher;
pub mod fleet;
pub mod outcome;
pub mod scheduler;

pub use dispatcher::{DispatchSettings, FleetDispatcher};
pub use fleet::{FleetRegistry, MachineRecord, MachineSpec, MachineStats};
pub use outcome::{CancelReport, DispatchFailure, DispatchOutcome, DispatchStep};
pub use scheduler::spawn_dispatch_loops;
