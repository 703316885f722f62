// fabflow - manufacturing job orchestration
// Workflow state machine, fleet dispatch and geometry-driven method recommendations

pub mod config;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod machines;
pub mod priority;
pub mod recommendation;
pub mod shutdown;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use self::config::{config, FabflowConfig};
pub use dispatch::{
    spawn_dispatch_loops, CancelReport, DispatchFailure, DispatchOutcome, DispatchSettings,
    DispatchStep, FleetDispatcher, FleetRegistry, MachineRecord, MachineSpec,
};
pub use error::FabError;
pub use geometry::{GeometryFeatureSet, SurfaceFinish, Tolerance};
pub use machines::{
    AdapterError, ArtifactError, ArtifactStore, CachedArtifactStore, CanonicalState,
    HttpArtifactStore, InMemoryArtifactStore, MachineAdapter, MachineStatus, RoutedArtifactStore,
    SimulatedMachine, Vendor,
};
pub use priority::JobPriority;
pub use recommendation::{MethodRecommendation, RecommendationEngine};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{create_dispatch_span, generate_correlation_id, init_telemetry};
pub use workflow::{
    InMemoryJobStore, JobId, JobQueue, JobStore, MachineId, ManufacturingJob, Method,
    QueueSummary, Stage, WorkflowStateMachine,
};
