//! Machine boundary: canonical states, the adapter capability, the
//! simulated machine and artifact retrieval.

pub mod adapter;
pub mod artifact;
pub mod simulated;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub use adapter::MockMachineAdapter;
pub use adapter::{AdapterError, MachineAdapter, MachineStatus};
pub use artifact::{
    ArtifactError, ArtifactStore, CachedArtifactStore, HttpArtifactStore, InMemoryArtifactStore,
    RoutedArtifactStore,
};
pub use simulated::SimulatedMachine;
pub use state::{CanonicalState, StateVocabulary, Vendor};
