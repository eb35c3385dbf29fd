//! The sync engine: diff, transition classification, annotation merge,
//! report I/O and the nine-phase orchestrator.

pub mod annotations;
pub mod diff;
pub mod orchestrator;
pub mod report;
pub mod state;

pub use diff::{DiffEngine, Transition};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
pub use state::{classify, Classification, TransitionInput};
