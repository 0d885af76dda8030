pub mod attempt;
pub mod error;
pub mod graph;
pub mod phase;
pub mod run;
pub mod task;

pub use attempt::{AttemptOutcome, ExecutionAttempt};
pub use error::CyneticsError;
pub use graph::{GraphError, TaskGraph, TaskGraphBuilder};
pub use phase::Phase;
pub use run::Run;
pub use task::{Task, TaskSpec, TaskStatus};
