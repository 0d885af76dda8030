pub mod capability;
pub mod criteria;
pub mod runner;

pub use capability::{Capability, CapabilityCall, CapabilityError, CapabilityOutput, LocalCapabilities};
pub use criteria::Criterion;
pub use runner::{CheckStatus, CriterionResult, ValidationRunner, Verdict};
