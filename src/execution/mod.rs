pub mod tracker;

pub use tracker::{ExecutionStep, ExecutionSummary, ExecutionTracker, StepHandle, StepStatus};
