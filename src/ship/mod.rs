pub mod orchestrator;
pub mod types;

pub use orchestrator::{wait_for_ref, ShipOrchestrator};
pub use types::{steps, CheckSummary, ShipOptions, ShipReport, WaitReport};
