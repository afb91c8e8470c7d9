pub mod cache;
pub mod poller;

pub use poller::{CiPoller, PollOptions, PollProgress, ResolvedState};
