pub mod git;
pub mod repository;

pub use repository::{GitRepository, LocalRepository};
