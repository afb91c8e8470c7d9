pub mod ci;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod execution;
pub mod local;
pub mod output;
pub mod platform;
pub mod ship;
pub mod workspace;
