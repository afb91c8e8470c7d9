pub mod script;

pub use script::{CheckOutput, LocalCheck, ShellCheck};
