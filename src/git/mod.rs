pub mod executor;
pub mod runner;

// Re-export commonly used types
pub use executor::{CommandOutput, CommandSpec, InvokerSettings, ProcessInvoker, DEFAULT_TIMEOUT};
pub use runner::{CommitEntry, FileStatus, GitRunner, StatusEntry};
