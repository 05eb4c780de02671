pub mod log;

pub use log::{LogLevel, SecurityLog, SecurityLogEntry, DEFAULT_LOG_CAPACITY};
