use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

// Import module-level errors for AppError
use crate::config::settings::ConfigError;
use crate::llm::client::LLMError;
use crate::security::validator::ValidationError;

/// Broad class of a failure, deciding how callers react to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Deterministic; the caller must change its input
    InputValidation,
    /// Fatal at startup; never retried
    Configuration,
    /// Spawn failure, non-zero exit or timeout
    ProcessExecution,
    /// Malformed or incomplete backend output; never retried
    ResponseValidation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::InputValidation => "input validation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::ProcessExecution => "process execution",
            ErrorCategory::ResponseValidation => "response validation",
        };
        f.write_str(label)
    }
}

/// Errors that can occur while validating and running a process
///
/// Raw stderr and OS errors are kept in fields and source chains but never in
/// the displayed message.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Command rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error("Working directory {} rejected: {}", .path.display(), .violations.join("; "))]
    WorkingDirectory {
        path: PathBuf,
        violations: Vec<String>,
    },

    #[error("Operation has {count} items, limit is {max}")]
    TooManyItems { count: usize, max: usize },

    #[error("Batch {batch} rejected: {source}")]
    BatchRejected {
        batch: usize,
        #[source]
        source: Box<InvokeError>,
    },

    #[error("Failed to start {binary}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} exited with code {exit_code}")]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("{binary} timed out after {timeout_ms}ms")]
    Timeout { binary: String, timeout_ms: u64 },

    #[error("I/O error while running {binary}")]
    Io {
        binary: String,
        #[source]
        source: io::Error,
    },
}

impl InvokeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Rejected(_)
            | Self::WorkingDirectory { .. }
            | Self::TooManyItems { .. } => ErrorCategory::InputValidation,
            Self::BatchRejected { source, .. } => source.category(),
            Self::Spawn { .. } | Self::NonZeroExit { .. } | Self::Timeout { .. } | Self::Io { .. } => {
                ErrorCategory::ProcessExecution
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected(inner) => inner.code(),
            Self::WorkingDirectory { .. } => "UNSAFE_WORKING_DIRECTORY",
            Self::TooManyItems { .. } => "TOO_MANY_ITEMS",
            Self::BatchRejected { source, .. } => source.code(),
            Self::Spawn { .. } => "SPAWN_FAILED",
            Self::NonZeroExit { .. } => "NON_ZERO_EXIT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Io { .. } => "IO_ERROR",
        }
    }

    /// Raw diagnostic text for internal logs; never shown to users
    pub fn raw_detail(&self) -> Option<String> {
        match self {
            Self::NonZeroExit { stderr, .. } => Some(stderr.clone()),
            Self::Spawn { source, .. } | Self::Io { source, .. } => Some(source.to_string()),
            Self::BatchRejected { source, .. } => source.raw_detail(),
            _ => None,
        }
    }
}

/// Top-level application error that wraps all module-specific errors
///
/// This provides a unified error type for application-level code while preserving
/// the specific error context from each module. All module errors automatically
/// convert to AppError via the `From` trait.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Process error: {0}")]
    Invoke(#[from] InvokeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LLMError),

    #[error("Security validation error: {0}")]
    Security(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AppError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Invoke(e) => e.category(),
            AppError::Config(_) => ErrorCategory::Configuration,
            AppError::Llm(e) => e.category(),
            AppError::Security(_) => ErrorCategory::InputValidation,
            AppError::Io(_) => ErrorCategory::ProcessExecution,
        }
    }
}

/// Result type for process invocation
pub type InvokeResult<T> = std::result::Result<T, InvokeError>;

/// Result type for application-level operations
pub type AppResult<T> = std::result::Result<T, AppError>;
