pub mod audit;
pub mod config;
pub mod error;
pub mod git;
pub mod llm;
pub mod security;

// Re-export commonly used types for convenience
pub use audit::{LogLevel, SecurityLog, SecurityLogEntry};
pub use config::{Config, ConfigError};
pub use error::{AppError, AppResult, ErrorCategory, InvokeError, InvokeResult};
pub use git::{CommandOutput, CommandSpec, GitRunner, ProcessInvoker};
pub use llm::{AiBackend, CliBackend, LLMError, ParsedPayload, PromptFragment, RequestPipeline};
pub use security::{
    Arg, CommandValidator, PathValidator, SecurityLevel, SecurityPolicy, ValidationError,
    ValidationResult,
};
