pub mod cli;
pub mod client;
pub mod context;
pub mod injection;
pub mod pipeline;
pub mod response;
pub mod retry;
pub mod suggestions;

pub use cli::CliBackend;
pub use client::{AiBackend, AiResponse, LLMError};
pub use context::{Prompt, PromptBuilder, PromptFragment, PromptLimits};
pub use injection::{InjectionFinding, InjectionScanner, MAX_DECODE_DEPTH};
pub use pipeline::RequestPipeline;
pub use response::ParsedPayload;
pub use retry::{RetryPolicy, RetryState};
pub use suggestions::{
    AUTO_RESOLVE_CONFIDENCE, BranchSuggestion, CommitSuggestion, ConflictResolution,
    ConflictStrategy, PrSuggestion,
};
