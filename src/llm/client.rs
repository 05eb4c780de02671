use crate::error::{ErrorCategory, InvokeError};
use crate::llm::retry;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("Prompt rejected: {dimension} is {len}, limit is {max}")]
    PromptTooLarge {
        dimension: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Prompt rejected: {detector} detected{}", .encoding.map(|e| format!(" in {} encoded text", e)).unwrap_or_default())]
    InjectionDetected {
        detector: &'static str,
        encoding: Option<&'static str>,
    },

    #[error("Backend invocation failed: {0}")]
    Invoke(#[from] InvokeError),

    #[error("AI backend reported a failure")]
    Backend { detail: String },

    #[error("AI backend execution error ({subtype})")]
    Execution { subtype: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Injection detector failed to compile: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<LLMError>,
    },
}

impl LLMError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PromptTooLarge { .. } | Self::InjectionDetected { .. } => {
                ErrorCategory::InputValidation
            }
            Self::Invoke(inner) => inner.category(),
            Self::Backend { .. } | Self::Execution { .. } => ErrorCategory::ProcessExecution,
            Self::InvalidResponse(_) | Self::MissingFields(_) | Self::JsonError(_) => {
                ErrorCategory::ResponseValidation
            }
            Self::Pattern(_) => ErrorCategory::Configuration,
            Self::RetriesExhausted { last, .. } => last.category(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::PromptTooLarge { .. } => "PROMPT_TOO_LARGE",
            Self::InjectionDetected { .. } => "PROMPT_INJECTION",
            Self::Invoke(inner) => inner.code(),
            Self::Backend { .. } => "BACKEND_FAILURE",
            Self::Execution { .. } => "BACKEND_EXECUTION_ERROR",
            Self::InvalidResponse(_) => "INVALID_RESPONSE",
            Self::MissingFields(_) => "MISSING_FIELDS",
            Self::JsonError(_) => "INVALID_JSON",
            Self::Pattern(_) => "INVALID_DETECTOR",
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
        }
    }

    /// Whether another attempt could succeed
    ///
    /// Only timeouts and failures whose raw text looks like a network,
    /// rate-limit or server-side fault qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Invoke(InvokeError::Timeout { .. }) => true,
            Self::Invoke(InvokeError::NonZeroExit { stdout, stderr, .. }) => {
                retry::is_retryable_message(stderr) || retry::is_retryable_message(stdout)
            }
            Self::Backend { detail } => retry::is_retryable_message(detail),
            _ => false,
        }
    }
}

/// Raw reply from a backend, before any parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiResponse {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
}

impl AiResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
        }
    }
}

/// A generative backend that turns one prompt into one text reply
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<AiResponse, LLMError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_message() {
        let err = LLMError::MissingFields(vec!["message".to_string()]);
        assert_eq!(err.to_string(), "missing required fields: message");
        assert_eq!(err.category(), ErrorCategory::ResponseValidation);
    }

    #[test]
    fn test_backend_detail_is_not_displayed() {
        let err = LLMError::Backend {
            detail: "ECONNRESET at 10.0.0.4:443".to_string(),
        };
        assert!(!err.to_string().contains("10.0.0.4"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = LLMError::Invoke(InvokeError::Timeout {
            binary: "claude".to_string(),
            timeout_ms: 1000,
        });
        assert!(timeout.is_retryable());

        let auth = LLMError::Invoke(InvokeError::NonZeroExit {
            command: "claude".to_string(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "invalid api key".to_string(),
        });
        assert!(!auth.is_retryable());

        let overloaded = LLMError::Invoke(InvokeError::NonZeroExit {
            command: "claude".to_string(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "API Error: 529 overloaded".to_string(),
        });
        assert!(overloaded.is_retryable());

        assert!(!LLMError::MissingFields(vec![]).is_retryable());
        assert!(!LLMError::InvalidResponse("x".to_string()).is_retryable());
    }

    #[test]
    fn test_injection_display() {
        let err = LLMError::InjectionDetected {
            detector: "instruction_override",
            encoding: Some("base64"),
        };
        assert_eq!(
            err.to_string(),
            "Prompt rejected: instruction_override detected in base64 encoded text"
        );
        assert_eq!(err.category(), ErrorCategory::InputValidation);
    }
}
