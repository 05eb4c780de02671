use crate::audit::{LogLevel, SecurityLog};
use crate::llm::client::{AiBackend, LLMError};
use crate::llm::context::{PromptBuilder, PromptFragment, PromptLimits};
use crate::llm::injection::InjectionScanner;
use crate::llm::response::{ParsedPayload, parse_payload};
use crate::llm::retry::RetryPolicy;
use crate::llm::suggestions::{
    BRANCH_FIELDS, BranchSuggestion, COMMIT_FIELDS, CONFLICT_FIELDS, CommitSuggestion,
    ConflictResolution, PR_FIELDS, PrSuggestion,
};
use std::sync::Arc;

/// Screens, sends and validates requests to a generative backend
///
/// Nothing reaches the backend until every fragment is within its ceiling
/// and the combined text passes injection screening.
pub struct RequestPipeline {
    backend: Arc<dyn AiBackend>,
    builder: PromptBuilder,
    scanner: InjectionScanner,
    retry: RetryPolicy,
    log: Arc<SecurityLog>,
}

impl RequestPipeline {
    pub fn new(backend: Arc<dyn AiBackend>, log: Arc<SecurityLog>) -> Result<Self, LLMError> {
        Ok(Self {
            backend,
            builder: PromptBuilder::default(),
            scanner: InjectionScanner::new()?,
            retry: RetryPolicy::default(),
            log,
        })
    }

    pub fn with_limits(mut self, limits: PromptLimits) -> Self {
        self.builder = PromptBuilder::new(limits);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn log(&self) -> &Arc<SecurityLog> {
        &self.log
    }

    /// Build a prompt from `fragments`, send it, and return the parsed reply
    /// once every path in `required_fields` is present
    pub async fn call(
        &self,
        fragments: &[PromptFragment],
        required_fields: &[&str],
    ) -> Result<ParsedPayload, LLMError> {
        let prompt = self.builder.build(fragments)?;

        if let Some(finding) = self.scanner.scan(&prompt.untrusted) {
            let encoding = finding.encoding.unwrap_or("raw");
            self.log.record(
                LogLevel::Critical,
                format!("prompt injection blocked: {} ({})", finding.detector, encoding),
                "prompt",
            );
            return Err(LLMError::InjectionDetected {
                detector: finding.detector,
                encoding: finding.encoding,
            });
        }

        tracing::debug!(
            prompt_bytes = prompt.text.len(),
            estimated_tokens = prompt.estimated_tokens,
            "sending prompt"
        );

        let backend = &self.backend;
        let text = prompt.text.as_str();
        let content = self
            .retry
            .run(move |_| async move {
                let response = backend.complete(text).await?;
                if response.success {
                    Ok(response.content)
                } else {
                    Err(LLMError::Backend {
                        detail: response.error.unwrap_or_default(),
                    })
                }
            })
            .await?;

        parse_payload(&content, required_fields).inspect_err(|e| {
            tracing::warn!(error = %e, "backend response failed validation");
        })
    }

    pub async fn suggest_commit(&self, diff: &str, files: &[String]) -> Result<CommitSuggestion, LLMError> {
        let fragments = [
            PromptFragment::Task(
                "Write a conventional commit message for the staged changes below. \
                 Return JSON with keys type, scope, message and body. \
                 Keep message under 72 characters."
                    .to_string(),
            ),
            PromptFragment::Files(files.to_vec()),
            PromptFragment::Diff(diff.to_string()),
        ];
        let payload = self.call(&fragments, COMMIT_FIELDS).await?;
        Ok(CommitSuggestion::from_payload(&payload))
    }

    pub async fn suggest_branch(&self, description: &str, base: &str) -> Result<BranchSuggestion, LLMError> {
        let fragments = [
            PromptFragment::Task(
                "Propose a short git branch name for the work described below. \
                 Return JSON with keys name and base."
                    .to_string(),
            ),
            PromptFragment::text("Description", description),
            PromptFragment::text("Base branch", base),
        ];
        let payload = self.call(&fragments, BRANCH_FIELDS).await?;
        Ok(BranchSuggestion::from_payload(&payload))
    }

    pub async fn suggest_pr(&self, commits: &[String], diff: &str) -> Result<PrSuggestion, LLMError> {
        let fragments = [
            PromptFragment::Task(
                "Write a pull request title and description for the commits below. \
                 Return JSON with keys title, body and labels."
                    .to_string(),
            ),
            PromptFragment::text("Commits", commits.join("\n")),
            PromptFragment::Diff(diff.to_string()),
        ];
        let payload = self.call(&fragments, PR_FIELDS).await?;
        Ok(PrSuggestion::from_payload(&payload))
    }

    pub async fn resolve_conflict(&self, file: &str, conflicted: &str) -> Result<ConflictResolution, LLMError> {
        let fragments = [
            PromptFragment::Task(
                "Resolve the merge conflict in the file below. Return JSON with keys \
                 strategy (auto, ours, theirs or escalate), confidence (0 to 1), \
                 resolved_content and explanation."
                    .to_string(),
            ),
            PromptFragment::Files(vec![file.to_string()]),
            PromptFragment::text("Conflicted content", conflicted),
        ];
        let payload = self.call(&fragments, CONFLICT_FIELDS).await?;
        Ok(ConflictResolution::from_payload(&payload, file))
    }
}
