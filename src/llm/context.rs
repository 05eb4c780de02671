use crate::llm::client::LLMError;

/// Per-dimension ceilings applied before a prompt is assembled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptLimits {
    pub max_prompt_length: usize,
    pub max_diff_length: usize,
    pub max_filename_length: usize,
    pub max_file_count: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_prompt_length: 100_000,
            max_diff_length: 50_000,
            max_filename_length: 255,
            max_file_count: 100,
        }
    }
}

/// One piece of caller-supplied prompt material
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptFragment {
    /// What the backend is asked to do
    Task(String),
    /// Diff excerpt
    Diff(String),
    /// Bounded list of file names
    Files(Vec<String>),
    /// Any other labelled text, such as conflict content
    Text { label: String, body: String },
}

impl PromptFragment {
    pub fn text(label: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Text {
            label: label.into(),
            body: body.into(),
        }
    }

    fn untrusted_text(&self) -> String {
        match self {
            Self::Task(text) | Self::Diff(text) => text.clone(),
            Self::Files(files) => files.join("\n"),
            Self::Text { label, body } => format!("{}\n{}", label, body),
        }
    }
}

impl From<&str> for PromptFragment {
    fn from(text: &str) -> Self {
        Self::text("Input", text)
    }
}

impl From<String> for PromptFragment {
    fn from(text: String) -> Self {
        Self::text("Input", text)
    }
}

/// An assembled prompt plus the caller text it was built from
#[derive(Debug, Clone)]
pub struct Prompt {
    pub text: String,
    /// Fragment content without framing, the part worth screening
    pub untrusted: String,
    pub estimated_tokens: usize,
}

/// Builds a bounded prompt from fragments, failing fast on the first
/// dimension that exceeds its ceiling
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    limits: PromptLimits,
}

impl PromptBuilder {
    pub fn new(limits: PromptLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &PromptLimits {
        &self.limits
    }

    pub fn build(&self, fragments: &[PromptFragment]) -> Result<Prompt, LLMError> {
        for fragment in fragments {
            self.check_fragment(fragment)?;
        }

        let mut text = String::new();
        for fragment in fragments {
            match fragment {
                PromptFragment::Task(task) => {
                    text.push_str(task);
                    text.push_str("\n\n");
                }
                PromptFragment::Diff(diff) => {
                    text.push_str("=== Diff ===\n");
                    text.push_str(diff);
                    text.push_str("\n=== End Diff ===\n\n");
                }
                PromptFragment::Files(files) => {
                    text.push_str("=== Files ===\n");
                    for file in files {
                        text.push_str(&format!("  {}\n", file));
                    }
                    text.push('\n');
                }
                PromptFragment::Text { label, body } => {
                    text.push_str(&format!("=== {} ===\n{}\n\n", label, body));
                }
            }
        }
        text.push_str("Respond with a single JSON object and nothing else.");

        if text.len() > self.limits.max_prompt_length {
            return Err(LLMError::PromptTooLarge {
                dimension: "prompt length",
                len: text.len(),
                max: self.limits.max_prompt_length,
            });
        }

        let untrusted = fragments
            .iter()
            .map(PromptFragment::untrusted_text)
            .collect::<Vec<_>>()
            .join("\n");
        let estimated_tokens = Self::estimate_tokens(&text);

        Ok(Prompt {
            text,
            untrusted,
            estimated_tokens,
        })
    }

    fn check_fragment(&self, fragment: &PromptFragment) -> Result<(), LLMError> {
        let limits = &self.limits;
        match fragment {
            PromptFragment::Diff(diff) => check("diff length", diff.len(), limits.max_diff_length),
            PromptFragment::Files(files) => {
                check("file count", files.len(), limits.max_file_count)?;
                files
                    .iter()
                    .try_for_each(|f| check("filename length", f.len(), limits.max_filename_length))
            }
            PromptFragment::Task(text) | PromptFragment::Text { body: text, .. } => {
                check("prompt length", text.len(), limits.max_prompt_length)
            }
        }
    }

    /// Rough token count (4 chars per token)
    pub fn estimate_tokens(text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

fn check(dimension: &'static str, len: usize, max: usize) -> Result<(), LLMError> {
    if len > max {
        return Err(LLMError::PromptTooLarge { dimension, len, max });
    }
    Ok(())
}
