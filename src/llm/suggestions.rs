use crate::llm::response::ParsedPayload;
use serde::Serialize;
use std::fmt;

/// Auto-resolution is honored only at or above this confidence
pub const AUTO_RESOLVE_CONFIDENCE: f64 = 0.9;

pub const COMMIT_FIELDS: &[&str] = &["type", "message"];
pub const BRANCH_FIELDS: &[&str] = &["name"];
pub const PR_FIELDS: &[&str] = &["title", "body"];
pub const CONFLICT_FIELDS: &[&str] = &["strategy", "confidence"];

const COMMIT_TYPES: &[&str] = &[
    "feat", "fix", "docs", "style", "refactor", "perf", "test", "build", "ci", "chore", "revert",
];

const MAX_BRANCH_NAME: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSuggestion {
    pub commit_type: String,
    pub scope: Option<String>,
    pub message: String,
    pub body: Option<String>,
}

impl CommitSuggestion {
    pub fn from_payload(payload: &ParsedPayload) -> Self {
        let raw_type = payload.get_string("type", "chore").trim().to_lowercase();
        let commit_type = if COMMIT_TYPES.contains(&raw_type.as_str()) {
            raw_type
        } else {
            "chore".to_string()
        };

        Self {
            commit_type,
            scope: non_empty(payload.get_string("scope", "")),
            message: first_line(&payload.get_string("message", "")),
            body: non_empty(payload.get_string("body", "")),
        }
    }

    /// Conventional-commit header, `type(scope): message`
    pub fn header(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}({}): {}", self.commit_type, scope, self.message),
            None => format!("{}: {}", self.commit_type, self.message),
        }
    }
}

impl fmt::Display for CommitSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header())?;
        if let Some(body) = &self.body {
            write!(f, "\n\n{}", body)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchSuggestion {
    pub name: String,
    pub base: Option<String>,
}

impl BranchSuggestion {
    pub fn from_payload(payload: &ParsedPayload) -> Self {
        Self {
            name: slugify_branch(&payload.get_string("name", "")),
            base: non_empty(payload.get_string("base", "")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrSuggestion {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

impl PrSuggestion {
    pub fn from_payload(payload: &ParsedPayload) -> Self {
        Self {
            title: first_line(&payload.get_string("title", "")),
            body: payload.get_string("body", ""),
            labels: payload.get_string_list("labels"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    Auto,
    Ours,
    Theirs,
    Escalate,
}

impl ConflictStrategy {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Self::Auto,
            "ours" => Self::Ours,
            "theirs" => Self::Theirs,
            _ => Self::Escalate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictResolution {
    pub file: String,
    pub strategy: ConflictStrategy,
    /// Clamped to `0.0..=1.0`
    pub confidence: f64,
    pub resolved_content: Option<String>,
    pub explanation: String,
}

impl ConflictResolution {
    /// Project a payload, downgrading a low-confidence `auto` to `escalate`
    ///
    /// `file` comes from the caller, never from the backend.
    pub fn from_payload(payload: &ParsedPayload, file: &str) -> Self {
        let confidence = payload.get_number("confidence", 0.0).clamp(0.0, 1.0);
        let claimed = ConflictStrategy::parse(&payload.get_string("strategy", "escalate"));
        let strategy = if claimed == ConflictStrategy::Auto && confidence < AUTO_RESOLVE_CONFIDENCE {
            tracing::warn!(
                file,
                confidence,
                threshold = AUTO_RESOLVE_CONFIDENCE,
                "auto resolution below confidence threshold, escalating"
            );
            ConflictStrategy::Escalate
        } else {
            claimed
        };

        let resolved_content = match strategy {
            ConflictStrategy::Auto => non_empty(payload.get_string("resolved_content", "")),
            _ => None,
        };

        Self {
            file: file.to_string(),
            strategy,
            confidence,
            resolved_content,
            explanation: payload.get_string("explanation", ""),
        }
    }

    pub fn needs_review(&self) -> bool {
        self.strategy == ConflictStrategy::Escalate
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn first_line(value: &str) -> String {
    value.lines().next().unwrap_or("").trim().to_string()
}

/// Lowercase, dash-separated, safe for `git check-ref-format`
fn slugify_branch(raw: &str) -> String {
    let mut slug = String::new();
    for ch in raw.trim().chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' | '/' => ch,
            'A'..='Z' => ch.to_ascii_lowercase(),
            _ => '-',
        };
        let collapses = matches!(mapped, '-' | '/') && slug.ends_with(['-', '/']);
        if !collapses {
            slug.push(mapped);
        }
    }
    let mut slug: String = slug.trim_matches(['-', '/']).chars().take(MAX_BRANCH_NAME).collect();
    while slug.ends_with(['-', '/']) {
        slug.pop();
    }
    slug
}
