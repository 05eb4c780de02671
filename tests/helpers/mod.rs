#![allow(dead_code)]

use async_trait::async_trait;
use gitward::llm::{AiBackend, AiResponse, LLMError};
use gitward::security::{BinaryProfile, CommandValidator, PathValidator, SecurityPolicy};
use gitward::{ProcessInvoker, SecurityLog};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Helper to create a test git repository
pub fn create_test_repo() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let repo_path = fs::canonicalize(temp_dir.path()).unwrap();

    for args in [
        vec!["init"],
        vec!["config", "user.name", "Test User"],
        vec!["config", "user.email", "test@example.com"],
        vec!["config", "commit.gpgsign", "false"],
    ] {
        Command::new("git")
            .args(&args)
            .current_dir(&repo_path)
            .output()
            .expect("Failed to configure git repo");
    }

    (temp_dir, repo_path)
}

/// Helper to create a commit
pub fn create_commit(repo_path: &Path, file: &str, content: &str, message: &str) {
    fs::write(repo_path.join(file), content).expect("Failed to write file");

    Command::new("git")
        .args(["add", file])
        .current_dir(repo_path)
        .output()
        .expect("Failed to add file");

    Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(repo_path)
        .output()
        .expect("Failed to commit");
}

/// Canonical sandbox directory
pub fn sandbox() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = fs::canonicalize(temp_dir.path()).unwrap();
    (temp_dir, root)
}

/// Invoker confined to `root` under STRICT, sharing `log`
pub fn strict_invoker(root: &Path, log: Arc<SecurityLog>) -> ProcessInvoker {
    ProcessInvoker::new(
        CommandValidator::new().with_profile(BinaryProfile::ai_cli("claude")),
        PathValidator::new(log),
        SecurityPolicy::strict(root),
    )
}

/// Backend that replays canned replies, then fails with a transient error
pub struct MockBackend {
    replies: Mutex<Vec<AiResponse>>,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().rev().map(|r| AiResponse::ok(*r)).collect()),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiBackend for MockBackend {
    async fn complete(&self, prompt: &str) -> Result<AiResponse, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| AiResponse::failed("connection refused")))
    }
}
