use crate::error::{InvokeError, InvokeResult};
use crate::git::executor::{CommandSpec, ProcessInvoker, DEFAULT_TIMEOUT};
use crate::security::Arg;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Modified,
    Added,
    Deleted,
    Renamed,
    Untracked,
    Unknown,
}

/// One line of `git status --porcelain=v2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub status: FileStatus,
    pub path: String,
    pub staged: bool,
    pub unstaged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub hash: String,
    pub message: String,
}

/// Typed git operations over a [`ProcessInvoker`]
///
/// Every helper builds a [`CommandSpec`] with correctly classed arguments,
/// so the invoker's checks apply to each call.
#[derive(Debug, Clone)]
pub struct GitRunner {
    invoker: ProcessInvoker,
    repo: PathBuf,
    timeout: Duration,
}

impl GitRunner {
    pub fn new<P: AsRef<Path>>(invoker: ProcessInvoker, repo: P) -> Self {
        Self {
            invoker,
            repo: repo.as_ref().to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Walk up from `start` to the nearest directory containing `.git`
    pub fn discover_from<P: AsRef<Path>>(invoker: ProcessInvoker, start: P) -> InvokeResult<Self> {
        let mut current = start.as_ref().to_path_buf();
        loop {
            if current.join(".git").exists() {
                return Ok(Self::new(invoker, current));
            }
            if !current.pop() {
                return Err(InvokeError::WorkingDirectory {
                    path: start.as_ref().to_path_buf(),
                    violations: vec!["not inside a git repository".to_string()],
                });
            }
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.repo
    }

    pub fn invoker(&self) -> &ProcessInvoker {
        &self.invoker
    }

    fn spec(&self, subcommand: &str, args: Vec<Arg>) -> CommandSpec {
        CommandSpec::git(subcommand, args, &self.repo).with_timeout(self.timeout)
    }

    async fn stdout(&self, subcommand: &str, args: Vec<Arg>) -> InvokeResult<String> {
        let output = self.invoker.run(&self.spec(subcommand, args)).await?;
        Ok(output.stdout)
    }

    pub async fn status(&self) -> InvokeResult<Vec<StatusEntry>> {
        let stdout = self
            .stdout("status", vec![Arg::flag("--porcelain=v2")])
            .await?;
        Ok(parse_status_porcelain_v2(&stdout))
    }

    /// Stage `files`, split into batches by the invoker's settings
    ///
    /// A single unsafe path rejects the whole call before anything is staged.
    pub async fn add<S: AsRef<str>>(&self, files: &[S]) -> InvokeResult<()> {
        if files.is_empty() {
            return Ok(());
        }
        let items = files.iter().map(|f| Arg::path(f.as_ref())).collect();
        self.invoker
            .run_batched(&self.spec("add", vec![]), items)
            .await?;
        Ok(())
    }

    pub async fn commit(&self, message: &str) -> InvokeResult<String> {
        self.stdout("commit", vec![Arg::flag("-m"), Arg::message(message)])
            .await
    }

    pub async fn checkout(&self, branch: &str) -> InvokeResult<()> {
        self.stdout("switch", vec![Arg::branch(branch)]).await?;
        Ok(())
    }

    /// Create `name` and switch to it
    pub async fn create_branch(&self, name: &str) -> InvokeResult<()> {
        self.stdout("switch", vec![Arg::flag("--create"), Arg::branch(name)])
            .await?;
        Ok(())
    }

    /// `None` on a detached HEAD
    pub async fn current_branch(&self) -> InvokeResult<Option<String>> {
        let stdout = self
            .stdout("branch", vec![Arg::flag("--show-current")])
            .await?;
        let branch = stdout.trim();
        Ok((!branch.is_empty()).then(|| branch.to_string()))
    }

    pub async fn diff(&self, staged: bool) -> InvokeResult<String> {
        let args = if staged {
            vec![Arg::flag("--cached")]
        } else {
            vec![]
        };
        self.stdout("diff", args).await
    }

    /// Most recent `limit` commits, newest first; empty for a repository
    /// without commits
    pub async fn log(&self, limit: usize) -> InvokeResult<Vec<CommitEntry>> {
        let args = vec![
            Arg::flag(format!("--max-count={}", limit)),
            Arg::flag("--format=%H%x00%s"),
        ];
        match self.stdout("log", args).await {
            Ok(stdout) => Ok(parse_log(&stdout)),
            Err(InvokeError::NonZeroExit { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// Parse git status --porcelain=v2 output
pub fn parse_status_porcelain_v2(output: &str) -> Vec<StatusEntry> {
    let mut entries = Vec::new();

    for line in output.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split(' ').collect();
        match parts[0] {
            // 1 <XY> <sub> <mH> <mI> <mW> <hH> <hI> <path>
            // 2 <XY> <sub> <mH> <mI> <mW> <hH> <hI> <X><score> <path>\t<orig>
            kind @ ("1" | "2") => {
                let path_index = if kind == "1" { 8 } else { 9 };
                if parts.len() <= path_index {
                    continue;
                }
                let xy = parts[1];
                let mut path = parts[path_index..].join(" ");
                if let Some((new_path, _)) = path.split_once('\t') {
                    path = new_path.to_string();
                }

                let status = match (kind, xy.chars().find(|c| *c != '.')) {
                    ("2", _) => FileStatus::Renamed,
                    (_, Some('M')) => FileStatus::Modified,
                    (_, Some('A')) => FileStatus::Added,
                    (_, Some('D')) => FileStatus::Deleted,
                    _ => FileStatus::Unknown,
                };

                entries.push(StatusEntry {
                    status,
                    path,
                    staged: !xy.starts_with('.'),
                    unstaged: xy.chars().nth(1).is_some_and(|c| c != '.'),
                });
            }
            "?" if parts.len() >= 2 => {
                entries.push(StatusEntry {
                    status: FileStatus::Untracked,
                    path: parts[1..].join(" "),
                    staged: false,
                    unstaged: false,
                });
            }
            _ => {}
        }
    }

    entries
}

/// Parse git log output with format %H%x00%s
pub fn parse_log(output: &str) -> Vec<CommitEntry> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('\0') {
            Some((hash, message)) => CommitEntry {
                hash: hash.to_string(),
                message: message.to_string(),
            },
            None => CommitEntry {
                hash: line.to_string(),
                message: String::new(),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SecurityLog;
    use crate::git::executor::InvokerSettings;
    use crate::security::{CommandValidator, PathValidator, SecurityPolicy, ValidationError};
    use std::fs;
    use std::process::Command;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_repo() -> (TempDir, PathBuf) {
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
                .unwrap();
        }

        (temp_dir, repo_path)
    }

    fn runner(repo: &Path) -> GitRunner {
        let invoker = ProcessInvoker::new(
            CommandValidator::new(),
            PathValidator::new(Arc::new(SecurityLog::new())),
            SecurityPolicy::strict(repo),
        )
        .with_settings(InvokerSettings {
            batch_size: 2,
            ..InvokerSettings::default()
        });
        GitRunner::new(invoker, repo)
    }

    #[test]
    fn test_parse_status_porcelain_v2() {
        let output = "# branch.oid (initial)\n\
                      1 A. N... 000000 100644 100644 0000000 e69de29 src/new file.rs\n\
                      1 .M N... 100644 100644 100644 e69de29 e69de29 README.md\n\
                      2 R. N... 100644 100644 100644 e69de29 e69de29 R100 lib.rs\told.rs\n\
                      ? notes.txt\n";
        let entries = parse_status_porcelain_v2(output);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].status, FileStatus::Added);
        assert_eq!(entries[0].path, "src/new file.rs");
        assert!(entries[0].staged && !entries[0].unstaged);
        assert_eq!(entries[1].status, FileStatus::Modified);
        assert!(entries[1].unstaged);
        assert_eq!(entries[2].status, FileStatus::Renamed);
        assert_eq!(entries[2].path, "lib.rs");
        assert_eq!(entries[3].status, FileStatus::Untracked);
    }

    #[test]
    fn test_parse_log() {
        let commits = parse_log("abc123\0feat: one\ndef456\0fix: two\n");
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].hash, "def456");
        assert_eq!(commits[1].message, "fix: two");
    }

    #[test]
    fn test_discover_from_subdirectory() {
        let (_temp, repo_path) = create_test_repo();
        let sub_dir = repo_path.join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let found = GitRunner::discover_from(runner(&repo_path).invoker().clone(), &sub_dir).unwrap();
        assert_eq!(found.path(), repo_path.as_path());
    }

    #[tokio::test]
    async fn test_add_commit_log() {
        let (_temp, repo_path) = create_test_repo();
        let git = runner(&repo_path);

        let files: Vec<String> = (0..5).map(|i| format!("file_{}.txt", i)).collect();
        for file in &files {
            fs::write(repo_path.join(file), "content").unwrap();
        }
        assert!(git.log(5).await.unwrap().is_empty());

        git.add(&files).await.unwrap();
        let status = git.status().await.unwrap();
        assert_eq!(status.len(), 5);
        assert!(status.iter().all(|e| e.staged && e.status == FileStatus::Added));

        git.commit("feat: add five files").await.unwrap();
        let log = git.log(5).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "feat: add five files");
        assert!(git.status().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_branches_and_diff() {
        let (_temp, repo_path) = create_test_repo();
        let git = runner(&repo_path);

        fs::write(repo_path.join("a.txt"), "one\n").unwrap();
        git.add(&["a.txt"]).await.unwrap();
        git.commit("chore: initial").await.unwrap();
        let original = git.current_branch().await.unwrap().unwrap();

        git.create_branch("feature/login").await.unwrap();
        assert_eq!(git.current_branch().await.unwrap().as_deref(), Some("feature/login"));

        fs::write(repo_path.join("a.txt"), "two\n").unwrap();
        assert!(git.diff(false).await.unwrap().contains("+two"));
        assert!(git.diff(true).await.unwrap().is_empty());

        git.add(&["a.txt"]).await.unwrap();
        assert!(git.diff(true).await.unwrap().contains("+two"));
        git.commit("feat: two").await.unwrap();

        git.checkout(&original).await.unwrap();
        assert_eq!(git.current_branch().await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_unsafe_inputs_rejected() {
        let (_temp, repo_path) = create_test_repo();
        let git = runner(&repo_path);

        let err = git.commit("feat: x; rm -rf /").await.unwrap_err();
        assert!(matches!(err, InvokeError::Rejected(ValidationError::ShellMetacharacter { .. })));

        let err = git.create_branch("bad..name").await.unwrap_err();
        assert!(matches!(err, InvokeError::Rejected(ValidationError::InvalidBranchName(_))));

        let err = git.add(&["ok.txt", "../../etc/passwd"]).await.unwrap_err();
        assert!(matches!(err, InvokeError::BatchRejected { batch: 0, .. }));
    }
}
