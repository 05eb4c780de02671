use crate::audit::{LogLevel, SecurityLog};
use crate::error::{InvokeError, InvokeResult};
use crate::security::{
    path_operands, Arg, CommandValidator, PathValidator, SecurityPolicy, ValidationError,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

/// Default wall-clock limit for one spawn
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a child gets to exit after SIGTERM before it is killed
const TERMINATION_GRACE: Duration = Duration::from_millis(500);

/// Variables that make git run external programs
const SCRUBBED_ENV: &[&str] = &[
    "GIT_SSH_COMMAND",
    "GIT_SSH",
    "GIT_EXEC_PATH",
    "GIT_ASKPASS",
    "SSH_ASKPASS",
    "GIT_EDITOR",
    "GIT_PAGER",
    "GIT_CONFIG_PARAMETERS",
    "GIT_CONFIG_COUNT",
    "GIT_EXTERNAL_DIFF",
    "GIT_PROXY_COMMAND",
];

/// A single process invocation, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub binary: String,
    pub subcommand: Option<String>,
    pub args: Vec<Arg>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Caller has confirmed a destructive operation
    pub confirmed: bool,
}

impl CommandSpec {
    pub fn new<P: AsRef<Path>>(
        binary: impl Into<String>,
        subcommand: Option<&str>,
        args: Vec<Arg>,
        working_dir: P,
    ) -> Self {
        Self {
            binary: binary.into(),
            subcommand: subcommand.map(str::to_string),
            args,
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
            confirmed: false,
        }
    }

    pub fn git<P: AsRef<Path>>(subcommand: &str, args: Vec<Arg>, working_dir: P) -> Self {
        Self::new("git", Some(subcommand), args, working_dir)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }

    /// The exact vector handed to process creation, one element per argument
    pub fn argv(&self) -> Vec<String> {
        self.subcommand
            .iter()
            .cloned()
            .chain(self.args.iter().map(|arg| arg.value.clone()))
            .collect()
    }

    fn label(&self) -> String {
        match &self.subcommand {
            Some(sub) => format!("{} {}", self.binary, sub),
            None => self.binary.clone(),
        }
    }
}

/// Result of executing a command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
    /// Output exceeded the capture limit and was cut
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct InvokerSettings {
    pub batch_size: usize,
    /// Items accepted by one logical batched operation
    pub max_items_per_operation: usize,
    /// Captured bytes per stream
    pub max_output_bytes: usize,
}

impl Default for InvokerSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_items_per_operation: 10_000,
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Validates and spawns external commands
///
/// Commands are always spawned from an explicit binary and argument vector;
/// no shell ever sees them. This layer never retries.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    validator: CommandValidator,
    path_validator: PathValidator,
    policy: Arc<SecurityPolicy>,
    settings: InvokerSettings,
}

impl ProcessInvoker {
    pub fn new(validator: CommandValidator, path_validator: PathValidator, policy: SecurityPolicy) -> Self {
        Self {
            validator,
            path_validator,
            policy: Arc::new(policy),
            settings: InvokerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: InvokerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn settings(&self) -> &InvokerSettings {
        &self.settings
    }

    pub fn log(&self) -> &Arc<SecurityLog> {
        self.path_validator.log()
    }

    /// Validate `spec` without spawning; returns the canonical working directory
    pub fn check(&self, spec: &CommandSpec) -> InvokeResult<PathBuf> {
        self.check_inner(spec).inspect_err(|e| {
            self.log()
                .record(LogLevel::Error, format!("command rejected: {}", e), spec.label());
        })
    }

    fn check_inner(&self, spec: &CommandSpec) -> InvokeResult<PathBuf> {
        self.validator.validate(spec)?;

        let Some(anchor) = self.policy.allowed_roots().iter().next() else {
            return Err(InvokeError::WorkingDirectory {
                path: spec.working_dir.clone(),
                violations: vec!["policy has no allowed roots".to_string()],
            });
        };
        let cwd = self.path_validator.validate(&spec.working_dir, anchor, &self.policy);
        if !cwd.is_valid {
            return Err(InvokeError::WorkingDirectory {
                path: spec.working_dir.clone(),
                violations: cwd.violations,
            });
        }

        for operand in path_operands(&spec.args) {
            let result = self
                .path_validator
                .validate(operand, &cwd.canonical_path, &self.policy);
            if !result.is_valid {
                return Err(ValidationError::UnsafePath {
                    path: operand.to_string(),
                    violations: result.violations,
                }
                .into());
            }
        }

        Ok(cwd.canonical_path)
    }

    /// Validate and run one command
    pub async fn run(&self, spec: &CommandSpec) -> InvokeResult<CommandOutput> {
        let cwd = self.check(spec)?;
        self.spawn(spec, &cwd).await
    }

    /// Run `template` once per batch of `items`, appending each batch to the
    /// template's arguments
    ///
    /// Every batch is validated before the first spawn. A single bad item
    /// rejects the whole operation; nothing runs partially.
    pub async fn run_batched(
        &self,
        template: &CommandSpec,
        items: Vec<Arg>,
    ) -> InvokeResult<Vec<CommandOutput>> {
        if items.len() > self.settings.max_items_per_operation {
            let err = InvokeError::TooManyItems {
                count: items.len(),
                max: self.settings.max_items_per_operation,
            };
            self.log().record(LogLevel::Error, err.to_string(), template.label());
            return Err(err);
        }

        let batch_size = self.settings.batch_size.max(1);
        let mut prepared = Vec::new();
        for (index, chunk) in items.chunks(batch_size).enumerate() {
            let mut spec = template.clone();
            spec.args.extend(chunk.iter().cloned());
            match self.check(&spec) {
                Ok(cwd) => prepared.push((spec, cwd)),
                Err(source) => {
                    return Err(InvokeError::BatchRejected {
                        batch: index,
                        source: Box::new(source),
                    });
                }
            }
        }

        tracing::debug!(
            command = %template.label(),
            items = items.len(),
            batches = prepared.len(),
            "running batched command"
        );

        let mut outputs = Vec::with_capacity(prepared.len());
        for (spec, cwd) in &prepared {
            outputs.push(self.spawn(spec, cwd).await?);
        }
        Ok(outputs)
    }

    async fn spawn(&self, spec: &CommandSpec, cwd: &Path) -> InvokeResult<CommandOutput> {
        let started = Instant::now();
        let mut command = Command::new(&spec.binary);
        command
            .args(spec.argv())
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in SCRUBBED_ENV {
            command.env_remove(var);
        }
        command.env("GIT_TERMINAL_PROMPT", "0");

        let mut child = command.spawn().map_err(|source| {
            tracing::error!(binary = %spec.binary, error = %source, "spawn failed");
            InvokeError::Spawn {
                binary: spec.binary.clone(),
                source,
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.settings.max_output_bytes;

        let completed = tokio::time::timeout(spec.timeout, async {
            let (out, err, status) = tokio::join!(
                read_bounded(stdout, limit),
                read_bounded(stderr, limit),
                child.wait()
            );
            status.map(|status| (out, err, status))
        })
        .await;

        let (stdout, stderr, status) = match completed {
            Ok(Ok(parts)) => parts,
            Ok(Err(source)) => {
                return Err(InvokeError::Io {
                    binary: spec.binary.clone(),
                    source,
                });
            }
            Err(_) => {
                terminate(&mut child).await;
                tracing::error!(
                    command = %spec.label(),
                    timeout_ms = spec.timeout.as_millis() as u64,
                    "command timed out"
                );
                return Err(InvokeError::Timeout {
                    binary: spec.binary.clone(),
                    timeout_ms: spec.timeout.as_millis() as u64,
                });
            }
        };

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&stdout.0).to_string(),
            stderr: String::from_utf8_lossy(&stderr.0).to_string(),
            exit_code: status.code().unwrap_or(-1),
            success: status.success(),
            truncated: stdout.1 || stderr.1,
        };

        tracing::debug!(
            command = %spec.label(),
            exit_code = output.exit_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "command finished"
        );

        self.process_output(output, spec)
    }

    /// Return an error for failed commands, keeping stderr out of the message
    fn process_output(&self, output: CommandOutput, spec: &CommandSpec) -> InvokeResult<CommandOutput> {
        if !output.success {
            return Err(InvokeError::NonZeroExit {
                command: spec.label(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes; excess is drained so
/// the child never blocks on a full pipe
///
/// A read error ends the capture early and marks it truncated.
async fn read_bounded<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> (Vec<u8>, bool) {
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };

    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, captured = buf.len(), "pipe read failed, output truncated");
                truncated = true;
                break;
            }
            Ok(n) => {
                let room = limit.saturating_sub(buf.len());
                if n > room {
                    truncated = true;
                }
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    (buf, truncated)
}

/// SIGTERM first, then kill if the child ignores it
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we spawned and have not yet reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if tokio::time::timeout(TERMINATION_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }

    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{BinaryProfile, SecurityLevel};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn create_test_repo() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let repo_path = std::fs::canonicalize(temp_dir.path()).unwrap();

        for args in [
            vec!["init"],
            vec!["config", "user.name", "Test User"],
            vec!["config", "user.email", "test@example.com"],
        ] {
            std::process::Command::new("git")
                .args(&args)
                .current_dir(&repo_path)
                .output()
                .unwrap();
        }

        (temp_dir, repo_path)
    }

    fn invoker(root: &Path) -> ProcessInvoker {
        ProcessInvoker::new(
            CommandValidator::new(),
            PathValidator::new(Arc::new(SecurityLog::new())),
            SecurityPolicy::strict(root),
        )
    }

    #[test]
    fn test_argv_keeps_arguments_separate() {
        let spec = CommandSpec::git(
            "commit",
            vec![Arg::flag("-m"), Arg::message("fix: handle two words")],
            ".",
        );
        assert_eq!(spec.argv(), vec!["commit", "-m", "fix: handle two words"]);
    }

    #[tokio::test]
    async fn test_run_status() {
        let (_temp, repo_path) = create_test_repo();
        let invoker = invoker(&repo_path);

        let spec = CommandSpec::git("status", vec![Arg::flag("--porcelain")], &repo_path);
        let output = invoker.run(&spec).await.unwrap();
        assert!(output.success);
        assert_eq!(output.exit_code, 0);
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_non_zero_exit_hides_stderr() {
        let (_temp, repo_path) = create_test_repo();
        let invoker = invoker(&repo_path);

        // Log fails in an empty repository
        let spec = CommandSpec::git("log", vec![Arg::flag("--oneline")], &repo_path);
        let err = invoker.run(&spec).await.unwrap_err();
        match &err {
            InvokeError::NonZeroExit { exit_code, stderr, .. } => {
                assert_ne!(*exit_code, 0);
                assert!(!stderr.is_empty());
                assert!(!err.to_string().contains(stderr.trim()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_metacharacters_rejected_before_spawn() {
        let (_temp, repo_path) = create_test_repo();
        let invoker = invoker(&repo_path);

        let spec = CommandSpec::git(
            "commit",
            vec![Arg::flag("-m"), Arg::message("feat: add x; rm -rf /")],
            &repo_path,
        );
        let err = invoker.run(&spec).await.unwrap_err();
        assert!(matches!(
            err,
            InvokeError::Rejected(ValidationError::ShellMetacharacter { .. })
        ));
        assert_eq!(invoker.log().len(), 1);
    }

    #[tokio::test]
    async fn test_path_argument_escaping_root() {
        let (_temp, repo_path) = create_test_repo();
        let invoker = invoker(&repo_path);

        let spec = CommandSpec::git("add", vec![Arg::path("../outside.txt")], &repo_path);
        let err = invoker.run(&spec).await.unwrap_err();
        assert!(matches!(
            err,
            InvokeError::Rejected(ValidationError::UnsafePath { .. })
        ));
    }

    #[tokio::test]
    async fn test_working_directory_outside_policy() {
        let (_temp, repo_path) = create_test_repo();
        let other = TempDir::new().unwrap();
        let invoker = invoker(&repo_path);

        let spec = CommandSpec::git("status", vec![], other.path());
        let err = invoker.run(&spec).await.unwrap_err();
        assert!(matches!(err, InvokeError::WorkingDirectory { .. }));
    }

    #[test]
    fn test_policy_without_roots_rejects_every_directory() {
        let (_temp, repo_path) = create_test_repo();
        let invoker = ProcessInvoker::new(
            CommandValidator::new(),
            PathValidator::new(Arc::new(SecurityLog::new())),
            SecurityPolicy::new(SecurityLevel::Strict),
        );

        let err = invoker
            .check(&CommandSpec::git("status", vec![], &repo_path))
            .unwrap_err();
        match err {
            InvokeError::WorkingDirectory { violations, .. } => {
                assert_eq!(violations, vec!["policy has no allowed roots".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(invoker.log().len(), 1);
    }

    #[test]
    fn test_path_valued_flags_are_confined() {
        let (_temp, repo_path) = create_test_repo();
        let invoker = invoker(&repo_path);

        let cases = vec![
            CommandSpec::git("diff", vec![Arg::flag("--output=/tmp/gitward_diff_out.txt")], &repo_path),
            CommandSpec::git("commit", vec![Arg::flag("--file=/home/user/.ssh/id_rsa")], &repo_path),
            CommandSpec::git("commit", vec![Arg::flag("-F"), Arg::value("/etc/passwd")], &repo_path),
            CommandSpec::git("add", vec![Arg::flag("--pathspec-from-file=../list.txt")], &repo_path),
        ];
        for spec in cases {
            let err = invoker.check(&spec).unwrap_err();
            assert!(
                matches!(err, InvokeError::Rejected(ValidationError::UnsafePath { .. })),
                "{:?} gave {:?}",
                spec.argv(),
                err
            );
        }
    }

    #[tokio::test]
    async fn test_commit_message_file_inside_repository() {
        let (_temp, repo_path) = create_test_repo();
        std::fs::write(repo_path.join("a.txt"), "a").unwrap();
        std::fs::write(repo_path.join("msg.txt"), "feat: from file\n").unwrap();
        let invoker = invoker(&repo_path);

        invoker
            .run(&CommandSpec::git("add", vec![Arg::path("a.txt")], &repo_path))
            .await
            .unwrap();
        let spec = CommandSpec::git("commit", vec![Arg::flag("--file=msg.txt")], &repo_path);
        assert_eq!(invoker.check(&spec).unwrap(), repo_path);
        invoker.run(&spec).await.unwrap();
    }

    #[tokio::test]
    async fn test_batched_add() {
        let (_temp, repo_path) = create_test_repo();
        let files: Vec<Arg> = (0..5)
            .map(|i| {
                let name = format!("file_{}.txt", i);
                std::fs::write(repo_path.join(&name), "x").unwrap();
                Arg::path(name)
            })
            .collect();

        let invoker = invoker(&repo_path).with_settings(InvokerSettings {
            batch_size: 2,
            ..InvokerSettings::default()
        });
        let template = CommandSpec::git("add", vec![], &repo_path);
        let outputs = invoker.run_batched(&template, files).await.unwrap();
        assert_eq!(outputs.len(), 3);

        let status = invoker
            .run(&CommandSpec::git("status", vec![Arg::flag("--porcelain")], &repo_path))
            .await
            .unwrap();
        assert_eq!(status.stdout.lines().filter(|l| l.starts_with("A ")).count(), 5);
    }

    #[tokio::test]
    async fn test_batch_with_one_bad_item_spawns_nothing() {
        let (_temp, repo_path) = create_test_repo();
        std::fs::write(repo_path.join("good.txt"), "x").unwrap();

        let invoker = invoker(&repo_path).with_settings(InvokerSettings {
            batch_size: 1,
            ..InvokerSettings::default()
        });
        let template = CommandSpec::git("add", vec![], &repo_path);
        let items = vec![Arg::path("good.txt"), Arg::path("bad;name.txt")];

        let err = invoker.run_batched(&template, items).await.unwrap_err();
        assert!(matches!(err, InvokeError::BatchRejected { batch: 1, .. }));

        let status = invoker
            .run(&CommandSpec::git("status", vec![Arg::flag("--porcelain")], &repo_path))
            .await
            .unwrap();
        assert!(!status.stdout.contains("A  good.txt"));
    }

    #[tokio::test]
    async fn test_item_cap() {
        let (_temp, repo_path) = create_test_repo();
        let invoker = invoker(&repo_path).with_settings(InvokerSettings {
            max_items_per_operation: 3,
            ..InvokerSettings::default()
        });
        let items = (0..4).map(|i| Arg::path(format!("f{}", i))).collect();
        let template = CommandSpec::git("add", vec![], &repo_path);
        assert!(matches!(
            invoker.run_batched(&template, items).await.unwrap_err(),
            InvokeError::TooManyItems { count: 4, max: 3 }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_terminates_child() {
        let temp = TempDir::new().unwrap();
        let root = std::fs::canonicalize(temp.path()).unwrap();
        let sleeper = BinaryProfile {
            name: "sleep".to_string(),
            subcommands: None,
            destructive: HashSet::new(),
            allowed_flags: None,
        };
        let invoker = ProcessInvoker::new(
            CommandValidator::new().with_profile(sleeper),
            PathValidator::new(Arc::new(SecurityLog::new())),
            SecurityPolicy::new(SecurityLevel::Strict).with_allowed_root(&root),
        );

        let spec = CommandSpec::new("sleep", None, vec![Arg::value("10")], &root)
            .with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = invoker.run(&spec).await.unwrap_err();

        assert!(matches!(err, InvokeError::Timeout { timeout_ms: 200, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    struct BrokenPipe {
        served: bool,
    }

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.served {
                return std::task::Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "pipe closed",
                )));
            }
            self.served = true;
            buf.put_slice(b"partial");
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_error_marks_capture_truncated() {
        let (captured, truncated) = read_bounded(Some(BrokenPipe { served: false }), 1024).await;
        assert_eq!(captured, b"partial");
        assert!(truncated);

        let (empty, truncated) = read_bounded(Some(&b""[..]), 1024).await;
        assert!(empty.is_empty());
        assert!(!truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_capture_is_bounded() {
        let (_temp, repo_path) = create_test_repo();
        for i in 0..50 {
            std::fs::write(repo_path.join(format!("untracked_{:02}.txt", i)), "x").unwrap();
        }

        let invoker = invoker(&repo_path).with_settings(InvokerSettings {
            max_output_bytes: 64,
            ..InvokerSettings::default()
        });
        let spec = CommandSpec::git("status", vec![Arg::flag("--porcelain")], &repo_path);
        let output = invoker.run(&spec).await.unwrap();
        assert!(output.truncated);
        assert_eq!(output.stdout.len(), 64);
    }
}
