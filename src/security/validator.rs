use crate::git::executor::CommandSpec;
use crate::security::{ALLOWED_GIT_SUBCOMMANDS, DESTRUCTIVE_GIT_SUBCOMMANDS};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Characters a shell would interpret; never legitimate in a git argument
pub const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '<', '>', '*', '?', '[', ']', '{', '}', '\n',
];

/// Flags that let git run arbitrary programs or escape the working tree
pub const DANGEROUS_FLAGS: &[&str] = &[
    "-c",
    "-C",
    "--exec",
    "--upload-pack",
    "--receive-pack",
    "--config-env",
    "--git-dir",
    "--work-tree",
    "--exec-path",
];

/// Flags whose operand names a file git reads or writes
pub const PATH_VALUED_FLAGS: &[&str] = &[
    "--output",
    "--output-directory",
    "--file",
    "-F",
    "--pathspec-from-file",
    "--template",
    "-t",
    "--reference",
    "--separate-git-dir",
];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Binary not allowed: {0}")]
    DisallowedBinary(String),

    #[error("Git subcommand not allowed: {0}")]
    DisallowedSubcommand(String),

    #[error("Binary {0} requires a subcommand")]
    MissingSubcommand(String),

    #[error("Argument {index} contains shell metacharacter {found:?}")]
    ShellMetacharacter { index: usize, found: char },

    #[error("Argument {index} contains a null byte")]
    NullByte { index: usize },

    #[error("Argument {index} contains control characters")]
    ControlCharacter { index: usize },

    #[error("Argument {index} is empty")]
    EmptyArgument { index: usize },

    #[error("{kind} argument {index} is {len} bytes, maximum is {max}")]
    TooLong {
        index: usize,
        kind: ArgKind,
        len: usize,
        max: usize,
    },

    #[error("Argument {index} starts with '-' but is not declared as a flag")]
    UnexpectedFlag { index: usize },

    #[error("Command contains dangerous flags: {0}")]
    DangerousFlags(String),

    #[error("Malformed flag: {0}")]
    InvalidFlag(String),

    #[error("Invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("Invalid remote: {0}")]
    InvalidRemote(String),

    #[error("Unsafe path argument {path}: {}", .violations.join("; "))]
    UnsafePath {
        path: String,
        violations: Vec<String>,
    },

    #[error("{0} requires explicit confirmation")]
    ConfirmationRequired(DangerousOp),

    #[error("Too many arguments: {count} exceeds limit of {max}")]
    TooManyArguments { count: usize, max: usize },
}

impl ValidationError {
    /// Stable machine-readable identifier
    pub fn code(&self) -> &'static str {
        match self {
            Self::DisallowedBinary(_) => "DISALLOWED_BINARY",
            Self::DisallowedSubcommand(_) => "DISALLOWED_SUBCOMMAND",
            Self::MissingSubcommand(_) => "MISSING_SUBCOMMAND",
            Self::ShellMetacharacter { .. } => "SHELL_METACHARACTER",
            Self::NullByte { .. } => "NULL_BYTE",
            Self::ControlCharacter { .. } => "CONTROL_CHARACTER",
            Self::EmptyArgument { .. } => "EMPTY_ARGUMENT",
            Self::TooLong { .. } => "ARGUMENT_TOO_LONG",
            Self::UnexpectedFlag { .. } => "UNEXPECTED_FLAG",
            Self::DangerousFlags(_) => "DANGEROUS_FLAG",
            Self::InvalidFlag(_) => "INVALID_FLAG",
            Self::InvalidBranchName(_) => "INVALID_BRANCH_NAME",
            Self::InvalidRemote(_) => "INVALID_REMOTE",
            Self::UnsafePath { .. } => "UNSAFE_PATH",
            Self::ConfirmationRequired(_) => "CONFIRMATION_REQUIRED",
            Self::TooManyArguments { .. } => "TOO_MANY_ARGUMENTS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DangerousOp {
    ForcePush,
    HardReset,
    Clean,
    FilterBranch,
    ForceCheckout,
    DeleteBranch,
    Rebase,
    PruneObjects,
    UpdateRef,
}

impl fmt::Display for DangerousOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DangerousOp::ForcePush => "force push",
            DangerousOp::HardReset => "hard reset",
            DangerousOp::Clean => "clean",
            DangerousOp::FilterBranch => "filter-branch",
            DangerousOp::ForceCheckout => "force checkout",
            DangerousOp::DeleteBranch => "branch deletion",
            DangerousOp::Rebase => "rebase",
            DangerousOp::PruneObjects => "object pruning",
            DangerousOp::UpdateRef => "ref rewrite",
        };
        f.write_str(label)
    }
}

/// What an argument means, which decides how it is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Declared option such as `-m` or `--format=oneline`
    Flag,
    /// Commit or stash message
    Message,
    /// Filesystem path, also run through the path validator
    Path,
    /// Branch name in check-ref-format shape
    Branch,
    /// Commit-ish such as `HEAD~1` or a hash
    Revision,
    /// Remote name
    Remote,
    /// Any other short value
    Value,
    /// Generative-backend prompt; screened separately by the request pipeline
    Prompt,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArgKind::Flag => "flag",
            ArgKind::Message => "message",
            ArgKind::Path => "path",
            ArgKind::Branch => "branch",
            ArgKind::Revision => "revision",
            ArgKind::Remote => "remote",
            ArgKind::Value => "value",
            ArgKind::Prompt => "prompt",
        };
        f.write_str(label)
    }
}

/// One element of an argument vector, tagged with its meaning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub kind: ArgKind,
    pub value: String,
}

impl Arg {
    pub fn new(kind: ArgKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn flag(value: impl Into<String>) -> Self {
        Self::new(ArgKind::Flag, value)
    }

    pub fn message(value: impl Into<String>) -> Self {
        Self::new(ArgKind::Message, value)
    }

    pub fn path(value: impl Into<String>) -> Self {
        Self::new(ArgKind::Path, value)
    }

    pub fn branch(value: impl Into<String>) -> Self {
        Self::new(ArgKind::Branch, value)
    }

    pub fn revision(value: impl Into<String>) -> Self {
        Self::new(ArgKind::Revision, value)
    }

    pub fn remote(value: impl Into<String>) -> Self {
        Self::new(ArgKind::Remote, value)
    }

    pub fn value(value: impl Into<String>) -> Self {
        Self::new(ArgKind::Value, value)
    }

    pub fn prompt(value: impl Into<String>) -> Self {
        Self::new(ArgKind::Prompt, value)
    }
}

/// Per-class length ceilings
#[derive(Debug, Clone)]
pub struct ArgLimits {
    pub flag: usize,
    pub message: usize,
    pub path: usize,
    pub branch: usize,
    pub revision: usize,
    pub remote: usize,
    pub value: usize,
    pub prompt: usize,
    /// Arguments allowed in one spawn
    pub max_arguments: usize,
}

impl ArgLimits {
    pub fn for_kind(&self, kind: ArgKind) -> usize {
        match kind {
            ArgKind::Flag => self.flag,
            ArgKind::Message => self.message,
            ArgKind::Path => self.path,
            ArgKind::Branch => self.branch,
            ArgKind::Revision => self.revision,
            ArgKind::Remote => self.remote,
            ArgKind::Value => self.value,
            ArgKind::Prompt => self.prompt,
        }
    }
}

impl Default for ArgLimits {
    fn default() -> Self {
        Self {
            flag: 64,
            message: 2000,
            path: 4096,
            branch: 255,
            revision: 255,
            remote: 255,
            value: 1024,
            prompt: 100_000,
            max_arguments: 1000,
        }
    }
}

/// Which subcommands and flags one binary accepts
#[derive(Debug, Clone)]
pub struct BinaryProfile {
    pub name: String,
    /// `None` for binaries invoked without a subcommand
    pub subcommands: Option<HashSet<String>>,
    /// Subcommands that need `CommandSpec::confirmed`
    pub destructive: HashSet<String>,
    /// When set, only these flags may appear
    pub allowed_flags: Option<HashSet<String>>,
}

impl BinaryProfile {
    pub fn git() -> Self {
        Self {
            name: "git".to_string(),
            subcommands: Some(
                ALLOWED_GIT_SUBCOMMANDS
                    .iter()
                    .chain(DESTRUCTIVE_GIT_SUBCOMMANDS)
                    .map(|s| s.to_string())
                    .collect(),
            ),
            destructive: DESTRUCTIVE_GIT_SUBCOMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_flags: None,
        }
    }

    /// Profile for a prompt-driven AI CLI (`<binary> -p <prompt> ...`)
    pub fn ai_cli(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subcommands: None,
            destructive: HashSet::new(),
            allowed_flags: Some(
                ["-p", "--print", "--output-format", "--model", "--max-turns"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedCommand {
    pub is_dangerous: bool,
    pub danger_type: Option<DangerousOp>,
}

/// Checks a [`CommandSpec`] against the binary whitelist and sanitizes every
/// argument independently
///
/// Path arguments are not resolved here; the invoker runs them through the
/// path validator once this check passes.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    profiles: HashMap<String, BinaryProfile>,
    limits: ArgLimits,
}

impl CommandValidator {
    pub fn new() -> Self {
        Self::with_limits(ArgLimits::default())
    }

    pub fn with_limits(limits: ArgLimits) -> Self {
        let mut profiles = HashMap::new();
        let git = BinaryProfile::git();
        profiles.insert(git.name.clone(), git);
        Self { profiles, limits }
    }

    pub fn with_profile(mut self, profile: BinaryProfile) -> Self {
        self.profiles.insert(profile.name.clone(), profile);
        self
    }

    pub fn limits(&self) -> &ArgLimits {
        &self.limits
    }

    pub fn validate(&self, spec: &CommandSpec) -> Result<ValidatedCommand, ValidationError> {
        let profile = self
            .profiles
            .get(&spec.binary)
            .ok_or_else(|| ValidationError::DisallowedBinary(spec.binary.clone()))?;

        self.check_subcommand(profile, spec.subcommand.as_deref())?;

        if spec.args.len() > self.limits.max_arguments {
            return Err(ValidationError::TooManyArguments {
                count: spec.args.len(),
                max: self.limits.max_arguments,
            });
        }

        for (index, arg) in spec.args.iter().enumerate() {
            self.check_argument(index, arg)?;
            if arg.kind == ArgKind::Flag {
                Self::check_flag_allowed(profile, &arg.value)?;
            }
        }

        let danger_type = Self::detect_dangerous_ops(profile, spec);
        if let Some(op) = danger_type {
            if !spec.confirmed {
                return Err(ValidationError::ConfirmationRequired(op));
            }
        }

        Ok(ValidatedCommand {
            is_dangerous: danger_type.is_some(),
            danger_type,
        })
    }

    fn check_subcommand(
        &self,
        profile: &BinaryProfile,
        subcommand: Option<&str>,
    ) -> Result<(), ValidationError> {
        match (&profile.subcommands, subcommand) {
            (Some(allowed), Some(sub)) if allowed.contains(sub) => Ok(()),
            (Some(_), Some(sub)) => Err(ValidationError::DisallowedSubcommand(sub.to_string())),
            (Some(_), None) => Err(ValidationError::MissingSubcommand(profile.name.clone())),
            (None, Some(sub)) => Err(ValidationError::DisallowedSubcommand(sub.to_string())),
            (None, None) => Ok(()),
        }
    }

    /// Sanitize a single argument according to its class
    pub fn check_argument(&self, index: usize, arg: &Arg) -> Result<(), ValidationError> {
        let value = arg.value.as_str();

        if value.is_empty() {
            return Err(ValidationError::EmptyArgument { index });
        }

        let max = self.limits.for_kind(arg.kind);
        if value.len() > max {
            return Err(ValidationError::TooLong {
                index,
                kind: arg.kind,
                len: value.len(),
                max,
            });
        }

        if value.contains('\0') {
            return Err(ValidationError::NullByte { index });
        }

        if arg.kind != ArgKind::Flag && value.starts_with('-') {
            return Err(ValidationError::UnexpectedFlag { index });
        }

        if arg.kind == ArgKind::Prompt {
            // Delivered as one argv element, so only bytes that corrupt the
            // vector itself matter here.
            if value
                .chars()
                .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
            {
                return Err(ValidationError::ControlCharacter { index });
            }
            return Ok(());
        }

        if let Some(found) = value.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
            return Err(ValidationError::ShellMetacharacter { index, found });
        }

        if value.chars().any(char::is_control) {
            return Err(ValidationError::ControlCharacter { index });
        }

        match arg.kind {
            ArgKind::Flag => Self::check_flag_format(value),
            ArgKind::Branch => Self::check_branch_name(value),
            ArgKind::Remote => Self::check_remote(value),
            _ => Ok(()),
        }
    }

    fn check_flag_format(flag: &str) -> Result<(), ValidationError> {
        let (name, _) = flag.split_once('=').unwrap_or((flag, ""));

        let body = if let Some(long) = name.strip_prefix("--") {
            long
        } else if let Some(short) = name.strip_prefix('-') {
            short
        } else {
            return Err(ValidationError::InvalidFlag(flag.to_string()));
        };

        let well_formed = body
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
            && body.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !well_formed || flag.contains(char::is_whitespace) {
            return Err(ValidationError::InvalidFlag(flag.to_string()));
        }

        if let Some(dangerous) = flag_names(flag)
            .into_iter()
            .find(|n| DANGEROUS_FLAGS.contains(&n.as_str()))
        {
            return Err(ValidationError::DangerousFlags(dangerous));
        }
        if flag.contains("core.sshCommand") {
            return Err(ValidationError::DangerousFlags(name.to_string()));
        }

        // Only flags the invoker knows to resolve may carry a path
        if let Some((_, value)) = flag.split_once('=') {
            if value.contains(['/', '\\']) && !is_path_valued(name) {
                return Err(ValidationError::InvalidFlag(format!(
                    "{} does not take a path value",
                    name
                )));
            }
        }

        Ok(())
    }

    fn check_flag_allowed(profile: &BinaryProfile, flag: &str) -> Result<(), ValidationError> {
        let Some(allowed) = &profile.allowed_flags else {
            return Ok(());
        };
        let name = flag.split_once('=').map_or(flag, |(name, _)| name);
        if allowed.contains(name) {
            Ok(())
        } else {
            Err(ValidationError::InvalidFlag(format!(
                "{} is not accepted by {}",
                flag, profile.name
            )))
        }
    }

    /// Reject names `git check-ref-format` would refuse
    fn check_branch_name(name: &str) -> Result<(), ValidationError> {
        let invalid = name.contains("..")
            || name.contains("@{")
            || name.contains("//")
            || name == "@"
            || name.starts_with('+')
            || name.starts_with('/')
            || name.starts_with('.')
            || name.ends_with('/')
            || name.ends_with('.')
            || name.ends_with(".lock")
            || name.split('/').any(|part| part.starts_with('.'))
            || name
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '~' | '^' | ':' | '\\'));

        if invalid {
            Err(ValidationError::InvalidBranchName(name.to_string()))
        } else {
            Ok(())
        }
    }

    /// Transport helpers like `ext::` run arbitrary commands
    fn check_remote(remote: &str) -> Result<(), ValidationError> {
        if remote.contains("::") {
            return Err(ValidationError::InvalidRemote(remote.to_string()));
        }
        Ok(())
    }

    /// Classify operations that lose work or rewrite history
    fn detect_dangerous_ops(profile: &BinaryProfile, spec: &CommandSpec) -> Option<DangerousOp> {
        let subcommand = spec.subcommand.as_deref()?;
        let has_flag = |names: &[&str]| {
            spec.args
                .iter()
                .filter(|arg| arg.kind == ArgKind::Flag)
                .flat_map(|arg| flag_names(&arg.value))
                .any(|name| names.contains(&name.as_str()))
        };
        // `+src:dst` forces the update and `:dst` deletes the remote ref
        let forced_refspec = || {
            spec.args
                .iter()
                .any(|arg| arg.kind != ArgKind::Flag && arg.value.starts_with(['+', ':']))
        };

        match subcommand {
            "push"
                if forced_refspec()
                    || has_flag(&["--force", "-f", "--force-with-lease", "--mirror", "--delete", "-d"]) =>
            {
                Some(DangerousOp::ForcePush)
            }
            "reset" if has_flag(&["--hard"]) => Some(DangerousOp::HardReset),
            "checkout" if has_flag(&["--force", "-f"]) => Some(DangerousOp::ForceCheckout),
            "branch" if has_flag(&["-D", "-d", "--delete"]) => Some(DangerousOp::DeleteBranch),
            "rebase" => Some(DangerousOp::Rebase),
            "clean" => Some(DangerousOp::Clean),
            "filter-branch" => Some(DangerousOp::FilterBranch),
            "gc" | "prune" => Some(DangerousOp::PruneObjects),
            "update-ref" => Some(DangerousOp::UpdateRef),
            other if profile.destructive.contains(other) => Some(DangerousOp::PruneObjects),
            _ => None,
        }
    }
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Option names carried by one flag argument
///
/// A short cluster such as `-fu` stands for `-f` and `-u`; long flags lose
/// their `=value`.
fn flag_names(flag: &str) -> Vec<String> {
    if flag.starts_with("--") {
        let name = flag.split_once('=').map_or(flag, |(name, _)| name);
        return vec![name.to_string()];
    }
    match flag.strip_prefix('-') {
        Some(cluster) if cluster.chars().count() > 1 => {
            cluster.chars().map(|c| format!("-{}", c)).collect()
        }
        _ => vec![flag.to_string()],
    }
}

/// Exact match, or an unambiguous-looking abbreviation of a long path flag
fn is_path_valued(name: &str) -> bool {
    PATH_VALUED_FLAGS.iter().any(|known| {
        *known == name || (name.len() >= 4 && known.starts_with("--") && known.starts_with(name))
    })
}

enum FlagOperand<'a> {
    Attached(&'a str),
    Next,
}

fn path_flag_operand(flag: &str) -> Option<FlagOperand<'_>> {
    if flag.starts_with("--") {
        return match flag.split_once('=') {
            Some((name, value)) => is_path_valued(name).then_some(FlagOperand::Attached(value)),
            None => is_path_valued(flag).then_some(FlagOperand::Next),
        };
    }

    // In a short cluster everything after the first path-taking letter is
    // its operand
    let cluster = flag.strip_prefix('-')?;
    let (at, letter) = cluster
        .char_indices()
        .find(|(_, c)| is_path_valued(&format!("-{}", c)))?;
    let rest = &cluster[at + letter.len_utf8()..];
    Some(if rest.is_empty() {
        FlagOperand::Next
    } else {
        FlagOperand::Attached(rest.strip_prefix('=').unwrap_or(rest))
    })
}

/// Every value in `args` that git will open as a file
///
/// That is each `Path` argument plus the operand of every path-valued flag,
/// whether attached (`--output=x`, `-Fx`) or given as the next argument.
pub fn path_operands(args: &[Arg]) -> Vec<&str> {
    let mut operands = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.kind {
            ArgKind::Path => operands.push(arg.value.as_str()),
            ArgKind::Flag => match path_flag_operand(&arg.value) {
                Some(FlagOperand::Attached(value)) => operands.push(value),
                Some(FlagOperand::Next) => {
                    if let Some(next) = iter.next() {
                        operands.push(next.value.as_str());
                    }
                }
                None => {}
            },
            _ => {}
        }
    }
    operands
}
