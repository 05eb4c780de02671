pub mod path_validator;
pub mod patterns;
pub mod policy;
pub mod validator;

pub use path_validator::{PathValidator, ValidationResult};
pub use policy::{SecurityLevel, SecurityPolicy};
pub use validator::{
    path_operands, Arg, ArgKind, ArgLimits, BinaryProfile, CommandValidator, DangerousOp,
    ValidatedCommand, ValidationError,
};

/// Allowlist of permitted git subcommands
///
/// Shared by the CommandValidator and the git facade so both agree on what
/// may be spawned. Adding a new subcommand requires careful security review.
pub const ALLOWED_GIT_SUBCOMMANDS: &[&str] = &[
    // Read operations
    "status",
    "log",
    "show",
    "diff",
    "branch",
    "rev-parse",
    "ls-files",
    "merge-base",
    // Write operations
    "add",
    "commit",
    "checkout",
    "switch",
    "restore",
    "reset",
    "revert",
    "merge",
    "rebase",
    "cherry-pick",
    "stash",
    // Remote operations
    "fetch",
    "pull",
    "push",
];

/// Subcommands that destroy work or history; spawned only when the caller
/// has confirmed
pub const DESTRUCTIVE_GIT_SUBCOMMANDS: &[&str] = &["clean", "filter-branch", "gc", "prune", "update-ref"];
