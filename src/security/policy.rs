use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// How much latitude path validation grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Non-interactive automation
    Strict,
    /// Symlinks and related directories allowed with warnings
    Moderate,
    /// Explicit opt-in only; pattern scan and deny-list still apply
    Permissive,
}

impl SecurityLevel {
    fn default_max_depth(self) -> usize {
        match self {
            SecurityLevel::Strict => 20,
            SecurityLevel::Moderate => 32,
            SecurityLevel::Permissive => 64,
        }
    }

    fn default_max_path_length(self) -> usize {
        match self {
            SecurityLevel::Strict => 1024,
            SecurityLevel::Moderate => 2048,
            SecurityLevel::Permissive => 4096,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityLevel::Strict => "strict",
            SecurityLevel::Moderate => "moderate",
            SecurityLevel::Permissive => "permissive",
        };
        f.write_str(name)
    }
}

impl FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SecurityLevel::Strict),
            "moderate" => Ok(SecurityLevel::Moderate),
            "permissive" => Ok(SecurityLevel::Permissive),
            other => Err(format!(
                "unknown security level '{}': expected strict, moderate or permissive",
                other
            )),
        }
    }
}

/// Immutable path-access policy for one caller session
///
/// Built once and shared read-only; every builder method consumes and returns
/// the policy, so a constructed value never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    level: SecurityLevel,
    allowed_roots: BTreeSet<PathBuf>,
    blocked_paths: BTreeSet<PathBuf>,
    allow_symlinks: bool,
    max_depth: usize,
    max_path_length: usize,
}

impl SecurityPolicy {
    /// Policy with the level's default limits and no allowed roots besides
    /// the root passed to each validation call
    pub fn new(level: SecurityLevel) -> Self {
        Self {
            level,
            allowed_roots: BTreeSet::new(),
            blocked_paths: BTreeSet::new(),
            allow_symlinks: matches!(level, SecurityLevel::Permissive),
            max_depth: level.default_max_depth(),
            max_path_length: level.default_max_path_length(),
        }
    }

    pub fn strict<P: AsRef<Path>>(root: P) -> Self {
        Self::new(SecurityLevel::Strict).with_allowed_root(root)
    }

    pub fn moderate<P: AsRef<Path>>(root: P) -> Self {
        Self::new(SecurityLevel::Moderate).with_allowed_root(root)
    }

    pub fn permissive<P: AsRef<Path>>(root: P) -> Self {
        Self::new(SecurityLevel::Permissive).with_allowed_root(root)
    }

    pub fn with_allowed_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.allowed_roots.insert(canonicalize_lenient(root.as_ref()));
        self
    }

    pub fn with_blocked_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.blocked_paths.insert(canonicalize_lenient(path.as_ref()));
        self
    }

    pub fn with_symlinks(mut self, allow: bool) -> Self {
        self.allow_symlinks = allow;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_path_length(mut self, max_path_length: usize) -> Self {
        self.max_path_length = max_path_length;
        self
    }

    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    pub fn allowed_roots(&self) -> &BTreeSet<PathBuf> {
        &self.allowed_roots
    }

    pub fn blocked_paths(&self) -> &BTreeSet<PathBuf> {
        &self.blocked_paths
    }

    pub fn allow_symlinks(&self) -> bool {
        self.allow_symlinks
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn max_path_length(&self) -> usize {
        self.max_path_length
    }
}

/// Canonicalize through the filesystem when the path exists, otherwise fall
/// back to lexical normalization of an absolute form
pub(crate) fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    normalize_lexically(&absolute)
}

/// Resolve `.` and `..` components without touching the filesystem
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
