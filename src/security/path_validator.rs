use crate::audit::{LogLevel, SecurityLog};
use crate::security::patterns::scan_path;
use crate::security::policy::{normalize_lexically, SecurityLevel, SecurityPolicy};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Upper bound on symlink hops while resolving one path (matches Linux SYMLOOP_MAX)
pub const MAX_SYMLINK_HOPS: usize = 40;

/// Directories no policy may grant access to
#[cfg(unix)]
pub const SENSITIVE_SYSTEM_DIRS: &[&str] = &[
    "/etc",
    "/private/etc",
    "/proc",
    "/sys",
    "/dev",
    "/boot",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/var/run",
    "/System",
];

#[cfg(windows)]
pub const SENSITIVE_SYSTEM_DIRS: &[&str] = &[
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
    "C:\\ProgramData",
];

#[cfg(not(any(unix, windows)))]
pub const SENSITIVE_SYSTEM_DIRS: &[&str] = &[];

/// Outcome of validating one candidate path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Resolved path, or the raw candidate when resolution never happened
    pub canonical_path: PathBuf,
    pub is_symlink: bool,
    /// Empty if and only if `is_valid`
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validates candidate paths against a root and a [`SecurityPolicy`]
///
/// Validation never fails with an error: every problem is reported as a
/// violation in the returned [`ValidationResult`], and each violation is
/// recorded in the shared [`SecurityLog`]. Results are never cached, since a
/// symlink target can change between two calls for the same path.
#[derive(Debug, Clone)]
pub struct PathValidator {
    log: Arc<SecurityLog>,
}

/// Working state threaded through the ordered checks
struct Inspection {
    canonical: PathBuf,
    links: Vec<(PathBuf, PathBuf)>,
    violations: Vec<(LogLevel, String)>,
    warnings: Vec<String>,
}

impl Inspection {
    fn new(path: &Path) -> Self {
        Self {
            canonical: path.to_path_buf(),
            links: Vec::new(),
            violations: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn reject(&mut self, level: LogLevel, message: impl Into<String>) {
        self.violations.push((level, message.into()));
    }

    fn failed(&self) -> bool {
        !self.violations.is_empty()
    }
}

impl PathValidator {
    pub fn new(log: Arc<SecurityLog>) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &Arc<SecurityLog> {
        &self.log
    }

    /// Decide whether `path` is admissible under `root` and `policy`
    ///
    /// Relative candidates are resolved against `root`. The checks run in a
    /// fixed order and stop at the first failing stage: type, length, raw
    /// pattern scan, canonicalization, symlink policy, boundary, deny-list.
    pub fn validate<P: AsRef<Path>, R: AsRef<Path>>(
        &self,
        path: P,
        root: R,
        policy: &SecurityPolicy,
    ) -> ValidationResult {
        let path = path.as_ref();
        let root = root.as_ref();
        let mut inspection = Inspection::new(path);

        self.run_checks(path, root, policy, &mut inspection);
        self.finish(inspection)
    }

    fn run_checks(
        &self,
        path: &Path,
        root: &Path,
        policy: &SecurityPolicy,
        inspection: &mut Inspection,
    ) {
        let Some(raw) = check_type(path, inspection) else {
            return;
        };

        check_length(raw, policy.max_path_length(), "path", inspection);
        if inspection.failed() {
            return;
        }

        check_patterns(raw, "path", inspection);
        if inspection.failed() {
            return;
        }

        let Some(canonical_root) = canonical_root(root, inspection) else {
            return;
        };
        resolve(raw, root, &canonical_root, policy, inspection);
        if inspection.failed() {
            return;
        }

        check_symlinks(policy, inspection);
        if inspection.failed() {
            return;
        }

        check_boundary(&canonical_root, policy, inspection);
        if inspection.failed() {
            return;
        }

        check_deny_list(policy, inspection);
    }

    fn finish(&self, inspection: Inspection) -> ValidationResult {
        let subject = inspection.canonical.display().to_string();
        for (level, message) in &inspection.violations {
            self.log.record(*level, message.clone(), subject.clone());
        }

        if inspection.violations.is_empty() {
            tracing::debug!(path = %subject, "path accepted");
        }

        ValidationResult {
            is_valid: inspection.violations.is_empty(),
            canonical_path: inspection.canonical,
            is_symlink: !inspection.links.is_empty(),
            violations: inspection.violations.into_iter().map(|(_, m)| m).collect(),
            warnings: inspection.warnings,
        }
    }
}

fn check_type<'a>(path: &'a Path, inspection: &mut Inspection) -> Option<&'a str> {
    let Some(raw) = path.to_str() else {
        inspection.reject(LogLevel::Error, "path is not valid UTF-8");
        return None;
    };

    if raw.trim().is_empty() {
        inspection.reject(LogLevel::Error, "path is empty");
        return None;
    }

    Some(raw)
}

fn check_length(raw: &str, max: usize, what: &str, inspection: &mut Inspection) {
    if raw.len() > max {
        inspection.reject(
            LogLevel::Error,
            format!("{} length {} exceeds maximum of {}", what, raw.len(), max),
        );
    }
}

fn check_patterns(raw: &str, what: &str, inspection: &mut Inspection) {
    for detector in scan_path(raw) {
        let message = if what == "path" {
            detector.message.to_string()
        } else {
            format!("{}: {}", what, detector.message)
        };
        inspection.reject(detector.severity, message);
    }
}

fn canonical_root(root: &Path, inspection: &mut Inspection) -> Option<PathBuf> {
    if root.as_os_str().is_empty() {
        inspection.reject(LogLevel::Error, "root is empty");
        return None;
    }

    match fs::canonicalize(root) {
        Ok(canonical) => Some(canonical),
        Err(e) => {
            inspection.reject(
                LogLevel::Error,
                format!("root {} is not accessible ({:?})", root.display(), e.kind()),
            );
            None
        }
    }
}

/// Split the candidate into an already-canonical base and the components
/// still to walk
fn starting_point(raw: &str, root: &Path, canonical_root: &Path) -> (PathBuf, PathBuf) {
    let unified = if std::path::MAIN_SEPARATOR == '\\' {
        raw.replace('/', "\\")
    } else {
        raw.replace('\\', "/")
    };
    let candidate = PathBuf::from(unified);

    if !candidate.is_absolute() {
        return (canonical_root.to_path_buf(), candidate);
    }

    // Absolute paths spelled through a symlinked root are rebased onto the
    // canonical root so the root's own links do not count against the caller.
    let lexical = normalize_lexically(&candidate);
    for base in [canonical_root, root] {
        if let Ok(rest) = lexical.strip_prefix(base) {
            return (canonical_root.to_path_buf(), rest.to_path_buf());
        }
    }

    let mut anchor = PathBuf::new();
    let mut rest = PathBuf::new();
    for component in lexical.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => anchor.push(component.as_os_str()),
            other => rest.push(other.as_os_str()),
        }
    }
    (anchor, rest)
}

fn pending_components(path: &Path) -> VecDeque<OsString> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_os_string()),
            _ => None,
        })
        .collect()
}

/// Walk the candidate one component at a time, expanding symlinks as they
/// are met. Each hop's target is length-checked and pattern-scanned like the
/// original input, and a link that points back into its own ancestry is
/// reported instead of followed.
fn resolve(
    raw: &str,
    root: &Path,
    canonical_root: &Path,
    policy: &SecurityPolicy,
    inspection: &mut Inspection,
) {
    let (mut resolved, rest) = starting_point(raw, root, canonical_root);
    let mut pending = pending_components(&rest);
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut missing = false;

    while let Some(name) = pending.pop_front() {
        let next = resolved.join(&name);

        if missing {
            resolved = next;
            continue;
        }

        let metadata = match fs::symlink_metadata(&next) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                missing = true;
                resolved = next;
                continue;
            }
            Err(e) => {
                inspection.canonical = next.clone();
                inspection.reject(
                    LogLevel::Error,
                    format!("cannot inspect {} ({:?})", next.display(), e.kind()),
                );
                return;
            }
        };

        if !metadata.file_type().is_symlink() {
            resolved = next;
            continue;
        }

        inspection.canonical = next.clone();
        if inspection.links.len() >= MAX_SYMLINK_HOPS || !visited.insert(next.clone()) {
            inspection.reject(
                LogLevel::Critical,
                format!("symlink cycle detected at {}", next.display()),
            );
            return;
        }

        let target = match fs::read_link(&next) {
            Ok(target) => target,
            Err(e) => {
                inspection.reject(
                    LogLevel::Error,
                    format!("cannot read symlink {} ({:?})", next.display(), e.kind()),
                );
                return;
            }
        };

        let Some(target_raw) = target.to_str() else {
            inspection.reject(LogLevel::Error, "symlink target is not valid UTF-8");
            return;
        };
        check_length(target_raw, policy.max_path_length(), "symlink target", inspection);
        check_patterns(target_raw, "symlink target", inspection);
        if inspection.failed() {
            return;
        }

        let target_abs = if target.is_absolute() {
            normalize_lexically(&target)
        } else {
            normalize_lexically(&resolved.join(&target))
        };

        if next.starts_with(&target_abs) {
            inspection.reject(
                LogLevel::Critical,
                format!(
                    "symlink {} resolves into its own ancestry ({})",
                    next.display(),
                    target_abs.display()
                ),
            );
            return;
        }

        inspection.links.push((next, target_abs.clone()));

        let mut restarted = pending_components(&target_abs);
        restarted.extend(pending.drain(..));
        pending = restarted;
        resolved = target_abs
            .components()
            .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
            .map(|c| c.as_os_str())
            .collect();
    }

    if missing {
        inspection.warnings.push("path does not exist".to_string());
    }
    inspection.canonical = resolved;
}

fn check_symlinks(policy: &SecurityPolicy, inspection: &mut Inspection) {
    let forbid = !policy.allow_symlinks() && policy.level() != SecurityLevel::Permissive;

    for (link, target) in inspection.links.clone() {
        if forbid {
            inspection.reject(
                LogLevel::Error,
                format!(
                    "symbolic link traversal not allowed: {} -> {}",
                    link.display(),
                    target.display()
                ),
            );
        } else {
            inspection.warnings.push(format!(
                "symbolic link followed: {} -> {}",
                link.display(),
                target.display()
            ));
        }
    }
}

/// Depth of `path` below the closest allowed root containing it
fn depth_within<'a, I>(path: &Path, roots: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a Path>,
{
    roots
        .into_iter()
        .filter_map(|root| path.strip_prefix(root).ok())
        .map(|rest| rest.components().count())
        .min()
}

fn check_boundary(canonical_root: &Path, policy: &SecurityPolicy, inspection: &mut Inspection) {
    let roots = || policy.allowed_roots().iter().map(PathBuf::as_path);

    if policy.allowed_roots().is_empty() {
        inspection.reject(LogLevel::Critical, "policy has no allowed roots");
        return;
    }

    if depth_within(canonical_root, roots()).is_none() {
        inspection.reject(
            LogLevel::Critical,
            format!("root is outside allowed roots: {}", canonical_root.display()),
        );
        return;
    }

    match depth_within(&inspection.canonical, roots()) {
        None => {
            let message = format!(
                "path escapes allowed roots: {}",
                inspection.canonical.display()
            );
            inspection.reject(LogLevel::Critical, message);
        }
        Some(depth) if depth > policy.max_depth() => {
            inspection.reject(
                LogLevel::Error,
                format!("path depth {} exceeds maximum of {}", depth, policy.max_depth()),
            );
        }
        Some(_) => {}
    }

    let escaped: Vec<String> = inspection
        .links
        .iter()
        .filter(|(_, target)| depth_within(target, roots()).is_none())
        .map(|(link, target)| {
            format!(
                "symlink target outside allowed roots: {} -> {}",
                link.display(),
                target.display()
            )
        })
        .collect();
    for message in escaped {
        inspection.reject(LogLevel::Critical, message);
    }
}

fn check_deny_list(policy: &SecurityPolicy, inspection: &mut Inspection) {
    let canonical = inspection.canonical.clone();

    if let Some(blocked) = policy
        .blocked_paths()
        .iter()
        .find(|blocked| canonical.starts_with(blocked))
    {
        inspection.reject(
            LogLevel::Critical,
            format!("path is blocked by policy: {}", blocked.display()),
        );
    }

    if let Some(dir) = SENSITIVE_SYSTEM_DIRS
        .iter()
        .find(|dir| canonical.starts_with(dir))
    {
        inspection.reject(
            LogLevel::Critical,
            format!("path is inside a protected system directory: {}", dir),
        );
    }
}
