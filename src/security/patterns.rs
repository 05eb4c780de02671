//! Raw path pattern detectors.
//!
//! These run on the candidate exactly as the caller supplied it, before any
//! normalization, so an encoded `..` cannot be unescaped into a live traversal
//! after the check. New attack shapes are added as entries in
//! [`PATH_DETECTORS`], not as new branches in the validator.

use crate::audit::LogLevel;

/// A named predicate over a raw path string
#[derive(Debug)]
pub struct PathDetector {
    pub name: &'static str,
    pub message: &'static str,
    pub severity: LogLevel,
    matches: fn(&str) -> bool,
}

impl PathDetector {
    pub fn matches(&self, raw: &str) -> bool {
        (self.matches)(raw)
    }
}

/// Evaluated in order; every matching detector contributes one violation
pub const PATH_DETECTORS: &[PathDetector] = &[
    PathDetector {
        name: "null_byte",
        message: "path contains a null byte",
        severity: LogLevel::Critical,
        matches: has_null_byte,
    },
    PathDetector {
        name: "control_character",
        message: "path contains control characters",
        severity: LogLevel::Critical,
        matches: has_control_character,
    },
    PathDetector {
        name: "traversal",
        message: "path traversal pattern '..' detected",
        severity: LogLevel::Critical,
        matches: has_traversal_segment,
    },
    PathDetector {
        name: "encoded_traversal",
        message: "percent-encoded path traversal pattern detected",
        severity: LogLevel::Critical,
        matches: has_percent_encoded_traversal,
    },
    PathDetector {
        name: "double_encoded_traversal",
        message: "double-encoded path traversal pattern detected",
        severity: LogLevel::Critical,
        matches: has_double_encoded_traversal,
    },
    PathDetector {
        name: "unicode_traversal",
        message: "unicode-escaped path traversal pattern detected",
        severity: LogLevel::Critical,
        matches: has_unicode_traversal,
    },
    PathDetector {
        name: "reserved_device_name",
        message: "path uses a reserved device name",
        severity: LogLevel::Error,
        matches: has_reserved_device_name,
    },
];

/// Run every detector over `raw` in a single pass
pub fn scan_path(raw: &str) -> Vec<&'static PathDetector> {
    PATH_DETECTORS.iter().filter(|d| d.matches(raw)).collect()
}

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "CONIN$", "CONOUT$", "COM1", "COM2", "COM3", "COM4", "COM5",
    "COM6", "COM7", "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7",
    "LPT8", "LPT9",
];

fn segments(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(['/', '\\'])
}

fn has_null_byte(raw: &str) -> bool {
    raw.contains('\0') || raw.to_ascii_lowercase().contains("%00")
}

fn has_control_character(raw: &str) -> bool {
    raw.chars().any(|c| c != '\0' && c.is_control())
}

fn has_traversal_segment(raw: &str) -> bool {
    segments(raw).any(|segment| segment.trim_end_matches([' ', '.']).is_empty() && segment.starts_with(".."))
}

fn has_percent_encoded_traversal(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    ["%2e%2e", "%2e.", ".%2e", "..%2f", "..%5c", "%c0%ae", "%c0%af", "%c1%9c", "%e0%80%ae"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn has_double_encoded_traversal(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    ["%252e", "%252f", "%255c", "%25c0%25ae"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn has_unicode_traversal(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    let escaped = ["\\u002e", "\\u002f", "\\u005c", "\\x2e", "\\x2f", "\\x5c", "&#46;", "&#x2e;"]
        .iter()
        .any(|needle| lower.contains(needle));

    // Fullwidth and leader dots some filesystems fold to '.'
    let lookalike = raw
        .chars()
        .any(|c| matches!(c, '\u{FF0E}' | '\u{2024}' | '\u{FE52}' | '\u{FF0F}' | '\u{FF3C}' | '\u{2215}'));

    escaped || lookalike
}

fn has_reserved_device_name(raw: &str) -> bool {
    segments(raw).any(|segment| {
        let stem = segment.split('.').next().unwrap_or("").trim_end();
        RESERVED_DEVICE_NAMES
            .iter()
            .any(|name| stem.eq_ignore_ascii_case(name))
    })
}
