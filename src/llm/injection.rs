//! Prompt-injection screening
//!
//! Detectors are an ordered list of named regular expressions evaluated in
//! one pass. Text is scanned raw, then after stripping up to
//! [`MAX_DECODE_DEPTH`] layers of common encodings, so a single round of
//! Base64 or percent-encoding does not hide a phrase.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use regex::Regex;

/// Encoding layers peeled before re-scanning
///
/// One layer covers every encoding observed in practice. Each extra layer
/// multiplies scan cost by the number of decoders, so nesting deeper than
/// this is accepted as residual risk.
pub const MAX_DECODE_DEPTH: usize = 1;

/// Decoded candidates shorter than this carry no phrase worth scanning
const MIN_DECODED_LEN: usize = 8;

const DETECTOR_SOURCES: &[(&str, &str)] = &[
    (
        "instruction_override",
        r"(?i)\b(?:ignore|disregard|forget|override|bypass|skip)\s+(?:(?:all|any|the|your|my|of|these|those)\s+)*(?:previous|prior|above|earlier|preceding|system|original|existing)\s+(?:instructions?|prompts?|rules|directives?|guidelines|context|messages?)",
    ),
    (
        "new_instructions",
        r"(?i)\b(?:new|updated|revised|real)\s+(?:system\s+)?(?:instructions?|prompt|rules)\s*:",
    ),
    (
        "role_manipulation",
        r"(?i)\b(?:you\s+are\s+now|from\s+now\s+on,?\s+you|pretend\s+(?:to\s+be|you\s+are)|roleplay\s+as|act\s+as\s+(?:an?\s+)?(?:unrestricted|unfiltered|different|new)\b)",
    ),
    (
        "role_marker",
        r"(?im)^\s*(?:#{1,6}\s*)?(?:system|assistant)\s*:",
    ),
    (
        "special_token",
        r"<\|(?:im_start|im_end|system|endoftext)\|>|\[/?INST\]|<</?SYS>>",
    ),
    (
        "jailbreak",
        r"(?i)\b(?:jailbreak|DAN\s+mode|developer\s+mode\s+enabled|do\s+anything\s+now)\b",
    ),
    (
        "fence_escape",
        r"(?i)```\s*(?:system|assistant|instructions?|prompt|end)\b",
    ),
    (
        "tag_escape",
        r"(?i)</?\s*(?:system|instructions?|prompt|user_input|assistant)\s*>",
    ),
    (
        "quote_breakout",
        r#"(?i)["']\s*\}\s*,?\s*\{\s*["'](?:role|system|instructions?)["']\s*:"#,
    ),
];

#[derive(Debug, Clone)]
pub struct InjectionDetector {
    pub name: &'static str,
    regex: Regex,
}

impl InjectionDetector {
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// A detector hit and the encoding it was hidden under, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionFinding {
    pub detector: &'static str,
    pub encoding: Option<&'static str>,
}

type Decoder = fn(&str) -> Vec<String>;

const DECODERS: &[(&str, Decoder)] = &[
    ("base64", decode_base64),
    ("percent", decode_percent),
    ("unicode", decode_unicode_escapes),
    ("html", decode_html_entities),
    ("hex", decode_hex),
];

#[derive(Debug, Clone)]
pub struct InjectionScanner {
    detectors: Vec<InjectionDetector>,
}

impl InjectionScanner {
    pub fn new() -> Result<Self, regex::Error> {
        let detectors = DETECTOR_SOURCES
            .iter()
            .map(|(name, pattern)| {
                Ok(InjectionDetector {
                    name: *name,
                    regex: Regex::new(pattern)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { detectors })
    }

    pub fn detectors(&self) -> &[InjectionDetector] {
        &self.detectors
    }

    /// First detector that fires on `text` or one of its decodings
    pub fn scan(&self, text: &str) -> Option<InjectionFinding> {
        if let Some(detector) = self.first_match(text) {
            return Some(InjectionFinding {
                detector,
                encoding: None,
            });
        }

        let mut layer: Vec<(String, &'static str)> = vec![(text.to_string(), "")];
        for _ in 0..MAX_DECODE_DEPTH {
            let mut next = Vec::new();
            for (candidate, outer) in &layer {
                for (encoding, decode) in DECODERS {
                    for decoded in decode(candidate) {
                        if decoded.len() < MIN_DECODED_LEN || decoded == *candidate {
                            continue;
                        }
                        let label = if outer.is_empty() { *encoding } else { *outer };
                        if let Some(detector) = self.first_match(&decoded) {
                            return Some(InjectionFinding {
                                detector,
                                encoding: Some(label),
                            });
                        }
                        next.push((decoded, label));
                    }
                }
            }
            layer = next;
        }

        None
    }

    fn first_match(&self, text: &str) -> Option<&'static str> {
        self.detectors
            .iter()
            .find(|d| d.matches(text))
            .map(|d| d.name)
    }
}

/// Decode every run that looks like Base64 and yields UTF-8
fn decode_base64(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_')))
        .filter(|token| token.len() >= 12)
        .filter_map(|token| {
            let bytes = STANDARD
                .decode(token)
                .or_else(|_| URL_SAFE.decode(token))
                .ok()?;
            String::from_utf8(bytes).ok()
        })
        .collect()
}

fn decode_percent(text: &str) -> Vec<String> {
    if !text.contains('%') {
        return Vec::new();
    }
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(byte) = hex_pair(bytes[i + 1], bytes[i + 2]) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).ok().into_iter().collect()
}

/// `\uXXXX`, `\u{X..}` and `\xXX` escapes
fn decode_unicode_escapes(text: &str) -> Vec<String> {
    if !text.contains("\\u") && !text.contains("\\x") {
        return Vec::new();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some((ch, used)) = parse_escape(tail) {
            out.push(ch);
            rest = &tail[used..];
        } else {
            out.push('\\');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    vec![out]
}

fn parse_escape(tail: &str) -> Option<(char, usize)> {
    if let Some(braced) = tail.strip_prefix("\\u{") {
        let end = braced.find('}')?;
        let code = u32::from_str_radix(&braced[..end], 16).ok()?;
        return Some((char::from_u32(code)?, end + 4));
    }
    if let Some(hex) = tail.strip_prefix("\\u") {
        let digits = hex.get(..4)?;
        let code = u32::from_str_radix(digits, 16).ok()?;
        return Some((char::from_u32(code)?, 6));
    }
    if let Some(hex) = tail.strip_prefix("\\x") {
        let digits = hex.get(..2)?;
        let code = u32::from_str_radix(digits, 16).ok()?;
        return Some((char::from_u32(code)?, 4));
    }
    None
}

/// Numeric and the handful of named entities that matter for markup
fn decode_html_entities(text: &str) -> Vec<String> {
    if !text.contains('&') {
        return Vec::new();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = tail.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => {
                    let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                }
            };
            ch.map(|c| (c, end + 1))
        });
        match decoded {
            Some((ch, used)) => {
                out.push(ch);
                rest = &tail[used..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    vec![out]
}

/// Runs of at least eight hex byte pairs that decode to UTF-8
fn decode_hex(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_hexdigit())
        .filter(|run| run.len() >= 16 && run.len() % 2 == 0)
        .filter_map(|run| {
            let bytes = run
                .as_bytes()
                .chunks(2)
                .map(|pair| hex_pair(pair[0], pair[1]))
                .collect::<Option<Vec<u8>>>()?;
            String::from_utf8(bytes).ok()
        })
        .collect()
}

fn hex_pair(high: u8, low: u8) -> Option<u8> {
    let value = |b: u8| (b as char).to_digit(16);
    Some((value(high)? * 16 + value(low)?) as u8)
}
