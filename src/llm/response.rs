use crate::llm::client::LLMError;
use serde_json::{Map, Value};

/// Untyped JSON object returned by a backend, with defaulting accessors
///
/// Keys are addressed by dotted path (`"commit.type"`).
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPayload {
    fields: Map<String, Value>,
}

impl ParsedPayload {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Strings as-is, numbers and booleans rendered; anything else is `default`
    pub fn get_string(&self, path: &str, default: &str) -> String {
        match self.get(path) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    /// Numbers and numeric strings; non-finite values fall back to `default`
    pub fn get_number(&self, path: &str, default: f64) -> f64 {
        let value = match self.get(path) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        value.filter(|v: &f64| v.is_finite()).unwrap_or(default)
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        match self.get(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => true,
                "false" | "no" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// Array of scalars, or a comma-separated string
    pub fn get_string_list(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Required paths that are absent or null, in the order given
    pub fn missing_fields(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|path| matches!(self.get(path), None | Some(Value::Null)))
            .map(|path| path.to_string())
            .collect()
    }
}

/// Take the `result` out of a CLI result envelope
///
/// Text that is not an envelope is returned unchanged. An envelope whose
/// subtype marks an execution error becomes [`LLMError::Execution`].
pub fn unwrap_envelope(raw: &str) -> Result<String, LLMError> {
    let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(raw.trim()) else {
        return Ok(raw.to_string());
    };

    let is_envelope = envelope.get("type").and_then(Value::as_str) == Some("result")
        && (envelope.contains_key("subtype") || envelope.contains_key("result"));
    if !is_envelope {
        return Ok(raw.to_string());
    }

    let subtype = envelope
        .get("subtype")
        .and_then(Value::as_str)
        .unwrap_or("success");
    let is_error = envelope
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if subtype.starts_with("error") || is_error {
        return Err(LLMError::Execution {
            subtype: subtype.to_string(),
        });
    }

    match envelope.get("result") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Null) | None => Err(LLMError::InvalidResponse(
            "envelope has no result".to_string(),
        )),
        Some(other) => Ok(other.to_string()),
    }
}

/// Remove one surrounding markdown code fence, with or without a language tag
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match inner.find('\n') {
        Some(newline) => &inner[newline + 1..],
        None => inner,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// First balanced `{...}` in `text`, ignoring braces inside JSON strings
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Unwrap, de-fence, extract and parse `raw`, then check `required` paths
pub fn parse_payload(raw: &str, required: &[&str]) -> Result<ParsedPayload, LLMError> {
    let content = unwrap_envelope(raw)?;
    let body = strip_code_fences(&content);
    let object = extract_json_object(body)
        .ok_or_else(|| LLMError::InvalidResponse("no JSON object in response".to_string()))?;

    let fields = match serde_json::from_str::<Value>(object)? {
        Value::Object(map) => map,
        _ => {
            return Err(LLMError::InvalidResponse(
                "response is not a JSON object".to_string(),
            ));
        }
    };

    let payload = ParsedPayload::new(fields);
    let missing = payload.missing_fields(required);
    if !missing.is_empty() {
        return Err(LLMError::MissingFields(missing));
    }
    Ok(payload)
}
