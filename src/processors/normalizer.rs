//! Coerce free-form model output into a flat list of analysis records
//!
//! Models wrap their JSON in fences, prose, or one of several wrapper keys.
//! Recognition is an ordered list of shapes:
//!
//! 1. an object with an `id` field is a single record
//! 2. a bare array is the record list
//! 3. an object with `emails`, `data`, `results`, `items` arrays yields their
//!    elements, in that key order
//! 4. failing that, the first other array of objects is used
//!
//! Anything else normalizes to an empty list.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

use crate::core::errors::{AiError, Result};

/// Wrapper keys, highest priority first
pub const WRAPPER_KEYS: [&str; 4] = ["emails", "data", "results", "items"];

/// Recognized top-level shape of a parsed payload
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape<'a> {
    SingleObject(&'a Value),
    BareArray(&'a [Value]),
    WrapperArrays(Vec<(&'a str, &'a [Value])>),
    Unrecognized,
}

impl<'a> ResponseShape<'a> {
    pub fn detect(value: &'a Value) -> Self {
        match value {
            Value::Object(map) if map.contains_key("id") => ResponseShape::SingleObject(value),
            Value::Array(items) => ResponseShape::BareArray(items),
            Value::Object(map) => {
                let wrappers = wrapper_arrays(map);
                if wrappers.is_empty() {
                    ResponseShape::Unrecognized
                } else {
                    ResponseShape::WrapperArrays(wrappers)
                }
            }
            _ => ResponseShape::Unrecognized,
        }
    }

    pub fn into_records(self) -> Vec<Value> {
        match self {
            ResponseShape::SingleObject(record) => vec![record.clone()],
            ResponseShape::BareArray(items) => items.to_vec(),
            ResponseShape::WrapperArrays(wrappers) => wrappers
                .into_iter()
                .flat_map(|(_, items)| items.iter().cloned())
                .collect(),
            ResponseShape::Unrecognized => Vec::new(),
        }
    }
}

fn wrapper_arrays(map: &Map<String, Value>) -> Vec<(&str, &[Value])> {
    let known: Vec<(&str, &[Value])> = WRAPPER_KEYS
        .iter()
        .filter_map(|key| {
            map.get_key_value(*key)
                .and_then(|(k, v)| v.as_array().map(|items| (k.as_str(), items.as_slice())))
        })
        .collect();
    if !known.is_empty() {
        return known;
    }

    // Last resort: an unfamiliar key holding a list of objects
    map.iter()
        .find_map(|(key, value)| match value {
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                Some((key.as_str(), items.as_slice()))
            }
            _ => None,
        })
        .into_iter()
        .collect()
}

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
});

/// Remove markdown code fences, keeping the first fenced block's body
pub fn strip_code_fences(raw: &str) -> String {
    if let Some(body) = FENCE.captures(raw).and_then(|c| c.get(1)) {
        return body.as_str().trim().to_string();
    }
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Slice from the first `{` or `[` to the last matching closer
fn embedded_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse model output into JSON, tolerating fences and surrounding prose
pub fn parse_lenient(raw: &str) -> Result<Value> {
    let text = strip_code_fences(raw);

    match serde_json::from_str::<Value>(&text) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let candidate = embedded_json(&text).ok_or_else(|| AiError::InvalidAiJson {
                message: format!("no JSON found: {}", first_err),
                raw: raw.to_string(),
            })?;
            debug!("Recovering JSON embedded in prose ({} chars)", candidate.len());
            serde_json::from_str(candidate).map_err(|e| AiError::InvalidAiJson {
                message: e.to_string(),
                raw: raw.to_string(),
            })
        }
    }
}

/// Normalize raw model output to a list of record-shaped values
pub fn normalize(raw: &str) -> Result<Vec<Value>> {
    let value = parse_lenient(raw)?;
    let records = ResponseShape::detect(&value).into_records();
    debug!("Normalized model output into {} records", records.len());
    Ok(records)
}
