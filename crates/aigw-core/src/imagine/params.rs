//! Imagine request parameters.

use serde_json::Value;
use thiserror::Error;

pub const MAX_QUANTITY: u32 = 200;
pub const MIN_CONCURRENT: u32 = 1;
pub const MAX_CONCURRENT: u32 = 6;
pub const DEFAULT_ASPECT_RATIO: &str = "2:3";

const ALLOWED_ASPECT_RATIOS: [&str; 5] = ["1:1", "2:3", "3:2", "9:16", "16:9"];

/// Image sizes accepted by the OpenAI-compatible surface, with their ratio.
pub const SIZE_TO_ASPECT: [(&str, &str); 5] = [
    ("1280x720", "16:9"),
    ("720x1280", "9:16"),
    ("1792x1024", "3:2"),
    ("1024x1792", "2:3"),
    ("1024x1024", "1:1"),
];

/// Parameter validation failure with a stable code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("Prompt cannot be empty.")]
    EmptyPrompt,

    #[error("{0}")]
    InvalidQuantity(&'static str),

    #[error("{0}")]
    InvalidConcurrent(&'static str),
}

impl ParamError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptyPrompt => "invalid_prompt",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::InvalidConcurrent(_) => "invalid_concurrent",
        }
    }

    pub const fn param(&self) -> &'static str {
        match self {
            Self::EmptyPrompt => "prompt",
            Self::InvalidQuantity(_) => "quantity",
            Self::InvalidConcurrent(_) => "concurrent",
        }
    }
}

/// Read an integer from a loosely typed value: numbers (fractions
/// truncated) and integer strings. `Ok(None)` for absent or null.
fn loose_int(value: Option<&Value>) -> Result<Option<i64>, ()> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| {
                let f = n.as_f64().filter(|f| f.is_finite())?;
                #[allow(clippy::cast_possible_truncation)]
                let truncated = f.trunc() as i64;
                Some(truncated)
            })
            .map(Some)
            .ok_or(()),
        Some(Value::String(s)) => s.trim().parse::<i64>().map(Some).map_err(|_| ()),
        Some(_) => Err(()),
    }
}

/// `quantity`: 0 (unbounded) to 200.
pub fn normalize_quantity(value: Option<&Value>, default: u32) -> Result<u32, ParamError> {
    let parsed = loose_int(value)
        .map_err(|()| ParamError::InvalidQuantity("quantity must be an integer"))?;
    match parsed {
        None => Ok(default),
        Some(q) => u32::try_from(q)
            .ok()
            .filter(|q| *q <= MAX_QUANTITY)
            .ok_or(ParamError::InvalidQuantity(
                "quantity must be between 0 and 200",
            )),
    }
}

/// `concurrent`: images requested per round, 1 to 6.
pub fn normalize_concurrent(value: Option<&Value>, default: u32) -> Result<u32, ParamError> {
    let parsed = loose_int(value)
        .map_err(|()| ParamError::InvalidConcurrent("concurrent must be an integer"))?;
    match parsed {
        None => Ok(default),
        Some(c) => u32::try_from(c)
            .ok()
            .filter(|c| (MIN_CONCURRENT..=MAX_CONCURRENT).contains(c))
            .ok_or(ParamError::InvalidConcurrent(
                "concurrent must be between 1 and 6",
            )),
    }
}

/// Trimmed, non-empty prompt.
pub fn normalize_prompt(raw: Option<&str>) -> Result<String, ParamError> {
    let prompt = raw.unwrap_or_default().trim();
    if prompt.is_empty() {
        return Err(ParamError::EmptyPrompt);
    }
    Ok(prompt.to_string())
}

/// Map a requested ratio or pixel size onto a supported aspect ratio.
pub fn resolve_aspect_ratio(raw: &str) -> &'static str {
    let value = raw.trim();
    if value.is_empty() {
        return DEFAULT_ASPECT_RATIO;
    }
    if let Some((_, ratio)) = SIZE_TO_ASPECT.iter().find(|(size, _)| *size == value) {
        return ratio;
    }
    value
        .split_once(':')
        .and_then(|(left, right)| {
            let left = left.trim().parse::<u32>().ok().filter(|n| *n > 0)?;
            let right = right.trim().parse::<u32>().ok().filter(|n| *n > 0)?;
            let ratio = format!("{left}:{right}");
            ALLOWED_ASPECT_RATIOS.iter().find(|r| **r == ratio).copied()
        })
        .unwrap_or(DEFAULT_ASPECT_RATIO)
}

/// Query-string boolean: `1`, `true`, `yes`, `on`.
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Loose JSON boolean (`null` means unset).
pub fn loose_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => Some(!s.is_empty()),
        Value::Array(a) => Some(!a.is_empty()),
        Value::Object(o) => Some(!o.is_empty()),
    }
}
