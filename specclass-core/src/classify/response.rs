//! Classification results and model response parsing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const UNKNOWN: &str = "Unknown";
pub const NO_REASONING: &str = "No reasoning provided";
pub const ERROR_LABEL: &str = "Error";

/// Why a model response could not be turned into a [`ClassificationResult`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to decode model response as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model response is not a JSON object")]
    NotAnObject,

    #[error("Confidence {0} is not a number between 0 and 1")]
    Confidence(String),
}

/// The normalized answer of one classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub primary_classification: String,
    pub classification: String,
    pub reasoning: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
}

impl ClassificationResult {
    /// The sentinel used in place of a result that could not be obtained.
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            primary_classification: ERROR_LABEL.to_string(),
            classification: ERROR_LABEL.to_string(),
            reasoning: reason.into(),
            confidence: 0.0,
        }
    }

    pub fn is_error(&self) -> bool {
        self.classification == ERROR_LABEL && self.confidence == 0.0
    }
}

/// One row of the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedItem {
    pub item: String,
    #[serde(flatten)]
    pub result: ClassificationResult,
}

impl ClassifiedItem {
    pub fn new(item: impl Into<String>, result: ClassificationResult) -> Self {
        Self {
            item: item.into(),
            result,
        }
    }
}

/// Parses raw model text into a [`ClassificationResult`].
///
/// A markdown code fence around the JSON is tolerated. Missing fields take
/// their defaults (`Unknown`, `No reasoning provided`, `0.0`). A confidence
/// given as a numeric string is accepted.
pub fn parse_response(raw: &str) -> Result<ClassificationResult, ParseError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))?;
    let Value::Object(fields) = value else {
        return Err(ParseError::NotAnObject);
    };

    Ok(ClassificationResult {
        primary_classification: text_field(&fields, "primary_classification", UNKNOWN),
        classification: text_field(&fields, "classification", UNKNOWN),
        reasoning: text_field(&fields, "reasoning", NO_REASONING),
        confidence: confidence_field(&fields)?,
    })
}

fn text_field(fields: &Map<String, Value>, key: &str, default: &str) -> String {
    match fields.get(key) {
        None | Some(Value::Null) => default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn confidence_field(fields: &Map<String, Value>) -> Result<f64, ParseError> {
    let confidence = match fields.get("confidence") {
        None | Some(Value::Null) => return Ok(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match confidence {
        Some(c) if (0.0..=1.0).contains(&c) => Ok(c),
        _ => Err(ParseError::Confidence(
            fields.get("confidence").map(Value::to_string).unwrap_or_default(),
        )),
    }
}

/// Returns the body of a ```` ``` ```` fenced block, or `raw` trimmed.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed;
    };

    // Drop the info string (e.g. `json`) on the opening line.
    match inner.find('\n') {
        Some(newline) => inner[newline + 1..].trim(),
        None => inner.trim(),
    }
}
