//! Classification prompt template and response schema.

use crate::config::RunConfig;
use serde_json::{json, Value};

pub const CLASSIFICATION_PROMPT: &str = r#"
You are an AI assistant trained to classify content based on specific guidelines. Your task is to analyze the given item in the context of the provided information and classify it according to the specifications provided.

Use the following context to inform your decision:

Context: {context}

Specification Book Description: {spec_book_description}

Item Description: {item_description}

Weighted Specification: {weighted_spec}

Consider the guidelines provided in the context and classify the following item:

{item}

Provide your classification along with a brief explanation for your decision and a confidence score between 0 and 1. If a weighted specification is provided, use it to determine the primary classification if there are multiple possible classifications with similar confidence levels.

Your response should be in JSON format with the following structure:
{
    "primary_classification": "The primary classification category, considering the weighted specification if provided",
    "classification": "The overall classification category",
    "reasoning": "A brief explanation for the classification, including why the primary classification was chosen if different from the overall classification",
    "confidence": A number between 0 and 1 representing your confidence in the classification
}
"#;

pub const NO_WEIGHTED_SPEC: &str = "No specific specification has more weight.";

/// Fills [`CLASSIFICATION_PROMPT`] with the run descriptions and per-item values.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    spec_book_description: String,
    item_description: String,
    weighted_spec: String,
}

impl PromptBuilder {
    pub fn new(run: &RunConfig) -> Self {
        let weighted_spec = run
            .weighted_spec
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(NO_WEIGHTED_SPEC);

        Self {
            spec_book_description: run.spec_book_description.clone(),
            item_description: run.item_description.clone(),
            weighted_spec: weighted_spec.to_string(),
        }
    }

    /// The system prompt for classifying `item` against `context`.
    pub fn system_prompt(&self, context: &str, item: &str) -> String {
        render(
            CLASSIFICATION_PROMPT,
            &[
                ("context", context),
                ("spec_book_description", &self.spec_book_description),
                ("item_description", &self.item_description),
                ("weighted_spec", &self.weighted_spec),
                ("item", item),
            ],
        )
    }
}

/// Single-pass `{name}` substitution. Substituted values are never rescanned,
/// so an item containing `{context}` stays literal.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });

        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// JSON schema every backend is asked to follow.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "primary_classification": { "type": "string" },
            "classification": { "type": "string" },
            "reasoning": { "type": "string" },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
        },
        "required": ["primary_classification", "classification", "reasoning", "confidence"]
    })
}
