//! Parsing of model answers.
//!
//! Models are asked for strict JSON but often wrap it in a markdown fence or
//! add prose around it. [`extract_json`] finds the payload, the typed parsers
//! validate it.

use serde_json::Value;

use crate::domain::{Grid, Pair, grid_from_value, validate_grid};
use crate::llm::types::LlmError;

/// Minimum pairs a generated puzzle must have.
pub const MIN_GENERATED_PAIRS: usize = 3;

/// An evaluation answer.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationAnswer {
    pub reasoning: String,
    /// One entry per test case. `None` when the entry was not a grid.
    pub predictions: Vec<Option<Grid>>,
}

/// A generation answer.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPuzzle {
    /// Pairs with `order` set to their position
    pub pairs: Vec<Pair>,
    pub explanation: String,
}

fn invalid(msg: impl Into<String>) -> LlmError {
    LlmError::InvalidResponse(msg.into())
}

/// Pull the JSON document out of a model answer.
///
/// Prefers the body of a ```` ```json ```` (or bare ```` ``` ````) fence,
/// otherwise the outermost `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Result<Value, LlmError> {
    let trimmed = text.trim();

    if let Some(body) = fenced_body(trimmed)
        && let Ok(value) = serde_json::from_str(body)
    {
        return Ok(value);
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close))
            && start < end
            && let Ok(value) = serde_json::from_str(&trimmed[start..=end])
        {
            return Ok(value);
        }
    }

    Err(invalid("Failed to parse model response as JSON"))
}

fn fenced_body(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let end = after.find("```")?;
    Some(after[..end].trim())
}

/// Parse `{"reasoning": "...", "predictions": [grid, ...]}`.
pub fn parse_evaluation(text: &str) -> Result<EvaluationAnswer, LlmError> {
    let value = extract_json(text)?;

    let reasoning = value["reasoning"]
        .as_str()
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| invalid("Invalid response format: missing reasoning"))?;
    let predictions = value["predictions"]
        .as_array()
        .ok_or_else(|| invalid("Invalid response format: missing predictions"))?;

    Ok(EvaluationAnswer {
        reasoning: reasoning.to_string(),
        predictions: predictions
            .iter()
            .map(|p| grid_from_value(p).filter(|g| validate_grid(g).is_ok()))
            .collect(),
    })
}

/// Parse `{"pairs": [{"input", "output"}, ...], "explanation": "..."}`.
pub fn parse_generated_puzzle(text: &str) -> Result<GeneratedPuzzle, LlmError> {
    let value = extract_json(text)?;

    let raw_pairs = value["pairs"].as_array().map(Vec::as_slice).unwrap_or_default();
    if raw_pairs.len() < MIN_GENERATED_PAIRS {
        return Err(invalid(format!(
            "Invalid puzzle: got {} pairs (need at least {})",
            raw_pairs.len(),
            MIN_GENERATED_PAIRS
        )));
    }

    let mut pairs = Vec::with_capacity(raw_pairs.len());
    for (i, raw) in raw_pairs.iter().enumerate() {
        let input = grid_from_value(&raw["input"]).ok_or_else(|| invalid(format!("pair {}: input is not a grid", i)))?;
        let output =
            grid_from_value(&raw["output"]).ok_or_else(|| invalid(format!("pair {}: output is not a grid", i)))?;
        validate_grid(&input).map_err(|e| invalid(format!("pair {} input: {}", i, e)))?;
        validate_grid(&output).map_err(|e| invalid(format!("pair {} output: {}", i, e)))?;
        pairs.push(Pair::new(input, output, i as u32));
    }

    Ok(GeneratedPuzzle {
        pairs,
        explanation: value["explanation"].as_str().unwrap_or_default().to_string(),
    })
}

/// Parse `{"concepts": [...]}` or a bare array of strings.
pub fn parse_concepts(text: &str) -> Result<Vec<String>, LlmError> {
    let value = extract_json(text)?;
    let items = match &value {
        Value::Array(items) => items,
        Value::Object(_) => value["concepts"]
            .as_array()
            .ok_or_else(|| invalid("No concepts array found"))?,
        _ => return Err(invalid("No concepts array found")),
    };

    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect())
}
