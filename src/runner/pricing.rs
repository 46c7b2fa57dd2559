//! Cost estimation for model runs.
//!
//! Prices are USD per million tokens. Providers only report a total token
//! count everywhere, so the estimate assumes a 30/70 input/output split.

use crate::domain::Provider;

const INPUT_SHARE: f64 = 0.3;
const OUTPUT_SHARE: f64 = 0.7;

/// (model substring, input per 1M, output per 1M). First match wins, so
/// longer names that share a prefix come first.
const ANTHROPIC_PRICES: &[(&str, f64, f64)] = &[
    ("claude-3-5-sonnet", 3.0, 15.0),
    ("claude-3-5-haiku", 0.8, 4.0),
    ("claude-3-opus", 15.0, 75.0),
    ("claude-sonnet-4", 3.0, 15.0),
    ("claude-haiku-4", 0.8, 4.0),
    ("claude-opus-4", 15.0, 75.0),
];

const OPENAI_PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.6),
    ("gpt-4o", 2.5, 10.0),
    ("o1-preview", 15.0, 60.0),
    ("o1", 15.0, 60.0),
    ("o3-mini", 1.1, 4.4),
];

fn price_table(provider: Provider) -> &'static [(&'static str, f64, f64)] {
    match provider {
        Provider::Anthropic => ANTHROPIC_PRICES,
        Provider::Openai => OPENAI_PRICES,
        _ => &[],
    }
}

/// Estimated USD cost of a run. Free-tier providers and unknown models cost 0.
pub fn estimate_cost(provider: Provider, model: &str, total_tokens: u64) -> f64 {
    if provider.is_free_tier() {
        return 0.0;
    }
    let Some((_, input, output)) = price_table(provider).iter().find(|(pattern, _, _)| model.contains(pattern))
    else {
        return 0.0;
    };

    let tokens = total_tokens as f64;
    (tokens * INPUT_SHARE / 1_000_000.0) * input + (tokens * OUTPUT_SHARE / 1_000_000.0) * output
}
