use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Price of one token, per direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input: f64,
    pub output: f64,
}

impl ModelRate {
    /// Build a rate from list prices quoted per million tokens
    pub fn per_million(input: f64, output: f64) -> Self {
        Self {
            input: input / 1_000_000.0,
            output: output / 1_000_000.0,
        }
    }
}

/// Rate lookup keyed by model identifier
#[derive(Debug, Clone)]
pub struct PriceTable {
    rates: HashMap<String, ModelRate>,
    default_rate: ModelRate,
}

impl PriceTable {
    pub fn new(rates: HashMap<String, ModelRate>, default_rate: ModelRate) -> Self {
        Self { rates, default_rate }
    }

    pub fn rate_for(&self, model: &str) -> ModelRate {
        self.rates.get(model).copied().unwrap_or(self.default_rate)
    }

    /// Cost of a single call, rounded to 6 decimals
    pub fn price(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let rate = self.rate_for(model);
        round6(input_tokens as f64 * rate.input + output_tokens as f64 * rate.output)
    }
}

pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
