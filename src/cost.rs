//! Token and cost accounting.
//!
//! `CostMetrics` is the accounting unit attached to every turn and folded
//! into per-session totals. Metrics are derived purely from a usage report
//! and a pricing table; there is no hidden state.

use serde::{Deserialize, Serialize};

use crate::llm::UsageReport;

/// Per-token-class prices in USD per million tokens.
///
/// Cache reads are priced at a steep discount relative to fresh input;
/// the discount ratio is a table parameter, never hard-coded elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingTable {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_write_per_mtok: f64,
    pub cache_read_per_mtok: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            input_per_mtok: 3.00,
            output_per_mtok: 15.00,
            cache_write_per_mtok: 3.75,
            cache_read_per_mtok: 0.30,
        }
    }
}

const MTOK: f64 = 1_000_000.0;

/// Cost metrics for one turn or an aggregate of turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
    pub savings_usd: f64,
}

impl CostMetrics {
    /// Compute metrics from a usage report. Zero usage yields zero metrics.
    #[must_use]
    pub fn compute(usage: &UsageReport, pricing: &PricingTable) -> Self {
        let cost_usd = usage.input_tokens as f64 * pricing.input_per_mtok / MTOK
            + usage.output_tokens as f64 * pricing.output_per_mtok / MTOK
            + usage.cache_write_tokens as f64 * pricing.cache_write_per_mtok / MTOK
            + usage.cache_read_tokens as f64 * pricing.cache_read_per_mtok / MTOK;

        // Savings: what the cached prefix would have cost as fresh input,
        // minus what the cache read actually cost.
        let savings_usd = (usage.cache_read_tokens as f64
            * (pricing.input_per_mtok - pricing.cache_read_per_mtok)
            / MTOK)
            .max(0.0);

        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_write_tokens: usage.cache_write_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cost_usd,
            savings_usd,
        }
    }

    /// Fold another set of metrics into this one (field-wise sum).
    pub fn fold(&mut self, other: &CostMetrics) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_write_tokens = self
            .cache_write_tokens
            .saturating_add(other.cache_write_tokens);
        self.cache_read_tokens = self
            .cache_read_tokens
            .saturating_add(other.cache_read_tokens);
        self.cost_usd += other.cost_usd;
        self.savings_usd += other.savings_usd;
    }

    /// Fraction of prompt tokens served from cache.
    ///
    /// Token-weighted so that one large cached turn is not drowned out by
    /// many small uncached ones. Returns 0.0 when no prompt tokens exist.
    #[must_use]
    pub fn cache_hit_ratio(&self) -> f64 {
        let prompt = self.input_tokens + self.cache_read_tokens;
        if prompt == 0 {
            return 0.0;
        }
        self.cache_read_tokens as f64 / prompt as f64
    }
}
