//! Token usage accounting.
//!
//! Every response carries a [`Usage`] record. Providers name their
//! counters differently (`prompt_tokens`, `input_tokens`,
//! `prompt_eval_count`, ...); each transform maps them into this shape
//! through [`Usage::from_counts`], which fills in `total_tokens` when the
//! provider leaves it out.
//!
//! # Invariant
//!
//! `total_tokens == input_tokens + output_tokens` whenever the provider
//! did not report a total of its own.

use std::ops::{Add, AddAssign};

use serde::Serialize;

/// Token counts for a single request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub struct Usage {
    /// Tokens consumed by the prompt (messages + instructions + tool defs).
    pub input_tokens: u64,
    /// Tokens produced by the model's response.
    pub output_tokens: u64,
    /// Provider-reported total, or `input + output` when not reported.
    pub total_tokens: u64,
    /// Prompt tokens served from the provider's cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    /// Tokens spent on hidden reasoning, if the provider reports them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl Usage {
    /// Builds a usage record from raw provider counters.
    ///
    /// ```rust
    /// use llm_weave::Usage;
    ///
    /// let usage = Usage::from_counts(12, 30, None);
    /// assert_eq!(usage.total_tokens, 42);
    ///
    /// let usage = Usage::from_counts(12, 30, Some(50));
    /// assert_eq!(usage.total_tokens, 50);
    /// ```
    pub fn from_counts(input_tokens: u64, output_tokens: u64, total_tokens: Option<u64>) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: total_tokens
                .unwrap_or_else(|| input_tokens.saturating_add(output_tokens)),
            cached_tokens: None,
            reasoning_tokens: None,
        }
    }

    /// Sets the cached-prompt counter.
    #[must_use]
    pub fn with_cached(mut self, cached: Option<u64>) -> Self {
        self.cached_tokens = cached;
        self
    }

    /// Sets the reasoning counter.
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: Option<u64>) -> Self {
        self.reasoning_tokens = reasoning;
        self
    }

    /// Folds a streamed usage report into this one.
    ///
    /// Streaming providers report counters piecemeal (input on open,
    /// output on close) and each report is cumulative, so non-zero
    /// counters replace rather than add.
    pub fn merge_reported(&mut self, report: &Self) {
        if report.input_tokens > 0 {
            self.input_tokens = report.input_tokens;
        }
        if report.output_tokens > 0 {
            self.output_tokens = report.output_tokens;
        }
        if report.cached_tokens.is_some() {
            self.cached_tokens = report.cached_tokens;
        }
        if report.reasoning_tokens.is_some() {
            self.reasoning_tokens = report.reasoning_tokens;
        }
        let sum = self.input_tokens.saturating_add(self.output_tokens);
        self.total_tokens = report.total_tokens.max(sum);
    }
}

fn add_optional(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.saturating_add(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += &rhs;
        self
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self += &rhs;
    }
}

impl AddAssign<&Usage> for Usage {
    fn add_assign(&mut self, rhs: &Self) {
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(rhs.total_tokens);
        self.cached_tokens = add_optional(self.cached_tokens, rhs.cached_tokens);
        self.reasoning_tokens = add_optional(self.reasoning_tokens, rhs.reasoning_tokens);
    }
}
