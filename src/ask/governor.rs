//! Request governor: per-request token/cost/wall-clock budget.
//!
//! Estimates are checked before every provider call; a denial surfaces as
//! a budget error the orchestrator can degrade on. Timers are monotonic.

use std::time::{Duration, Instant};

use crate::error::{NewswireError, Result};
use crate::llm::Usage;

/// Per-request budget limits
#[derive(Debug, Clone, Copy)]
pub struct BudgetLimits {
    pub max_tokens: u32,
    pub budget_cents: f64,
    pub timeout: Duration,
}

/// Tracks spend against the limits for one request
#[derive(Debug)]
pub struct Governor {
    limits: BudgetLimits,
    started: Instant,
    tokens_used: u32,
    cents_used: f64,
    stage_latencies: Vec<(String, Duration)>,
}

impl Governor {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            tokens_used: 0,
            cents_used: 0.0,
            stage_latencies: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.elapsed() >= self.limits.timeout
    }

    pub fn remaining_tokens(&self) -> u32 {
        self.limits.max_tokens.saturating_sub(self.tokens_used)
    }

    pub fn remaining_cents(&self) -> f64 {
        (self.limits.budget_cents - self.cents_used).max(0.0)
    }

    /// Deny a call whose estimate does not fit the remaining budget
    pub fn check_call(&self, estimated_tokens: u32, estimated_cents: f64) -> Result<()> {
        if self.deadline_exceeded() {
            return Err(NewswireError::Budget(format!(
                "deadline exceeded after {:?}",
                self.elapsed()
            )));
        }
        if estimated_tokens > self.remaining_tokens() {
            return Err(NewswireError::Budget(format!(
                "token budget exhausted: {} needed, {} remaining",
                estimated_tokens,
                self.remaining_tokens()
            )));
        }
        if estimated_cents > self.remaining_cents() {
            return Err(NewswireError::Budget(format!(
                "cost budget exhausted: {:.2}c needed, {:.2}c remaining",
                estimated_cents,
                self.remaining_cents()
            )));
        }
        Ok(())
    }

    /// Record actual spend from a provider response
    pub fn record(&mut self, stage: &str, usage: &Usage, latency: Duration) {
        self.tokens_used = self.tokens_used.saturating_add(usage.total_tokens);
        self.cents_used += usage.cost_cents;
        self.stage_latencies.push((stage.to_string(), latency));
    }

    /// Highest agentic depth the remaining budget can cover, given a
    /// per-iteration estimate. Depth never degrades below 1.
    pub fn affordable_depth(
        &self,
        requested_depth: u8,
        tokens_per_iteration: u32,
        cents_per_iteration: f64,
    ) -> u8 {
        let by_tokens = if tokens_per_iteration == 0 {
            requested_depth
        } else {
            (self.remaining_tokens() / tokens_per_iteration).min(u32::from(requested_depth)) as u8
        };
        let by_cents = if cents_per_iteration <= 0.0 {
            requested_depth
        } else {
            (self.remaining_cents() / cents_per_iteration).floor() as u8
        };
        requested_depth.min(by_tokens).min(by_cents).max(1)
    }

    /// Spend summary for the response diagnostics
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "tokens_used": self.tokens_used,
            "cents_used": (self.cents_used * 100.0).round() / 100.0,
            "elapsed_ms": self.elapsed().as_millis() as u64,
            "stages": self.stage_latencies.iter()
                .map(|(stage, latency)| serde_json::json!({
                    "stage": stage,
                    "ms": latency.as_millis() as u64,
                }))
                .collect::<Vec<_>>(),
        })
    }
}
