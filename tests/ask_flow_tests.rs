//! Integration tests for the ask path's budget governor and step parsing

use std::time::Duration;

use newswire::ask::{BudgetLimits, Governor};
use newswire::llm::Usage;

fn usage(tokens: u32, cents: f64) -> Usage {
    Usage {
        prompt_tokens: tokens / 2,
        completion_tokens: tokens / 2,
        total_tokens: tokens,
        cost_cents: cents,
    }
}

#[test]
fn governor_denies_before_overrun_not_after() {
    let mut governor = Governor::new(BudgetLimits {
        max_tokens: 4000,
        budget_cents: 10.0,
        timeout: Duration::from_secs(60),
    });

    // Three iterations at 1500 tokens each: the third must be denied
    // before the call, leaving budget for a partial answer.
    assert!(governor.check_call(1500, 2.0).is_ok());
    governor.record("analyze", &usage(1500, 2.0), Duration::from_millis(900));

    assert!(governor.check_call(1500, 2.0).is_ok());
    governor.record("analyze", &usage(1500, 2.0), Duration::from_millis(900));

    let denial = governor.check_call(1500, 2.0).unwrap_err();
    assert_eq!(denial.category(), "budget");
    assert_eq!(governor.remaining_tokens(), 1000);
}

#[test]
fn depth_degrades_to_fit_the_budget() {
    let governor = Governor::new(BudgetLimits {
        max_tokens: 3000,
        budget_cents: 100.0,
        timeout: Duration::from_secs(60),
    });
    // Full depth 3 needs 4500 tokens at 1500 per iteration: degrade to 2.
    assert_eq!(governor.affordable_depth(3, 1500, 0.0), 2);
    // A cheap request keeps its depth.
    assert_eq!(governor.affordable_depth(2, 500, 0.0), 2);
    // Depth never goes below 1 even when broke.
    assert_eq!(governor.affordable_depth(3, 100_000, 0.0), 1);
}

#[test]
fn cents_budget_degrades_independently_of_tokens() {
    let governor = Governor::new(BudgetLimits {
        max_tokens: 1_000_000,
        budget_cents: 3.0,
        timeout: Duration::from_secs(60),
    });
    assert_eq!(governor.affordable_depth(3, 10, 1.5), 2);
}

#[test]
fn spend_summary_reports_stages() {
    let mut governor = Governor::new(BudgetLimits {
        max_tokens: 4000,
        budget_cents: 10.0,
        timeout: Duration::from_secs(60),
    });
    governor.record("analyze", &usage(800, 1.0), Duration::from_millis(500));
    governor.record("refine", &usage(200, 0.2), Duration::from_millis(300));

    let summary = governor.summary();
    assert_eq!(summary["tokens_used"], 1000);
    assert_eq!(summary["stages"].as_array().unwrap().len(), 2);
    assert_eq!(summary["stages"][0]["stage"], "analyze");
}

#[test]
fn zero_timeout_denies_immediately() {
    let governor = Governor::new(BudgetLimits {
        max_tokens: 1000,
        budget_cents: 10.0,
        timeout: Duration::ZERO,
    });
    assert!(governor.deadline_exceeded());
    assert!(governor.check_call(1, 0.0).is_err());
}
