// =============================================================================
// Pre-market planner — build at 09:25–09:29 ET, execute at 09:30–09:32 ET
// =============================================================================
//
// One plan per morning: the research pass plus the batch analyst, frozen
// until the opening bell. Execution is a single pass — SELLs before BUYs —
// and a plan older than ten minutes is discarded unexecuted.
// =============================================================================

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::US::Eastern;
use tracing::{info, warn};

use crate::providers::{with_deadline, Providers};
use crate::research;
use crate::state::{AgentState, PremarketPlan};
use crate::types::{CrisisLevel, Position, PositionEntry, RecommendedAction};

/// Maximum plan age at execution time, seconds.
const PLAN_MAX_AGE_SECS: i64 = 600;
/// Signals researched while building the plan.
const PLAN_RESEARCH_LIMIT: usize = 10;

/// Whether `now` falls inside the Mon–Fri 09:25–09:29 ET build window.
pub fn in_build_window(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&Eastern);
    let weekday_ok = local.weekday().number_from_monday() <= 5;
    weekday_ok && local.hour() == 9 && (25..=29).contains(&local.minute())
}

/// Whether `now` falls inside the Mon–Fri 09:30–09:32 ET execution window.
pub fn in_execute_window(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&Eastern);
    let weekday_ok = local.weekday().number_from_monday() <= 5;
    weekday_ok && local.hour() == 9 && (30..=32).contains(&local.minute())
}

/// Build the pre-market plan. Precondition: no plan exists yet.
pub async fn build_plan(
    state: &mut AgentState,
    providers: &Providers,
    cash: f64,
    equity: f64,
    positions: &[Position],
    now: DateTime<Utc>,
) {
    if state.premarket_plan.is_some() {
        return;
    }

    research::research_top_signals(state, providers.llm.as_ref(), PLAN_RESEARCH_LIMIT, now).await;

    match research::analyze_signals(state, providers.llm.as_ref(), cash, equity, positions, now)
        .await
    {
        Some(report) => {
            info!(
                recommendations = report.recommendations.len(),
                "pre-market plan built"
            );
            state.log_event(
                "info",
                "premarket_plan_built",
                format!("{} recommendations", report.recommendations.len()),
            );
            state.premarket_plan = Some(PremarketPlan {
                report,
                created_at: now,
            });
        }
        None => {
            warn!("pre-market analyst pass failed — no plan this morning");
        }
    }
}

/// Execute the stored plan in one pass. The plan is cleared afterwards
/// whether or not every leg succeeded.
pub async fn execute_plan(
    state: &mut AgentState,
    providers: &Providers,
    cash: f64,
    positions: &[Position],
    crisis_level: CrisisLevel,
    now: DateTime<Utc>,
) {
    let Some(plan) = state.premarket_plan.take() else {
        return;
    };

    if (now - plan.created_at).num_seconds() > PLAN_MAX_AGE_SECS {
        warn!(
            age_secs = (now - plan.created_at).num_seconds(),
            "pre-market plan stale — discarded"
        );
        state.log_event("warn", "premarket_plan_stale", "plan discarded unexecuted");
        return;
    }

    let held: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
    let max_positions = state.config.stock.max_positions;
    let mut open_count = positions.len();

    // SELLs first.
    for rec in plan
        .report
        .recommendations
        .iter()
        .filter(|r| r.action == RecommendedAction::Sell)
    {
        if !held.iter().any(|h| h == &rec.symbol) {
            continue;
        }
        match with_deadline("brokerage", providers.brokerage.close_position(&rec.symbol)).await {
            Ok(()) => {
                info!(symbol = %rec.symbol, "plan sell executed");
                state.log_event(
                    "info",
                    "plan_sell",
                    format!("{}: {}", rec.symbol, rec.reasoning),
                );
                state.position_entries.remove(&rec.symbol);
                open_count = open_count.saturating_sub(1);
            }
            Err(e) => warn!(symbol = %rec.symbol, error = %e, "plan sell failed"),
        }
    }

    // Then BUYs, gated by the position cap and the held set.
    for rec in plan
        .report
        .recommendations
        .iter()
        .filter(|r| r.action == RecommendedAction::Buy)
    {
        if open_count >= max_positions || held.iter().any(|h| h == &rec.symbol) {
            continue;
        }
        let max_value = state.config.stock.max_position_value;
        let success = crate::engines::stock::execute_buy(
            state,
            providers.brokerage.as_ref(),
            providers.alerts.as_ref(),
            &rec.symbol,
            rec.confidence,
            cash,
            false,
            max_value,
            crisis_level,
            &rec.reasoning,
        )
        .await;
        if success {
            state.position_entries.insert(
                rec.symbol.clone(),
                PositionEntry {
                    entry_time: now,
                    entry_price: 0.0,
                    entry_sentiment: 0.0,
                    entry_social_volume: 0,
                    entry_sources: vec!["premarket_plan".to_string()],
                    reason: format!("pre-market plan: {}", rec.reasoning),
                    peak_price: 0.0,
                    peak_sentiment: 0.0,
                },
            );
            open_count += 1;
        }
    }

    state.log_event("info", "premarket_plan_executed", "plan executed and cleared");
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn eastern_utc(y: i32, m: u32, d: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Eastern
            .with_ymd_and_hms(y, m, d, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn build_window_bounds() {
        // Friday 2026-07-31.
        assert!(!in_build_window(eastern_utc(2026, 7, 31, 9, 24)));
        assert!(in_build_window(eastern_utc(2026, 7, 31, 9, 25)));
        assert!(in_build_window(eastern_utc(2026, 7, 31, 9, 29)));
        assert!(!in_build_window(eastern_utc(2026, 7, 31, 9, 30)));
    }

    #[test]
    fn execute_window_bounds() {
        assert!(!in_execute_window(eastern_utc(2026, 7, 31, 9, 29)));
        assert!(in_execute_window(eastern_utc(2026, 7, 31, 9, 30)));
        assert!(in_execute_window(eastern_utc(2026, 7, 31, 9, 32)));
        assert!(!in_execute_window(eastern_utc(2026, 7, 31, 9, 33)));
    }

    #[test]
    fn weekends_are_excluded() {
        // Saturday 2026-08-01.
        assert!(!in_build_window(eastern_utc(2026, 8, 1, 9, 26)));
        assert!(!in_execute_window(eastern_utc(2026, 8, 1, 9, 31)));
    }
}
