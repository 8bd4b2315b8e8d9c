// =============================================================================
// DEX Momentum Engine — simulated Solana token trading with tiered governors
// =============================================================================
//
// Paper-trading only: a virtual SOL balance, positions keyed by token
// address, an append-only ledger, and the protective machinery around them —
// per-tier caps, a stop-loss circuit breaker, price-based re-entry
// cooldowns, a drawdown pause, and the chart gate. All prices inside one
// tick come from the same scanner snapshot.
//
// Ordering inside a pass is fixed: exits, then entries, then the portfolio
// snapshot. The ledger append and the position delete are one atomic pair.
// =============================================================================

pub mod chart;
pub mod metrics;
pub mod scanner;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::providers::{AlertSink, Providers};
use crate::state::{AgentState, PortfolioSnapshot, StopLossCooldown};
use crate::types::{
    AlertEvent, DexExitReason, DexMomentumSignal, DexPosition, DexTradeRecord, DexTier,
};
use crate::util::slippage_fraction;

/// Entry candidates evaluated per pass.
const MAX_ENTRY_CANDIDATES: usize = 3;
/// Cooldown records older than this are swept regardless of state.
const COOLDOWN_SWEEP_HOURS: i64 = 24;
/// Minimum elapsed time before the momentum-based cooldown clear applies.
const COOLDOWN_MIN_ELAPSED_MINUTES: i64 = 5;
/// A position consuming at least this fraction of pool liquidity cannot be
/// exited cleanly.
const UNSAFE_LIQUIDITY_FRACTION: f64 = 0.2;
/// Trailing stops only arm when the peak itself was a real move.
const MEANINGFUL_PEAK_RATIO: f64 = 1.05;

// ---------------------------------------------------------------------------
// Price view
// ---------------------------------------------------------------------------

/// Per-token view of the current scan used by both exits and entries, so
/// every computation in a tick sees the same prices.
pub struct ScanView {
    prices: HashMap<String, f64>,
    liquidity: HashMap<String, f64>,
    momentum: HashMap<String, f64>,
}

impl ScanView {
    pub fn from_signals(signals: &[DexMomentumSignal]) -> Self {
        let mut prices = HashMap::new();
        let mut liquidity = HashMap::new();
        let mut momentum = HashMap::new();
        for signal in signals {
            prices.insert(signal.token_address.clone(), signal.price_usd);
            liquidity.insert(signal.token_address.clone(), signal.liquidity_usd);
            momentum.insert(signal.token_address.clone(), signal.momentum_score);
        }
        Self {
            prices,
            liquidity,
            momentum,
        }
    }

    pub fn price(&self, token: &str) -> Option<f64> {
        self.prices.get(token).copied()
    }
}

// ---------------------------------------------------------------------------
// Exits
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ExitDecision {
    token: String,
    reason: DexExitReason,
    current_price: f64,
    liquidity: f64,
}

/// Evaluate and execute exits for every held position. Returns the tokens
/// that were closed.
pub fn run_exits(
    state: &mut AgentState,
    alerts: &dyn AlertSink,
    view: &ScanView,
    now: DateTime<Utc>,
) -> Vec<String> {
    let params = state.config.dex.clone();
    let mut decisions: Vec<ExitDecision> = Vec::new();

    for position in state.dex.positions.values_mut() {
        let signal_price = view.price(&position.token_address);
        let current_price = signal_price.unwrap_or(position.entry_price);
        let liquidity = view
            .liquidity
            .get(&position.token_address)
            .copied()
            .unwrap_or(position.entry_liquidity);

        if current_price > position.peak_price {
            position.peak_price = current_price;
        }

        let pl_pct = if position.entry_price > 0.0 {
            (current_price - position.entry_price) / position.entry_price * 100.0
        } else {
            0.0
        };

        let position_value_usd = position.token_amount * current_price;
        let liquidity_safe =
            liquidity <= 0.0 || position_value_usd / liquidity < UNSAFE_LIQUIDITY_FRACTION;

        // a. Token vanished from the scanner output.
        if signal_price.is_none() {
            position.missed_scans += 1;
            if pl_pct <= 0.0
                && position.missed_scans >= params.dex_lost_momentum_missed_scans
                && liquidity_safe
            {
                decisions.push(ExitDecision {
                    token: position.token_address.clone(),
                    reason: DexExitReason::LostMomentum,
                    current_price,
                    liquidity,
                });
                continue;
            }
            // A green position rides on its trailing stop instead.
        } else {
            position.missed_scans = 0;

            // b. Momentum decay while underwater.
            if let Some(&current_momentum) = view.momentum.get(&position.token_address) {
                let decayed = position.entry_momentum > 0.0
                    && current_momentum
                        < params.dex_momentum_decay_fraction * position.entry_momentum;
                if decayed && pl_pct < 0.0 && liquidity_safe {
                    decisions.push(ExitDecision {
                        token: position.token_address.clone(),
                        reason: DexExitReason::LostMomentum,
                        current_price,
                        liquidity,
                    });
                    continue;
                } else if decayed {
                    debug!(
                        token = %position.token_address,
                        current_momentum,
                        entry_momentum = position.entry_momentum,
                        "momentum decayed but position is green — holding"
                    );
                }
            }
        }

        // c. Trailing stop, armed only by a meaningful peak.
        let activation_pct = if position.tier.is_high_risk() {
            params.dex_lottery_trailing_activation
        } else {
            params.dex_trailing_stop_activation_pct
        };
        let distance_pct = if position.tier.is_high_risk() {
            params.dex_high_risk_trailing_distance_pct
        } else {
            params.dex_trailing_stop_distance_pct
        };
        let peak_gain_pct = if position.entry_price > 0.0 {
            (position.peak_price - position.entry_price) / position.entry_price * 100.0
        } else {
            0.0
        };
        let peak_meaningful = position.peak_price >= position.entry_price * MEANINGFUL_PEAK_RATIO;
        if peak_gain_pct >= activation_pct
            && peak_meaningful
            && current_price <= position.peak_price * (1.0 - distance_pct / 100.0)
        {
            decisions.push(ExitDecision {
                token: position.token_address.clone(),
                reason: DexExitReason::TrailingStop,
                current_price,
                liquidity,
            });
            continue;
        }

        // d. Fixed stop loss. Fires regardless of liquidity safety.
        if pl_pct <= -params.tier_stop_loss_pct(position.tier) {
            decisions.push(ExitDecision {
                token: position.token_address.clone(),
                reason: DexExitReason::StopLoss,
                current_price,
                liquidity,
            });
        }
    }

    let mut closed = Vec::with_capacity(decisions.len());
    for decision in decisions {
        if close_position(
            state,
            alerts,
            &decision.token,
            decision.reason,
            decision.current_price,
            decision.liquidity,
            now,
        ) {
            closed.push(decision.token);
        }
    }
    closed
}

/// Close one position: cooldown record, sell slippage, ledger append, cash
/// credit, streak/breaker bookkeeping, and the position delete — as one
/// atomic sequence.
#[allow(clippy::too_many_arguments)]
pub fn close_position(
    state: &mut AgentState,
    alerts: &dyn AlertSink,
    token: &str,
    reason: DexExitReason,
    signal_price: f64,
    liquidity: f64,
    now: DateTime<Utc>,
) -> bool {
    let params = state.config.dex.clone();
    let Some(position) = state.dex.positions.get(token).cloned() else {
        warn!(token, "close requested for unknown position");
        return false;
    };

    // 1. Cooldown for stop/trailing exits, keyed to the observed price.
    if matches!(reason, DexExitReason::StopLoss | DexExitReason::TrailingStop) {
        state.dex.stop_loss_cooldowns.insert(
            token.to_string(),
            StopLossCooldown {
                exit_price: signal_price,
                exit_time: now,
                fallback_expiry: now
                    + Duration::seconds((params.dex_stop_loss_cooldown_hours * 3600.0) as i64),
            },
        );
    }

    // 2. Sell slippage against current liquidity.
    let position_usd = position.token_amount * signal_price;
    let slip = slippage_fraction(params.dex_slippage_model, position_usd, liquidity);
    let exit_price = signal_price * (1.0 - slip);
    let actual_pl_pct = if position.entry_price > 0.0 {
        (exit_price - position.entry_price) / position.entry_price * 100.0
    } else {
        0.0
    };
    let pnl_sol = position.entry_sol * actual_pl_pct / 100.0;

    // 3 + 7. Ledger append and position delete are a single pair.
    state.dex.trade_history.push(DexTradeRecord {
        id: Uuid::new_v4().to_string(),
        token_address: position.token_address.clone(),
        symbol: position.symbol.clone(),
        entry_price: position.entry_price,
        exit_price,
        entry_sol: position.entry_sol,
        entry_time: position.entry_time,
        exit_time: now,
        pnl_pct: actual_pl_pct,
        pnl_sol,
        exit_reason: reason,
        tier: position.tier,
    });
    state.dex.positions.remove(token);

    // 4. Cash settlement.
    state.dex.realized_pnl_sol += pnl_sol;
    state.dex.paper_balance_sol =
        (state.dex.paper_balance_sol + position.entry_sol + pnl_sol - params.dex_gas_fee_sol)
            .max(0.0);

    // 5. Streak stats.
    if pnl_sol <= 0.0 {
        state.dex.current_loss_streak += 1;
        state.dex.max_loss_streak = state.dex.max_loss_streak.max(state.dex.current_loss_streak);
        state.dex.current_win_streak = 0;
    } else {
        state.dex.current_win_streak += 1;
        state.dex.current_loss_streak = 0;
    }
    state.dex.peak_balance_sol = state.dex.peak_balance_sol.max(state.dex.paper_balance_sol);

    // 6. Circuit breaker on clustered stop losses.
    if reason == DexExitReason::StopLoss {
        state.dex.recent_stop_losses.push(now);
        let window =
            Duration::seconds((params.dex_circuit_breaker_window_hours * 3600.0) as i64);
        state.dex.recent_stop_losses.retain(|&at| now - at <= window);
        if state.dex.recent_stop_losses.len() >= params.dex_circuit_breaker_losses
            && state.dex.circuit_breaker_until.map(|u| u <= now).unwrap_or(true)
        {
            let until =
                now + Duration::seconds((params.dex_circuit_breaker_pause_hours * 3600.0) as i64);
            state.dex.circuit_breaker_until = Some(until);
            state.dex.circuit_breaker_since = Some(now);
            state.log_event(
                "warn",
                "circuit_breaker_armed",
                format!(
                    "{} stop losses within {}h — paused until {}",
                    state.dex.recent_stop_losses.len(),
                    params.dex_circuit_breaker_window_hours,
                    until
                ),
            );
        }
    }

    info!(
        token,
        symbol = %position.symbol,
        reason = %reason,
        pl_pct = actual_pl_pct,
        pnl_sol,
        "DEX position closed"
    );
    state.log_event(
        "info",
        "dex_exit",
        format!("{}: {reason} at {actual_pl_pct:+.1}% ({pnl_sol:+.4} SOL)", position.symbol),
    );
    alerts.send(AlertEvent::TradeExit {
        symbol: position.symbol.clone(),
        venue: "dex".to_string(),
        pnl_pct: actual_pl_pct,
        reason: reason.to_string(),
    });
    true
}

/// Liquidate every open DEX position (crisis Level 3). Exit reason `manual`.
pub fn liquidate_all(
    state: &mut AgentState,
    alerts: &dyn AlertSink,
    view: &ScanView,
    now: DateTime<Utc>,
) -> usize {
    let tokens: Vec<String> = state.dex.positions.keys().cloned().collect();
    let mut closed = 0;
    for token in tokens {
        let (price, liquidity) = {
            let position = &state.dex.positions[&token];
            (
                view.price(&token).unwrap_or(position.entry_price),
                view.liquidity
                    .get(&token)
                    .copied()
                    .unwrap_or(position.entry_liquidity),
            )
        };
        if close_position(
            state,
            alerts,
            &token,
            DexExitReason::Manual,
            price,
            liquidity,
            now,
        ) {
            closed += 1;
        }
    }
    closed
}

// ---------------------------------------------------------------------------
// Cooldown gate
// ---------------------------------------------------------------------------

/// Price-based re-entry gate. On allow, the cooldown record is deleted.
pub fn cooldown_allows(state: &mut AgentState, signal: &DexMomentumSignal, now: DateTime<Utc>) -> bool {
    let params = &state.config.dex;
    let Some(cooldown) = state.dex.stop_loss_cooldowns.get(&signal.token_address) else {
        return true;
    };

    let recovered = cooldown.exit_price > 0.0
        && signal.price_usd
            >= cooldown.exit_price * (1.0 + params.dex_reentry_recovery_pct / 100.0);
    let momentum_path = signal.momentum_score >= params.dex_reentry_min_momentum
        && now - cooldown.exit_time >= Duration::minutes(COOLDOWN_MIN_ELAPSED_MINUTES);
    let expired = now >= cooldown.fallback_expiry;

    if recovered {
        state.dex.stop_loss_cooldowns.remove(&signal.token_address);
        state.log_event(
            "info",
            "cooldown_cleared_price_recovery",
            format!("{}: price recovered past re-entry threshold", signal.symbol),
        );
        return true;
    }
    if momentum_path || expired {
        state.dex.stop_loss_cooldowns.remove(&signal.token_address);
        return true;
    }
    false
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Per-tier position size in SOL. `None` means the tier produced no viable
/// size for the current balance.
pub fn tier_size_sol(state: &AgentState, tier: DexTier) -> Option<f64> {
    let params = &state.config.dex;
    let balance = state.dex.paper_balance_sol;
    let size = match tier {
        DexTier::Microspray => params.dex_microspray_position_sol,
        DexTier::Breakout => params.dex_breakout_position_sol,
        DexTier::Lottery => params.dex_lottery_position_sol,
        DexTier::Early => (balance * params.dex_position_size_pct / 100.0
            * params.dex_early_position_size_pct
            / 100.0)
            .min(params.dex_max_position_sol),
        DexTier::Established => {
            (balance * params.dex_position_size_pct / 100.0).min(params.dex_max_position_sol)
        }
    };
    (size.is_finite() && size > 0.0).then_some(size)
}

/// Run the entry sequence over the current scan. Exits must have been
/// evaluated already in this pass.
pub async fn run_entries(
    state: &mut AgentState,
    providers: &Providers,
    view: &ScanView,
    sol_usd: f64,
    now: DateTime<Utc>,
) {
    let params = state.config.dex.clone();
    if !params.dex_enabled || state.dex.signals.is_empty() {
        return;
    }

    // 4. Global position cap.
    if state.dex.positions.len() >= params.dex_max_positions {
        return;
    }

    // 5. Circuit breaker, with the documented early-clear path.
    if let Some(until) = state.dex.circuit_breaker_until {
        if until > now {
            let min_cooldown_over = state
                .dex
                .circuit_breaker_since
                .map(|since| now - since >= Duration::minutes(params.dex_breaker_min_cooldown_minutes))
                .unwrap_or(true);
            if !min_cooldown_over {
                return;
            }

            let any_recovered = state.dex.positions.values().any(|p| {
                view.price(&p.token_address)
                    .map(|price| price > p.entry_price)
                    .unwrap_or(false)
            });
            let strong_signal = state.dex.signals.iter().any(|s| {
                !state.dex.positions.contains_key(&s.token_address)
                    && s.momentum_score >= params.dex_reentry_min_momentum
            });
            if any_recovered || strong_signal {
                state.dex.circuit_breaker_until = None;
                state.dex.circuit_breaker_since = None;
                state.log_event(
                    "info",
                    "circuit_breaker_cleared",
                    if any_recovered {
                        "early clear: open position recovered to positive P&L"
                    } else {
                        "early clear: strong momentum signal available"
                    },
                );
            } else {
                return;
            }
        } else {
            state.dex.circuit_breaker_until = None;
            state.dex.circuit_breaker_since = None;
        }
    }

    // 6. Drawdown pause.
    if state.dex.drawdown_paused {
        return;
    }

    // 7. Sweep ancient cooldown records.
    let sweep_cutoff = now - Duration::hours(COOLDOWN_SWEEP_HOURS);
    state
        .dex
        .stop_loss_cooldowns
        .retain(|_, c| c.exit_time > sweep_cutoff);

    // 8. Candidates: strong momentum, not held, past the cooldown gate.
    let signals = state.dex.signals.clone();
    let mut candidates: Vec<DexMomentumSignal> = Vec::new();
    for signal in signals {
        if candidates.len() >= MAX_ENTRY_CANDIDATES {
            break;
        }
        if signal.momentum_score < params.dex_min_momentum_score {
            continue;
        }
        if state.dex.positions.contains_key(&signal.token_address) {
            continue;
        }
        if !cooldown_allows(state, &signal, now) {
            continue;
        }
        candidates.push(signal);
    }

    // 9. Per-tier counts as of this pass.
    let mut tier_counts: HashMap<DexTier, usize> = HashMap::new();
    for position in state.dex.positions.values() {
        *tier_counts.entry(position.tier).or_insert(0) += 1;
    }

    for signal in candidates {
        if state.dex.positions.len() >= params.dex_max_positions {
            break;
        }
        let tier = signal.tier;
        let tier_count = tier_counts.get(&tier).copied().unwrap_or(0);
        if tier_count >= params.tier_max_positions(tier) {
            debug!(tier = %tier, "tier position cap reached — skipping candidate");
            continue;
        }

        // 10. Chart gate. Provider failure or thin data never rejects.
        if params.dex_chart_analysis_enabled {
            if let Some(analysis) =
                chart::gate(providers.chart.as_ref(), &signal.token_address, signal.age_hours)
                    .await
            {
                if analysis.entry_score < params.dex_chart_min_entry_score {
                    debug!(
                        token = %signal.token_address,
                        entry_score = analysis.entry_score,
                        "chart gate rejected candidate"
                    );
                    state.log_event(
                        "info",
                        "dex_entry_rejected",
                        format!(
                            "{}: chart entry score {:.0} below minimum",
                            signal.symbol, analysis.entry_score
                        ),
                    );
                    continue;
                }
            }
        }

        // 11. Size per tier.
        let Some(mut size_sol) = tier_size_sol(state, tier) else {
            continue;
        };

        // 12. Concentration cap against total book value.
        let total_value = state
            .dex
            .total_value_sol(sol_usd, |token| view.price(token));
        let cap = total_value * params.dex_max_single_position_pct / 100.0;
        if size_sol > cap {
            size_sol = cap;
        }
        if size_sol < params.dex_min_viable_position_sol {
            debug!(token = %signal.token_address, size_sol, "size below viable minimum — skipped");
            continue;
        }

        // 13. Entry slippage.
        if signal.price_usd <= 0.0 {
            continue;
        }
        let position_usd = size_sol * sol_usd;
        let slip = slippage_fraction(params.dex_slippage_model, position_usd, signal.liquidity_usd);
        let entry_price = signal.price_usd * (1.0 + slip);
        let token_amount = position_usd / entry_price;
        if !(token_amount.is_finite() && token_amount > 0.0) {
            continue;
        }

        // 14. Atomic commit, guarded so the balance can never go negative.
        let total_cost = size_sol + params.dex_gas_fee_sol;
        if total_cost > state.dex.paper_balance_sol {
            state.log_event(
                "warn",
                "dex_entry_rejected",
                format!("{}: insufficient paper balance", signal.symbol),
            );
            continue;
        }

        state.dex.positions.insert(
            signal.token_address.clone(),
            DexPosition {
                token_address: signal.token_address.clone(),
                symbol: signal.symbol.clone(),
                entry_price,
                entry_sol: size_sol,
                entry_time: now,
                token_amount,
                peak_price: entry_price,
                entry_momentum: signal.momentum_score,
                entry_liquidity: signal.liquidity_usd,
                tier,
                missed_scans: 0,
            },
        );
        state.dex.paper_balance_sol -= total_cost;
        *tier_counts.entry(tier).or_insert(0) += 1;

        info!(
            token = %signal.token_address,
            symbol = %signal.symbol,
            tier = %tier,
            size_sol,
            entry_price,
            momentum = signal.momentum_score,
            "DEX position opened"
        );
        state.log_event(
            "info",
            "dex_entry",
            format!("{}: {tier} tier, {size_sol:.4} SOL at {entry_price:.8}", signal.symbol),
        );
        providers.alerts.send(AlertEvent::TradeEntry {
            symbol: signal.symbol.clone(),
            venue: "dex".to_string(),
            notional: position_usd,
            reason: format!("momentum {:.0}, tier {tier}", signal.momentum_score),
        });
    }
}

// ---------------------------------------------------------------------------
// Portfolio snapshot & drawdown guard
// ---------------------------------------------------------------------------

/// Append one equity-curve point and drive the drawdown pause flag.
pub fn record_snapshot(state: &mut AgentState, view: &ScanView, sol_usd: f64, now: DateTime<Utc>) {
    let position_value: f64 = state
        .dex
        .positions
        .values()
        .map(|p| {
            let price = view.price(&p.token_address).unwrap_or(p.entry_price);
            p.token_amount * price / sol_usd
        })
        .sum();
    let total_value = state.dex.paper_balance_sol + position_value;

    state.dex.portfolio_history.push(PortfolioSnapshot {
        timestamp: now,
        total_value_sol: total_value,
        paper_balance_sol: state.dex.paper_balance_sol,
        position_value_sol: position_value,
        realized_pnl_sol: state.dex.realized_pnl_sol,
    });
    while state.dex.portfolio_history.len() > crate::state::MAX_PORTFOLIO_HISTORY {
        state.dex.portfolio_history.remove(0);
    }

    if total_value >= state.dex.peak_value_sol {
        state.dex.peak_value_sol = total_value;
        if state.dex.drawdown_paused {
            state.dex.drawdown_paused = false;
            state.log_event(
                "info",
                "drawdown_pause_lifted",
                format!("new high water mark {total_value:.4} SOL"),
            );
        }
    } else if state.dex.peak_value_sol > 0.0 {
        let drawdown_pct =
            (state.dex.peak_value_sol - total_value) / state.dex.peak_value_sol * 100.0;
        if drawdown_pct >= state.config.dex.dex_max_drawdown_pct && !state.dex.drawdown_paused {
            state.dex.drawdown_paused = true;
            state.log_event(
                "warn",
                "drawdown_pause",
                format!(
                    "drawdown {drawdown_pct:.1}% from peak {:.4} SOL — new entries paused",
                    state.dex.peak_value_sol
                ),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Engine pass
// ---------------------------------------------------------------------------

/// One full DEX pass over the current signal list: exits, entries, snapshot.
pub async fn run_engine(
    state: &mut AgentState,
    providers: &Providers,
    sol_usd: f64,
    now: DateTime<Utc>,
) {
    let view = ScanView::from_signals(&state.dex.signals);
    run_exits(state, providers.alerts.as_ref(), &view, now);
    run_entries(state, providers, &view, sol_usd, now).await;
    record_snapshot(state, &view, sol_usd, now);
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::notifier::test_support::RecordingSink;
    use crate::types::LegitimacySignals;

    const SOL_USD: f64 = 200.0;

    fn signal(token: &str, price: f64, momentum: f64, tier: DexTier) -> DexMomentumSignal {
        DexMomentumSignal {
            token_address: token.to_string(),
            pair_address: format!("{token}-pair"),
            symbol: token.to_uppercase(),
            price_usd: price,
            change_5m: 10.0,
            change_1h: 8.0,
            change_6h: 20.0,
            change_24h: 60.0,
            volume_5m: 1_000.0,
            volume_1h: 5_000.0,
            volume_6h: 20_000.0,
            volume_24h: 60_000.0,
            liquidity_usd: 50_000.0,
            market_cap: 400_000.0,
            age_hours: 4.0,
            age_days: 4.0 / 24.0,
            buy_ratio_1h: 0.6,
            buy_ratio_24h: 0.58,
            txns_24h: 900,
            momentum_score: momentum,
            legitimacy_score: 80.0,
            legitimacy: LegitimacySignals::default(),
            tier,
        }
    }

    fn position(token: &str, entry_price: f64, entry_sol: f64, tier: DexTier) -> DexPosition {
        DexPosition {
            token_address: token.to_string(),
            symbol: token.to_uppercase(),
            entry_price,
            entry_sol,
            entry_time: Utc::now() - Duration::hours(1),
            token_amount: entry_sol * SOL_USD / entry_price,
            peak_price: entry_price,
            entry_momentum: 70.0,
            entry_liquidity: 50_000.0,
            tier,
            missed_scans: 0,
        }
    }

    fn state_with_no_slippage() -> AgentState {
        let mut state = AgentState::default();
        state.config.dex.dex_slippage_model = crate::types::SlippageModel::None;
        state.config.dex.dex_gas_fee_sol = 0.0;
        state
    }

    #[test]
    fn stop_loss_exit_appends_ledger_and_deletes_position() {
        let mut state = state_with_no_slippage();
        let sink = RecordingSink::default();
        state
            .dex
            .positions
            .insert("tok".into(), position("tok", 0.0010, 0.1, DexTier::Lottery));

        // Price down 30 %: beyond the lottery stop of 20 %.
        let view = ScanView::from_signals(&[signal("tok", 0.0007, 70.0, DexTier::Lottery)]);
        let closed = run_exits(&mut state, &sink, &view, Utc::now());

        assert_eq!(closed, vec!["tok".to_string()]);
        assert_eq!(state.dex.trade_history.len(), 1);
        assert!(state.dex.positions.is_empty());
        let record = &state.dex.trade_history[0];
        assert_eq!(record.exit_reason, DexExitReason::StopLoss);
        assert!((record.pnl_pct + 30.0).abs() < 1e-6);
        // Cooldown recorded for a stop-loss exit (P8).
        assert!(state.dex.stop_loss_cooldowns.contains_key("tok"));
        // Balance credited with entry minus loss, never negative (P1).
        assert!(state.dex.paper_balance_sol >= 0.0);
    }

    #[test]
    fn trailing_stop_requires_meaningful_peak() {
        let mut state = state_with_no_slippage();
        // Force the activation threshold below the 1.05x guard so the guard
        // is the binding constraint.
        state.config.dex.dex_trailing_stop_activation_pct = 3.0;
        let sink = RecordingSink::default();

        // Peak gain 4 % clears the 3 % activation, but the peak ratio stays
        // under 1.05: the trailing stop must not arm.
        let mut artifact = position("tok", 0.0010, 0.1, DexTier::Established);
        artifact.peak_price = 0.00104;
        state.dex.positions.insert("tok".into(), artifact);

        // 18 % below the recorded peak: a trailing exit would fire if armed,
        // but P&L (-15 %) hits the fixed stop instead.
        let view = ScanView::from_signals(&[signal("tok", 0.00085, 70.0, DexTier::Established)]);
        let closed = run_exits(&mut state, &sink, &view, Utc::now());

        assert_eq!(closed.len(), 1);
        assert_eq!(
            state.dex.trade_history[0].exit_reason,
            DexExitReason::StopLoss
        );
    }

    #[test]
    fn trailing_stop_fires_after_real_peak() {
        let mut state = state_with_no_slippage();
        let sink = RecordingSink::default();

        let mut winner = position("tok", 0.0010, 0.1, DexTier::Established);
        winner.peak_price = 0.0015; // +50 %, past 30 % activation and 1.05x
        state.dex.positions.insert("tok".into(), winner);

        // 20 % off the peak: beyond the 15 % trailing distance, still +20 %
        // over entry so no stop loss.
        let view = ScanView::from_signals(&[signal("tok", 0.0012, 70.0, DexTier::Established)]);
        let closed = run_exits(&mut state, &sink, &view, Utc::now());

        assert_eq!(closed.len(), 1);
        let record = &state.dex.trade_history[0];
        assert_eq!(record.exit_reason, DexExitReason::TrailingStop);
        assert!(record.pnl_sol > 0.0);
        // Trailing exits also set a cooldown (P8).
        assert!(state.dex.stop_loss_cooldowns.contains_key("tok"));
    }

    #[test]
    fn missing_signal_exits_only_red_positions_after_threshold() {
        let mut state = state_with_no_slippage();
        let sink = RecordingSink::default();
        let mut pos = position("tok", 0.0010, 0.1, DexTier::Lottery);
        pos.missed_scans = 9;
        state.dex.positions.insert("tok".into(), pos);

        // Token absent from scan: 10th miss, P&L flat (price = entry) -> exit.
        let view = ScanView::from_signals(&[]);
        let closed = run_exits(&mut state, &sink, &view, Utc::now());
        assert_eq!(closed.len(), 1);
        assert_eq!(
            state.dex.trade_history[0].exit_reason,
            DexExitReason::LostMomentum
        );
    }

    #[test]
    fn momentum_decay_only_exits_red_positions() {
        let mut state = state_with_no_slippage();
        let sink = RecordingSink::default();

        // Green position with collapsed momentum: hold.
        state
            .dex
            .positions
            .insert("green".into(), position("green", 0.0010, 0.1, DexTier::Lottery));
        // Red position with collapsed momentum: exit.
        state
            .dex
            .positions
            .insert("red".into(), position("red", 0.0010, 0.1, DexTier::Lottery));

        let view = ScanView::from_signals(&[
            signal("green", 0.0011, 20.0, DexTier::Lottery), // +10 %, momentum 20 < 0.4*70
            signal("red", 0.00095, 20.0, DexTier::Lottery),  // -5 %, momentum 20 < 0.4*70
        ]);
        let closed = run_exits(&mut state, &sink, &view, Utc::now());

        assert_eq!(closed, vec!["red".to_string()]);
        assert!(state.dex.positions.contains_key("green"));
    }

    #[tokio::test]
    async fn s2_tier_sizing_uses_fixed_lottery_amount() {
        let state = state_with_no_slippage();
        assert_eq!(tier_size_sol(&state, DexTier::Lottery), Some(0.02));
        assert_eq!(tier_size_sol(&state, DexTier::Microspray), Some(0.01));
        // Established: 10 % of the 10 SOL balance, capped at 1 SOL.
        assert_eq!(tier_size_sol(&state, DexTier::Established), Some(1.0));
    }

    #[test]
    fn s3_circuit_breaker_arms_after_three_stop_losses() {
        let mut state = state_with_no_slippage();
        let sink = RecordingSink::default();
        let now = Utc::now();

        for i in 0..3 {
            let token = format!("tok{i}");
            state
                .dex
                .positions
                .insert(token.clone(), position(&token, 0.0010, 0.1, DexTier::Lottery));
            close_position(
                &mut state,
                &sink,
                &token,
                DexExitReason::StopLoss,
                0.0007,
                50_000.0,
                now,
            );
        }

        let until = state.dex.circuit_breaker_until.expect("breaker armed");
        let expected = now + Duration::hours(1);
        assert!((until - expected).num_seconds().abs() < 5);
    }

    #[tokio::test]
    async fn breaker_blocks_entries_until_early_clear() {
        let mut state = state_with_no_slippage();
        let now = Utc::now();
        state.dex.circuit_breaker_until = Some(now + Duration::hours(1));
        state.dex.circuit_breaker_since = Some(now - Duration::minutes(30));
        state.dex.signals = vec![signal("tok", 0.001, 70.0, DexTier::Lottery)];

        // Momentum 70 < re-entry minimum 75, no open positions: stays blocked.
        let providers = test_providers();
        let view = ScanView::from_signals(&state.dex.signals.clone());
        run_entries(&mut state, &providers, &view, SOL_USD, now).await;
        assert!(state.dex.positions.is_empty());
        assert!(state.dex.circuit_breaker_until.is_some());

        // A strong signal clears the breaker and the entry goes through.
        state.dex.signals = vec![signal("tok", 0.001, 90.0, DexTier::Lottery)];
        let view = ScanView::from_signals(&state.dex.signals.clone());
        run_entries(&mut state, &providers, &view, SOL_USD, now).await;
        assert!(state.dex.circuit_breaker_until.is_none());
        assert_eq!(state.dex.positions.len(), 1);
    }

    #[tokio::test]
    async fn breaker_min_cooldown_blocks_even_strong_signals() {
        let mut state = state_with_no_slippage();
        let now = Utc::now();
        state.dex.circuit_breaker_until = Some(now + Duration::hours(1));
        state.dex.circuit_breaker_since = Some(now - Duration::minutes(5));
        state.dex.signals = vec![signal("tok", 0.001, 95.0, DexTier::Lottery)];

        let providers = test_providers();
        let view = ScanView::from_signals(&state.dex.signals.clone());
        run_entries(&mut state, &providers, &view, SOL_USD, now).await;
        assert!(state.dex.positions.is_empty());
        assert!(state.dex.circuit_breaker_until.is_some());
    }

    #[tokio::test]
    async fn drawdown_pause_blocks_entries() {
        let mut state = state_with_no_slippage();
        state.dex.drawdown_paused = true;
        state.dex.signals = vec![signal("tok", 0.001, 90.0, DexTier::Lottery)];

        let providers = test_providers();
        let view = ScanView::from_signals(&state.dex.signals.clone());
        run_entries(&mut state, &providers, &view, SOL_USD, Utc::now()).await;
        assert!(state.dex.positions.is_empty());
    }

    #[test]
    fn s6_cooldown_clears_on_price_recovery() {
        let mut state = state_with_no_slippage();
        let now = Utc::now();
        state.dex.stop_loss_cooldowns.insert(
            "tok".into(),
            StopLossCooldown {
                exit_price: 0.0010,
                exit_time: now - Duration::minutes(2),
                fallback_expiry: now + Duration::hours(4),
            },
        );

        // +16 % over the exit price with default 15 % recovery: allowed.
        let recovered = signal("tok", 0.00116, 50.0, DexTier::Lottery);
        assert!(cooldown_allows(&mut state, &recovered, now));
        assert!(!state.dex.stop_loss_cooldowns.contains_key("tok"));
        assert!(state
            .logs
            .iter()
            .any(|l| l.event == "cooldown_cleared_price_recovery"));
    }

    #[test]
    fn cooldown_blocks_without_recovery_or_momentum() {
        let mut state = state_with_no_slippage();
        let now = Utc::now();
        state.dex.stop_loss_cooldowns.insert(
            "tok".into(),
            StopLossCooldown {
                exit_price: 0.0010,
                exit_time: now - Duration::minutes(2),
                fallback_expiry: now + Duration::hours(4),
            },
        );

        // +5 % only, momentum 50 < 75, not expired: blocked.
        let weak = signal("tok", 0.00105, 50.0, DexTier::Lottery);
        assert!(!cooldown_allows(&mut state, &weak, now));
        assert!(state.dex.stop_loss_cooldowns.contains_key("tok"));

        // Momentum path needs five minutes elapsed.
        let strong_but_fresh = signal("tok", 0.00105, 90.0, DexTier::Lottery);
        assert!(!cooldown_allows(&mut state, &strong_but_fresh, now));

        // After the fallback expiry, anything passes.
        let later = now + Duration::hours(5);
        assert!(cooldown_allows(&mut state, &weak, later));
    }

    #[tokio::test]
    async fn entry_commits_balance_and_respects_caps() {
        let mut state = state_with_no_slippage();
        state.config.dex.dex_gas_fee_sol = 0.001;
        state.dex.signals = vec![
            signal("a", 0.001, 90.0, DexTier::Lottery),
            signal("b", 0.002, 85.0, DexTier::Lottery),
            signal("c", 0.003, 80.0, DexTier::Lottery),
        ];

        let providers = test_providers();
        let view = ScanView::from_signals(&state.dex.signals.clone());
        run_entries(&mut state, &providers, &view, SOL_USD, Utc::now()).await;

        // Lottery tier cap is 2: only two of the three candidates entered.
        assert_eq!(state.dex.positions.len(), 2);
        // 10 - 2*(0.02 + 0.001 gas)
        assert!((state.dex.paper_balance_sol - (10.0 - 2.0 * 0.021)).abs() < 1e-9);
        for position in state.dex.positions.values() {
            assert!(position.token_amount > 0.0);
            assert!(position.entry_price > 0.0);
            assert!(position.peak_price >= position.entry_price);
        }
    }

    #[tokio::test]
    async fn concentration_cap_skips_dust_reductions() {
        let mut state = state_with_no_slippage();
        // Tiny book: 0.03 SOL total. Concentration cap 25 % = 0.0075 SOL,
        // below the 0.01 viable minimum -> skip, no mutation.
        state.dex.paper_balance_sol = 0.03;
        state.dex.peak_value_sol = 0.03;
        state.dex.signals = vec![signal("tok", 0.001, 90.0, DexTier::Lottery)];

        let providers = test_providers();
        let view = ScanView::from_signals(&state.dex.signals.clone());
        run_entries(&mut state, &providers, &view, SOL_USD, Utc::now()).await;

        assert!(state.dex.positions.is_empty());
        assert!((state.dex.paper_balance_sol - 0.03).abs() < 1e-12);
    }

    #[test]
    fn snapshot_drives_drawdown_pause_and_lift() {
        let mut state = state_with_no_slippage();
        let view = ScanView::from_signals(&[]);
        let now = Utc::now();

        // Establish the high-water mark.
        state.dex.paper_balance_sol = 10.0;
        record_snapshot(&mut state, &view, SOL_USD, now);
        assert!(!state.dex.drawdown_paused);

        // 35 % drawdown trips the 30 % guard.
        state.dex.paper_balance_sol = 6.5;
        record_snapshot(&mut state, &view, SOL_USD, now + Duration::minutes(1));
        assert!(state.dex.drawdown_paused);

        // New high clears it.
        state.dex.paper_balance_sol = 10.5;
        record_snapshot(&mut state, &view, SOL_USD, now + Duration::minutes(2));
        assert!(!state.dex.drawdown_paused);
        assert!(state.logs.iter().any(|l| l.event == "drawdown_pause_lifted"));
    }

    #[test]
    fn portfolio_history_is_capped() {
        let mut state = state_with_no_slippage();
        let view = ScanView::from_signals(&[]);
        let now = Utc::now();
        for i in 0..120 {
            record_snapshot(&mut state, &view, SOL_USD, now + Duration::seconds(i));
        }
        assert_eq!(
            state.dex.portfolio_history.len(),
            crate::state::MAX_PORTFOLIO_HISTORY
        );
    }

    #[test]
    fn liquidate_all_uses_manual_reason() {
        let mut state = state_with_no_slippage();
        let sink = RecordingSink::default();
        state
            .dex
            .positions
            .insert("a".into(), position("a", 0.001, 0.1, DexTier::Lottery));
        state
            .dex
            .positions
            .insert("b".into(), position("b", 0.002, 0.2, DexTier::Early));

        let view = ScanView::from_signals(&[]);
        let closed = liquidate_all(&mut state, &sink, &view, Utc::now());

        assert_eq!(closed, 2);
        assert!(state.dex.positions.is_empty());
        assert!(state
            .dex
            .trade_history
            .iter()
            .all(|t| t.exit_reason == DexExitReason::Manual));
    }

    // --- test provider bundle ------------------------------------------------

    fn test_providers() -> Providers {
        use crate::error::{AgentError, AgentResult};
        use crate::providers::*;
        use async_trait::async_trait;
        use std::sync::Arc;

        struct NoBroker;
        #[async_trait]
        impl Brokerage for NoBroker {
            async fn get_account(&self) -> AgentResult<Account> {
                Err(AgentError::InvariantViolation("unused".into()))
            }
            async fn get_positions(&self) -> AgentResult<Vec<crate::types::Position>> {
                Ok(vec![])
            }
            async fn get_clock(&self) -> AgentResult<MarketClock> {
                Err(AgentError::InvariantViolation("unused".into()))
            }
            async fn get_asset(&self, _s: &str) -> AgentResult<Option<AssetInfo>> {
                Ok(None)
            }
            async fn create_order(&self, _o: OrderRequest) -> AgentResult<serde_json::Value> {
                Err(AgentError::InvariantViolation("unused".into()))
            }
            async fn close_position(&self, _s: &str) -> AgentResult<()> {
                Ok(())
            }
        }

        struct NoMarket;
        #[async_trait]
        impl MarketData for NoMarket {
            async fn get_snapshot(&self, _s: &str) -> AgentResult<SymbolSnapshot> {
                Err(AgentError::InvariantViolation("unused".into()))
            }
            async fn get_crypto_snapshot(&self, _s: &str) -> AgentResult<SymbolSnapshot> {
                Err(AgentError::InvariantViolation("unused".into()))
            }
        }

        struct NoOptions;
        #[async_trait]
        impl OptionsData for NoOptions {
            async fn get_expirations(&self, _s: &str) -> AgentResult<Vec<chrono::NaiveDate>> {
                Ok(vec![])
            }
            async fn get_chain(
                &self,
                _s: &str,
                _e: chrono::NaiveDate,
            ) -> AgentResult<OptionChain> {
                Ok(OptionChain::default())
            }
            async fn get_option_snapshot(&self, _s: &str) -> AgentResult<OptionSnapshot> {
                Err(AgentError::InvariantViolation("unused".into()))
            }
        }

        struct NoScreener;
        #[async_trait]
        impl DexScreener for NoScreener {
            async fn latest_profiles(&self) -> AgentResult<Vec<DexPairInfo>> {
                Ok(vec![])
            }
            async fn latest_boosts(&self) -> AgentResult<Vec<DexPairInfo>> {
                Ok(vec![])
            }
            async fn top_boosts(&self) -> AgentResult<Vec<DexPairInfo>> {
                Ok(vec![])
            }
            async fn community_takeovers(&self) -> AgentResult<Vec<DexPairInfo>> {
                Ok(vec![])
            }
            async fn latest_ads(&self) -> AgentResult<Vec<DexPairInfo>> {
                Ok(vec![])
            }
            async fn search(&self, _q: &str) -> AgentResult<Vec<DexPairInfo>> {
                Ok(vec![])
            }
            async fn get_multiple_tokens(
                &self,
                _c: &str,
                _a: &[String],
            ) -> AgentResult<Vec<DexPairInfo>> {
                Ok(vec![])
            }
        }

        struct NoChart;
        #[async_trait]
        impl DexChart for NoChart {
            async fn ohlcv(
                &self,
                _t: &str,
                _i: u32,
                _l: u32,
            ) -> AgentResult<Option<Vec<Candle>>> {
                // Too-new token: no gate.
                Ok(None)
            }
        }

        struct NoLlm;
        #[async_trait]
        impl LlmProvider for NoLlm {
            async fn complete(&self, _r: CompletionRequest) -> AgentResult<Completion> {
                Err(AgentError::ProviderTransient {
                    provider: "llm".into(),
                    message: "unused".into(),
                })
            }
        }

        struct NoMacro;
        #[async_trait]
        impl MacroData for NoMacro {
            async fn fetch_indicators(&self) -> AgentResult<crate::state::IndicatorSnapshot> {
                Ok(crate::state::IndicatorSnapshot::default())
            }
        }

        struct NoSocial;
        #[async_trait]
        impl SocialData for NoSocial {
            async fn trending_symbols(&self, _l: usize) -> AgentResult<Vec<String>> {
                Ok(vec![])
            }
            async fn symbol_messages(
                &self,
                _s: &str,
                _l: usize,
            ) -> AgentResult<Vec<SocialMessage>> {
                Ok(vec![])
            }
            async fn hot_posts(&self, _g: &str, _l: usize) -> AgentResult<Vec<ForumPost>> {
                Ok(vec![])
            }
            async fn breaking_headlines(&self, _s: &str) -> AgentResult<Vec<String>> {
                Ok(vec![])
            }
        }

        Providers {
            brokerage: Arc::new(NoBroker),
            market_data: Arc::new(NoMarket),
            options: Arc::new(NoOptions),
            dex: Arc::new(NoScreener),
            chart: Arc::new(NoChart),
            llm: Arc::new(NoLlm),
            macro_data: Arc::new(NoMacro),
            social: Arc::new(NoSocial),
            alerts: Arc::new(crate::providers::notifier::TracingAlertSink),
        }
    }
}
