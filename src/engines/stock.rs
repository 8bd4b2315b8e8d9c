// =============================================================================
// Stock engine — analyst-driven exits and entries for US equities
// =============================================================================
//
// Exit precedence per position: take profit (inclusive) -> stop loss ->
// staleness. Entries come from the research cache plus the batch analyst's
// recommendations, all funneled through the one buy-execution contract that
// owns pre-flight invariants and sizing.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::StaleParams;
use crate::providers::{
    with_deadline, AlertSink, Brokerage, OrderRequest, OrderSide, Providers, TimeInForce,
};
use crate::state::{AgentState, StalenessAnalysis};
use crate::types::{
    AlertEvent, AnalystReport, AssetClass, CrisisLevel, EntryQuality, Position, PositionEntry,
    RecommendedAction, Verdict,
};

/// Floor below which a computed order is not worth submitting.
const MIN_ORDER_USD: f64 = 10.0;
/// Tolerance above the configured cap before an order is rejected outright.
const MAX_VALUE_TOLERANCE: f64 = 1.01;
/// Entry candidates evaluated per analyst pass.
const MAX_CANDIDATES: usize = 3;
/// Confidence boost applied by a confirming Twitter headline.
const CONFIRM_BOOST: f64 = 1.15;
/// Confidence haircut applied by a contradicting headline.
const CONTRADICT_SCALE: f64 = 0.85;
/// Staleness score at which a position is considered stale.
const STALE_SCORE_THRESHOLD: f64 = 70.0;

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// The §sizing formula of the buy contract. `None` means the order must not
/// be submitted.
pub fn compute_position_usd(
    cash: f64,
    size_pct_of_cash: f64,
    confidence: f64,
    crisis_multiplier: f64,
    max_position_value: f64,
) -> Option<f64> {
    let size_pct = size_pct_of_cash.min(20.0);
    let position_usd = (cash * size_pct / 100.0 * confidence * crisis_multiplier)
        .min(max_position_value * crisis_multiplier);

    if !position_usd.is_finite() {
        return None;
    }
    if position_usd < MIN_ORDER_USD {
        return None;
    }
    if position_usd > max_position_value * MAX_VALUE_TOLERANCE {
        return None;
    }
    Some((position_usd * 100.0).round() / 100.0)
}

// ---------------------------------------------------------------------------
// Buy execution contract
// ---------------------------------------------------------------------------

/// Submit a notional market buy after the full pre-flight check. Any failed
/// invariant logs `buy_blocked` and returns false with no mutation.
#[allow(clippy::too_many_arguments)]
pub async fn execute_buy(
    state: &mut AgentState,
    brokerage: &dyn Brokerage,
    alerts: &dyn AlertSink,
    symbol: &str,
    confidence: f64,
    cash: f64,
    is_crypto: bool,
    max_position_value: f64,
    crisis_level: CrisisLevel,
    reason: &str,
) -> bool {
    let block = |state: &mut AgentState, why: String| {
        warn!(symbol, reason = %why, "buy blocked");
        state.log_event("warn", "buy_blocked", format!("{symbol}: {why}"));
        false
    };

    if symbol.trim().is_empty() {
        return block(state, "empty symbol".to_string());
    }
    if cash <= 0.0 {
        return block(state, format!("no cash available ({cash:.2})"));
    }
    if !confidence.is_finite() || confidence <= 0.0 || confidence > 1.0 {
        return block(state, format!("confidence out of range ({confidence})"));
    }
    if crisis_level >= CrisisLevel::Defensive && !state.crisis.manual_override {
        return block(
            state,
            format!("crisis level {} blocks entries", crisis_level.as_u8()),
        );
    }

    // Exchange allowlist guards non-crypto symbols against OTC pathologies.
    if !is_crypto {
        match with_deadline("brokerage", brokerage.get_asset(symbol)).await {
            Ok(Some(asset)) => {
                if !state
                    .config
                    .stock
                    .allowed_exchanges
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(&asset.exchange))
                {
                    return block(state, format!("exchange {} not allowed", asset.exchange));
                }
            }
            Ok(None) => return block(state, "unknown asset".to_string()),
            Err(e) => return block(state, format!("asset lookup failed: {e}")),
        }
    }

    let Some(position_usd) = compute_position_usd(
        cash,
        state.config.stock.position_size_pct_of_cash,
        confidence,
        crisis_level.size_multiplier(),
        max_position_value,
    ) else {
        return block(state, "size below floor or above cap".to_string());
    };

    let order = OrderRequest {
        symbol: symbol.to_string(),
        notional: Some(position_usd),
        qty: None,
        side: OrderSide::Buy,
        order_type: "market".to_string(),
        time_in_force: if is_crypto {
            TimeInForce::Gtc
        } else {
            TimeInForce::Day
        },
        limit_price: None,
    };

    match with_deadline("brokerage", brokerage.create_order(order)).await {
        Ok(_) => {
            info!(symbol, notional = position_usd, confidence, "buy executed");
            state.log_event(
                "info",
                "buy_executed",
                format!("{symbol}: ${position_usd:.2} ({reason})"),
            );
            alerts.send(AlertEvent::TradeEntry {
                symbol: symbol.to_string(),
                venue: if is_crypto { "crypto" } else { "stock" }.to_string(),
                notional: position_usd,
                reason: reason.to_string(),
            });
            true
        }
        Err(e) => block(state, format!("order submission failed: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Staleness
// ---------------------------------------------------------------------------

/// Composite staleness score for an underperforming position: time (<=40) +
/// price action (<=30) + social-volume decay (<=30) + a no-mentions term
/// capped at whatever budget remains to 100. Never fires before the minimum
/// hold time.
pub fn analyze_staleness(
    entry: &PositionEntry,
    pl_pct: f64,
    current_social_volume: Option<u32>,
    last_mention: Option<DateTime<Utc>>,
    params: &StaleParams,
    now: DateTime<Utc>,
) -> StalenessAnalysis {
    let held_hours = (now - entry.entry_time).num_seconds() as f64 / 3600.0;
    let held_days = held_hours / 24.0;

    if held_hours < params.stale_min_hold_hours {
        return StalenessAnalysis {
            score: 0.0,
            is_stale: false,
            time_component: 0.0,
            price_component: 0.0,
            volume_component: 0.0,
            no_mention_component: 0.0,
            timestamp: now,
        };
    }

    // Time: linear ramp between the mid and max hold horizons.
    let time_component = if held_days <= params.stale_mid_hold_days {
        0.0
    } else if held_days >= params.stale_max_hold_days {
        40.0
    } else {
        40.0 * (held_days - params.stale_mid_hold_days)
            / (params.stale_max_hold_days - params.stale_mid_hold_days)
    };

    // Price action: losses scale, a stagnant small gain past mid-hold adds 15.
    let price_component = if pl_pct < 0.0 {
        (pl_pct.abs() * 3.0).min(30.0)
    } else if pl_pct < params.stale_min_gain_pct && held_days > params.stale_mid_hold_days {
        15.0
    } else {
        0.0
    };

    // Social volume decay vs the volume seen at entry.
    let volume_component = match (current_social_volume, entry.entry_social_volume) {
        (Some(current), entry_vol) if entry_vol > 0 => {
            if (current as f64) <= params.stale_social_volume_decay * entry_vol as f64 {
                30.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    // No mentions at all for the configured window; capped at the budget
    // remaining to 100.
    let base = time_component + price_component + volume_component;
    let no_mention_component = match last_mention {
        Some(at) if (now - at).num_seconds() as f64 / 3600.0 >= params.stale_no_mention_hours => {
            (100.0 - base).clamp(0.0, 15.0)
        }
        None if held_hours >= params.stale_no_mention_hours => (100.0 - base).clamp(0.0, 15.0),
        _ => 0.0,
    };

    let score = base + no_mention_component;
    let is_stale = score >= STALE_SCORE_THRESHOLD
        || (held_days >= params.stale_max_hold_days && pl_pct < params.stale_min_gain_pct);

    StalenessAnalysis {
        score,
        is_stale,
        time_component,
        price_component,
        volume_component,
        no_mention_component,
        timestamp: now,
    }
}

// ---------------------------------------------------------------------------
// Exit phase
// ---------------------------------------------------------------------------

/// Evaluate every non-option position for exit. Returns the closed symbols.
pub async fn run_exits(
    state: &mut AgentState,
    brokerage: &dyn Brokerage,
    alerts: &dyn AlertSink,
    positions: &[Position],
    crisis_level: CrisisLevel,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut closed = Vec::new();

    for position in positions {
        if position.asset_class == AssetClass::UsOption {
            continue;
        }
        let pl_pct = position.pl_pct();

        // Level 1 tightens the stop.
        let stop_loss_pct = if crisis_level == CrisisLevel::Caution {
            state
                .config
                .stock
                .stop_loss_pct
                .min(state.config.crisis.crisis_level1_stop_loss_pct)
        } else {
            state.config.stock.stop_loss_pct
        };

        let reason = if pl_pct >= state.config.stock.take_profit_pct {
            Some(format!("take profit at {pl_pct:+.2}%"))
        } else if pl_pct <= -stop_loss_pct {
            Some(format!("stop loss at {pl_pct:+.2}%"))
        } else if state.config.stale.stale_position_enabled {
            match state.position_entries.get(&position.symbol) {
                Some(entry) => {
                    let analysis = analyze_staleness(
                        entry,
                        pl_pct,
                        state.latest_social_volume(&position.symbol),
                        state.last_mention(&position.symbol),
                        &state.config.stale,
                        now,
                    );
                    let stale = analysis.is_stale;
                    let score = analysis.score;
                    state.staleness.insert(position.symbol.clone(), analysis);
                    stale.then(|| format!("stale position (score {score:.0})"))
                }
                None => None,
            }
        } else {
            None
        };

        let Some(reason) = reason else { continue };

        match with_deadline("brokerage", brokerage.close_position(&position.symbol)).await {
            Ok(()) => {
                info!(symbol = %position.symbol, pl_pct, reason = %reason, "position closed");
                state.log_event(
                    "info",
                    "position_closed",
                    format!("{}: {reason}", position.symbol),
                );
                state.position_entries.remove(&position.symbol);
                state.staleness.remove(&position.symbol);
                alerts.send(AlertEvent::TradeExit {
                    symbol: position.symbol.clone(),
                    venue: "stock".to_string(),
                    pnl_pct: pl_pct,
                    reason,
                });
                closed.push(position.symbol.clone());
            }
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "close failed — will retry next tick");
                state.log_event(
                    "error",
                    "close_failed",
                    format!("{}: {e}", position.symbol),
                );
            }
        }
    }

    closed
}

// ---------------------------------------------------------------------------
// Entry phase
// ---------------------------------------------------------------------------

/// Candidate drawn from the research cache.
#[derive(Debug, Clone)]
pub struct EntryCandidate {
    pub symbol: String,
    pub confidence: f64,
    pub entry_quality: EntryQuality,
    pub reasoning: String,
}

/// Build the ranked candidate list: BUY verdicts clearing the confidence
/// gate, minus held symbols, minus stocks when stocks are disabled.
pub fn select_candidates(state: &AgentState, held: &[String]) -> Vec<EntryCandidate> {
    let mut candidates: Vec<EntryCandidate> = state
        .signal_research
        .iter()
        .filter(|(symbol, research)| {
            research.verdict == Verdict::Buy
                && research.confidence >= state.config.stock.min_analyst_confidence
                && !held.iter().any(|h| h == *symbol)
                && !symbol.contains('/')
                && state.config.stock.stocks_enabled
        })
        .map(|(symbol, research)| EntryCandidate {
            symbol: symbol.clone(),
            confidence: research.confidence,
            entry_quality: research.entry_quality,
            reasoning: research.reasoning.clone(),
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(MAX_CANDIDATES);
    candidates
}

/// Apply the cached Twitter confirmation to a candidate's confidence.
/// Confirming boosts by 15 % (never above 1.0); contradicting scales down.
pub fn apply_twitter_confirmation(state: &AgentState, symbol: &str, confidence: f64) -> f64 {
    if !state.config.llm.twitter_confirmation_enabled {
        return confidence;
    }
    match state.twitter_confirmations.get(symbol) {
        Some(confirmation) if confirmation.confirms => (confidence * CONFIRM_BOOST).min(1.0),
        Some(_) => confidence * CONTRADICT_SCALE,
        None => confidence,
    }
}

/// Run the entry phase: researched candidates first, then the batch
/// analyst's recommendations.
#[allow(clippy::too_many_arguments)]
pub async fn run_entries(
    state: &mut AgentState,
    providers: &Providers,
    cash: f64,
    equity: f64,
    positions: &[Position],
    report: Option<&AnalystReport>,
    crisis_level: CrisisLevel,
    now: DateTime<Utc>,
) {
    if positions.len() >= state.config.stock.max_positions {
        state.log_event(
            "info",
            "buy_blocked",
            format!(
                "position cap reached ({}/{})",
                positions.len(),
                state.config.stock.max_positions
            ),
        );
        return;
    }
    if state.signal_cache.is_empty() {
        return;
    }

    let held: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
    let candidates = select_candidates(state, &held);
    let mut open_slots = state.config.stock.max_positions - positions.len();
    let mut entered: Vec<String> = Vec::new();

    for candidate in &candidates {
        if open_slots == 0 {
            break;
        }

        let confidence = apply_twitter_confirmation(state, &candidate.symbol, candidate.confidence);
        if confidence < state.config.stock.min_analyst_confidence {
            debug!(
                symbol = %candidate.symbol,
                confidence,
                "candidate dropped after confirmation adjustment"
            );
            continue;
        }

        // Options attempt is non-blocking: a failure never cancels the
        // share entry.
        if state.config.options.options_enabled
            && confidence >= state.config.options.options_min_confidence
            && candidate.entry_quality == EntryQuality::Excellent
        {
            if let Err(e) = super::options::try_enter(
                state,
                providers,
                &candidate.symbol,
                true,
                equity,
            )
            .await
            {
                warn!(symbol = %candidate.symbol, error = %e, "options entry failed — continuing with shares");
            }
        }

        let max_value = state.config.stock.max_position_value;
        let success = execute_buy(
            state,
            providers.brokerage.as_ref(),
            providers.alerts.as_ref(),
            &candidate.symbol,
            confidence,
            cash,
            false,
            max_value,
            crisis_level,
            &candidate.reasoning,
        )
        .await;

        if success {
            let price = with_deadline(
                "market_data",
                providers.market_data.get_snapshot(&candidate.symbol),
            )
            .await
            .map(|s| s.latest_price)
            .unwrap_or(0.0);

            let signal = state
                .signal_cache
                .iter()
                .find(|s| s.symbol == candidate.symbol);
            state.position_entries.insert(
                candidate.symbol.clone(),
                PositionEntry {
                    entry_time: now,
                    entry_price: price,
                    entry_sentiment: signal.map(|s| s.weighted_sentiment).unwrap_or(0.0),
                    entry_social_volume: signal.map(|s| s.volume).unwrap_or(0),
                    entry_sources: signal.map(|s| s.sources.clone()).unwrap_or_default(),
                    reason: candidate.reasoning.clone(),
                    peak_price: price,
                    peak_sentiment: signal.map(|s| s.weighted_sentiment).unwrap_or(0.0),
                },
            );
            entered.push(candidate.symbol.clone());
            open_slots -= 1;
        }
    }

    // Batch analyst recommendations: SELLs gated by minimum hold, BUYs for
    // symbols the researched list did not already cover.
    if let Some(report) = report {
        for rec in &report.recommendations {
            match rec.action {
                RecommendedAction::Sell => {
                    let held_long_enough = state
                        .position_entries
                        .get(&rec.symbol)
                        .map(|entry| {
                            now - entry.entry_time
                                >= Duration::minutes(state.config.stock.llm_min_hold_minutes)
                        })
                        .unwrap_or(false);
                    if !held.iter().any(|h| h == &rec.symbol) || !held_long_enough {
                        continue;
                    }
                    match with_deadline(
                        "brokerage",
                        providers.brokerage.close_position(&rec.symbol),
                    )
                    .await
                    {
                        Ok(()) => {
                            info!(symbol = %rec.symbol, "analyst sell executed");
                            state.log_event(
                                "info",
                                "position_closed",
                                format!("{}: analyst sell — {}", rec.symbol, rec.reasoning),
                            );
                            state.position_entries.remove(&rec.symbol);
                        }
                        Err(e) => {
                            warn!(symbol = %rec.symbol, error = %e, "analyst sell failed");
                        }
                    }
                }
                RecommendedAction::Buy => {
                    if open_slots == 0
                        || held.iter().any(|h| h == &rec.symbol)
                        || entered.iter().any(|e| e == &rec.symbol)
                        || candidates.iter().any(|c| c.symbol == rec.symbol)
                    {
                        continue;
                    }
                    let max_value = state.config.stock.max_position_value;
                    let success = execute_buy(
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
                                entry_sources: vec!["analyst".to_string()],
                                reason: rec.reasoning.clone(),
                                peak_price: 0.0,
                                peak_sentiment: 0.0,
                            },
                        );
                        entered.push(rec.symbol.clone());
                        open_slots -= 1;
                    }
                }
                RecommendedAction::Hold => {}
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalResearch;

    #[test]
    fn sizing_happy_path_matches_contract() {
        // cash $5000, 20 % size, confidence 0.8, no crisis, cap $1000:
        // min(5000*0.2*0.8, 1000) = 800.00
        let usd = compute_position_usd(5_000.0, 20.0, 0.8, 1.0, 1_000.0).unwrap();
        assert!((usd - 800.0).abs() < 1e-9);
    }

    #[test]
    fn sizing_caps_at_max_position_value() {
        let usd = compute_position_usd(50_000.0, 20.0, 1.0, 1.0, 1_000.0).unwrap();
        assert!((usd - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn sizing_honors_crisis_multiplier() {
        let usd = compute_position_usd(5_000.0, 20.0, 0.8, 0.5, 1_000.0).unwrap();
        assert!((usd - 400.0).abs() < 1e-9);
        // Multiplier zero kills the order entirely.
        assert!(compute_position_usd(5_000.0, 20.0, 0.8, 0.0, 1_000.0).is_none());
    }

    #[test]
    fn sizing_rejects_dust_orders() {
        assert!(compute_position_usd(40.0, 20.0, 0.5, 1.0, 1_000.0).is_none());
    }

    #[test]
    fn sizing_clamps_size_pct_to_twenty() {
        let usd = compute_position_usd(5_000.0, 80.0, 1.0, 1.0, 10_000.0).unwrap();
        assert!((usd - 1_000.0).abs() < 1e-9);
    }

    fn entry_at(hours_ago: f64, volume: u32) -> PositionEntry {
        PositionEntry {
            entry_time: Utc::now() - Duration::seconds((hours_ago * 3600.0) as i64),
            entry_price: 100.0,
            entry_sentiment: 0.5,
            entry_social_volume: volume,
            entry_sources: vec![],
            reason: "test".into(),
            peak_price: 100.0,
            peak_sentiment: 0.5,
        }
    }

    #[test]
    fn staleness_never_fires_before_min_hold() {
        let params = StaleParams::default();
        let analysis = analyze_staleness(
            &entry_at(2.0, 100),
            -20.0,
            Some(1),
            None,
            &params,
            Utc::now(),
        );
        assert_eq!(analysis.score, 0.0);
        assert!(!analysis.is_stale);
    }

    #[test]
    fn staleness_time_ramp_and_losses() {
        let params = StaleParams::default();
        // Held 7 days (max), down 8 %: time 40 + price 24 = 64; volume decay
        // (5 <= 0.3*100) adds 30 -> stale.
        let analysis = analyze_staleness(
            &entry_at(7.0 * 24.0, 100),
            -8.0,
            Some(5),
            Some(Utc::now()),
            &params,
            Utc::now(),
        );
        assert!((analysis.time_component - 40.0).abs() < 1e-9);
        assert!((analysis.price_component - 24.0).abs() < 1e-9);
        assert!((analysis.volume_component - 30.0).abs() < 1e-9);
        assert!(analysis.is_stale);
    }

    #[test]
    fn staleness_max_days_with_low_gain_is_stale() {
        let params = StaleParams::default();
        // Flat position at max hold days is stale via the hold-days rule even
        // with a modest score.
        let analysis = analyze_staleness(
            &entry_at(8.0 * 24.0, 100),
            0.5,
            Some(80),
            Some(Utc::now()),
            &params,
            Utc::now(),
        );
        assert!(analysis.is_stale);
    }

    #[test]
    fn no_mention_component_respects_remaining_budget() {
        let params = StaleParams::default();
        // Heavy base score: the no-mention term must not push past 100.
        let analysis = analyze_staleness(
            &entry_at(7.0 * 24.0, 100),
            -10.0,
            Some(0),
            Some(Utc::now() - Duration::hours(48)),
            &params,
            Utc::now(),
        );
        assert!(analysis.score <= 100.0);
        assert!(analysis.no_mention_component <= 15.0);
    }

    fn research(verdict: Verdict, confidence: f64) -> SignalResearch {
        SignalResearch {
            verdict,
            confidence,
            entry_quality: EntryQuality::Good,
            reasoning: "test".into(),
            red_flags: vec![],
            catalysts: vec![],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn candidate_selection_filters_and_ranks() {
        let mut state = AgentState::default();
        state
            .signal_research
            .insert("AAPL".into(), research(Verdict::Buy, 0.9));
        state
            .signal_research
            .insert("MSFT".into(), research(Verdict::Buy, 0.7));
        state
            .signal_research
            .insert("HELD".into(), research(Verdict::Buy, 0.95));
        state
            .signal_research
            .insert("SKIP".into(), research(Verdict::Skip, 0.99));
        state
            .signal_research
            .insert("LOW".into(), research(Verdict::Buy, 0.3));
        state
            .signal_research
            .insert("BTC/USD".into(), research(Verdict::Buy, 0.9));

        let candidates = select_candidates(&state, &["HELD".to_string()]);
        let symbols: Vec<&str> = candidates.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn twitter_confirmation_boost_caps_at_one() {
        let mut state = AgentState::default();
        state.config.llm.twitter_confirmation_enabled = true;
        state.twitter_confirmations.insert(
            "AAPL".into(),
            crate::state::TwitterConfirmation {
                confirms: true,
                headline: "beats earnings".into(),
                timestamp: Utc::now(),
            },
        );
        // 0.95 * 1.15 = 1.0925 -> capped at 1.0 (B4).
        assert!((apply_twitter_confirmation(&state, "AAPL", 0.95) - 1.0).abs() < 1e-12);

        state.twitter_confirmations.insert(
            "TSLA".into(),
            crate::state::TwitterConfirmation {
                confirms: false,
                headline: "recall announced".into(),
                timestamp: Utc::now(),
            },
        );
        assert!((apply_twitter_confirmation(&state, "TSLA", 0.8) - 0.68).abs() < 1e-12);

        // Disabled: no adjustment.
        state.config.llm.twitter_confirmation_enabled = false;
        assert_eq!(apply_twitter_confirmation(&state, "AAPL", 0.95), 0.95);
    }
}
