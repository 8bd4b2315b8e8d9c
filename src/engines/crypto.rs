// =============================================================================
// Crypto engine — 24/7 momentum entries with researched confirmation
// =============================================================================
//
// Exits first (fixed TP/SL on held crypto), then entries from the momentum
// signals: top two by momentum, each confirmed through the research cache
// (300 s TTL), sized with the stock formula under the crypto cap.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::providers::{with_deadline, Providers};
use crate::research::{self, CRYPTO_RESEARCH_TTL_SECS};
use crate::state::AgentState;
use crate::types::{AlertEvent, AssetClass, CrisisLevel, Position, PositionEntry, Signal, Verdict};

/// Momentum candidates evaluated per pass.
const MAX_CANDIDATES: usize = 2;
/// Hard ceiling on concurrent crypto positions.
const MAX_CONCURRENT: usize = 3;

/// Crypto signals eligible for entry, best momentum first.
pub fn select_candidates(state: &AgentState, held: &[String]) -> Vec<Signal> {
    let mut candidates: Vec<Signal> = state
        .signal_cache
        .iter()
        .filter(|s| s.is_crypto && s.sentiment > 0.0 && !held.iter().any(|h| h == &s.symbol))
        .cloned()
        .collect();
    candidates.sort_by(|a, b| {
        b.momentum_pct
            .unwrap_or(0.0)
            .partial_cmp(&a.momentum_pct.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(MAX_CANDIDATES);
    candidates
}

/// Concurrency limit: never more than min(configured symbols, 3).
pub fn max_concurrent(state: &AgentState) -> usize {
    state.config.crypto.crypto_symbols.len().min(MAX_CONCURRENT)
}

/// Run the crypto engine: exits, then entries.
pub async fn run(
    state: &mut AgentState,
    providers: &Providers,
    cash: f64,
    positions: &[Position],
    crisis_level: CrisisLevel,
    now: DateTime<Utc>,
) {
    // --- Exits --------------------------------------------------------------
    for position in positions {
        if position.asset_class != AssetClass::Crypto {
            continue;
        }
        let pl_pct = position.pl_pct();

        let reason = if pl_pct >= state.config.crypto.crypto_take_profit_pct {
            Some(format!("crypto take profit at {pl_pct:+.2}%"))
        } else if pl_pct <= -state.config.crypto.crypto_stop_loss_pct {
            Some(format!("crypto stop loss at {pl_pct:+.2}%"))
        } else {
            None
        };

        let Some(reason) = reason else { continue };

        match with_deadline(
            "brokerage",
            providers.brokerage.close_position(&position.symbol),
        )
        .await
        {
            Ok(()) => {
                info!(symbol = %position.symbol, pl_pct, reason = %reason, "crypto closed");
                state.log_event(
                    "info",
                    "crypto_closed",
                    format!("{}: {reason}", position.symbol),
                );
                state.position_entries.remove(&position.symbol);
                providers.alerts.send(AlertEvent::TradeExit {
                    symbol: position.symbol.clone(),
                    venue: "crypto".to_string(),
                    pnl_pct: pl_pct,
                    reason,
                });
            }
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "crypto close failed");
            }
        }
    }

    // --- Entries ------------------------------------------------------------
    let held: Vec<String> = positions
        .iter()
        .filter(|p| p.asset_class == AssetClass::Crypto)
        .map(|p| p.symbol.clone())
        .collect();

    if held.len() >= max_concurrent(state) {
        debug!(held = held.len(), "crypto concurrency cap reached");
        return;
    }

    let candidates = select_candidates(state, &held);
    let mut open_slots = max_concurrent(state) - held.len();

    for signal in candidates {
        if open_slots == 0 {
            break;
        }

        let research = research::research_signal(
            state,
            providers.llm.as_ref(),
            &signal,
            signal.price,
            CRYPTO_RESEARCH_TTL_SECS,
            now,
        )
        .await;

        let Some(research) = research else { continue };
        if research.verdict != Verdict::Buy
            || research.confidence < state.config.stock.min_analyst_confidence
        {
            debug!(symbol = %signal.symbol, verdict = %research.verdict, "crypto candidate rejected");
            continue;
        }

        let cap = state.config.crypto.crypto_max_position_value;
        let success = super::stock::execute_buy(
            state,
            providers.brokerage.as_ref(),
            providers.alerts.as_ref(),
            &signal.symbol,
            research.confidence,
            cash,
            true,
            cap,
            crisis_level,
            &research.reasoning,
        )
        .await;

        if success {
            state.position_entries.insert(
                signal.symbol.clone(),
                PositionEntry {
                    entry_time: now,
                    entry_price: signal.price.unwrap_or(0.0),
                    entry_sentiment: signal.weighted_sentiment,
                    entry_social_volume: signal.volume,
                    entry_sources: signal.sources.clone(),
                    reason: research.reasoning.clone(),
                    peak_price: signal.price.unwrap_or(0.0),
                    peak_sentiment: signal.weighted_sentiment,
                },
            );
            open_slots -= 1;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalSource;

    fn crypto_signal(symbol: &str, momentum: f64) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            source: SignalSource::CryptoMomentum,
            sentiment: if momentum >= 0.0 { 0.5 } else { -0.5 },
            weighted_sentiment: momentum / 10.0,
            volume: 1,
            timestamp: Utc::now(),
            reason: "test".into(),
            upvotes: None,
            momentum_pct: Some(momentum),
            is_crypto: true,
            price: Some(100.0),
            sources: vec![],
        }
    }

    #[test]
    fn candidates_sorted_by_momentum_capped_at_two() {
        let mut state = AgentState::default();
        state.signal_cache = vec![
            crypto_signal("BTC/USD", 4.0),
            crypto_signal("ETH/USD", 9.0),
            crypto_signal("SOL/USD", 6.0),
            crypto_signal("DOGE/USD", -8.0), // negative sentiment, excluded
        ];

        let candidates = select_candidates(&state, &[]);
        let symbols: Vec<&str> = candidates.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ETH/USD", "SOL/USD"]);
    }

    #[test]
    fn held_symbols_excluded() {
        let mut state = AgentState::default();
        state.signal_cache = vec![crypto_signal("BTC/USD", 5.0)];
        let candidates = select_candidates(&state, &["BTC/USD".to_string()]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn concurrency_cap_is_min_of_symbols_and_three() {
        let mut state = AgentState::default();
        state.config.crypto.crypto_symbols =
            vec!["BTC/USD".into(), "ETH/USD".into()];
        assert_eq!(max_concurrent(&state), 2);

        state.config.crypto.crypto_symbols = vec![
            "BTC/USD".into(),
            "ETH/USD".into(),
            "SOL/USD".into(),
            "AVAX/USD".into(),
        ];
        assert_eq!(max_concurrent(&state), 3);
    }
}
