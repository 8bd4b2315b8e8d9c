// =============================================================================
// Options engine — contract selection and fixed-percentage exits
// =============================================================================
//
// Selection walks expiration -> chain -> per-contract snapshots, rejecting
// anything outside the delta band or with a spread wider than 10 %. Entries
// are limit buys at the mid. Exits are fixed TP/SL percentages against the
// average entry price.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{AgentError, AgentResult};
use crate::providers::{
    with_deadline, AlertSink, Brokerage, OrderRequest, OrderSide, Providers, TimeInForce,
};
use crate::state::AgentState;
use crate::types::{AlertEvent, AssetClass, Position};

/// Per-contract snapshots fetched per selection pass.
const MAX_SNAPSHOT_PROBES: usize = 5;
/// Maximum tolerated relative bid/ask spread.
const MAX_SPREAD_FRACTION: f64 = 0.10;
/// Shares per contract.
const CONTRACT_MULTIPLIER: f64 = 100.0;

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Pick the expiration closest to the midpoint of the DTE window.
pub fn pick_expiration(
    expirations: &[chrono::NaiveDate],
    today: chrono::NaiveDate,
    min_dte: i64,
    max_dte: i64,
) -> Option<chrono::NaiveDate> {
    let target_dte = (min_dte + max_dte) as f64 / 2.0;
    expirations
        .iter()
        .filter(|exp| {
            let dte = (**exp - today).num_days();
            dte >= min_dte && dte <= max_dte
        })
        .min_by(|a, b| {
            let da = ((**a - today).num_days() as f64 - target_dte).abs();
            let db = ((**b - today).num_days() as f64 - target_dte).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .copied()
}

/// Target strike biased away from the money by the delta band midpoint.
pub fn target_strike(underlying: f64, min_delta: f64, max_delta: f64, bullish: bool) -> f64 {
    let mid_delta = (min_delta + max_delta) / 2.0;
    let bias = (1.0 - mid_delta) * 0.1;
    if bullish {
        underlying * (1.0 + bias)
    } else {
        underlying * (1.0 - bias)
    }
}

/// Attempt one options entry for (symbol, direction). A `false` return means
/// no contract qualified; errors are provider failures.
pub async fn try_enter(
    state: &mut AgentState,
    providers: &Providers,
    symbol: &str,
    bullish: bool,
    equity: f64,
) -> AgentResult<bool> {
    let cfg = state.config.options.clone();
    let today = Utc::now().date_naive();

    let expirations =
        with_deadline("options", providers.options.get_expirations(symbol)).await?;
    let Some(expiration) = pick_expiration(
        &expirations,
        today,
        cfg.options_min_dte,
        cfg.options_max_dte,
    ) else {
        debug!(symbol, "no expiration inside the DTE window");
        return Ok(false);
    };

    let chain = with_deadline("options", providers.options.get_chain(symbol, expiration)).await?;
    let contracts = if bullish { &chain.calls } else { &chain.puts };
    if contracts.is_empty() {
        return Ok(false);
    }

    let underlying = with_deadline("market_data", providers.market_data.get_snapshot(symbol))
        .await?
        .latest_price;
    if underlying <= 0.0 {
        return Err(AgentError::InvariantViolation(format!(
            "non-positive underlying price for {symbol}"
        )));
    }

    let target = target_strike(
        underlying,
        cfg.options_min_delta,
        cfg.options_max_delta,
        bullish,
    );
    let mut sorted: Vec<_> = contracts.iter().collect();
    sorted.sort_by(|a, b| {
        (a.strike - target)
            .abs()
            .partial_cmp(&(b.strike - target).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for contract in sorted.into_iter().take(MAX_SNAPSHOT_PROBES) {
        let snapshot = match with_deadline(
            "options",
            providers.options.get_option_snapshot(&contract.symbol),
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(contract = %contract.symbol, error = %e, "option snapshot failed");
                continue;
            }
        };

        let Some(delta) = snapshot.delta else { continue };
        let abs_delta = delta.abs();
        if abs_delta < cfg.options_min_delta || abs_delta > cfg.options_max_delta {
            continue;
        }
        if snapshot.bid <= 0.0 || snapshot.ask <= 0.0 {
            continue;
        }
        if (snapshot.ask - snapshot.bid) / snapshot.ask > MAX_SPREAD_FRACTION {
            continue;
        }

        let mid = (snapshot.bid + snapshot.ask) / 2.0;
        let budget = equity * cfg.options_max_pct_per_trade / 100.0;
        let max_contracts = (budget / (mid * CONTRACT_MULTIPLIER)).floor();
        if max_contracts < 1.0 {
            debug!(contract = %contract.symbol, mid, "budget below one contract");
            continue;
        }

        let limit_price = (mid * 100.0).round() / 100.0;
        let order = OrderRequest {
            symbol: contract.symbol.clone(),
            notional: None,
            qty: Some(max_contracts),
            side: OrderSide::Buy,
            order_type: "limit".to_string(),
            time_in_force: TimeInForce::Day,
            limit_price: Some(limit_price),
        };

        with_deadline("brokerage", providers.brokerage.create_order(order)).await?;
        info!(
            symbol,
            contract = %contract.symbol,
            qty = max_contracts,
            limit_price,
            "options entry placed"
        );
        state.log_event(
            "info",
            "options_entry",
            format!("{}: {} x{} @ {:.2}", symbol, contract.symbol, max_contracts, limit_price),
        );
        providers.alerts.send(AlertEvent::TradeEntry {
            symbol: contract.symbol.clone(),
            venue: "options".to_string(),
            notional: max_contracts * limit_price * CONTRACT_MULTIPLIER,
            reason: format!("options play on {symbol}"),
        });
        return Ok(true);
    }

    Ok(false)
}

// ---------------------------------------------------------------------------
// Exits
// ---------------------------------------------------------------------------

/// Fixed TP/SL exits for every `us_option` position.
pub async fn run_exits(
    state: &mut AgentState,
    brokerage: &dyn Brokerage,
    alerts: &dyn AlertSink,
    positions: &[Position],
    _now: DateTime<Utc>,
) {
    for position in positions {
        if position.asset_class != AssetClass::UsOption {
            continue;
        }
        if position.avg_entry_price <= 0.0 {
            continue;
        }

        let pl_pct =
            (position.current_price - position.avg_entry_price) / position.avg_entry_price * 100.0;

        let reason = if pl_pct >= state.config.options.options_take_profit_pct {
            Some(format!("options take profit at {pl_pct:+.1}%"))
        } else if pl_pct <= -state.config.options.options_stop_loss_pct {
            Some(format!("options stop loss at {pl_pct:+.1}%"))
        } else {
            None
        };

        let Some(reason) = reason else { continue };

        match with_deadline("brokerage", brokerage.close_position(&position.symbol)).await {
            Ok(()) => {
                info!(symbol = %position.symbol, pl_pct, reason = %reason, "option closed");
                state.log_event(
                    "info",
                    "options_closed",
                    format!("{}: {reason}", position.symbol),
                );
                alerts.send(AlertEvent::TradeExit {
                    symbol: position.symbol.clone(),
                    venue: "options".to_string(),
                    pnl_pct: pl_pct,
                    reason,
                });
            }
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "option close failed");
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
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn expiration_nearest_midpoint_wins() {
        let today = date(2026, 8, 3);
        // Window 7..45, midpoint 26 days -> 2026-08-29.
        let expirations = vec![
            date(2026, 8, 7),  // 4 dte, outside
            date(2026, 8, 14), // 11 dte
            date(2026, 8, 28), // 25 dte, closest to mid
            date(2026, 9, 25), // 53 dte, outside
        ];
        let picked = pick_expiration(&expirations, today, 7, 45).unwrap();
        assert_eq!(picked, date(2026, 8, 28));
    }

    #[test]
    fn expiration_none_when_window_empty() {
        let today = date(2026, 8, 3);
        let expirations = vec![date(2026, 8, 4), date(2026, 12, 31)];
        assert!(pick_expiration(&expirations, today, 7, 45).is_none());
    }

    #[test]
    fn target_strike_biases_by_direction() {
        // Band 0.30..0.70 -> mid 0.50, bias 5 %.
        let call = target_strike(100.0, 0.30, 0.70, true);
        let put = target_strike(100.0, 0.30, 0.70, false);
        assert!((call - 105.0).abs() < 1e-9);
        assert!((put - 95.0).abs() < 1e-9);
    }
}
