// =============================================================================
// DEX performance metrics — ledger-derived statistics for the dashboard
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::state::DexBook;

/// Display cap for the profit factor when there are no losses.
const PROFIT_FACTOR_CAP: f64 = 999.0;

/// Aggregate performance snapshot computed from the trade ledger and the
/// portfolio history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DexMetrics {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    /// winRate * avgWin - (1 - winRate) * |avgLoss|
    pub expectancy: f64,
    pub profit_factor: f64,
    pub sharpe: f64,
    pub max_consecutive_losses: u32,
    pub current_loss_streak: u32,
    pub max_drawdown_pct: f64,
    pub max_drawdown_duration_secs: i64,
    pub current_drawdown_pct: f64,
    pub realized_pnl_sol: f64,
    pub peak_value_sol: f64,
    pub breaker_active: bool,
    pub drawdown_paused: bool,
}

/// Compute the full metrics block for one DEX book.
pub fn compute(book: &DexBook, now: chrono::DateTime<chrono::Utc>) -> DexMetrics {
    let trades = &book.trade_history;
    let total_trades = trades.len();

    let wins: Vec<f64> = trades.iter().filter(|t| t.pnl_sol > 0.0).map(|t| t.pnl_pct).collect();
    let losses: Vec<f64> = trades.iter().filter(|t| t.pnl_sol <= 0.0).map(|t| t.pnl_pct).collect();

    let win_rate = if total_trades > 0 {
        wins.len() as f64 / total_trades as f64
    } else {
        0.0
    };
    let avg_win_pct = if wins.is_empty() {
        0.0
    } else {
        wins.iter().sum::<f64>() / wins.len() as f64
    };
    let avg_loss_pct = if losses.is_empty() {
        0.0
    } else {
        losses.iter().sum::<f64>() / losses.len() as f64
    };

    let expectancy = win_rate * avg_win_pct - (1.0 - win_rate) * avg_loss_pct.abs();

    let gross_win_sol: f64 = trades.iter().filter(|t| t.pnl_sol > 0.0).map(|t| t.pnl_sol).sum();
    let gross_loss_sol: f64 = trades
        .iter()
        .filter(|t| t.pnl_sol < 0.0)
        .map(|t| t.pnl_sol.abs())
        .sum();
    let profit_factor = if gross_loss_sol > 0.0 {
        (gross_win_sol / gross_loss_sol).min(PROFIT_FACTOR_CAP)
    } else if gross_win_sol > 0.0 {
        PROFIT_FACTOR_CAP
    } else {
        0.0
    };

    // Sharpe over per-trade percentage returns.
    let sharpe = if total_trades >= 2 {
        let returns: Vec<f64> = trades.iter().map(|t| t.pnl_pct).collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        let stdev = variance.sqrt();
        if stdev > f64::EPSILON {
            mean / stdev
        } else {
            0.0
        }
    } else {
        0.0
    };

    // Longest losing run in the ledger.
    let mut max_consecutive_losses = 0u32;
    let mut run = 0u32;
    for trade in trades {
        if trade.pnl_sol <= 0.0 {
            run += 1;
            max_consecutive_losses = max_consecutive_losses.max(run);
        } else {
            run = 0;
        }
    }

    // Drawdown from the portfolio equity curve.
    let mut peak = f64::MIN;
    let mut peak_at: Option<chrono::DateTime<chrono::Utc>> = None;
    let mut max_drawdown_pct = 0.0f64;
    let mut max_drawdown_duration_secs = 0i64;
    for snapshot in &book.portfolio_history {
        if snapshot.total_value_sol > peak {
            peak = snapshot.total_value_sol;
            peak_at = Some(snapshot.timestamp);
        } else if peak > 0.0 {
            let dd = (peak - snapshot.total_value_sol) / peak * 100.0;
            if dd > max_drawdown_pct {
                max_drawdown_pct = dd;
            }
            if let Some(at) = peak_at {
                let duration = (snapshot.timestamp - at).num_seconds();
                max_drawdown_duration_secs = max_drawdown_duration_secs.max(duration);
            }
        }
    }

    let current_value = book
        .portfolio_history
        .last()
        .map(|s| s.total_value_sol)
        .unwrap_or(book.paper_balance_sol);
    let current_drawdown_pct = if book.peak_value_sol > 0.0 && current_value < book.peak_value_sol {
        (book.peak_value_sol - current_value) / book.peak_value_sol * 100.0
    } else {
        0.0
    };

    DexMetrics {
        total_trades,
        wins: wins.len(),
        losses: losses.len(),
        win_rate,
        avg_win_pct,
        avg_loss_pct,
        expectancy,
        profit_factor,
        sharpe,
        max_consecutive_losses: max_consecutive_losses.max(book.max_loss_streak),
        current_loss_streak: book.current_loss_streak,
        max_drawdown_pct,
        max_drawdown_duration_secs,
        current_drawdown_pct,
        realized_pnl_sol: book.realized_pnl_sol,
        peak_value_sol: book.peak_value_sol,
        breaker_active: book.circuit_breaker_until.map(|u| u > now).unwrap_or(false),
        drawdown_paused: book.drawdown_paused,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PortfolioSnapshot;
    use crate::types::{DexExitReason, DexTier, DexTradeRecord};
    use chrono::{Duration, Utc};

    fn trade(pnl_pct: f64, pnl_sol: f64) -> DexTradeRecord {
        DexTradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            token_address: "tok".into(),
            symbol: "TOK".into(),
            entry_price: 1.0,
            exit_price: 1.0 + pnl_pct / 100.0,
            entry_sol: 0.1,
            entry_time: Utc::now(),
            exit_time: Utc::now(),
            pnl_pct,
            pnl_sol,
            exit_reason: if pnl_sol >= 0.0 {
                DexExitReason::TrailingStop
            } else {
                DexExitReason::StopLoss
            },
            tier: DexTier::Lottery,
        }
    }

    #[test]
    fn empty_book_yields_zeroes() {
        let book = DexBook::new(10.0);
        let metrics = compute(&book, Utc::now());
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.profit_factor, 0.0);
    }

    #[test]
    fn win_rate_expectancy_and_profit_factor() {
        let mut book = DexBook::new(10.0);
        book.trade_history = vec![
            trade(20.0, 0.02),
            trade(10.0, 0.01),
            trade(-15.0, -0.015),
            trade(-5.0, -0.005),
        ];
        let metrics = compute(&book, Utc::now());

        assert_eq!(metrics.total_trades, 4);
        assert!((metrics.win_rate - 0.5).abs() < 1e-9);
        assert!((metrics.avg_win_pct - 15.0).abs() < 1e-9);
        assert!((metrics.avg_loss_pct + 10.0).abs() < 1e-9);
        // 0.5*15 - 0.5*10 = 2.5
        assert!((metrics.expectancy - 2.5).abs() < 1e-9);
        // 0.03 / 0.02 = 1.5
        assert!((metrics.profit_factor - 1.5).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_caps_with_no_losses() {
        let mut book = DexBook::new(10.0);
        book.trade_history = vec![trade(10.0, 0.01)];
        let metrics = compute(&book, Utc::now());
        assert_eq!(metrics.profit_factor, 999.0);
    }

    #[test]
    fn consecutive_loss_run_is_tracked() {
        let mut book = DexBook::new(10.0);
        book.trade_history = vec![
            trade(5.0, 0.005),
            trade(-5.0, -0.005),
            trade(-5.0, -0.005),
            trade(-5.0, -0.005),
            trade(5.0, 0.005),
            trade(-5.0, -0.005),
        ];
        let metrics = compute(&book, Utc::now());
        assert_eq!(metrics.max_consecutive_losses, 3);
    }

    #[test]
    fn drawdown_from_equity_curve() {
        let mut book = DexBook::new(10.0);
        let t0 = Utc::now() - Duration::hours(3);
        let points = [(t0, 10.0), (t0 + Duration::hours(1), 12.0),
            (t0 + Duration::hours(2), 9.0), (t0 + Duration::hours(3), 11.0)];
        for (timestamp, value) in points {
            book.portfolio_history.push(PortfolioSnapshot {
                timestamp,
                total_value_sol: value,
                paper_balance_sol: value,
                position_value_sol: 0.0,
                realized_pnl_sol: 0.0,
            });
        }
        book.peak_value_sol = 12.0;

        let metrics = compute(&book, Utc::now());
        // Peak 12 -> trough 9 = 25 % drawdown.
        assert!((metrics.max_drawdown_pct - 25.0).abs() < 1e-9);
        // Current value 11 vs peak 12.
        assert!((metrics.current_drawdown_pct - (1.0 / 12.0 * 100.0)).abs() < 1e-9);
        assert!(metrics.max_drawdown_duration_secs >= 3600);
    }
}
