// =============================================================================
// Crisis Monitor — macro indicator scoring and the trading governor
// =============================================================================
//
// Thirteen indicator checks, each tolerant of a missing value, summed into a
// score and mapped to a level 0–3. Level drives a position-size multiplier
// (1.0 / 0.5 / 0.0 / 0.0), blocks entries at 2+, and liquidates at 3.
// A manual override freezes automatic level changes until released.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::config::CrisisParams;
use crate::providers::{with_deadline, AlertSink, MacroData};
use crate::state::{AgentState, IndicatorSnapshot};
use crate::types::{AlertEvent, CrisisLevel};

/// Minimum gap between two alerts for the same level.
const ALERT_COOLDOWN_MINUTES: i64 = 5;

/// Warning-band weekly BTC drop (the critical band comes from config).
const BTC_WEEKLY_WARNING_PCT: f64 = -10.0;

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score the indicator snapshot against the configured thresholds. Returns
/// the total points and the human-readable list of triggered indicators.
pub fn score_indicators(ind: &IndicatorSnapshot, p: &CrisisParams) -> (u32, Vec<String>) {
    let mut score = 0u32;
    let mut triggered = Vec::new();

    let hit = |points: u32, label: String, score: &mut u32, out: &mut Vec<String>| {
        *score += points;
        out.push(label);
    };

    if let Some(vix) = ind.vix {
        if vix >= p.vix_critical {
            hit(3, format!("VIX critical at {vix:.1}"), &mut score, &mut triggered);
        } else if vix >= p.vix_high {
            hit(2, format!("VIX high at {vix:.1}"), &mut score, &mut triggered);
        } else if vix >= p.vix_elevated {
            hit(1, format!("VIX elevated at {vix:.1}"), &mut score, &mut triggered);
        }
    }

    if let Some(hy) = ind.hy_spread_bps {
        if hy >= p.hy_spread_critical {
            hit(2, format!("HY spread critical at {hy:.0} bps"), &mut score, &mut triggered);
        } else if hy >= p.hy_spread_warning {
            hit(1, format!("HY spread wide at {hy:.0} bps"), &mut score, &mut triggered);
        }
    }

    if let Some(btc) = ind.btc_weekly_pct {
        if btc <= p.btc_weekly_drop_pct {
            hit(2, format!("BTC weekly {btc:+.1}%"), &mut score, &mut triggered);
        } else if btc <= BTC_WEEKLY_WARNING_PCT {
            hit(1, format!("BTC weekly {btc:+.1}%"), &mut score, &mut triggered);
        }
    }

    if let Some(peg) = ind.usdt_peg {
        if peg < p.stablecoin_depeg_threshold {
            hit(2, format!("USDT depeg at {peg:.4}"), &mut score, &mut triggered);
        }
    }

    if let Some(ratio) = ind.gold_silver_ratio {
        if ratio < p.gold_silver_ratio_low {
            hit(2, format!("gold/silver ratio {ratio:.1}"), &mut score, &mut triggered);
        }
    }

    if let Some(breadth) = ind.stocks_above_200ma_pct {
        if breadth < p.stocks_above_200ma_critical {
            hit(2, format!("breadth {breadth:.0}% above 200dma"), &mut score, &mut triggered);
        } else if breadth < p.stocks_above_200ma_warning {
            hit(1, format!("breadth {breadth:.0}% above 200dma"), &mut score, &mut triggered);
        }
    }

    if let Some(curve) = ind.yield_curve_2s10s {
        if curve <= p.yield_curve_inversion_critical {
            hit(2, format!("2s10s inverted at {curve:+.2}"), &mut score, &mut triggered);
        } else if curve <= p.yield_curve_inversion_warning {
            hit(1, format!("2s10s flat at {curve:+.2}"), &mut score, &mut triggered);
        }
    }

    if let Some(ted) = ind.ted_spread {
        if ted >= p.ted_spread_critical {
            hit(2, format!("TED spread {ted:.2}"), &mut score, &mut triggered);
        } else if ted >= p.ted_spread_warning {
            hit(1, format!("TED spread {ted:.2}"), &mut score, &mut triggered);
        }
    }

    if let Some(dxy) = ind.dxy {
        if dxy >= p.dxy_critical {
            hit(2, format!("DXY {dxy:.1}"), &mut score, &mut triggered);
        } else if dxy >= p.dxy_elevated {
            hit(1, format!("DXY {dxy:.1}"), &mut score, &mut triggered);
        }
    }

    if let Some(jpy) = ind.usdjpy {
        if jpy <= p.usdjpy_critical {
            hit(2, format!("USD/JPY {jpy:.1}"), &mut score, &mut triggered);
        } else if jpy <= p.usdjpy_warning {
            hit(1, format!("USD/JPY {jpy:.1}"), &mut score, &mut triggered);
        }
    }

    if let Some(kre) = ind.kre_weekly_pct {
        if kre <= p.kre_weekly_critical {
            hit(2, format!("KRE weekly {kre:+.1}%"), &mut score, &mut triggered);
        } else if kre <= p.kre_weekly_warning {
            hit(1, format!("KRE weekly {kre:+.1}%"), &mut score, &mut triggered);
        }
    }

    if let Some(silver) = ind.silver_weekly_pct {
        if silver >= p.silver_weekly_critical {
            hit(2, format!("silver weekly {silver:+.1}%"), &mut score, &mut triggered);
        } else if silver >= p.silver_weekly_warning {
            hit(1, format!("silver weekly {silver:+.1}%"), &mut score, &mut triggered);
        }
    }

    if let Some(fed) = ind.fed_balance_sheet_weekly_pct {
        if fed.abs() >= p.fed_balance_sheet_weekly_critical {
            hit(2, format!("Fed balance sheet {fed:+.1}%/wk"), &mut score, &mut triggered);
        } else if fed.abs() >= p.fed_balance_sheet_weekly_warning {
            hit(1, format!("Fed balance sheet {fed:+.1}%/wk"), &mut score, &mut triggered);
        }
    }

    (score, triggered)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Fetch indicators, score, and update the governor state. Returns the level
/// trading engines must observe for the rest of this tick.
pub async fn run_crisis_check(
    state: &mut AgentState,
    macro_data: &dyn MacroData,
    alerts: &dyn AlertSink,
    now: DateTime<Utc>,
) -> CrisisLevel {
    let indicators = match with_deadline("macro", macro_data.fetch_indicators()).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "indicator fetch failed — keeping previous crisis level");
            state.last_crisis_check = Some(now);
            return state.crisis.level;
        }
    };

    let (score, triggered) = score_indicators(&indicators, &state.config.crisis);
    let computed = CrisisLevel::from_score(score);

    state.crisis.indicators = indicators;
    state.crisis.triggered = triggered.clone();
    state.last_crisis_check = Some(now);

    if state.crisis.manual_override {
        info!(
            computed = computed.as_u8(),
            held = state.crisis.level.as_u8(),
            "crisis level manually overridden"
        );
        return state.crisis.level;
    }

    let previous = state.crisis.level;
    if computed != previous {
        state.crisis.level = computed;
        state.crisis.last_level_change = Some(now);
        state.log_event(
            "warn",
            "crisis_level_change",
            format!(
                "crisis level {} -> {} (score {score}): {}",
                previous.as_u8(),
                computed.as_u8(),
                triggered.join("; ")
            ),
        );

        // One alert per transition, rate-limited per target level.
        let key = computed.as_u8().to_string();
        let allowed = state
            .crisis
            .last_alerts
            .get(&key)
            .map(|at| now - *at >= Duration::minutes(ALERT_COOLDOWN_MINUTES))
            .unwrap_or(true);
        if allowed {
            state.crisis.last_alerts.insert(key, now);
            alerts.send(AlertEvent::CrisisLevelChange {
                from: previous,
                to: computed,
                triggered,
            });
        }
    }

    state.crisis.level
}
