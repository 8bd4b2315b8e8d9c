// =============================================================================
// Chart-analysis gate — OHLCV pattern scoring for DEX entries
// =============================================================================
//
// Fetches candles (5-minute bars for tokens under 3 h old, 15-minute
// otherwise) and distills patterns, indicators, and support/resistance into
// an entry score 0–100. The gate only ever *rejects* when it produced a
// score below the configured minimum: provider errors, missing data, and
// too-new tokens all mean "no gate".
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::providers::{Candle, DexChart};

/// Minimum candles required to run the analysis at all.
const MIN_CANDLES: usize = 10;
/// Candles fetched per gate evaluation.
const FETCH_LIMIT: u32 = 50;
/// Age below which the finer 5-minute interval is used.
const FINE_INTERVAL_MAX_AGE_HOURS: f64 = 3.0;
/// Lookback for support/resistance extraction.
const SR_LOOKBACK: usize = 20;

// ---------------------------------------------------------------------------
// Analysis model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartPattern {
    Accumulation,
    Consolidation,
    HigherLows,
    LowerHighs,
    VolumeSpike,
    DipRecovery,
    Overextended,
    SupportBounce,
    AccumulationBreakout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeProfile {
    Accumulation,
    Distribution,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeConfirmation {
    Confirmed,
    Diverging,
    Climax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumQuality {
    Fresh,
    Extended,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutQuality {
    Strong,
    Weak,
    Failed,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartRecommendation {
    StrongBuy,
    Buy,
    Wait,
    Avoid,
}

/// Full output of the chart gate for one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartAnalysis {
    pub patterns: Vec<ChartPattern>,
    pub trend: Trend,
    pub volatility: f64,
    pub volume_profile: VolumeProfile,
    pub volume_confirmation: VolumeConfirmation,
    pub rsi: f64,
    pub momentum_quality: MomentumQuality,
    pub breakout_quality: BreakoutQuality,
    pub support: f64,
    pub resistance: f64,
    pub entry_score: f64,
    pub recommendation: ChartRecommendation,
}

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// RSI over `period` candles (Wilder-less simple average variant).
fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() < 2 || period == 0 {
        return 50.0;
    }
    let start = closes.len().saturating_sub(period + 1);
    let window = &closes[start..];

    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses += -delta;
        }
    }
    if losses < f64::EPSILON {
        return 100.0;
    }
    let rs = gains / losses;
    100.0 - 100.0 / (1.0 + rs)
}

/// Stdev of close-to-close returns.
fn volatility(closes: &[f64]) -> f64 {
    if closes.len() < 3 {
        return 0.0;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    let m = mean(&returns);
    let variance =
        returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / (returns.len().max(1)) as f64;
    variance.sqrt()
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Pure candle analysis. `None` when there is not enough data to say
/// anything (callers must treat that as "no gate").
pub fn analyze_candles(candles: &[Candle]) -> Option<ChartAnalysis> {
    if candles.len() < MIN_CANDLES {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let last_close = *closes.last()?;

    // Trend: 5-candle average vs 15-candle average.
    let short = mean(&closes[closes.len().saturating_sub(5)..]);
    let long = mean(&closes[closes.len().saturating_sub(15)..]);
    let trend = if short > long * 1.02 {
        Trend::Up
    } else if short < long * 0.98 {
        Trend::Down
    } else {
        Trend::Sideways
    };

    let vol = volatility(&closes);
    let rsi_value = rsi(&closes, 14.min(closes.len() - 1));

    // Volume profile: where does the volume sit, up candles or down candles?
    let mut up_volume = 0.0;
    let mut down_volume = 0.0;
    for candle in candles {
        if candle.close >= candle.open {
            up_volume += candle.volume;
        } else {
            down_volume += candle.volume;
        }
    }
    let total_volume = up_volume + down_volume;
    let volume_profile = if total_volume <= 0.0 {
        VolumeProfile::Neutral
    } else if up_volume / total_volume > 0.6 {
        VolumeProfile::Accumulation
    } else if down_volume / total_volume > 0.6 {
        VolumeProfile::Distribution
    } else {
        VolumeProfile::Neutral
    };

    // Volume confirmation over the last three candles.
    let avg_volume = mean(&volumes);
    let recent_volume = mean(&volumes[volumes.len().saturating_sub(3)..]);
    let price_rising = closes[closes.len() - 1] > closes[closes.len().saturating_sub(4)];
    let volume_confirmation = if avg_volume > 0.0 && recent_volume > avg_volume * 3.0 {
        VolumeConfirmation::Climax
    } else if price_rising && recent_volume >= avg_volume {
        VolumeConfirmation::Confirmed
    } else {
        VolumeConfirmation::Diverging
    };

    // Momentum quality: gain over the last five candles, tempered by RSI.
    let five_back = closes[closes.len().saturating_sub(5)];
    let recent_gain_pct = if five_back > 0.0 {
        (last_close - five_back) / five_back * 100.0
    } else {
        0.0
    };
    let momentum_quality = if rsi_value > 80.0 || recent_gain_pct > 60.0 {
        MomentumQuality::Exhausted
    } else if recent_gain_pct > 20.0 {
        MomentumQuality::Extended
    } else {
        MomentumQuality::Fresh
    };

    // Support / resistance over the recent lookback.
    let lookback = &candles[candles.len().saturating_sub(SR_LOOKBACK)..];
    let support = lookback.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let resistance = lookback.iter().map(|c| c.high).fold(f64::MIN, f64::max);

    // Breakout quality: did the last candle clear the prior resistance?
    let prior_resistance = lookback[..lookback.len().saturating_sub(1)]
        .iter()
        .map(|c| c.high)
        .fold(f64::MIN, f64::max);
    let breakout_quality = if last_close > prior_resistance {
        if volume_confirmation == VolumeConfirmation::Confirmed {
            BreakoutQuality::Strong
        } else {
            BreakoutQuality::Weak
        }
    } else if candles.last()?.high > prior_resistance && last_close < prior_resistance {
        BreakoutQuality::Failed
    } else {
        BreakoutQuality::None
    };

    // Patterns.
    let mut patterns = Vec::new();
    if volume_profile == VolumeProfile::Accumulation && trend != Trend::Down {
        patterns.push(ChartPattern::Accumulation);
    }
    if vol < 0.01 && trend == Trend::Sideways {
        patterns.push(ChartPattern::Consolidation);
    }
    let lows: Vec<f64> = lookback.iter().map(|c| c.low).collect();
    if lows.len() >= 6 {
        let first_half = mean(&lows[..lows.len() / 2]);
        let second_half = mean(&lows[lows.len() / 2..]);
        if second_half > first_half * 1.02 {
            patterns.push(ChartPattern::HigherLows);
        }
    }
    let highs: Vec<f64> = lookback.iter().map(|c| c.high).collect();
    if highs.len() >= 6 {
        let first_half = mean(&highs[..highs.len() / 2]);
        let second_half = mean(&highs[highs.len() / 2..]);
        if second_half < first_half * 0.98 {
            patterns.push(ChartPattern::LowerHighs);
        }
    }
    if avg_volume > 0.0 && *volumes.last()? > avg_volume * 2.5 {
        patterns.push(ChartPattern::VolumeSpike);
    }
    let min_close = closes.iter().fold(f64::MAX, |a, &b| a.min(b));
    if min_close > 0.0 && last_close > min_close * 1.1 && trend == Trend::Up {
        patterns.push(ChartPattern::DipRecovery);
    }
    if recent_gain_pct > 80.0 {
        patterns.push(ChartPattern::Overextended);
    }
    if support > 0.0 && (last_close - support) / support < 0.05 && trend != Trend::Down {
        patterns.push(ChartPattern::SupportBounce);
    }
    if breakout_quality == BreakoutQuality::Strong
        && patterns.contains(&ChartPattern::Accumulation)
    {
        patterns.push(ChartPattern::AccumulationBreakout);
    }

    // Entry score: weighted sum of everything above.
    let mut score = 50.0f64;
    score += match trend {
        Trend::Up => 15.0,
        Trend::Down => -15.0,
        Trend::Sideways => 0.0,
    };
    score += match volume_confirmation {
        VolumeConfirmation::Confirmed => 10.0,
        VolumeConfirmation::Diverging => -5.0,
        VolumeConfirmation::Climax => -10.0,
    };
    score += if (40.0..=65.0).contains(&rsi_value) {
        10.0
    } else if rsi_value > 75.0 {
        -10.0
    } else if rsi_value < 30.0 {
        5.0
    } else {
        0.0
    };
    score += match momentum_quality {
        MomentumQuality::Fresh => 10.0,
        MomentumQuality::Extended => 0.0,
        MomentumQuality::Exhausted => -15.0,
    };
    for pattern in &patterns {
        score += match pattern {
            ChartPattern::AccumulationBreakout => 12.0,
            ChartPattern::Accumulation => 10.0,
            ChartPattern::HigherLows => 8.0,
            ChartPattern::SupportBounce => 8.0,
            ChartPattern::DipRecovery => 6.0,
            ChartPattern::VolumeSpike => 4.0,
            ChartPattern::Consolidation => 3.0,
            ChartPattern::LowerHighs => -8.0,
            ChartPattern::Overextended => -12.0,
        };
    }
    let entry_score = score.clamp(0.0, 100.0);

    let recommendation = if entry_score >= 70.0 {
        ChartRecommendation::StrongBuy
    } else if entry_score >= 50.0 {
        ChartRecommendation::Buy
    } else if entry_score >= 30.0 {
        ChartRecommendation::Wait
    } else {
        ChartRecommendation::Avoid
    };

    Some(ChartAnalysis {
        patterns,
        trend,
        volatility: vol,
        volume_profile,
        volume_confirmation,
        rsi: rsi_value,
        momentum_quality,
        breakout_quality,
        support,
        resistance,
        entry_score,
        recommendation,
    })
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Run the chart gate for one token. `None` always means "no gate": the
/// token is too new, the data is thin, or the provider failed.
pub async fn gate(
    chart: &dyn DexChart,
    token_address: &str,
    age_hours: f64,
) -> Option<ChartAnalysis> {
    let interval = if age_hours < FINE_INTERVAL_MAX_AGE_HOURS {
        5
    } else {
        15
    };

    match chart.ohlcv(token_address, interval, FETCH_LIMIT).await {
        Ok(Some(candles)) => {
            let analysis = analyze_candles(&candles);
            if analysis.is_none() {
                debug!(token = token_address, count = candles.len(), "too few candles — no gate");
            }
            analysis
        }
        Ok(None) => {
            debug!(token = token_address, "token too new for chart data — no gate");
            None
        }
        Err(e) => {
            warn!(token = token_address, error = %e, "chart provider failed — no gate");
            None
        }
    }
}
