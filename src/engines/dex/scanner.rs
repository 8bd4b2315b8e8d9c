// =============================================================================
// DEX scanner — six-feed union, tier classification, momentum scoring
// =============================================================================
//
// Candidates are unioned from every discovery feed, deduped by base token,
// classified into the most conservative qualifying tier, and scored. The
// signal list is replaced wholesale each scan, sorted by momentum.
// =============================================================================

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::config::DexParams;
use crate::providers::{with_deadline, DexPairInfo, DexScreener};
use crate::types::{DexMomentumSignal, DexTier, LegitimacySignals};

/// Seed terms for the free-text search feed.
const SEARCH_TERMS: &[&str] = &["pump", "moon", "sol", "meme"];

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Legitimacy score 0–100 from website/social presence, boosts, and sells.
pub fn legitimacy_score(signals: &LegitimacySignals) -> f64 {
    let mut score = 0.0;
    if signals.has_website {
        score += 25.0;
    }
    if signals.has_twitter {
        score += 25.0;
    }
    if signals.has_telegram {
        score += 20.0;
    }
    score += (2.0 * signals.boost_count as f64).min(20.0);
    if signals.sells_exist {
        score += 10.0;
    }
    score
}

/// Composite momentum score. Component caps are fixed; the sum floors at 0.
pub fn momentum_score(pair: &DexPairInfo, tier: DexTier, legitimacy: f64, age_days: f64) -> f64 {
    // Price components.
    let price_score = (pair.change_24h / 4.0).clamp(0.0, 25.0);
    let recent_score = (pair.change_1h * 0.75).clamp(0.0, 15.0);

    // Consistency: 6 h and 1 h agreeing beats either alone.
    let consistency_score = if pair.change_6h > 0.0 && pair.change_1h > 0.0 {
        15.0
    } else if pair.change_6h > 0.0 && pair.change_1h > -5.0 {
        7.0
    } else {
        0.0
    };

    // Liquidity depth on a log scale anchored at $10k.
    let liq_score = if pair.liquidity_usd > 0.0 {
        ((pair.liquidity_usd / 10_000.0).log10() * 7.5).clamp(0.0, 15.0)
    } else {
        0.0
    };

    // Turnover vs depth.
    let volume_score = if pair.liquidity_usd > 0.0 {
        (pair.volume_24h / pair.liquidity_usd * 2.5).clamp(0.0, 10.0)
    } else {
        0.0
    };

    // Volume acceleration: 6 h running ahead of its 24 h pro-rata share.
    let vol_accel_score = if pair.volume_24h > 0.0 {
        let expected_6h = pair.volume_24h / 4.0;
        ((pair.volume_6h / expected_6h - 1.0) * 5.0).clamp(0.0, 5.0)
    } else {
        0.0
    };

    // Buy-pressure tilt across both windows.
    let ratio = |buys: u32, sells: u32| {
        let total = buys + sells;
        if total == 0 {
            0.5
        } else {
            buys as f64 / total as f64
        }
    };
    let tilt_24h = (ratio(pair.buys_24h, pair.sells_24h) - 0.5) * 2.0;
    let tilt_1h = (ratio(pair.buys_1h, pair.sells_1h) - 0.5) * 2.0;
    let buy_score = ((tilt_24h + tilt_1h) / 2.0 * 10.0).clamp(-10.0, 10.0);

    // Organic-flow heuristic: many small transactions per unit volume.
    let txns_24h = pair.buys_24h + pair.sells_24h;
    let organic_score = if pair.volume_24h > 0.0 {
        (txns_24h as f64 / (pair.volume_24h / 1_000.0)).clamp(0.0, 10.0)
    } else {
        0.0
    };

    // Volatility spike penalty: the 1 h move dwarfing its 6 h share smells
    // like a single-candle pump.
    let expected_1h = pair.change_6h.abs() / 6.0;
    let volatility_penalty = if expected_1h > 0.5 && pair.change_1h.abs() > 3.0 * expected_1h {
        -((pair.change_1h.abs() / expected_1h - 3.0) * 2.0).min(10.0)
    } else {
        0.0
    };

    // Tier-specific bonus.
    let tier_bonus = match tier {
        DexTier::Microspray | DexTier::Lottery | DexTier::Breakout => {
            (pair.change_5m / 4.0).clamp(-15.0, 15.0)
        }
        DexTier::Early => ((legitimacy - 50.0) / 50.0 * 15.0).clamp(-15.0, 15.0),
        DexTier::Established => (15.0 - (age_days - 7.0).abs() * 3.0).clamp(-15.0, 15.0),
    };

    let total = price_score
        + recent_score
        + consistency_score
        + liq_score
        + volume_score
        + vol_accel_score
        + buy_score
        + organic_score
        + volatility_penalty
        + tier_bonus;

    total.max(0.0)
}

// ---------------------------------------------------------------------------
// Tier classification
// ---------------------------------------------------------------------------

/// Classify a pair into its most conservative qualifying tier, or `None`
/// when no enabled tier accepts it.
pub fn classify_tier(pair: &DexPairInfo, params: &DexParams, now: DateTime<Utc>) -> Option<DexTier> {
    let created = pair.pair_created_at?;
    let age_minutes = (now - created).num_seconds() as f64 / 60.0;
    let age_hours = age_minutes / 60.0;
    let age_days = age_hours / 24.0;

    // Legacy flat age bounds act as a global envelope when configured.
    if let Some(min_days) = params.dex_min_age_days {
        if age_days < min_days {
            return None;
        }
    }
    if let Some(max_days) = params.dex_max_age_days {
        if age_days > max_days {
            return None;
        }
    }

    let mut qualifying: Vec<DexTier> = Vec::new();

    let passes_basics = |tier: DexTier| {
        pair.liquidity_usd >= params.tier_min_liquidity(tier)
            && pair.volume_24h >= params.tier_min_volume(tier)
            && pair.sells_24h >= params.tier_min_sells(tier)
    };

    if params.dex_microspray_enabled
        && age_minutes >= params.dex_microspray_min_age_minutes
        && age_hours < params.dex_microspray_max_age_hours
        && passes_basics(DexTier::Microspray)
    {
        qualifying.push(DexTier::Microspray);
    }

    if params.dex_breakout_enabled
        && age_hours >= params.dex_breakout_min_age_hours
        && age_hours < params.dex_breakout_max_age_hours
        && pair.change_5m >= params.dex_breakout_min_5m_pump
        && passes_basics(DexTier::Breakout)
    {
        qualifying.push(DexTier::Breakout);
    }

    if params.dex_lottery_enabled
        && age_hours >= params.dex_lottery_min_age_hours
        && age_hours < params.dex_lottery_max_age_hours
        && pair.change_1h >= params.dex_lottery_min_1h_change
        && passes_basics(DexTier::Lottery)
    {
        qualifying.push(DexTier::Lottery);
    }

    if params.dex_early_enabled
        && age_hours >= params.dex_early_min_age_hours
        && age_days < params.dex_early_max_age_days
        && pair.change_24h >= params.dex_early_min_24h_change
        && passes_basics(DexTier::Early)
    {
        let legitimacy = legitimacy_score(&legitimacy_signals(pair));
        if legitimacy >= params.dex_early_min_legitimacy {
            qualifying.push(DexTier::Early);
        }
    }

    if params.dex_established_enabled
        && age_days >= params.dex_established_min_age_days
        && age_days < params.dex_established_max_age_days
        && pair.change_24h >= params.dex_established_min_24h_change
        && passes_basics(DexTier::Established)
    {
        qualifying.push(DexTier::Established);
    }

    qualifying.into_iter().max_by_key(|t| t.priority())
}

fn legitimacy_signals(pair: &DexPairInfo) -> LegitimacySignals {
    LegitimacySignals {
        has_website: pair.has_website,
        has_twitter: pair.has_twitter,
        has_telegram: pair.has_telegram,
        boost_count: pair.boost_count,
        sells_exist: pair.sells_24h > 0,
    }
}

/// Build the momentum signal for one classified pair.
pub fn build_signal(
    pair: &DexPairInfo,
    tier: DexTier,
    now: DateTime<Utc>,
) -> Option<DexMomentumSignal> {
    let created = pair.pair_created_at?;
    let age_hours = (now - created).num_seconds() as f64 / 3600.0;
    let age_days = age_hours / 24.0;

    let signals = legitimacy_signals(pair);
    let legitimacy = legitimacy_score(&signals);
    let momentum = momentum_score(pair, tier, legitimacy, age_days);

    let ratio = |buys: u32, sells: u32| {
        let total = buys + sells;
        if total == 0 {
            0.5
        } else {
            buys as f64 / total as f64
        }
    };

    Some(DexMomentumSignal {
        token_address: pair.token_address.clone(),
        pair_address: pair.pair_address.clone(),
        symbol: pair.symbol.clone(),
        price_usd: pair.price_usd,
        change_5m: pair.change_5m,
        change_1h: pair.change_1h,
        change_6h: pair.change_6h,
        change_24h: pair.change_24h,
        volume_5m: pair.volume_5m,
        volume_1h: pair.volume_1h,
        volume_6h: pair.volume_6h,
        volume_24h: pair.volume_24h,
        liquidity_usd: pair.liquidity_usd,
        market_cap: pair.market_cap,
        age_hours,
        age_days,
        buy_ratio_1h: ratio(pair.buys_1h, pair.sells_1h),
        buy_ratio_24h: ratio(pair.buys_24h, pair.sells_24h),
        txns_24h: pair.buys_24h + pair.sells_24h,
        momentum_score: momentum,
        legitimacy_score: legitimacy,
        legitimacy: signals,
        tier,
    })
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// Union all discovery feeds, classify, score, and return the new signal
/// list sorted by momentum. Individual feed failures degrade silently.
pub async fn scan(
    screener: &dyn DexScreener,
    params: &DexParams,
    now: DateTime<Utc>,
) -> Vec<DexMomentumSignal> {
    let mut feeds: Vec<(&str, crate::error::AgentResult<Vec<DexPairInfo>>)> = vec![
        (
            "top_boosts",
            with_deadline("dex_screener", screener.top_boosts()).await,
        ),
        (
            "latest_profiles",
            with_deadline("dex_screener", screener.latest_profiles()).await,
        ),
        (
            "latest_boosts",
            with_deadline("dex_screener", screener.latest_boosts()).await,
        ),
        (
            "community_takeovers",
            with_deadline("dex_screener", screener.community_takeovers()).await,
        ),
        (
            "latest_ads",
            with_deadline("dex_screener", screener.latest_ads()).await,
        ),
    ];

    let searches = join_all(
        SEARCH_TERMS
            .iter()
            .map(|term| with_deadline("dex_screener", screener.search(term))),
    )
    .await;
    for (term, result) in SEARCH_TERMS.iter().zip(searches) {
        feeds.push((term, result));
    }

    let mut pairs: Vec<DexPairInfo> = Vec::new();
    for (name, result) in feeds {
        match result {
            Ok(mut feed_pairs) => pairs.append(&mut feed_pairs),
            Err(e) => warn!(feed = name, error = %e, "scanner feed failed — skipping"),
        }
    }

    // Dedup by base token, keep the first occurrence.
    let mut seen: Vec<String> = Vec::new();
    pairs.retain(|p| {
        if seen.contains(&p.token_address) {
            false
        } else {
            seen.push(p.token_address.clone());
            true
        }
    });

    let mut signals: Vec<DexMomentumSignal> = pairs
        .iter()
        .filter(|p| p.chain_id == "solana" && p.pair_created_at.is_some())
        .filter_map(|p| {
            let tier = classify_tier(p, params, now)?;
            build_signal(p, tier, now)
        })
        .collect();

    signals.sort_by(|a, b| {
        b.momentum_score
            .partial_cmp(&a.momentum_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    debug!(
        scanned = seen.len(),
        qualified = signals.len(),
        "DEX scan complete"
    );
    signals
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pair_aged(hours: f64) -> DexPairInfo {
        DexPairInfo {
            chain_id: "solana".into(),
            pair_address: "PAIR".into(),
            token_address: "TOKEN".into(),
            symbol: "TOK".into(),
            price_usd: 0.001,
            change_5m: 60.0,
            change_1h: 8.0,
            change_6h: 25.0,
            change_24h: 80.0,
            volume_5m: 2_000.0,
            volume_1h: 10_000.0,
            volume_6h: 40_000.0,
            volume_24h: 120_000.0,
            liquidity_usd: 60_000.0,
            market_cap: 500_000.0,
            pair_created_at: Some(Utc::now() - Duration::seconds((hours * 3600.0) as i64)),
            buys_1h: 60,
            sells_1h: 40,
            buys_24h: 700,
            sells_24h: 500,
            has_website: true,
            has_twitter: true,
            has_telegram: true,
            boost_count: 5,
        }
    }

    fn params() -> DexParams {
        let mut p = DexParams::default();
        p.dex_lottery_enabled = true;
        p.dex_breakout_enabled = true;
        p
    }

    #[test]
    fn legitimacy_components_sum() {
        let full = LegitimacySignals {
            has_website: true,
            has_twitter: true,
            has_telegram: true,
            boost_count: 15,
            sells_exist: true,
        };
        // 25 + 25 + 20 + min(20, 30) + 10 = 100
        assert!((legitimacy_score(&full) - 100.0).abs() < 1e-9);

        let bare = LegitimacySignals::default();
        assert_eq!(legitimacy_score(&bare), 0.0);
    }

    #[test]
    fn tier_selection_prefers_lottery_over_breakout() {
        // Age 4 h, +60 % on 5 m, +8 % on 1 h: qualifies for both breakout and
        // lottery; lottery has higher priority.
        let pair = pair_aged(4.0);
        let tier = classify_tier(&pair, &params(), Utc::now()).unwrap();
        assert_eq!(tier, DexTier::Lottery);
    }

    #[test]
    fn tier_honors_age_windows() {
        let p = params();
        // 30 h old: lottery/breakout windows closed, early window open.
        let pair = pair_aged(30.0);
        let tier = classify_tier(&pair, &p, Utc::now()).unwrap();
        assert_eq!(tier, DexTier::Early);

        // 8 days old: established.
        let pair = pair_aged(8.0 * 24.0);
        let tier = classify_tier(&pair, &p, Utc::now()).unwrap();
        assert_eq!(tier, DexTier::Established);
    }

    #[test]
    fn honeypot_gate_rejects_no_sell_tokens() {
        let mut pair = pair_aged(4.0);
        pair.sells_24h = 2; // below the lottery/breakout minimum of 5
        assert!(classify_tier(&pair, &params(), Utc::now()).is_none());
    }

    #[test]
    fn legacy_age_envelope_applies() {
        let mut p = params();
        p.dex_min_age_days = Some(1.0);
        // A 4 h token falls outside the legacy envelope.
        assert!(classify_tier(&pair_aged(4.0), &p, Utc::now()).is_none());
        // A 30 h token is inside it.
        assert!(classify_tier(&pair_aged(30.0), &p, Utc::now()).is_some());
    }

    #[test]
    fn missing_pair_created_at_is_rejected() {
        let mut pair = pair_aged(4.0);
        pair.pair_created_at = None;
        assert!(classify_tier(&pair, &params(), Utc::now()).is_none());
    }

    #[test]
    fn momentum_score_floors_at_zero_and_rewards_strength() {
        let pair = pair_aged(4.0);
        let strong = momentum_score(&pair, DexTier::Lottery, 80.0, 4.0 / 24.0);
        assert!(strong > 60.0, "expected a strong score, got {strong}");

        let mut weak = pair.clone();
        weak.change_24h = -40.0;
        weak.change_1h = -20.0;
        weak.change_6h = -30.0;
        weak.change_5m = -50.0;
        weak.buys_24h = 50;
        weak.sells_24h = 500;
        weak.buys_1h = 2;
        weak.sells_1h = 50;
        weak.volume_24h = 1_000.0;
        weak.volume_6h = 10.0;
        let score = momentum_score(&weak, DexTier::Lottery, 10.0, 4.0 / 24.0);
        assert!(score >= 0.0);
        assert!(score < 20.0);
    }

    #[test]
    fn established_bonus_peaks_at_seven_days() {
        let pair = pair_aged(7.0 * 24.0);
        let at_seven = momentum_score(&pair, DexTier::Established, 50.0, 7.0);
        let at_thirteen = momentum_score(&pair, DexTier::Established, 50.0, 13.0);
        assert!(at_seven > at_thirteen);
    }

    #[test]
    fn build_signal_populates_ratios_and_scores() {
        let pair = pair_aged(4.0);
        let signal = build_signal(&pair, DexTier::Lottery, Utc::now()).unwrap();
        assert!((signal.buy_ratio_1h - 0.6).abs() < 1e-9);
        assert!(signal.momentum_score > 0.0);
        assert!(signal.legitimacy_score > 70.0);
        assert_eq!(signal.tier, DexTier::Lottery);
        assert!((signal.age_hours - 4.0).abs() < 0.01);
    }
}
