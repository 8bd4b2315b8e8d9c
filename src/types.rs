// =============================================================================
// Shared types used across the Polaris signal agent
// =============================================================================
//
// Every concept the engine tags with a string at the wire boundary (verdicts,
// tiers, exit reasons, recommendations) is an exhaustive enum here. Adding a
// variant is a compile-time event at every call site.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Signal sources
// ---------------------------------------------------------------------------

/// Where a signal observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Stocktwits,
    Forum,
    CryptoMomentum,
    Analyst,
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stocktwits => write!(f, "stocktwits"),
            Self::Forum => write!(f, "forum"),
            Self::CryptoMomentum => write!(f, "crypto_momentum"),
            Self::Analyst => write!(f, "analyst"),
        }
    }
}

/// One scored observation of interest in a symbol, produced by a gatherer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub source: SignalSource,
    /// Raw sentiment in [-1, +1] before quality weighting.
    pub sentiment: f64,
    /// Sentiment after source weight, freshness decay, and flair/engagement
    /// multipliers.
    pub weighted_sentiment: f64,
    /// Number of underlying observations (messages, posts).
    pub volume: u32,
    pub timestamp: DateTime<Utc>,
    /// Human-readable composite reason for the dashboard.
    pub reason: String,
    #[serde(default)]
    pub upvotes: Option<u32>,
    /// Momentum percentage for crypto signals.
    #[serde(default)]
    pub momentum_pct: Option<f64>,
    #[serde(default)]
    pub is_crypto: bool,
    #[serde(default)]
    pub price: Option<f64>,
    /// Subgroups / feeds that contributed to this signal.
    #[serde(default)]
    pub sources: Vec<String>,
}

// ---------------------------------------------------------------------------
// LLM research outputs
// ---------------------------------------------------------------------------

/// Per-symbol research verdict from the cheap model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Buy,
    Skip,
    Wait,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Skip => write!(f, "SKIP"),
            Self::Wait => write!(f, "WAIT"),
        }
    }
}

/// Qualitative entry-quality grade attached to a research verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Cached research result for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResearch {
    pub verdict: Verdict,
    /// Confidence in (0, 1].
    pub confidence: f64,
    pub entry_quality: EntryQuality,
    pub reasoning: String,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default)]
    pub catalysts: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Action recommended by the batch analyst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecommendedAction {
    Buy,
    Sell,
    Hold,
}

/// One recommendation row from the batch analyst pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystRecommendation {
    pub action: RecommendedAction,
    pub symbol: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub suggested_size_pct: Option<f64>,
}

/// Full output of the batch analyst pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystReport {
    pub recommendations: Vec<AnalystRecommendation>,
    #[serde(default)]
    pub market_summary: String,
    #[serde(default)]
    pub high_conviction_plays: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Brokerage mirror types
// ---------------------------------------------------------------------------

/// Asset class of a brokerage position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    UsEquity,
    UsOption,
    Crypto,
}

/// Position as mirrored from the brokerage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    pub side: String,
    pub market_value: f64,
    pub unrealized_pl: f64,
    pub current_price: f64,
    pub asset_class: AssetClass,
    #[serde(default)]
    pub avg_entry_price: f64,
}

impl Position {
    /// Percentage P&L relative to cost basis.
    pub fn pl_pct(&self) -> f64 {
        let basis = self.market_value - self.unrealized_pl;
        if basis.abs() < f64::EPSILON {
            0.0
        } else {
            self.unrealized_pl / basis * 100.0
        }
    }
}

/// Agent-side record of why and when a position was entered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEntry {
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub entry_sentiment: f64,
    pub entry_social_volume: u32,
    #[serde(default)]
    pub entry_sources: Vec<String>,
    pub reason: String,
    #[serde(default)]
    pub peak_price: f64,
    #[serde(default)]
    pub peak_sentiment: f64,
}

// ---------------------------------------------------------------------------
// DEX types
// ---------------------------------------------------------------------------

/// Age-band tier of a DEX candidate, from youngest to most established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DexTier {
    Microspray,
    Breakout,
    Lottery,
    Early,
    Established,
}

impl DexTier {
    /// Priority when a token qualifies for several tiers: most conservative
    /// wins.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Established => 4,
            Self::Early => 3,
            Self::Lottery => 2,
            Self::Breakout => 1,
            Self::Microspray => 0,
        }
    }

    /// Tiers sized with a fixed SOL amount and the tighter trailing rules.
    pub fn is_high_risk(&self) -> bool {
        matches!(self, Self::Microspray | Self::Breakout | Self::Lottery)
    }
}

impl std::fmt::Display for DexTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Microspray => write!(f, "microspray"),
            Self::Breakout => write!(f, "breakout"),
            Self::Lottery => write!(f, "lottery"),
            Self::Early => write!(f, "early"),
            Self::Established => write!(f, "established"),
        }
    }
}

/// Boolean legitimacy signals extracted from the scanner payload.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LegitimacySignals {
    pub has_website: bool,
    pub has_twitter: bool,
    pub has_telegram: bool,
    pub boost_count: u32,
    pub sells_exist: bool,
}

/// One DEX momentum candidate produced by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexMomentumSignal {
    pub token_address: String,
    pub pair_address: String,
    pub symbol: String,
    pub price_usd: f64,
    pub change_5m: f64,
    pub change_1h: f64,
    pub change_6h: f64,
    pub change_24h: f64,
    pub volume_5m: f64,
    pub volume_1h: f64,
    pub volume_6h: f64,
    pub volume_24h: f64,
    pub liquidity_usd: f64,
    pub market_cap: f64,
    pub age_hours: f64,
    pub age_days: f64,
    pub buy_ratio_1h: f64,
    pub buy_ratio_24h: f64,
    pub txns_24h: u32,
    pub momentum_score: f64,
    /// 0–100 heuristic from website/social presence, boosts, sells.
    pub legitimacy_score: f64,
    pub legitimacy: LegitimacySignals,
    pub tier: DexTier,
}

/// Open simulated DEX position keyed by token address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexPosition {
    pub token_address: String,
    pub symbol: String,
    /// Entry price after buy slippage.
    pub entry_price: f64,
    /// SOL committed at entry (excluding gas).
    pub entry_sol: f64,
    pub entry_time: DateTime<Utc>,
    pub token_amount: f64,
    /// Highest price observed since entry.
    pub peak_price: f64,
    pub entry_momentum: f64,
    pub entry_liquidity: f64,
    pub tier: DexTier,
    /// Consecutive scanner passes in which the token was absent.
    #[serde(default)]
    pub missed_scans: u32,
}

/// Why a DEX position was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DexExitReason {
    TakeProfit,
    StopLoss,
    LostMomentum,
    TrailingStop,
    Manual,
}

impl std::fmt::Display for DexExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TakeProfit => write!(f, "take_profit"),
            Self::StopLoss => write!(f, "stop_loss"),
            Self::LostMomentum => write!(f, "lost_momentum"),
            Self::TrailingStop => write!(f, "trailing_stop"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Immutable ledger entry for one completed DEX round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexTradeRecord {
    pub id: String,
    pub token_address: String,
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_sol: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl_pct: f64,
    pub pnl_sol: f64,
    pub exit_reason: DexExitReason,
    pub tier: DexTier,
}

/// Slippage model applied to simulated DEX fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlippageModel {
    None,
    Conservative,
    Realistic,
}

impl Default for SlippageModel {
    fn default() -> Self {
        Self::Realistic
    }
}

// ---------------------------------------------------------------------------
// Crisis
// ---------------------------------------------------------------------------

/// Macro stress level driving the trading governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CrisisLevel {
    Normal,
    Caution,
    Defensive,
    Emergency,
}

impl CrisisLevel {
    /// Map a total indicator score to a level. Band boundaries are inclusive
    /// of the higher band.
    pub fn from_score(score: u32) -> Self {
        if score >= 6 {
            Self::Emergency
        } else if score >= 4 {
            Self::Defensive
        } else if score >= 2 {
            Self::Caution
        } else {
            Self::Normal
        }
    }

    /// Position-size multiplier applied by the buy contract.
    pub fn size_multiplier(&self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Caution => 0.5,
            Self::Defensive => 0.0,
            Self::Emergency => 0.0,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl Default for CrisisLevel {
    fn default() -> Self {
        Self::Normal
    }
}

impl From<CrisisLevel> for u8 {
    fn from(level: CrisisLevel) -> u8 {
        level as u8
    }
}

impl TryFrom<u8> for CrisisLevel {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Caution),
            2 => Ok(Self::Defensive),
            3 => Ok(Self::Emergency),
            other => Err(format!("invalid crisis level: {other}")),
        }
    }
}

impl std::fmt::Display for CrisisLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Structured alert emitted to the pluggable notifier sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertEvent {
    TradeEntry {
        symbol: String,
        venue: String,
        notional: f64,
        reason: String,
    },
    TradeExit {
        symbol: String,
        venue: String,
        pnl_pct: f64,
        reason: String,
    },
    CrisisLevelChange {
        from: CrisisLevel,
        to: CrisisLevel,
        triggered: Vec<String>,
    },
    KillSwitch,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crisis_level_bands_are_inclusive() {
        assert_eq!(CrisisLevel::from_score(0), CrisisLevel::Normal);
        assert_eq!(CrisisLevel::from_score(1), CrisisLevel::Normal);
        assert_eq!(CrisisLevel::from_score(2), CrisisLevel::Caution);
        assert_eq!(CrisisLevel::from_score(3), CrisisLevel::Caution);
        assert_eq!(CrisisLevel::from_score(4), CrisisLevel::Defensive);
        assert_eq!(CrisisLevel::from_score(5), CrisisLevel::Defensive);
        assert_eq!(CrisisLevel::from_score(6), CrisisLevel::Emergency);
        assert_eq!(CrisisLevel::from_score(9), CrisisLevel::Emergency);
    }

    #[test]
    fn crisis_size_multipliers() {
        assert_eq!(CrisisLevel::Normal.size_multiplier(), 1.0);
        assert_eq!(CrisisLevel::Caution.size_multiplier(), 0.5);
        assert_eq!(CrisisLevel::Defensive.size_multiplier(), 0.0);
        assert_eq!(CrisisLevel::Emergency.size_multiplier(), 0.0);
    }

    #[test]
    fn tier_priority_prefers_conservative() {
        let mut tiers = vec![
            DexTier::Microspray,
            DexTier::Established,
            DexTier::Lottery,
            DexTier::Breakout,
            DexTier::Early,
        ];
        tiers.sort_by_key(|t| std::cmp::Reverse(t.priority()));
        assert_eq!(tiers[0], DexTier::Established);
        assert_eq!(tiers[4], DexTier::Microspray);
    }

    #[test]
    fn lottery_beats_breakout_on_priority() {
        assert!(DexTier::Lottery.priority() > DexTier::Breakout.priority());
    }

    #[test]
    fn exit_reason_serialises_snake_case() {
        let json = serde_json::to_string(&DexExitReason::TrailingStop).unwrap();
        assert_eq!(json, "\"trailing_stop\"");
        let back: DexExitReason = serde_json::from_str("\"lost_momentum\"").unwrap();
        assert_eq!(back, DexExitReason::LostMomentum);
    }

    #[test]
    fn verdict_roundtrip_uppercase() {
        let json = serde_json::to_string(&Verdict::Buy).unwrap();
        assert_eq!(json, "\"BUY\"");
        let back: Verdict = serde_json::from_str("\"WAIT\"").unwrap();
        assert_eq!(back, Verdict::Wait);
    }

    #[test]
    fn position_pl_pct_uses_cost_basis() {
        let pos = Position {
            symbol: "AAPL".into(),
            qty: 10.0,
            side: "long".into(),
            market_value: 1100.0,
            unrealized_pl: 100.0,
            current_price: 110.0,
            asset_class: AssetClass::UsEquity,
            avg_entry_price: 100.0,
        };
        assert!((pos.pl_pct() - 10.0).abs() < 1e-9);
    }
}
