// =============================================================================
// Durable agent state — the single persistent snapshot
// =============================================================================
//
// Everything the agent must remember across restarts lives in `AgentState`,
// serialized as one JSON document and written atomically at the end of every
// scheduler tick and after every control-plane write. Exactly one writer
// exists (the scheduler / control-plane exclusion), so last-writer-wins
// persistence is sound.
//
// Loading is tolerant: missing fields fill with defaults (serde), and
// `sanitize` repairs any non-finite scalar a corrupt file may carry, logging
// each repair.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AgentConfig;
use crate::types::{
    AnalystReport, CrisisLevel, DexMomentumSignal, DexPosition, DexTradeRecord, PositionEntry,
    Signal, SignalResearch,
};

/// Ring-buffer caps.
pub const MAX_LOGS: usize = 500;
pub const MAX_SIGNALS: usize = 200;
pub const MAX_PORTFOLIO_HISTORY: usize = 100;
/// Signals older than this are dropped from the cache.
pub const SIGNAL_MAX_AGE_HOURS: i64 = 24;
/// Per-symbol social history retained for staleness analysis.
const MAX_SOCIAL_HISTORY: usize = 50;

// ---------------------------------------------------------------------------
// Log ring
// ---------------------------------------------------------------------------

/// One structured log event retained for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub at: DateTime<Utc>,
    /// "info" | "warn" | "error"
    pub level: String,
    /// Machine-readable event tag, e.g. `buy_blocked`.
    pub event: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Cost tracking
// ---------------------------------------------------------------------------

/// Cumulative LLM spend. All counters are monotonically nondecreasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    pub total_usd: f64,
    pub api_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl CostTracker {
    /// Record one LLM call. Non-finite or negative costs are clamped to zero
    /// so the running total stays finite and nondecreasing.
    pub fn record(&mut self, cost_usd: f64, input_tokens: u64, output_tokens: u64) {
        let cost = if cost_usd.is_finite() && cost_usd > 0.0 {
            cost_usd
        } else {
            0.0
        };
        self.total_usd += cost;
        self.api_calls += 1;
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
    }
}

// ---------------------------------------------------------------------------
// Research / social auxiliaries
// ---------------------------------------------------------------------------

/// Per-symbol staleness breakdown retained for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessAnalysis {
    pub score: f64,
    pub is_stale: bool,
    pub time_component: f64,
    pub price_component: f64,
    pub volume_component: f64,
    pub no_mention_component: f64,
    pub timestamp: DateTime<Utc>,
}

/// Cached Twitter breaking-news confirmation for a held symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfirmation {
    pub confirms: bool,
    pub headline: String,
    pub timestamp: DateTime<Utc>,
}

/// One observation of a symbol's social volume, for decay analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialObservation {
    pub timestamp: DateTime<Utc>,
    pub volume: u32,
    pub weighted_sentiment: f64,
}

/// Pre-market plan held between the build window and the execution window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremarketPlan {
    pub report: AnalystReport,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DEX book
// ---------------------------------------------------------------------------

/// Re-entry cooldown recorded after a stop-loss or trailing-stop exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossCooldown {
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    /// Safety valve: re-entry is always allowed after this time.
    pub fallback_expiry: DateTime<Utc>,
}

/// One point of the DEX portfolio equity curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_value_sol: f64,
    pub paper_balance_sol: f64,
    pub position_value_sol: f64,
    pub realized_pnl_sol: f64,
}

/// The whole simulated DEX venue: balance, positions, ledger, governors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexBook {
    #[serde(default)]
    pub signals: Vec<DexMomentumSignal>,
    #[serde(default)]
    pub positions: HashMap<String, DexPosition>,
    #[serde(default)]
    pub trade_history: Vec<DexTradeRecord>,
    #[serde(default)]
    pub realized_pnl_sol: f64,
    pub paper_balance_sol: f64,
    #[serde(default)]
    pub portfolio_history: Vec<PortfolioSnapshot>,
    /// High-water mark of total book value, drives the drawdown pause.
    #[serde(default)]
    pub peak_value_sol: f64,
    #[serde(default)]
    pub drawdown_paused: bool,
    /// Stop-loss exit times inside the circuit-breaker window.
    #[serde(default)]
    pub recent_stop_losses: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub circuit_breaker_until: Option<DateTime<Utc>>,
    /// When the breaker armed; gates the early-clear minimum cooldown.
    #[serde(default)]
    pub circuit_breaker_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stop_loss_cooldowns: HashMap<String, StopLossCooldown>,
    #[serde(default)]
    pub current_loss_streak: u32,
    #[serde(default)]
    pub max_loss_streak: u32,
    #[serde(default)]
    pub current_win_streak: u32,
    /// High-water mark of the cash balance alone.
    #[serde(default)]
    pub peak_balance_sol: f64,
}

impl DexBook {
    pub fn new(starting_balance_sol: f64) -> Self {
        Self {
            signals: Vec::new(),
            positions: HashMap::new(),
            trade_history: Vec::new(),
            realized_pnl_sol: 0.0,
            paper_balance_sol: starting_balance_sol,
            portfolio_history: Vec::new(),
            peak_value_sol: starting_balance_sol,
            drawdown_paused: false,
            recent_stop_losses: Vec::new(),
            circuit_breaker_until: None,
            circuit_breaker_since: None,
            stop_loss_cooldowns: HashMap::new(),
            current_loss_streak: 0,
            max_loss_streak: 0,
            current_win_streak: 0,
            peak_balance_sol: starting_balance_sol,
        }
    }

    /// Total book value in SOL: cash plus open positions marked at the given
    /// per-token prices (entry price when a token has no current quote).
    pub fn total_value_sol(&self, sol_usd: f64, price_of: impl Fn(&str) -> Option<f64>) -> f64 {
        let position_value: f64 = self
            .positions
            .values()
            .map(|p| {
                let price = price_of(&p.token_address).unwrap_or(p.entry_price);
                p.token_amount * price / sol_usd
            })
            .sum();
        self.paper_balance_sol + position_value
    }
}

// ---------------------------------------------------------------------------
// Crisis state
// ---------------------------------------------------------------------------

/// Latest macro indicator snapshot. Every scalar is nullable: a failed source
/// contributes nothing rather than failing the monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub vix: Option<f64>,
    pub vix_change_pct: Option<f64>,
    pub hy_spread_bps: Option<f64>,
    pub yield_curve_2s10s: Option<f64>,
    pub ted_spread: Option<f64>,
    pub dxy: Option<f64>,
    pub usdjpy: Option<f64>,
    pub kre_weekly_pct: Option<f64>,
    pub silver_weekly_pct: Option<f64>,
    pub fed_balance_sheet_weekly_pct: Option<f64>,
    pub btc_weekly_pct: Option<f64>,
    pub usdt_peg: Option<f64>,
    pub gold_silver_ratio: Option<f64>,
    pub stocks_above_200ma_pct: Option<f64>,
    pub gold_price: Option<f64>,
    pub silver_price: Option<f64>,
    pub btc_price: Option<f64>,
}

/// Crisis governor state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrisisState {
    pub level: CrisisLevel,
    #[serde(default)]
    pub indicators: IndicatorSnapshot,
    /// Human-readable strings describing which indicators triggered.
    #[serde(default)]
    pub triggered: Vec<String>,
    #[serde(default)]
    pub paused_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_level_change: Option<DateTime<Utc>>,
    /// Symbols force-closed while the governor was active.
    #[serde(default)]
    pub closed_during_crisis: Vec<String>,
    #[serde(default)]
    pub manual_override: bool,
    /// Last alert time per level (string key), for the 5-minute rate limit.
    #[serde(default)]
    pub last_alerts: HashMap<String, DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// AgentState
// ---------------------------------------------------------------------------

/// The complete persistent agent state. Single writer; see module docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub config: AgentConfig,

    #[serde(default)]
    pub signal_cache: Vec<Signal>,
    #[serde(default)]
    pub position_entries: HashMap<String, PositionEntry>,
    #[serde(default)]
    pub social_history: HashMap<String, Vec<SocialObservation>>,
    #[serde(default)]
    pub logs: Vec<LogRecord>,
    #[serde(default)]
    pub cost: CostTracker,

    // --- phase timestamps --------------------------------------------------
    #[serde(default)]
    pub last_gather_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_research_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_analyst_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_crisis_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_dex_scan: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_position_research: Option<DateTime<Utc>>,

    // --- research caches ---------------------------------------------------
    #[serde(default)]
    pub signal_research: HashMap<String, SignalResearch>,
    #[serde(default)]
    pub position_research: HashMap<String, SignalResearch>,
    #[serde(default)]
    pub staleness: HashMap<String, StalenessAnalysis>,
    #[serde(default)]
    pub twitter_confirmations: HashMap<String, TwitterConfirmation>,
    #[serde(default)]
    pub twitter_reads_today: u32,
    #[serde(default)]
    pub twitter_reads_reset_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub premarket_plan: Option<PremarketPlan>,

    pub dex: DexBook,

    #[serde(default)]
    pub crisis: CrisisState,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

impl AgentState {
    /// Fresh state with the given configuration. The agent boots disabled;
    /// operators enable it through the control plane.
    pub fn new(config: AgentConfig) -> Self {
        let dex = DexBook::new(config.dex.dex_paper_starting_balance_sol);
        Self {
            enabled: false,
            config,
            signal_cache: Vec::new(),
            position_entries: HashMap::new(),
            social_history: HashMap::new(),
            logs: Vec::new(),
            cost: CostTracker::default(),
            last_gather_run: None,
            last_research_run: None,
            last_analyst_run: None,
            last_crisis_check: None,
            last_dex_scan: None,
            last_position_research: None,
            signal_research: HashMap::new(),
            position_research: HashMap::new(),
            staleness: HashMap::new(),
            twitter_confirmations: HashMap::new(),
            twitter_reads_today: 0,
            twitter_reads_reset_at: None,
            premarket_plan: None,
            dex,
            crisis: CrisisState::default(),
        }
    }

    // -------------------------------------------------------------------------
    // Log ring
    // -------------------------------------------------------------------------

    /// Append a structured event to the log ring (cap 500, oldest evicted).
    pub fn log_event(&mut self, level: &str, event: &str, message: impl Into<String>) {
        self.logs.push(LogRecord {
            at: Utc::now(),
            level: level.to_string(),
            event: event.to_string(),
            message: message.into(),
        });
        while self.logs.len() > MAX_LOGS {
            self.logs.remove(0);
        }
    }

    // -------------------------------------------------------------------------
    // Signal cache
    // -------------------------------------------------------------------------

    /// Replace the signal cache with the merge of `incoming`: drop entries
    /// older than 24 h, sort by |weighted sentiment| descending, cap at 200.
    pub fn replace_signal_cache(&mut self, incoming: Vec<Signal>, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(SIGNAL_MAX_AGE_HOURS);
        let mut fresh: Vec<Signal> = incoming
            .into_iter()
            .filter(|s| s.timestamp > cutoff && s.weighted_sentiment.is_finite())
            .collect();
        fresh.sort_by(|a, b| {
            b.weighted_sentiment
                .abs()
                .partial_cmp(&a.weighted_sentiment.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        fresh.truncate(MAX_SIGNALS);
        self.signal_cache = fresh;
    }

    /// Record a social observation for a symbol (cap per symbol).
    pub fn record_social(&mut self, symbol: &str, obs: SocialObservation) {
        let history = self.social_history.entry(symbol.to_string()).or_default();
        history.push(obs);
        while history.len() > MAX_SOCIAL_HISTORY {
            history.remove(0);
        }
    }

    /// Latest social volume seen for a symbol, if any.
    pub fn latest_social_volume(&self, symbol: &str) -> Option<u32> {
        self.social_history
            .get(symbol)
            .and_then(|h| h.last())
            .map(|o| o.volume)
    }

    /// When the symbol was last mentioned by any source.
    pub fn last_mention(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.social_history
            .get(symbol)
            .and_then(|h| h.last())
            .map(|o| o.timestamp)
    }

    // -------------------------------------------------------------------------
    // Twitter read budget
    // -------------------------------------------------------------------------

    /// Consume one Twitter read if the daily budget allows; the counter
    /// resets 24 h after the first read of the window.
    pub fn try_consume_twitter_read(&mut self, now: DateTime<Utc>) -> bool {
        match self.twitter_reads_reset_at {
            Some(reset) if now >= reset => {
                self.twitter_reads_today = 0;
                self.twitter_reads_reset_at = Some(now + Duration::hours(24));
            }
            None => {
                self.twitter_reads_reset_at = Some(now + Duration::hours(24));
            }
            _ => {}
        }
        if self.twitter_reads_today >= self.config.llm.twitter_daily_read_limit {
            return false;
        }
        self.twitter_reads_today += 1;
        true
    }

    // -------------------------------------------------------------------------
    // Resets
    // -------------------------------------------------------------------------

    /// Zero the DEX book back to the configured starting balance.
    pub fn reset_dex_book(&mut self) {
        self.dex = DexBook::new(self.config.dex.dex_paper_starting_balance_sol);
    }

    /// Kill switch: disable, clear signal cache and plan. Open positions and
    /// the trade ledger are left alone.
    pub fn kill(&mut self) {
        self.enabled = false;
        self.signal_cache.clear();
        self.premarket_plan = None;
        self.log_event("warn", "kill_switch_activated", "kill switch activated");
    }

    // -------------------------------------------------------------------------
    // Load-time repair
    // -------------------------------------------------------------------------

    /// Repair non-finite scalars a corrupt snapshot may carry. Each repair is
    /// logged. Returns the number of repairs.
    pub fn sanitize(&mut self) -> usize {
        let mut repairs = 0usize;

        let starting = self.config.dex.dex_paper_starting_balance_sol;
        let mut fix = |value: &mut f64, default: f64, name: &str, repairs: &mut usize| {
            if !value.is_finite() {
                warn!(field = name, default, "repaired non-finite state scalar");
                *value = default;
                *repairs += 1;
            }
        };

        fix(&mut self.dex.paper_balance_sol, starting, "dex.paper_balance_sol", &mut repairs);
        fix(&mut self.dex.realized_pnl_sol, 0.0, "dex.realized_pnl_sol", &mut repairs);
        fix(&mut self.dex.peak_value_sol, starting, "dex.peak_value_sol", &mut repairs);
        fix(&mut self.dex.peak_balance_sol, starting, "dex.peak_balance_sol", &mut repairs);
        fix(&mut self.cost.total_usd, 0.0, "cost.total_usd", &mut repairs);

        if self.dex.paper_balance_sol < 0.0 {
            warn!(
                balance = self.dex.paper_balance_sol,
                "repaired negative paper balance"
            );
            self.dex.paper_balance_sol = 0.0;
            repairs += 1;
        }

        let before = self.dex.positions.len();
        self.dex.positions.retain(|_, p| {
            p.token_amount > 0.0
                && p.entry_price > 0.0
                && p.entry_price.is_finite()
                && p.token_amount.is_finite()
        });
        let dropped = before - self.dex.positions.len();
        if dropped > 0 {
            warn!(dropped, "dropped corrupt DEX positions at load");
            repairs += dropped;
        }

        let before = self.signal_cache.len();
        self.signal_cache.retain(|s| s.weighted_sentiment.is_finite());
        let dropped = before - self.signal_cache.len();
        if dropped > 0 {
            warn!(dropped, "dropped corrupt signals at load");
            repairs += dropped;
        }

        repairs
    }
}
