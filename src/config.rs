// =============================================================================
// Agent Configuration — hot-reloadable settings with atomic save
// =============================================================================
//
// Every tunable the engines consult lives here, grouped by subsystem and
// flattened into one JSON object on disk. Every field carries a serde default
// so loading an older file (or a partial PATCH body) never fails: missing or
// null keys are filled with their documented defaults. Unknown keys are
// ignored. That is the whole config-migration policy.
//
// Persistence uses the atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{DexTier, SlippageModel};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn d_tick_interval_ms() -> u64 {
    30_000
}
fn d_data_poll_interval_ms() -> u64 {
    300_000
}
fn d_research_interval_ms() -> u64 {
    120_000
}
fn d_analyst_interval_ms() -> u64 {
    900_000
}
fn d_crisis_check_interval_ms() -> u64 {
    900_000
}
fn d_position_research_interval_ms() -> u64 {
    300_000
}

fn d_max_position_value() -> f64 {
    1_000.0
}
fn d_max_positions() -> usize {
    3
}
fn d_position_size_pct_of_cash() -> f64 {
    20.0
}
fn d_take_profit_pct() -> f64 {
    10.0
}
fn d_stop_loss_pct() -> f64 {
    5.0
}
fn d_min_sentiment_score() -> f64 {
    0.3
}
fn d_min_analyst_confidence() -> f64 {
    0.65
}
fn d_llm_min_hold_minutes() -> i64 {
    30
}
fn d_allowed_exchanges() -> Vec<String> {
    ["NYSE", "NASDAQ", "ARCA", "AMEX", "BATS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn d_stale_min_hold_hours() -> f64 {
    24.0
}
fn d_stale_mid_hold_days() -> f64 {
    3.0
}
fn d_stale_max_hold_days() -> f64 {
    7.0
}
fn d_stale_min_gain_pct() -> f64 {
    2.0
}
fn d_stale_social_volume_decay() -> f64 {
    0.3
}
fn d_stale_no_mention_hours() -> f64 {
    12.0
}

fn d_llm_provider() -> String {
    "openai".to_string()
}
fn d_llm_model_cheap() -> String {
    "gpt-4o-mini".to_string()
}
fn d_llm_model_smart() -> String {
    "gpt-4o".to_string()
}
fn d_llm_max_tokens() -> u32 {
    1_024
}
fn d_llm_daily_token_budget() -> u64 {
    2_000_000
}
fn d_twitter_daily_read_limit() -> u32 {
    100
}

fn d_options_min_dte() -> i64 {
    7
}
fn d_options_max_dte() -> i64 {
    45
}
fn d_options_min_delta() -> f64 {
    0.30
}
fn d_options_max_delta() -> f64 {
    0.70
}
fn d_options_take_profit_pct() -> f64 {
    50.0
}
fn d_options_stop_loss_pct() -> f64 {
    50.0
}
fn d_options_min_confidence() -> f64 {
    0.75
}
fn d_options_max_pct_per_trade() -> f64 {
    5.0
}

fn d_crypto_symbols() -> Vec<String> {
    ["BTC/USD", "ETH/USD", "SOL/USD"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn d_crypto_momentum_threshold() -> f64 {
    3.0
}
fn d_crypto_take_profit_pct() -> f64 {
    8.0
}
fn d_crypto_stop_loss_pct() -> f64 {
    4.0
}
fn d_crypto_max_position_value() -> f64 {
    500.0
}

fn d_dex_paper_starting_balance_sol() -> f64 {
    10.0
}
fn d_dex_max_positions() -> usize {
    5
}
fn d_dex_position_size_pct() -> f64 {
    10.0
}
fn d_dex_max_position_sol() -> f64 {
    1.0
}
fn d_dex_stop_loss_pct() -> f64 {
    15.0
}
fn d_dex_trailing_stop_activation_pct() -> f64 {
    30.0
}
fn d_dex_trailing_stop_distance_pct() -> f64 {
    15.0
}
fn d_dex_lottery_trailing_activation() -> f64 {
    40.0
}
fn d_dex_high_risk_trailing_distance_pct() -> f64 {
    20.0
}
fn d_dex_gas_fee_sol() -> f64 {
    0.000_25
}
fn d_dex_max_drawdown_pct() -> f64 {
    30.0
}
fn d_dex_max_single_position_pct() -> f64 {
    25.0
}
fn d_dex_min_viable_position_sol() -> f64 {
    0.01
}
fn d_dex_circuit_breaker_losses() -> usize {
    3
}
fn d_dex_circuit_breaker_window_hours() -> f64 {
    1.0
}
fn d_dex_circuit_breaker_pause_hours() -> f64 {
    1.0
}
fn d_dex_breaker_min_cooldown_minutes() -> i64 {
    15
}
fn d_dex_reentry_recovery_pct() -> f64 {
    15.0
}
fn d_dex_reentry_min_momentum() -> f64 {
    75.0
}
fn d_dex_stop_loss_cooldown_hours() -> f64 {
    4.0
}
fn d_dex_min_momentum_score() -> f64 {
    60.0
}
fn d_dex_chart_min_entry_score() -> f64 {
    30.0
}
fn d_dex_lost_momentum_missed_scans() -> u32 {
    10
}
fn d_dex_momentum_decay_fraction() -> f64 {
    0.4
}

fn d_microspray_position_sol() -> f64 {
    0.01
}
fn d_microspray_max_positions() -> usize {
    2
}
fn d_microspray_stop_loss_pct() -> f64 {
    25.0
}
fn d_microspray_min_liquidity() -> f64 {
    5_000.0
}
fn d_microspray_min_volume() -> f64 {
    2_000.0
}
fn d_microspray_min_age_minutes() -> f64 {
    30.0
}
fn d_microspray_max_age_hours() -> f64 {
    2.0
}

fn d_breakout_position_sol() -> f64 {
    0.02
}
fn d_breakout_max_positions() -> usize {
    2
}
fn d_breakout_stop_loss_pct() -> f64 {
    20.0
}
fn d_breakout_min_liquidity() -> f64 {
    10_000.0
}
fn d_breakout_min_volume() -> f64 {
    10_000.0
}
fn d_breakout_min_age_hours() -> f64 {
    2.0
}
fn d_breakout_max_age_hours() -> f64 {
    6.0
}
fn d_breakout_min_5m_pump() -> f64 {
    10.0
}

fn d_lottery_position_sol() -> f64 {
    0.02
}
fn d_lottery_max_positions() -> usize {
    2
}
fn d_lottery_stop_loss_pct() -> f64 {
    20.0
}
fn d_lottery_min_liquidity() -> f64 {
    15_000.0
}
fn d_lottery_min_volume() -> f64 {
    20_000.0
}
fn d_lottery_min_age_hours() -> f64 {
    1.0
}
fn d_lottery_max_age_hours() -> f64 {
    6.0
}
fn d_lottery_min_1h_change() -> f64 {
    5.0
}

fn d_early_position_size_pct() -> f64 {
    50.0
}
fn d_early_stop_loss_pct() -> f64 {
    15.0
}
fn d_early_min_liquidity() -> f64 {
    25_000.0
}
fn d_early_min_volume() -> f64 {
    50_000.0
}
fn d_early_min_age_hours() -> f64 {
    6.0
}
fn d_early_max_age_days() -> f64 {
    3.0
}
fn d_early_min_legitimacy() -> f64 {
    50.0
}
fn d_early_min_24h_change() -> f64 {
    20.0
}

fn d_established_stop_loss_pct() -> f64 {
    15.0
}
fn d_established_min_liquidity() -> f64 {
    50_000.0
}
fn d_established_min_volume() -> f64 {
    100_000.0
}
fn d_established_min_age_days() -> f64 {
    3.0
}
fn d_established_max_age_days() -> f64 {
    14.0
}
fn d_established_min_24h_change() -> f64 {
    15.0
}

fn d_vix_elevated() -> f64 {
    20.0
}
fn d_vix_high() -> f64 {
    28.0
}
fn d_vix_critical() -> f64 {
    40.0
}
fn d_hy_spread_warning() -> f64 {
    450.0
}
fn d_hy_spread_critical() -> f64 {
    600.0
}
fn d_btc_weekly_drop_pct() -> f64 {
    -20.0
}
fn d_stablecoin_depeg_threshold() -> f64 {
    0.985
}
fn d_gold_silver_ratio_low() -> f64 {
    70.0
}
fn d_stocks_above_200ma_warning() -> f64 {
    40.0
}
fn d_stocks_above_200ma_critical() -> f64 {
    25.0
}
fn d_yield_curve_inversion_warning() -> f64 {
    0.0
}
fn d_yield_curve_inversion_critical() -> f64 {
    -0.5
}
fn d_ted_spread_warning() -> f64 {
    0.5
}
fn d_ted_spread_critical() -> f64 {
    1.0
}
fn d_dxy_elevated() -> f64 {
    105.0
}
fn d_dxy_critical() -> f64 {
    110.0
}
fn d_usdjpy_warning() -> f64 {
    140.0
}
fn d_usdjpy_critical() -> f64 {
    130.0
}
fn d_kre_weekly_warning() -> f64 {
    -7.0
}
fn d_kre_weekly_critical() -> f64 {
    -12.0
}
fn d_silver_weekly_warning() -> f64 {
    8.0
}
fn d_silver_weekly_critical() -> f64 {
    15.0
}
fn d_fed_bs_weekly_warning() -> f64 {
    1.0
}
fn d_fed_bs_weekly_critical() -> f64 {
    2.0
}
fn d_crisis_level1_size_reduction_pct() -> f64 {
    50.0
}
fn d_crisis_level1_stop_loss_pct() -> f64 {
    3.0
}
fn d_crisis_level2_min_profit_to_hold() -> f64 {
    0.0
}

fn d_forum_subgroups() -> Vec<String> {
    ["wallstreetbets", "stocks", "investing", "options"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn d_source_weight_stocktwits() -> f64 {
    1.0
}
fn d_source_weight_forum() -> f64 {
    1.2
}
fn d_source_weight_crypto() -> f64 {
    1.0
}

// =============================================================================
// Grouped parameter structs (flattened into one JSON object)
// =============================================================================

/// Scheduler cadences. All in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingParams {
    #[serde(default = "d_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "d_data_poll_interval_ms")]
    pub data_poll_interval_ms: u64,
    #[serde(default = "d_research_interval_ms")]
    pub research_interval_ms: u64,
    #[serde(default = "d_analyst_interval_ms")]
    pub analyst_interval_ms: u64,
    #[serde(default = "d_crisis_check_interval_ms")]
    pub crisis_check_interval_ms: u64,
    #[serde(default = "d_position_research_interval_ms")]
    pub position_research_interval_ms: u64,
}

impl Default for SchedulingParams {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Stock entry/exit risk parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockParams {
    #[serde(default = "default_true")]
    pub stocks_enabled: bool,
    #[serde(default = "d_max_position_value")]
    pub max_position_value: f64,
    #[serde(default = "d_max_positions")]
    pub max_positions: usize,
    #[serde(default = "d_position_size_pct_of_cash")]
    pub position_size_pct_of_cash: f64,
    #[serde(default = "d_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "d_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "d_min_sentiment_score")]
    pub min_sentiment_score: f64,
    #[serde(default = "d_min_analyst_confidence")]
    pub min_analyst_confidence: f64,
    /// Minimum minutes held before an analyst SELL may fire.
    #[serde(default = "d_llm_min_hold_minutes")]
    pub llm_min_hold_minutes: i64,
    /// Exchange allowlist guarding against OTC data pathologies.
    #[serde(default = "d_allowed_exchanges")]
    pub allowed_exchanges: Vec<String>,
}

impl Default for StockParams {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Stale-position policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleParams {
    #[serde(default = "default_true")]
    pub stale_position_enabled: bool,
    /// Staleness never fires before this many hours of hold time.
    #[serde(default = "d_stale_min_hold_hours")]
    pub stale_min_hold_hours: f64,
    #[serde(default = "d_stale_mid_hold_days")]
    pub stale_mid_hold_days: f64,
    #[serde(default = "d_stale_max_hold_days")]
    pub stale_max_hold_days: f64,
    #[serde(default = "d_stale_min_gain_pct")]
    pub stale_min_gain_pct: f64,
    /// Volume-decay trigger: current social volume <= decay * entry volume.
    #[serde(default = "d_stale_social_volume_decay")]
    pub stale_social_volume_decay: f64,
    /// Hours without a single mention before the no-mentions component bites.
    #[serde(default = "d_stale_no_mention_hours")]
    pub stale_no_mention_hours: f64,
}

impl Default for StaleParams {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// LLM provider/model selection and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmParams {
    #[serde(default = "d_llm_provider")]
    pub llm_provider: String,
    #[serde(default = "d_llm_model_cheap")]
    pub llm_model_cheap: String,
    #[serde(default = "d_llm_model_smart")]
    pub llm_model_smart: String,
    #[serde(default = "d_llm_max_tokens")]
    pub llm_max_tokens: u32,
    #[serde(default = "d_llm_daily_token_budget")]
    pub llm_daily_token_budget: u64,
    #[serde(default)]
    pub twitter_confirmation_enabled: bool,
    #[serde(default = "d_twitter_daily_read_limit")]
    pub twitter_daily_read_limit: u32,
}

impl Default for LlmParams {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Options trading gates and sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsParams {
    #[serde(default)]
    pub options_enabled: bool,
    #[serde(default = "d_options_min_dte")]
    pub options_min_dte: i64,
    #[serde(default = "d_options_max_dte")]
    pub options_max_dte: i64,
    #[serde(default = "d_options_min_delta")]
    pub options_min_delta: f64,
    #[serde(default = "d_options_max_delta")]
    pub options_max_delta: f64,
    #[serde(default = "d_options_take_profit_pct")]
    pub options_take_profit_pct: f64,
    #[serde(default = "d_options_stop_loss_pct")]
    pub options_stop_loss_pct: f64,
    #[serde(default = "d_options_min_confidence")]
    pub options_min_confidence: f64,
    #[serde(default = "d_options_max_pct_per_trade")]
    pub options_max_pct_per_trade: f64,
}

impl Default for OptionsParams {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Centralized-crypto engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoParams {
    #[serde(default)]
    pub crypto_enabled: bool,
    #[serde(default = "d_crypto_symbols")]
    pub crypto_symbols: Vec<String>,
    /// Minimum |momentum| vs previous daily close, percent.
    #[serde(default = "d_crypto_momentum_threshold")]
    pub crypto_momentum_threshold: f64,
    #[serde(default = "d_crypto_take_profit_pct")]
    pub crypto_take_profit_pct: f64,
    #[serde(default = "d_crypto_stop_loss_pct")]
    pub crypto_stop_loss_pct: f64,
    #[serde(default = "d_crypto_max_position_value")]
    pub crypto_max_position_value: f64,
}

impl Default for CryptoParams {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// DEX paper-trading engine parameters, including the five tier blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexParams {
    #[serde(default = "default_true")]
    pub dex_enabled: bool,
    #[serde(default = "d_dex_paper_starting_balance_sol")]
    pub dex_paper_starting_balance_sol: f64,
    #[serde(default = "d_dex_max_positions")]
    pub dex_max_positions: usize,
    #[serde(default = "d_dex_position_size_pct")]
    pub dex_position_size_pct: f64,
    #[serde(default = "d_dex_max_position_sol")]
    pub dex_max_position_sol: f64,
    #[serde(default = "d_dex_stop_loss_pct")]
    pub dex_stop_loss_pct: f64,
    #[serde(default = "d_dex_trailing_stop_activation_pct")]
    pub dex_trailing_stop_activation_pct: f64,
    #[serde(default = "d_dex_trailing_stop_distance_pct")]
    pub dex_trailing_stop_distance_pct: f64,
    /// Trailing activation for the high-risk tiers (microspray/breakout/lottery).
    #[serde(default = "d_dex_lottery_trailing_activation")]
    pub dex_lottery_trailing_activation: f64,
    #[serde(default = "d_dex_high_risk_trailing_distance_pct")]
    pub dex_high_risk_trailing_distance_pct: f64,
    #[serde(default)]
    pub dex_slippage_model: SlippageModel,
    #[serde(default = "d_dex_gas_fee_sol")]
    pub dex_gas_fee_sol: f64,
    #[serde(default = "d_dex_max_drawdown_pct")]
    pub dex_max_drawdown_pct: f64,
    /// Concentration cap: single position vs total book value, percent.
    #[serde(default = "d_dex_max_single_position_pct")]
    pub dex_max_single_position_pct: f64,
    #[serde(default = "d_dex_min_viable_position_sol")]
    pub dex_min_viable_position_sol: f64,
    #[serde(default = "d_dex_circuit_breaker_losses")]
    pub dex_circuit_breaker_losses: usize,
    #[serde(default = "d_dex_circuit_breaker_window_hours")]
    pub dex_circuit_breaker_window_hours: f64,
    #[serde(default = "d_dex_circuit_breaker_pause_hours")]
    pub dex_circuit_breaker_pause_hours: f64,
    #[serde(default = "d_dex_breaker_min_cooldown_minutes")]
    pub dex_breaker_min_cooldown_minutes: i64,
    #[serde(default = "d_dex_reentry_recovery_pct")]
    pub dex_reentry_recovery_pct: f64,
    #[serde(default = "d_dex_reentry_min_momentum")]
    pub dex_reentry_min_momentum: f64,
    #[serde(default = "d_dex_stop_loss_cooldown_hours")]
    pub dex_stop_loss_cooldown_hours: f64,
    #[serde(default = "d_dex_min_momentum_score")]
    pub dex_min_momentum_score: f64,
    #[serde(default = "default_true")]
    pub dex_chart_analysis_enabled: bool,
    #[serde(default = "d_dex_chart_min_entry_score")]
    pub dex_chart_min_entry_score: f64,
    #[serde(default = "d_dex_lost_momentum_missed_scans")]
    pub dex_lost_momentum_missed_scans: u32,
    /// Momentum-decay exit fires when current score < fraction * entry score.
    #[serde(default = "d_dex_momentum_decay_fraction")]
    pub dex_momentum_decay_fraction: f64,

    // --- microspray tier --------------------------------------------------
    #[serde(default)]
    pub dex_microspray_enabled: bool,
    #[serde(default = "d_microspray_position_sol")]
    pub dex_microspray_position_sol: f64,
    #[serde(default = "d_microspray_max_positions")]
    pub dex_microspray_max_positions: usize,
    #[serde(default = "d_microspray_stop_loss_pct")]
    pub dex_microspray_stop_loss_pct: f64,
    #[serde(default = "d_microspray_min_liquidity")]
    pub dex_microspray_min_liquidity: f64,
    #[serde(default = "d_microspray_min_volume")]
    pub dex_microspray_min_volume: f64,
    #[serde(default = "d_microspray_min_age_minutes")]
    pub dex_microspray_min_age_minutes: f64,
    #[serde(default = "d_microspray_max_age_hours")]
    pub dex_microspray_max_age_hours: f64,

    // --- breakout tier ----------------------------------------------------
    #[serde(default)]
    pub dex_breakout_enabled: bool,
    #[serde(default = "d_breakout_position_sol")]
    pub dex_breakout_position_sol: f64,
    #[serde(default = "d_breakout_max_positions")]
    pub dex_breakout_max_positions: usize,
    #[serde(default = "d_breakout_stop_loss_pct")]
    pub dex_breakout_stop_loss_pct: f64,
    #[serde(default = "d_breakout_min_liquidity")]
    pub dex_breakout_min_liquidity: f64,
    #[serde(default = "d_breakout_min_volume")]
    pub dex_breakout_min_volume: f64,
    #[serde(default = "d_breakout_min_age_hours")]
    pub dex_breakout_min_age_hours: f64,
    #[serde(default = "d_breakout_max_age_hours")]
    pub dex_breakout_max_age_hours: f64,
    #[serde(default = "d_breakout_min_5m_pump")]
    pub dex_breakout_min_5m_pump: f64,

    // --- lottery tier -----------------------------------------------------
    #[serde(default = "default_true")]
    pub dex_lottery_enabled: bool,
    #[serde(default = "d_lottery_position_sol")]
    pub dex_lottery_position_sol: f64,
    #[serde(default = "d_lottery_max_positions")]
    pub dex_lottery_max_positions: usize,
    #[serde(default = "d_lottery_stop_loss_pct")]
    pub dex_lottery_stop_loss_pct: f64,
    #[serde(default = "d_lottery_min_liquidity")]
    pub dex_lottery_min_liquidity: f64,
    #[serde(default = "d_lottery_min_volume")]
    pub dex_lottery_min_volume: f64,
    #[serde(default = "d_lottery_min_age_hours")]
    pub dex_lottery_min_age_hours: f64,
    #[serde(default = "d_lottery_max_age_hours")]
    pub dex_lottery_max_age_hours: f64,
    #[serde(default = "d_lottery_min_1h_change")]
    pub dex_lottery_min_1h_change: f64,

    // --- early tier -------------------------------------------------------
    #[serde(default = "default_true")]
    pub dex_early_enabled: bool,
    /// Percent of the standard pct-of-balance size used by the early tier.
    #[serde(default = "d_early_position_size_pct")]
    pub dex_early_position_size_pct: f64,
    #[serde(default = "d_early_stop_loss_pct")]
    pub dex_early_stop_loss_pct: f64,
    #[serde(default = "d_early_min_liquidity")]
    pub dex_early_min_liquidity: f64,
    #[serde(default = "d_early_min_volume")]
    pub dex_early_min_volume: f64,
    #[serde(default = "d_early_min_age_hours")]
    pub dex_early_min_age_hours: f64,
    #[serde(default = "d_early_max_age_days")]
    pub dex_early_max_age_days: f64,
    #[serde(default = "d_early_min_legitimacy")]
    pub dex_early_min_legitimacy: f64,
    #[serde(default = "d_early_min_24h_change")]
    pub dex_early_min_24h_change: f64,

    // --- established tier ---------------------------------------------------
    #[serde(default = "default_true")]
    pub dex_established_enabled: bool,
    #[serde(default = "d_established_stop_loss_pct")]
    pub dex_established_stop_loss_pct: f64,
    #[serde(default = "d_established_min_liquidity")]
    pub dex_established_min_liquidity: f64,
    #[serde(default = "d_established_min_volume")]
    pub dex_established_min_volume: f64,
    #[serde(default = "d_established_min_age_days")]
    pub dex_established_min_age_days: f64,
    #[serde(default = "d_established_max_age_days")]
    pub dex_established_max_age_days: f64,
    #[serde(default = "d_established_min_24h_change")]
    pub dex_established_min_24h_change: f64,

    // --- legacy fallback keys ---------------------------------------------
    // Older config files carried one flat filter set. A tier accessor prefers
    // its tier-specific key and falls back to these when present.
    #[serde(default)]
    pub dex_min_liquidity: Option<f64>,
    #[serde(default)]
    pub dex_min_volume_24h: Option<f64>,
    #[serde(default)]
    pub dex_min_age_days: Option<f64>,
    #[serde(default)]
    pub dex_max_age_days: Option<f64>,
}

impl Default for DexParams {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

impl DexParams {
    /// Tier enable flag.
    pub fn tier_enabled(&self, tier: DexTier) -> bool {
        match tier {
            DexTier::Microspray => self.dex_microspray_enabled,
            DexTier::Breakout => self.dex_breakout_enabled,
            DexTier::Lottery => self.dex_lottery_enabled,
            DexTier::Early => self.dex_early_enabled,
            DexTier::Established => self.dex_established_enabled,
        }
    }

    /// Minimum pool liquidity for a tier, honoring the legacy flat key.
    pub fn tier_min_liquidity(&self, tier: DexTier) -> f64 {
        let specific = match tier {
            DexTier::Microspray => self.dex_microspray_min_liquidity,
            DexTier::Breakout => self.dex_breakout_min_liquidity,
            DexTier::Lottery => self.dex_lottery_min_liquidity,
            DexTier::Early => self.dex_early_min_liquidity,
            DexTier::Established => self.dex_established_min_liquidity,
        };
        self.dex_min_liquidity.map_or(specific, |legacy| specific.max(legacy))
    }

    /// Minimum 24 h volume for a tier, honoring the legacy flat key.
    pub fn tier_min_volume(&self, tier: DexTier) -> f64 {
        let specific = match tier {
            DexTier::Microspray => self.dex_microspray_min_volume,
            DexTier::Breakout => self.dex_breakout_min_volume,
            DexTier::Lottery => self.dex_lottery_min_volume,
            DexTier::Early => self.dex_early_min_volume,
            DexTier::Established => self.dex_established_min_volume,
        };
        self.dex_min_volume_24h.map_or(specific, |legacy| specific.max(legacy))
    }

    /// Stop-loss percent for a tier.
    pub fn tier_stop_loss_pct(&self, tier: DexTier) -> f64 {
        match tier {
            DexTier::Microspray => self.dex_microspray_stop_loss_pct,
            DexTier::Breakout => self.dex_breakout_stop_loss_pct,
            DexTier::Lottery => self.dex_lottery_stop_loss_pct,
            DexTier::Early => self.dex_early_stop_loss_pct,
            DexTier::Established => self.dex_established_stop_loss_pct,
        }
    }

    /// Per-tier concurrent position cap. Early/established share the global cap.
    pub fn tier_max_positions(&self, tier: DexTier) -> usize {
        match tier {
            DexTier::Microspray => self.dex_microspray_max_positions,
            DexTier::Breakout => self.dex_breakout_max_positions,
            DexTier::Lottery => self.dex_lottery_max_positions,
            DexTier::Early | DexTier::Established => self.dex_max_positions,
        }
    }

    /// Minimum sells in 24 h for the honeypot gate.
    pub fn tier_min_sells(&self, tier: DexTier) -> u32 {
        match tier {
            DexTier::Microspray => 3,
            DexTier::Lottery | DexTier::Breakout => 5,
            DexTier::Early | DexTier::Established => 10,
        }
    }
}

/// Crisis-monitor indicator thresholds and governor policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisParams {
    #[serde(default = "default_true")]
    pub crisis_mode_enabled: bool,
    #[serde(default = "d_vix_elevated")]
    pub vix_elevated: f64,
    #[serde(default = "d_vix_high")]
    pub vix_high: f64,
    #[serde(default = "d_vix_critical")]
    pub vix_critical: f64,
    #[serde(default = "d_hy_spread_warning")]
    pub hy_spread_warning: f64,
    #[serde(default = "d_hy_spread_critical")]
    pub hy_spread_critical: f64,
    /// Critical weekly BTC drop, percent (negative).
    #[serde(default = "d_btc_weekly_drop_pct")]
    pub btc_weekly_drop_pct: f64,
    #[serde(default = "d_stablecoin_depeg_threshold")]
    pub stablecoin_depeg_threshold: f64,
    #[serde(default = "d_gold_silver_ratio_low")]
    pub gold_silver_ratio_low: f64,
    #[serde(default = "d_stocks_above_200ma_warning")]
    pub stocks_above_200ma_warning: f64,
    #[serde(default = "d_stocks_above_200ma_critical")]
    pub stocks_above_200ma_critical: f64,
    #[serde(default = "d_yield_curve_inversion_warning")]
    pub yield_curve_inversion_warning: f64,
    #[serde(default = "d_yield_curve_inversion_critical")]
    pub yield_curve_inversion_critical: f64,
    #[serde(default = "d_ted_spread_warning")]
    pub ted_spread_warning: f64,
    #[serde(default = "d_ted_spread_critical")]
    pub ted_spread_critical: f64,
    #[serde(default = "d_dxy_elevated")]
    pub dxy_elevated: f64,
    #[serde(default = "d_dxy_critical")]
    pub dxy_critical: f64,
    #[serde(default = "d_usdjpy_warning")]
    pub usdjpy_warning: f64,
    #[serde(default = "d_usdjpy_critical")]
    pub usdjpy_critical: f64,
    #[serde(default = "d_kre_weekly_warning")]
    pub kre_weekly_warning: f64,
    #[serde(default = "d_kre_weekly_critical")]
    pub kre_weekly_critical: f64,
    #[serde(default = "d_silver_weekly_warning")]
    pub silver_weekly_warning: f64,
    #[serde(default = "d_silver_weekly_critical")]
    pub silver_weekly_critical: f64,
    #[serde(default = "d_fed_bs_weekly_warning")]
    pub fed_balance_sheet_weekly_warning: f64,
    #[serde(default = "d_fed_bs_weekly_critical")]
    pub fed_balance_sheet_weekly_critical: f64,
    #[serde(default = "d_crisis_level1_size_reduction_pct")]
    pub crisis_level1_size_reduction_pct: f64,
    #[serde(default = "d_crisis_level1_stop_loss_pct")]
    pub crisis_level1_stop_loss_pct: f64,
    /// Level 2: close positions whose P&L is below this percent.
    #[serde(default = "d_crisis_level2_min_profit_to_hold")]
    pub crisis_level2_min_profit_to_hold: f64,
}

impl Default for CrisisParams {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Gatherer source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatherParams {
    #[serde(default = "d_forum_subgroups")]
    pub forum_subgroups: Vec<String>,
    /// User-supplied ticker blacklist, merged with the built-in one.
    #[serde(default)]
    pub ticker_blacklist: Vec<String>,
    #[serde(default = "d_source_weight_stocktwits")]
    pub source_weight_stocktwits: f64,
    #[serde(default = "d_source_weight_forum")]
    pub source_weight_forum: f64,
    #[serde(default = "d_source_weight_crypto")]
    pub source_weight_crypto: f64,
}

impl Default for GatherParams {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

// =============================================================================
// AgentConfig
// =============================================================================

/// Top-level agent configuration.
///
/// Serialized flat: every group is `#[serde(flatten)]`, so the on-disk JSON
/// and the PATCH body are a single object of scalar keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(flatten)]
    pub sched: SchedulingParams,
    #[serde(flatten)]
    pub stock: StockParams,
    #[serde(flatten)]
    pub stale: StaleParams,
    #[serde(flatten)]
    pub llm: LlmParams,
    #[serde(flatten)]
    pub options: OptionsParams,
    #[serde(flatten)]
    pub crypto: CryptoParams,
    #[serde(flatten)]
    pub dex: DexParams,
    #[serde(flatten)]
    pub crisis: CrisisParams,
    #[serde(flatten)]
    pub gather: GatherParams,
}

impl AgentConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Missing fields are filled with defaults; unknown keys ignored. A
    /// missing file is an error so the caller can fall back to defaults with
    /// a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read agent config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse agent config from {}", path.display()))?;

        info!(path = %path.display(), "agent config loaded");
        Ok(config)
    }

    /// Persist the current configuration atomically (write `.tmp`, rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise agent config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "agent config saved (atomic)");
        Ok(())
    }

    /// Shallow-merge a JSON patch into this config: each top-level key in
    /// `patch` replaces the corresponding key; everything else is untouched.
    /// Unknown keys are ignored. Returns the merged config.
    pub fn merged_with(&self, patch: &serde_json::Value) -> Result<Self> {
        let mut current = serde_json::to_value(self).context("serialise current config")?;

        if let (Some(obj), Some(patch_obj)) = (current.as_object_mut(), patch.as_object()) {
            for (key, value) in patch_obj {
                obj.insert(key.clone(), value.clone());
            }
        }

        let merged: Self =
            serde_json::from_value(current).context("merged config failed validation")?;
        Ok(merged)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.sched.tick_interval_ms, 30_000);
        assert_eq!(cfg.stock.max_positions, 3);
        assert!((cfg.stock.position_size_pct_of_cash - 20.0).abs() < f64::EPSILON);
        assert_eq!(cfg.stock.allowed_exchanges.len(), 5);
        assert!(cfg.stock.allowed_exchanges.contains(&"NYSE".to_string()));
        assert!((cfg.dex.dex_lottery_position_sol - 0.02).abs() < f64::EPSILON);
        assert_eq!(cfg.dex.dex_circuit_breaker_losses, 3);
        assert!(cfg.crisis.crisis_mode_enabled);
        assert_eq!(cfg.llm.llm_model_smart, "gpt-4o");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: AgentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.sched.data_poll_interval_ms, 300_000);
        assert!(cfg.dex.dex_enabled);
        assert!(!cfg.options.options_enabled);
        assert!(!cfg.crypto.crypto_enabled);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "max_positions": 7, "dex_enabled": false }"#;
        let cfg: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.stock.max_positions, 7);
        assert!(!cfg.dex.dex_enabled);
        assert_eq!(cfg.dex.dex_max_positions, 5);
        assert!((cfg.stock.take_profit_pct - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let json = r#"{ "some_future_key": 42, "max_positions": 2 }"#;
        let cfg: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.stock.max_positions, 2);
    }

    #[test]
    fn roundtrip_serialisation_is_flat() {
        let cfg = AgentConfig::default();
        let value = serde_json::to_value(&cfg).unwrap();
        // Flattened: tier keys sit at the top level.
        assert!(value.get("dex_lottery_position_sol").is_some());
        assert!(value.get("vix_critical").is_some());
        let cfg2: AgentConfig = serde_json::from_value(value).unwrap();
        assert_eq!(cfg2.stock.max_positions, cfg.stock.max_positions);
        assert_eq!(cfg2.dex.dex_max_positions, cfg.dex.dex_max_positions);
    }

    #[test]
    fn shallow_merge_replaces_only_patched_keys() {
        let cfg = AgentConfig::default();
        let patch = serde_json::json!({ "take_profit_pct": 12.5, "crypto_enabled": true });
        let merged = cfg.merged_with(&patch).unwrap();
        assert!((merged.stock.take_profit_pct - 12.5).abs() < f64::EPSILON);
        assert!(merged.crypto.crypto_enabled);
        assert_eq!(merged.stock.max_positions, cfg.stock.max_positions);
    }

    #[test]
    fn legacy_liquidity_key_tightens_tier_filters() {
        let json = r#"{ "dex_min_liquidity": 40000.0 }"#;
        let cfg: AgentConfig = serde_json::from_str(json).unwrap();
        // Legacy floor raises lax tiers but never loosens strict ones.
        assert!((cfg.dex.tier_min_liquidity(DexTier::Lottery) - 40_000.0).abs() < f64::EPSILON);
        assert!(
            (cfg.dex.tier_min_liquidity(DexTier::Established) - 50_000.0).abs() < f64::EPSILON
        );
    }

    #[test]
    fn tier_honeypot_minimums() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.dex.tier_min_sells(DexTier::Microspray), 3);
        assert_eq!(cfg.dex.tier_min_sells(DexTier::Lottery), 5);
        assert_eq!(cfg.dex.tier_min_sells(DexTier::Breakout), 5);
        assert_eq!(cfg.dex.tier_min_sells(DexTier::Early), 10);
        assert_eq!(cfg.dex.tier_min_sells(DexTier::Established), 10);
    }
}
