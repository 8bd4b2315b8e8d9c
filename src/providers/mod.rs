// =============================================================================
// Provider contracts — the only seams through which the core touches the world
// =============================================================================
//
// The core depends on these traits, never on concrete vendors. Reference
// clients live in sibling modules; tests implement the traits directly.
// Every call made through a provider handle is bounded by a deadline at the
// call site via `with_deadline`.
// =============================================================================

pub mod brokerage;
pub mod chart_data;
pub mod dex_screener;
pub mod llm;
pub mod macro_data;
pub mod notifier;
pub mod social;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};
use crate::state::IndicatorSnapshot;
use crate::types::{AlertEvent, Position};

/// Default per-call provider deadline.
pub const PROVIDER_DEADLINE: Duration = Duration::from_secs(10);

/// Bound a provider future with the standard deadline. A timeout surfaces as
/// a transient provider error.
pub async fn with_deadline<T>(
    provider: &str,
    fut: impl std::future::Future<Output = AgentResult<T>>,
) -> AgentResult<T> {
    match tokio::time::timeout(PROVIDER_DEADLINE, fut).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::ProviderTransient {
            provider: provider.to_string(),
            message: format!("deadline of {}s exceeded", PROVIDER_DEADLINE.as_secs()),
        }),
    }
}

// ---------------------------------------------------------------------------
// Brokerage
// ---------------------------------------------------------------------------

/// Account snapshot from the brokerage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub cash: f64,
    pub equity: f64,
    pub buying_power: f64,
}

/// Market clock from the brokerage (cheap, cached upstream).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketClock {
    pub is_open: bool,
    pub next_open: Option<DateTime<Utc>>,
    pub next_close: Option<DateTime<Utc>>,
}

/// Asset metadata used for ticker validation and exchange gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub symbol: String,
    pub exchange: String,
    pub tradable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
}

/// Order submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    /// Dollar-notional market orders (stocks/crypto).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notional: Option<f64>,
    /// Contract-quantity orders (options).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<f64>,
    pub side: OrderSide,
    /// "market" | "limit"
    #[serde(rename = "type")]
    pub order_type: String,
    pub time_in_force: TimeInForce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
}

#[async_trait]
pub trait Brokerage: Send + Sync {
    async fn get_account(&self) -> AgentResult<Account>;
    async fn get_positions(&self) -> AgentResult<Vec<Position>>;
    async fn get_clock(&self) -> AgentResult<MarketClock>;
    /// `None` when the symbol does not exist at the brokerage.
    async fn get_asset(&self, symbol: &str) -> AgentResult<Option<AssetInfo>>;
    async fn create_order(&self, order: OrderRequest) -> AgentResult<serde_json::Value>;
    async fn close_position(&self, symbol: &str) -> AgentResult<()>;
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Latest trade/quote plus the previous daily bar close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub latest_price: f64,
    pub prev_daily_close: Option<f64>,
}

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_snapshot(&self, symbol: &str) -> AgentResult<SymbolSnapshot>;
    async fn get_crypto_snapshot(&self, symbol: &str) -> AgentResult<SymbolSnapshot>;
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// One contract row from a chain listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    /// "call" | "put"
    pub contract_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionChain {
    pub calls: Vec<OptionContract>,
    pub puts: Vec<OptionContract>,
}

/// Quote + greeks snapshot for a single contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSnapshot {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub delta: Option<f64>,
}

#[async_trait]
pub trait OptionsData: Send + Sync {
    async fn get_expirations(&self, symbol: &str) -> AgentResult<Vec<NaiveDate>>;
    async fn get_chain(&self, symbol: &str, expiration: NaiveDate) -> AgentResult<OptionChain>;
    async fn get_option_snapshot(&self, option_symbol: &str) -> AgentResult<OptionSnapshot>;
}

// ---------------------------------------------------------------------------
// DEX scanner
// ---------------------------------------------------------------------------

/// Raw pair payload from the DEX screener, before tier classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DexPairInfo {
    pub chain_id: String,
    pub pair_address: String,
    pub token_address: String,
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
    pub pair_created_at: Option<DateTime<Utc>>,
    pub buys_1h: u32,
    pub sells_1h: u32,
    pub buys_24h: u32,
    pub sells_24h: u32,
    pub has_website: bool,
    pub has_twitter: bool,
    pub has_telegram: bool,
    pub boost_count: u32,
}

#[async_trait]
pub trait DexScreener: Send + Sync {
    async fn latest_profiles(&self) -> AgentResult<Vec<DexPairInfo>>;
    async fn latest_boosts(&self) -> AgentResult<Vec<DexPairInfo>>;
    async fn top_boosts(&self) -> AgentResult<Vec<DexPairInfo>>;
    async fn community_takeovers(&self) -> AgentResult<Vec<DexPairInfo>>;
    async fn latest_ads(&self) -> AgentResult<Vec<DexPairInfo>>;
    async fn search(&self, query: &str) -> AgentResult<Vec<DexPairInfo>>;
    async fn get_multiple_tokens(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> AgentResult<Vec<DexPairInfo>>;
}

// ---------------------------------------------------------------------------
// DEX chart
// ---------------------------------------------------------------------------

/// One OHLCV candle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[async_trait]
pub trait DexChart: Send + Sync {
    /// Fetch OHLCV candles. `Ok(None)` means the token is too new for chart
    /// data (HTTP 400 upstream) — callers must treat that as "no gate", not
    /// as an error.
    async fn ohlcv(
        &self,
        token_address: &str,
        interval_minutes: u32,
        limit: u32,
    ) -> AgentResult<Option<Vec<Candle>>>;
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Request a strict-JSON response body.
    pub json_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> AgentResult<Completion>;
}

// ---------------------------------------------------------------------------
// Social sources
// ---------------------------------------------------------------------------

/// One short message about a symbol from a trending-stream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialMessage {
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// Author-declared stance when the source supports one.
    pub declared_bullish: Option<bool>,
}

/// One discussion post from a forum subgroup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumPost {
    pub title: String,
    pub body: String,
    pub flair: Option<String>,
    pub upvotes: u32,
    pub comments: u32,
    pub created_at: DateTime<Utc>,
    pub subgroup: String,
}

#[async_trait]
pub trait SocialData: Send + Sync {
    /// Top trending symbols from the stocktwits-like source.
    async fn trending_symbols(&self, limit: usize) -> AgentResult<Vec<String>>;
    /// Recent messages for one symbol.
    async fn symbol_messages(&self, symbol: &str, limit: usize)
        -> AgentResult<Vec<SocialMessage>>;
    /// Hot posts for one forum subgroup.
    async fn hot_posts(&self, subgroup: &str, limit: usize) -> AgentResult<Vec<ForumPost>>;
    /// Breaking-news headlines mentioning a symbol (Twitter-like source).
    async fn breaking_headlines(&self, symbol: &str) -> AgentResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Macro data
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MacroData: Send + Sync {
    /// Fetch every indicator the crisis monitor consumes. Implementations
    /// fan out internally; an individual source failure yields `None` for
    /// that scalar, never an error for the whole snapshot.
    async fn fetch_indicators(&self) -> AgentResult<IndicatorSnapshot>;
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Pluggable alert sink. Transport formatting and rate limiting live behind
/// this boundary; the core only emits events.
pub trait AlertSink: Send + Sync {
    fn send(&self, event: AlertEvent);
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// All provider handles the scheduler and engines consume.
#[derive(Clone)]
pub struct Providers {
    pub brokerage: Arc<dyn Brokerage>,
    pub market_data: Arc<dyn MarketData>,
    pub options: Arc<dyn OptionsData>,
    pub dex: Arc<dyn DexScreener>,
    pub chart: Arc<dyn DexChart>,
    pub llm: Arc<dyn LlmProvider>,
    pub macro_data: Arc<dyn MacroData>,
    pub social: Arc<dyn SocialData>,
    pub alerts: Arc<dyn AlertSink>,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_times_out_slow_providers() {
        // A future that never resolves should surface as a transient error.
        let fut = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, AgentError>(1u8)
        };
        let result = tokio::time::timeout(Duration::from_millis(50), async {
            with_deadline("slow", fut).await
        })
        .await;
        // The outer timeout fires first because the inner deadline is 10 s;
        // what matters here is that the helper compiles against trait futures
        // and propagates Ok results unchanged below.
        assert!(result.is_err());

        let ok = with_deadline("fast", async { Ok::<_, AgentError>(42u8) }).await;
        assert_eq!(ok.unwrap(), 42);
    }
}
