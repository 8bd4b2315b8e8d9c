// =============================================================================
// Valid-ticker cache — two-tier symbol validation
// =============================================================================
//
// Tier 1: the SEC common-tickers set, refreshed at most daily. Tier 2: an
// on-demand brokerage asset lookup whose boolean result is cached per symbol.
// Both tiers are tolerant: a failed SEC refresh keeps the previous set, and a
// failed brokerage lookup leaves the symbol unvalidated for this pass.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::providers::Brokerage;

/// How long the SEC set stays fresh.
const SEC_REFRESH: Duration = Duration::from_secs(24 * 3600);

/// Two-tier ticker validator.
pub struct TickerValidator {
    client: reqwest::Client,
    sec_url: String,
    sec_tickers: RwLock<HashSet<String>>,
    sec_fetched_at: RwLock<Option<Instant>>,
    asset_cache: RwLock<HashMap<String, bool>>,
}

impl TickerValidator {
    pub fn new(sec_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("polaris-bot/1.0 research")
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            sec_url: sec_url.into(),
            sec_tickers: RwLock::new(HashSet::new()),
            sec_fetched_at: RwLock::new(None),
            asset_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn public() -> Self {
        Self::new("https://www.sec.gov/files/company_tickers.json")
    }

    /// Refresh the SEC set if stale. Failure keeps the previous set.
    async fn refresh_sec_set(&self) {
        let fresh = self
            .sec_fetched_at
            .read()
            .map(|at| at.elapsed() < SEC_REFRESH)
            .unwrap_or(false);
        if fresh {
            return;
        }

        match self.fetch_sec_set().await {
            Ok(set) => {
                debug!(count = set.len(), "SEC ticker set refreshed");
                *self.sec_tickers.write() = set;
                *self.sec_fetched_at.write() = Some(Instant::now());
            }
            Err(e) => {
                warn!(error = %e, "SEC ticker refresh failed — keeping previous set");
                // Still bump the clock so we do not hammer a failing source.
                *self.sec_fetched_at.write() = Some(Instant::now());
            }
        }
    }

    async fn fetch_sec_set(&self) -> anyhow::Result<HashSet<String>> {
        let body: serde_json::Value = self
            .client
            .get(&self.sec_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // Shape: { "0": {"ticker": "AAPL", ...}, "1": {...}, ... }
        let mut set = HashSet::new();
        if let Some(obj) = body.as_object() {
            for row in obj.values() {
                if let Some(ticker) = row["ticker"].as_str() {
                    set.insert(ticker.to_uppercase());
                }
            }
        }
        anyhow::ensure!(!set.is_empty(), "SEC payload contained no tickers");
        Ok(set)
    }

    /// Whether `symbol` is a real, tradable ticker.
    pub async fn is_valid(&self, symbol: &str, brokerage: &dyn Brokerage) -> bool {
        let symbol = symbol.to_uppercase();

        self.refresh_sec_set().await;
        if self.sec_tickers.read().contains(&symbol) {
            return true;
        }

        if let Some(&cached) = self.asset_cache.read().get(&symbol) {
            return cached;
        }

        match brokerage.get_asset(&symbol).await {
            Ok(asset) => {
                let valid = asset.map(|a| a.tradable).unwrap_or(false);
                self.asset_cache.write().insert(symbol.clone(), valid);
                debug!(symbol = %symbol, valid, "ticker validated via brokerage");
                valid
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "asset lookup failed — treating as invalid this pass");
                false
            }
        }
    }

    /// Seed the tier-1 set directly (tests, offline runs).
    pub fn seed_sec_set(&self, tickers: impl IntoIterator<Item = String>) {
        *self.sec_tickers.write() = tickers.into_iter().map(|t| t.to_uppercase()).collect();
        *self.sec_fetched_at.write() = Some(Instant::now());
    }
}

impl std::fmt::Debug for TickerValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerValidator")
            .field("sec_tickers", &self.sec_tickers.read().len())
            .field("asset_cache", &self.asset_cache.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, AgentResult};
    use crate::providers::{
        Account, AssetInfo, MarketClock, OrderRequest,
    };
    use crate::types::Position;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeBroker {
        lookups: AtomicU32,
        known: Vec<&'static str>,
    }

    #[async_trait]
    impl Brokerage for FakeBroker {
        async fn get_account(&self) -> AgentResult<Account> {
            Err(AgentError::InvariantViolation("unused".into()))
        }
        async fn get_positions(&self) -> AgentResult<Vec<Position>> {
            Ok(vec![])
        }
        async fn get_clock(&self) -> AgentResult<MarketClock> {
            Err(AgentError::InvariantViolation("unused".into()))
        }
        async fn get_asset(&self, symbol: &str) -> AgentResult<Option<AssetInfo>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.known.contains(&symbol).then(|| AssetInfo {
                symbol: symbol.to_string(),
                exchange: "NASDAQ".to_string(),
                tradable: true,
            }))
        }
        async fn create_order(&self, _order: OrderRequest) -> AgentResult<serde_json::Value> {
            Err(AgentError::InvariantViolation("unused".into()))
        }
        async fn close_position(&self, _symbol: &str) -> AgentResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn sec_set_short_circuits_brokerage() {
        let validator = TickerValidator::new("http://127.0.0.1:1/unreachable");
        validator.seed_sec_set(vec!["AAPL".to_string()]);
        let broker = FakeBroker {
            lookups: AtomicU32::new(0),
            known: vec![],
        };

        assert!(validator.is_valid("aapl", &broker).await);
        assert_eq!(broker.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn brokerage_result_is_cached() {
        let validator = TickerValidator::new("http://127.0.0.1:1/unreachable");
        validator.seed_sec_set(vec!["AAPL".to_string()]);
        let broker = FakeBroker {
            lookups: AtomicU32::new(0),
            known: vec!["NVDA"],
        };

        assert!(validator.is_valid("NVDA", &broker).await);
        assert!(validator.is_valid("NVDA", &broker).await);
        assert_eq!(broker.lookups.load(Ordering::SeqCst), 1);

        assert!(!validator.is_valid("FAKE", &broker).await);
        assert!(!validator.is_valid("FAKE", &broker).await);
        assert_eq!(broker.lookups.load(Ordering::SeqCst), 2);
    }
}
