// =============================================================================
// DEX screener reference client — six discovery feeds + token resolution
// =============================================================================
//
// All requests flow through a per-handle throttle (>= 1100 ms between
// requests) so the scanner can union every feed in one pass without tripping
// the upstream rate limit. Throttle state lives on the handle, not in a
// module global, so independent instances (and tests) never share limiters.
// =============================================================================

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};
use crate::providers::{DexPairInfo, DexScreener};

/// Minimum spacing between any two screener requests.
const MIN_REQUEST_SPACING: Duration = Duration::from_millis(1100);

/// DexScreener-compatible REST client.
pub struct DexScreenerClient {
    client: reqwest::Client,
    base_url: String,
    last_request: Mutex<Option<Instant>>,
}

impl DexScreenerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            last_request: Mutex::new(None),
        }
    }

    /// Standard public endpoint.
    pub fn public() -> Self {
        Self::new("https://api.dexscreener.com")
    }

    /// Enforce the inter-request spacing, sleeping if needed.
    async fn throttle(&self) {
        let wait = {
            let last = self.last_request.lock();
            last.map(|at| MIN_REQUEST_SPACING.saturating_sub(at.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        *self.last_request.lock() = Some(Instant::now());
    }

    async fn get_json(&self, path: &str) -> AgentResult<serde_json::Value> {
        self.throttle().await;
        let url = format!("{}{}", self.base_url, path);

        let resp = self.client.get(&url).send().await.map_err(|e| {
            AgentError::ProviderTransient {
                provider: "dex_screener".to_string(),
                message: format!("GET {path} failed: {e}"),
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::from_http(
                "dex_screener",
                Some(status.as_u16()),
                format!("GET {path} returned {status}: {body}"),
            ));
        }

        resp.json()
            .await
            .map_err(|e| AgentError::Parse(format!("screener response from {path}: {e}")))
    }

    /// Parse a raw pair object into the normalized payload the scanner
    /// consumes. Returns `None` for rows missing the fields we require.
    fn parse_pair(raw: &serde_json::Value) -> Option<DexPairInfo> {
        let token_address = raw["baseToken"]["address"].as_str()?.to_string();
        let pair_address = raw["pairAddress"].as_str().unwrap_or_default().to_string();

        let price_usd = raw["priceUsd"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| raw["priceUsd"].as_f64())
            .unwrap_or(0.0);

        let change = |window: &str| raw["priceChange"][window].as_f64().unwrap_or(0.0);
        let volume = |window: &str| raw["volume"][window].as_f64().unwrap_or(0.0);
        let txn = |window: &str, side: &str| {
            raw["txns"][window][side].as_u64().unwrap_or(0) as u32
        };

        let pair_created_at = raw["pairCreatedAt"]
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        let info = &raw["info"];
        let has_website = info["websites"]
            .as_array()
            .map(|w| !w.is_empty())
            .unwrap_or(false);
        let socials: Vec<String> = info["socials"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s["type"].as_str().map(|t| t.to_lowercase()))
                    .collect()
            })
            .unwrap_or_default();

        Some(DexPairInfo {
            chain_id: raw["chainId"].as_str().unwrap_or_default().to_string(),
            pair_address,
            token_address,
            symbol: raw["baseToken"]["symbol"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            price_usd,
            change_5m: change("m5"),
            change_1h: change("h1"),
            change_6h: change("h6"),
            change_24h: change("h24"),
            volume_5m: volume("m5"),
            volume_1h: volume("h1"),
            volume_6h: volume("h6"),
            volume_24h: volume("h24"),
            liquidity_usd: raw["liquidity"]["usd"].as_f64().unwrap_or(0.0),
            market_cap: raw["marketCap"].as_f64().unwrap_or(0.0),
            pair_created_at,
            buys_1h: txn("h1", "buys"),
            sells_1h: txn("h1", "sells"),
            buys_24h: txn("h24", "buys"),
            sells_24h: txn("h24", "sells"),
            has_website,
            has_twitter: socials.iter().any(|s| s == "twitter"),
            has_telegram: socials.iter().any(|s| s == "telegram"),
            boost_count: raw["boosts"]["active"].as_u64().unwrap_or(0) as u32,
        })
    }

    fn parse_pairs(body: &serde_json::Value) -> Vec<DexPairInfo> {
        let rows = body["pairs"]
            .as_array()
            .or_else(|| body.as_array())
            .cloned()
            .unwrap_or_default();
        rows.iter().filter_map(Self::parse_pair).collect()
    }

    /// Feeds that return bare token references are resolved into full pair
    /// payloads through the multi-token endpoint.
    async fn resolve_token_feed(&self, path: &str) -> AgentResult<Vec<DexPairInfo>> {
        let body = self.get_json(path).await?;
        let rows = body.as_array().cloned().unwrap_or_default();

        let addresses: Vec<String> = rows
            .iter()
            .filter(|r| r["chainId"].as_str() == Some("solana"))
            .filter_map(|r| r["tokenAddress"].as_str().map(|s| s.to_string()))
            .take(30)
            .collect();

        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        self.get_multiple_tokens("solana", &addresses).await
    }
}

#[async_trait]
impl DexScreener for DexScreenerClient {
    async fn latest_profiles(&self) -> AgentResult<Vec<DexPairInfo>> {
        self.resolve_token_feed("/token-profiles/latest/v1").await
    }

    async fn latest_boosts(&self) -> AgentResult<Vec<DexPairInfo>> {
        self.resolve_token_feed("/token-boosts/latest/v1").await
    }

    async fn top_boosts(&self) -> AgentResult<Vec<DexPairInfo>> {
        self.resolve_token_feed("/token-boosts/top/v1").await
    }

    async fn community_takeovers(&self) -> AgentResult<Vec<DexPairInfo>> {
        self.resolve_token_feed("/community-takeovers/latest/v1").await
    }

    async fn latest_ads(&self) -> AgentResult<Vec<DexPairInfo>> {
        self.resolve_token_feed("/ads/latest/v1").await
    }

    async fn search(&self, query: &str) -> AgentResult<Vec<DexPairInfo>> {
        let body = self
            .get_json(&format!("/latest/dex/search?q={query}"))
            .await?;
        let pairs = Self::parse_pairs(&body);
        debug!(query, count = pairs.len(), "search feed parsed");
        Ok(pairs)
    }

    async fn get_multiple_tokens(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> AgentResult<Vec<DexPairInfo>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        // The endpoint accepts up to 30 comma-separated addresses.
        let joined = addresses
            .iter()
            .take(30)
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        let body = self
            .get_json(&format!("/tokens/v1/{chain}/{joined}"))
            .await?;
        let pairs = Self::parse_pairs(&body);
        if pairs.len() < addresses.len().min(30) {
            warn!(
                requested = addresses.len().min(30),
                resolved = pairs.len(),
                "some tokens did not resolve to pairs"
            );
        }
        Ok(pairs)
    }
}

impl std::fmt::Debug for DexScreenerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DexScreenerClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
