// =============================================================================
// Alpaca-style brokerage reference client — key/secret header auth
// =============================================================================
//
// Implements the Brokerage, MarketData, and OptionsData contracts against an
// Alpaca-compatible REST surface. Paper base URL by default; the live URL
// must be supplied explicitly.
//
// SECURITY: the secret key is sent as a header, never logged or serialized.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};
use crate::providers::{
    Account, AssetInfo, Brokerage, MarketClock, MarketData, OptionChain, OptionContract,
    OptionSnapshot, OptionsData, OrderRequest, SymbolSnapshot,
};
use crate::types::{AssetClass, Position};

/// How long a fetched market clock stays fresh.
const CLOCK_TTL: Duration = Duration::from_secs(60);

/// Alpaca-compatible REST client.
pub struct AlpacaClient {
    client: reqwest::Client,
    trading_url: String,
    data_url: String,
    clock_cache: Mutex<Option<(Instant, MarketClock)>>,
}

impl AlpacaClient {
    /// Create a client against the given trading/data base URLs.
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        trading_url: impl Into<String>,
        data_url: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();
        let api_secret = api_secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("APCA-API-KEY-ID", val);
        }
        if let Ok(val) = HeaderValue::from_str(&api_secret) {
            default_headers.insert("APCA-API-SECRET-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            trading_url: trading_url.into(),
            data_url: data_url.into(),
            clock_cache: Mutex::new(None),
        }
    }

    /// Paper-trading client with the standard Alpaca endpoints.
    pub fn paper(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self::new(
            api_key,
            api_secret,
            "https://paper-api.alpaca.markets",
            "https://data.alpaca.markets",
        )
    }

    async fn get_json(&self, url: &str) -> AgentResult<serde_json::Value> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            AgentError::ProviderTransient {
                provider: "brokerage".to_string(),
                message: format!("GET {url} failed: {e}"),
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::from_http(
                "brokerage",
                Some(status.as_u16()),
                format!("GET {url} returned {status}: {body}"),
            ));
        }

        resp.json().await.map_err(|e| {
            AgentError::Parse(format!("brokerage response from {url} not JSON: {e}"))
        })
    }

    fn parse_f64(value: &serde_json::Value) -> f64 {
        if let Some(s) = value.as_str() {
            s.parse().unwrap_or(0.0)
        } else {
            value.as_f64().unwrap_or(0.0)
        }
    }

    fn parse_asset_class(raw: &str) -> AssetClass {
        match raw {
            "us_option" => AssetClass::UsOption,
            "crypto" => AssetClass::Crypto,
            _ => AssetClass::UsEquity,
        }
    }
}

#[async_trait]
impl Brokerage for AlpacaClient {
    async fn get_account(&self) -> AgentResult<Account> {
        let body = self
            .get_json(&format!("{}/v2/account", self.trading_url))
            .await?;
        Ok(Account {
            cash: Self::parse_f64(&body["cash"]),
            equity: Self::parse_f64(&body["equity"]),
            buying_power: Self::parse_f64(&body["buying_power"]),
        })
    }

    async fn get_positions(&self) -> AgentResult<Vec<Position>> {
        let body = self
            .get_json(&format!("{}/v2/positions", self.trading_url))
            .await?;
        let rows = body.as_array().cloned().unwrap_or_default();

        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            positions.push(Position {
                symbol: row["symbol"].as_str().unwrap_or_default().to_string(),
                qty: Self::parse_f64(&row["qty"]),
                side: row["side"].as_str().unwrap_or("long").to_string(),
                market_value: Self::parse_f64(&row["market_value"]),
                unrealized_pl: Self::parse_f64(&row["unrealized_pl"]),
                current_price: Self::parse_f64(&row["current_price"]),
                asset_class: Self::parse_asset_class(
                    row["asset_class"].as_str().unwrap_or("us_equity"),
                ),
                avg_entry_price: Self::parse_f64(&row["avg_entry_price"]),
            });
        }

        debug!(count = positions.len(), "positions fetched");
        Ok(positions)
    }

    async fn get_clock(&self) -> AgentResult<MarketClock> {
        // Cheap cached call: the scheduler hits this every tick.
        if let Some((at, clock)) = self.clock_cache.lock().clone() {
            if at.elapsed() < CLOCK_TTL {
                return Ok(clock);
            }
        }

        let body = self
            .get_json(&format!("{}/v2/clock", self.trading_url))
            .await?;
        let clock = MarketClock {
            is_open: body["is_open"].as_bool().unwrap_or(false),
            next_open: body["next_open"]
                .as_str()
                .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
            next_close: body["next_close"]
                .as_str()
                .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        };

        *self.clock_cache.lock() = Some((Instant::now(), clock.clone()));
        Ok(clock)
    }

    async fn get_asset(&self, symbol: &str) -> AgentResult<Option<AssetInfo>> {
        let url = format!("{}/v2/assets/{}", self.trading_url, symbol);
        match self.get_json(&url).await {
            Ok(body) => Ok(Some(AssetInfo {
                symbol: body["symbol"].as_str().unwrap_or(symbol).to_string(),
                exchange: body["exchange"].as_str().unwrap_or_default().to_string(),
                tradable: body["tradable"].as_bool().unwrap_or(false),
            })),
            // 404 means the symbol simply does not exist.
            Err(AgentError::ProviderPermanent { message, .. }) if message.contains("404") => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_order(&self, order: OrderRequest) -> AgentResult<serde_json::Value> {
        let url = format!("{}/v2/orders", self.trading_url);

        debug!(symbol = %order.symbol, side = ?order.side, "submitting order");

        let resp = self
            .client
            .post(&url)
            .json(&order)
            .send()
            .await
            .map_err(|e| AgentError::ProviderTransient {
                provider: "brokerage".to_string(),
                message: format!("POST /v2/orders failed: {e}"),
            })?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.unwrap_or_default();

        if !status.is_success() {
            warn!(symbol = %order.symbol, %status, "order rejected by brokerage");
            return Err(AgentError::from_http(
                "brokerage",
                Some(status.as_u16()),
                format!("order for {} returned {status}: {body}", order.symbol),
            ));
        }

        Ok(body)
    }

    async fn close_position(&self, symbol: &str) -> AgentResult<()> {
        let url = format!("{}/v2/positions/{}", self.trading_url, symbol);
        let resp = self.client.delete(&url).send().await.map_err(|e| {
            AgentError::ProviderTransient {
                provider: "brokerage".to_string(),
                message: format!("DELETE position {symbol} failed: {e}"),
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::from_http(
                "brokerage",
                Some(status.as_u16()),
                format!("close {symbol} returned {status}: {body}"),
            ));
        }

        debug!(symbol, "position close submitted");
        Ok(())
    }
}

#[async_trait]
impl MarketData for AlpacaClient {
    async fn get_snapshot(&self, symbol: &str) -> AgentResult<SymbolSnapshot> {
        let url = format!("{}/v2/stocks/{}/snapshot", self.data_url, symbol);
        let body = self.get_json(&url).await?;

        let latest_price = Self::parse_f64(&body["latestTrade"]["p"]);
        let prev_close = body["prevDailyBar"]["c"].as_f64();

        Ok(SymbolSnapshot {
            symbol: symbol.to_string(),
            latest_price,
            prev_daily_close: prev_close,
        })
    }

    async fn get_crypto_snapshot(&self, symbol: &str) -> AgentResult<SymbolSnapshot> {
        let encoded = symbol.replace('/', "%2F");
        let url = format!(
            "{}/v1beta3/crypto/us/snapshots?symbols={}",
            self.data_url, encoded
        );
        let body = self.get_json(&url).await?;

        let snap = &body["snapshots"][symbol];
        let latest_price = Self::parse_f64(&snap["latestTrade"]["p"]);
        let prev_close = snap["prevDailyBar"]["c"].as_f64();

        Ok(SymbolSnapshot {
            symbol: symbol.to_string(),
            latest_price,
            prev_daily_close: prev_close,
        })
    }
}

#[async_trait]
impl OptionsData for AlpacaClient {
    async fn get_expirations(&self, symbol: &str) -> AgentResult<Vec<NaiveDate>> {
        let url = format!(
            "{}/v2/options/contracts?underlying_symbols={}&limit=500",
            self.trading_url, symbol
        );
        let body = self.get_json(&url).await?;

        let mut expirations: Vec<NaiveDate> = body["option_contracts"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r["expiration_date"].as_str())
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        expirations.sort();
        expirations.dedup();
        Ok(expirations)
    }

    async fn get_chain(&self, symbol: &str, expiration: NaiveDate) -> AgentResult<OptionChain> {
        let url = format!(
            "{}/v2/options/contracts?underlying_symbols={}&expiration_date={}&limit=500",
            self.trading_url, symbol, expiration
        );
        let body = self.get_json(&url).await?;

        let mut chain = OptionChain::default();
        for row in body["option_contracts"].as_array().cloned().unwrap_or_default() {
            let contract = OptionContract {
                symbol: row["symbol"].as_str().unwrap_or_default().to_string(),
                strike: Self::parse_f64(&row["strike_price"]),
                expiration,
                contract_type: row["type"].as_str().unwrap_or_default().to_string(),
            };
            match contract.contract_type.as_str() {
                "call" => chain.calls.push(contract),
                "put" => chain.puts.push(contract),
                _ => {}
            }
        }

        Ok(chain)
    }

    async fn get_option_snapshot(&self, option_symbol: &str) -> AgentResult<OptionSnapshot> {
        let url = format!(
            "{}/v1beta1/options/snapshots?symbols={}",
            self.data_url, option_symbol
        );
        let body = self.get_json(&url).await?;

        let snap = &body["snapshots"][option_symbol];
        Ok(OptionSnapshot {
            symbol: option_symbol.to_string(),
            bid: Self::parse_f64(&snap["latestQuote"]["bp"]),
            ask: Self::parse_f64(&snap["latestQuote"]["ap"]),
            delta: snap["greeks"]["delta"].as_f64(),
        })
    }
}

impl std::fmt::Debug for AlpacaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaClient")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("trading_url", &self.trading_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_f64_accepts_strings_and_numbers() {
        assert_eq!(AlpacaClient::parse_f64(&serde_json::json!("12.5")), 12.5);
        assert_eq!(AlpacaClient::parse_f64(&serde_json::json!(3.25)), 3.25);
        assert_eq!(AlpacaClient::parse_f64(&serde_json::json!(null)), 0.0);
    }

    #[test]
    fn asset_class_mapping() {
        assert_eq!(
            AlpacaClient::parse_asset_class("us_option"),
            AssetClass::UsOption
        );
        assert_eq!(AlpacaClient::parse_asset_class("crypto"), AssetClass::Crypto);
        assert_eq!(
            AlpacaClient::parse_asset_class("us_equity"),
            AssetClass::UsEquity
        );
    }

    #[test]
    fn debug_redacts_credentials() {
        let client = AlpacaClient::paper("AKID12345", "sk_live_topsecret");
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("sk_live_topsecret"));
        assert!(!rendered.contains("AKID12345"));
        assert!(rendered.contains("<redacted>"));
    }
}
