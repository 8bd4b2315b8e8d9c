// =============================================================================
// DEX chart reference client — OHLCV with throttle and 429 backoff
// =============================================================================
//
// GeckoTerminal-style OHLCV endpoint. Two upstream behaviors get special
// treatment:
//   - 429: retried with a 5 s -> 10 s -> 15 s backoff ladder, then transient.
//   - 400: the token is too new to have chart data; surfaces as `Ok(None)`
//     so the chart gate is skipped rather than rejecting the candidate.
// =============================================================================

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};
use crate::providers::{Candle, DexChart};

/// Minimum spacing between chart requests.
const MIN_REQUEST_SPACING: Duration = Duration::from_millis(2500);

/// Backoff ladder applied to consecutive 429 responses.
const BACKOFF_SECS: [u64; 3] = [5, 10, 15];

/// GeckoTerminal-compatible OHLCV client.
pub struct GeckoChartClient {
    client: reqwest::Client,
    base_url: String,
    network: String,
    last_request: Mutex<Option<Instant>>,
}

impl GeckoChartClient {
    pub fn new(base_url: impl Into<String>, network: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            network: network.into(),
            last_request: Mutex::new(None),
        }
    }

    /// Public endpoint for Solana pools.
    pub fn public() -> Self {
        Self::new("https://api.geckoterminal.com/api/v2", "solana")
    }

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

    fn parse_candles(body: &serde_json::Value) -> Vec<Candle> {
        // Response shape: data.attributes.ohlcv_list = [[ts, o, h, l, c, v], ...]
        body["data"]["attributes"]["ohlcv_list"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let arr = row.as_array()?;
                        if arr.len() < 6 {
                            return None;
                        }
                        Some(Candle {
                            timestamp: arr[0].as_i64()?,
                            open: arr[1].as_f64()?,
                            high: arr[2].as_f64()?,
                            low: arr[3].as_f64()?,
                            close: arr[4].as_f64()?,
                            volume: arr[5].as_f64().unwrap_or(0.0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DexChart for GeckoChartClient {
    async fn ohlcv(
        &self,
        token_address: &str,
        interval_minutes: u32,
        limit: u32,
    ) -> AgentResult<Option<Vec<Candle>>> {
        let url = format!(
            "{}/networks/{}/pools/{}/ohlcv/minute?aggregate={}&limit={}",
            self.base_url, self.network, token_address, interval_minutes, limit
        );

        for (attempt, backoff) in BACKOFF_SECS.iter().enumerate() {
            self.throttle().await;

            let resp = self.client.get(&url).send().await.map_err(|e| {
                AgentError::ProviderTransient {
                    provider: "dex_chart".to_string(),
                    message: format!("GET ohlcv failed: {e}"),
                }
            })?;

            let status = resp.status().as_u16();
            match status {
                200 => {
                    let body: serde_json::Value = resp.json().await.map_err(|e| {
                        AgentError::Parse(format!("chart response not JSON: {e}"))
                    })?;
                    let candles = Self::parse_candles(&body);
                    debug!(
                        token = token_address,
                        interval_minutes,
                        count = candles.len(),
                        "ohlcv fetched"
                    );
                    return Ok(Some(candles));
                }
                // Token too new for chart data: no gate, not an error.
                400 => {
                    debug!(token = token_address, "chart data unavailable (token too new)");
                    return Ok(None);
                }
                429 => {
                    warn!(
                        token = token_address,
                        attempt = attempt + 1,
                        backoff_secs = backoff,
                        "chart provider rate limited — backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(*backoff)).await;
                }
                other => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(AgentError::from_http(
                        "dex_chart",
                        Some(other),
                        format!("ohlcv returned {other}: {body}"),
                    ));
                }
            }
        }

        Err(AgentError::ProviderTransient {
            provider: "dex_chart".to_string(),
            message: "ohlcv rate limited after all backoff attempts".to_string(),
        })
    }
}

impl std::fmt::Debug for GeckoChartClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeckoChartClient")
            .field("base_url", &self.base_url)
            .field("network", &self.network)
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
    fn parse_candles_from_ohlcv_list() {
        let body = serde_json::json!({
            "data": { "attributes": { "ohlcv_list": [
                [1700000000, 1.0, 1.2, 0.9, 1.1, 5000.0],
                [1700000300, 1.1, 1.3, 1.0, 1.25, 6000.0]
            ]}}
        });
        let candles = GeckoChartClient::parse_candles(&body);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 1.1);
        assert_eq!(candles[1].volume, 6000.0);
    }

    #[test]
    fn parse_candles_skips_malformed_rows() {
        let body = serde_json::json!({
            "data": { "attributes": { "ohlcv_list": [
                [1700000000, 1.0],
                [1700000300, 1.1, 1.3, 1.0, 1.25, 6000.0]
            ]}}
        });
        let candles = GeckoChartClient::parse_candles(&body);
        assert_eq!(candles.len(), 1);
    }

    #[test]
    fn parse_candles_empty_when_shape_missing() {
        let candles = GeckoChartClient::parse_candles(&serde_json::json!({}));
        assert!(candles.is_empty());
    }
}
