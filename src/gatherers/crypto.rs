// =============================================================================
// Crypto-momentum gatherer — snapshot vs previous daily close
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::{CryptoParams, GatherParams};
use crate::error::AgentResult;
use crate::providers::MarketData;
use crate::types::{Signal, SignalSource};
use crate::util::normalize_crypto_symbol;

/// Emit one signal per configured symbol whose |momentum| clears the
/// threshold. Snapshot failures skip the symbol, never the pass.
pub async fn gather(
    market_data: &dyn MarketData,
    crypto: &CryptoParams,
    params: &GatherParams,
    now: DateTime<Utc>,
) -> AgentResult<Vec<Signal>> {
    let mut signals = Vec::new();

    for raw_symbol in &crypto.crypto_symbols {
        let symbol = normalize_crypto_symbol(raw_symbol);

        let snapshot = match market_data.get_crypto_snapshot(&symbol).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "crypto snapshot failed — skipping symbol");
                continue;
            }
        };

        let Some(prev_close) = snapshot.prev_daily_close else {
            continue;
        };
        if prev_close <= 0.0 || snapshot.latest_price <= 0.0 {
            continue;
        }

        let momentum = (snapshot.latest_price - prev_close) / prev_close * 100.0;
        if momentum.abs() < crypto.crypto_momentum_threshold {
            continue;
        }

        // Direction from momentum, magnitude saturating at a 10 % daily move.
        let sentiment = (momentum / 10.0).clamp(-1.0, 1.0);

        signals.push(Signal {
            symbol: symbol.clone(),
            source: SignalSource::CryptoMomentum,
            sentiment,
            weighted_sentiment: sentiment * params.source_weight_crypto,
            volume: 1,
            timestamp: now,
            reason: format!("crypto momentum {momentum:+.2}% vs prev daily close"),
            upvotes: None,
            momentum_pct: Some(momentum),
            is_crypto: true,
            price: Some(snapshot.latest_price),
            sources: vec!["crypto_momentum".to_string()],
        });
    }

    debug!(count = signals.len(), "crypto gatherer produced signals");
    Ok(signals)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::providers::SymbolSnapshot;
    use async_trait::async_trait;

    struct FakeMarketData;

    #[async_trait]
    impl MarketData for FakeMarketData {
        async fn get_snapshot(&self, _symbol: &str) -> AgentResult<SymbolSnapshot> {
            Err(AgentError::InvariantViolation("unused".into()))
        }
        async fn get_crypto_snapshot(&self, symbol: &str) -> AgentResult<SymbolSnapshot> {
            let (latest, prev) = match symbol {
                "BTC/USD" => (105_000.0, 100_000.0), // +5 %
                "ETH/USD" => (3_030.0, 3_000.0),     // +1 %
                "SOL/USD" => (180.0, 200.0),         // -10 %
                _ => (0.0, 0.0),
            };
            Ok(SymbolSnapshot {
                symbol: symbol.to_string(),
                latest_price: latest,
                prev_daily_close: Some(prev),
            })
        }
    }

    #[tokio::test]
    async fn only_momentum_above_threshold_emits() {
        let crypto = CryptoParams::default(); // threshold 3 %
        let params = GatherParams::default();
        let signals = gather(&FakeMarketData, &crypto, &params, Utc::now())
            .await
            .unwrap();

        let symbols: Vec<&str> = signals.iter().map(|s| s.symbol.as_str()).collect();
        assert!(symbols.contains(&"BTC/USD"));
        assert!(!symbols.contains(&"ETH/USD"));
        assert!(symbols.contains(&"SOL/USD"));

        let sol = signals.iter().find(|s| s.symbol == "SOL/USD").unwrap();
        assert!(sol.is_crypto);
        assert!(sol.sentiment < 0.0);
        assert!((sol.momentum_pct.unwrap() + 10.0).abs() < 1e-9);
    }
}
