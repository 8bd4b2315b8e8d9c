// =============================================================================
// Gatherers phase — parallel source fan-out, merge, truncate
// =============================================================================
//
// Three source-specific gatherers run concurrently; a failing source is
// demoted for this pass only and never aborts the phase. The merge keeps the
// previous cache's rows for (symbol, source) pairs the fresh batch did not
// cover, drops anything older than 24 h, sorts by |weighted sentiment|, and
// truncates to the cache cap.
// =============================================================================

pub mod crypto;
pub mod forum;
pub mod stocktwits;
pub mod tickers;

use chrono::{DateTime, Utc};
use futures_util::future::join3;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::gatherers::tickers::TickerValidator;
use crate::providers::Providers;
use crate::types::Signal;

/// Result of one gatherers pass.
#[derive(Debug, Default)]
pub struct GatherOutcome {
    pub signals: Vec<Signal>,
    /// Sources that failed and were demoted for this pass.
    pub degraded_sources: Vec<String>,
}

/// Run every enabled gatherer in parallel and merge with the previous cache.
pub async fn run_gatherers(
    providers: &Providers,
    validator: &TickerValidator,
    config: &AgentConfig,
    previous_cache: &[Signal],
    now: DateTime<Utc>,
) -> GatherOutcome {
    let trending_fut = stocktwits::gather(providers.social.as_ref(), &config.gather, now);
    let forum_fut = forum::gather(
        providers.social.as_ref(),
        providers.brokerage.as_ref(),
        validator,
        &config.gather,
        now,
    );
    let crypto_fut = async {
        if config.crypto.crypto_enabled {
            crypto::gather(
                providers.market_data.as_ref(),
                &config.crypto,
                &config.gather,
                now,
            )
            .await
        } else {
            Ok(Vec::new())
        }
    };

    let (trending, forum, crypto) = join3(trending_fut, forum_fut, crypto_fut).await;

    let mut degraded = Vec::new();
    let mut fresh: Vec<Signal> = Vec::new();

    for (name, result) in [
        ("stocktwits", trending),
        ("forum", forum),
        ("crypto_momentum", crypto),
    ] {
        match result {
            Ok(mut signals) => fresh.append(&mut signals),
            Err(e) => {
                warn!(source = name, error = %e, "gatherer failed — source demoted this pass");
                degraded.push(name.to_string());
            }
        }
    }

    // Keep previous rows the fresh batch did not re-observe, so a symbol's
    // signal survives between polls of its source.
    let covered: Vec<(String, crate::types::SignalSource)> = fresh
        .iter()
        .map(|s| (s.symbol.clone(), s.source))
        .collect();
    let carried = previous_cache
        .iter()
        .filter(|s| !covered.contains(&(s.symbol.clone(), s.source)))
        .cloned();

    let mut merged: Vec<Signal> = fresh;
    merged.extend(carried);

    debug!(
        merged = merged.len(),
        degraded = degraded.len(),
        "gatherers merged"
    );

    GatherOutcome {
        signals: merged,
        degraded_sources: degraded,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalSource;
    use chrono::Duration;

    fn make_signal(symbol: &str, source: SignalSource, weighted: f64) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            source,
            sentiment: weighted,
            weighted_sentiment: weighted,
            volume: 1,
            timestamp: Utc::now() - Duration::minutes(10),
            reason: "test".into(),
            upvotes: None,
            momentum_pct: None,
            is_crypto: false,
            price: None,
            sources: vec![],
        }
    }

    #[test]
    fn carried_rows_exclude_recovered_pairs() {
        // Simulate the merge logic: a fresh row for (AAPL, Forum) supersedes
        // the cached one; (MSFT, Forum) is carried forward.
        let fresh = [make_signal("AAPL", SignalSource::Forum, 0.9)];
        let cache = [
            make_signal("AAPL", SignalSource::Forum, 0.2),
            make_signal("MSFT", SignalSource::Forum, 0.4),
        ];

        let covered: Vec<(String, SignalSource)> =
            fresh.iter().map(|s| (s.symbol.clone(), s.source)).collect();
        let carried: Vec<_> = cache
            .iter()
            .filter(|s| !covered.contains(&(s.symbol.clone(), s.source)))
            .collect();

        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].symbol, "MSFT");
    }
}
