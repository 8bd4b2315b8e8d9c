// =============================================================================
// Trending-stream gatherer — stocktwits-like source
// =============================================================================
//
// Top trending symbols, then the recent message stream per symbol. Each
// message contributes a sentiment (declared stance when present, lexicon
// otherwise) weighted by freshness decay. One `Signal` per symbol.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::GatherParams;
use crate::error::{AgentError, AgentResult};
use crate::providers::SocialData;
use crate::types::{Signal, SignalSource};
use crate::util::{lexicon_sentiment, time_decay};

/// Trending symbols pulled per pass.
const TRENDING_LIMIT: usize = 15;
/// Messages scored per symbol.
const MESSAGES_LIMIT: usize = 30;

/// Gather one signal per trending symbol. A blocked source (403-class)
/// degrades to an empty result rather than an error.
pub async fn gather(
    social: &dyn SocialData,
    params: &GatherParams,
    now: DateTime<Utc>,
) -> AgentResult<Vec<Signal>> {
    let symbols = match social.trending_symbols(TRENDING_LIMIT).await {
        Ok(symbols) => symbols,
        Err(AgentError::ProviderPermanent { message, .. }) => {
            warn!(message, "trending source blocked — skipping this pass");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut signals = Vec::with_capacity(symbols.len());

    for symbol in symbols {
        let messages = match social.symbol_messages(&symbol, MESSAGES_LIMIT).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "message stream failed — skipping symbol");
                continue;
            }
        };
        if messages.is_empty() {
            continue;
        }

        let mut bullish = 0u32;
        let mut bearish = 0u32;
        let mut weighted_sum = 0.0;
        let mut raw_sum = 0.0;

        for message in &messages {
            let sentiment = match message.declared_bullish {
                Some(true) => 0.6,
                Some(false) => -0.6,
                None => lexicon_sentiment(&message.body),
            };
            if sentiment > 0.0 {
                bullish += 1;
            } else if sentiment < 0.0 {
                bearish += 1;
            }

            let age_minutes = (now - message.created_at).num_seconds() as f64 / 60.0;
            weighted_sum += sentiment * time_decay(age_minutes);
            raw_sum += sentiment;
        }

        let count = messages.len() as f64;
        let sentiment = (raw_sum / count).clamp(-1.0, 1.0);
        let weighted =
            (weighted_sum / count).clamp(-1.0, 1.0) * params.source_weight_stocktwits;

        signals.push(Signal {
            symbol: symbol.clone(),
            source: SignalSource::Stocktwits,
            sentiment,
            weighted_sentiment: weighted,
            volume: messages.len() as u32,
            timestamp: now,
            reason: format!(
                "trending: {bullish} bullish / {bearish} bearish of {} messages",
                messages.len()
            ),
            upvotes: None,
            momentum_pct: None,
            is_crypto: false,
            price: None,
            sources: vec!["trending".to_string()],
        });
    }

    debug!(count = signals.len(), "trending gatherer produced signals");
    Ok(signals)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ForumPost, SocialMessage};
    use async_trait::async_trait;
    use chrono::Duration;

    struct FakeSocial {
        blocked: bool,
    }

    #[async_trait]
    impl SocialData for FakeSocial {
        async fn trending_symbols(&self, _limit: usize) -> AgentResult<Vec<String>> {
            if self.blocked {
                return Err(AgentError::ProviderPermanent {
                    provider: "stocktwits".into(),
                    message: "403 blocked".into(),
                });
            }
            Ok(vec!["TSLA".to_string(), "EMPTY".to_string()])
        }

        async fn symbol_messages(
            &self,
            symbol: &str,
            _limit: usize,
        ) -> AgentResult<Vec<SocialMessage>> {
            if symbol == "EMPTY" {
                return Ok(vec![]);
            }
            let now = Utc::now();
            Ok(vec![
                SocialMessage {
                    body: "going to the moon".into(),
                    created_at: now - Duration::minutes(5),
                    declared_bullish: Some(true),
                },
                SocialMessage {
                    body: "puts on this dump".into(),
                    created_at: now - Duration::minutes(10),
                    declared_bullish: Some(false),
                },
                SocialMessage {
                    body: "bullish breakout".into(),
                    created_at: now - Duration::minutes(30),
                    declared_bullish: None,
                },
            ])
        }

        async fn hot_posts(&self, _subgroup: &str, _limit: usize) -> AgentResult<Vec<ForumPost>> {
            Ok(vec![])
        }

        async fn breaking_headlines(&self, _symbol: &str) -> AgentResult<Vec<String>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn produces_one_signal_per_active_symbol() {
        let social = FakeSocial { blocked: false };
        let params = GatherParams::default();
        let signals = gather(&social, &params, Utc::now()).await.unwrap();

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.symbol, "TSLA");
        assert_eq!(signal.volume, 3);
        // Two bullish, one bearish -> net positive.
        assert!(signal.weighted_sentiment > 0.0);
        assert!(signal.reason.contains("2 bullish / 1 bearish"));
    }

    #[tokio::test]
    async fn blocked_source_degrades_to_empty() {
        let social = FakeSocial { blocked: true };
        let params = GatherParams::default();
        let signals = gather(&social, &params, Utc::now()).await.unwrap();
        assert!(signals.is_empty());
    }
}
