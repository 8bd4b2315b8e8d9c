// =============================================================================
// Forum gatherer — discussion-board posts to per-ticker signals
// =============================================================================
//
// For each configured subgroup: pull hot posts, extract tickers from
// title + body, score a keyword-lexicon sentiment, and weight by
// `timeDecay x engagement x flair x sourceWeight`. Per-ticker aggregation
// keeps the best flair, the freshest post, and the subgroup set. Tickers the
// extractor has never seen go through the two-tier validation cache.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::GatherParams;
use crate::error::AgentResult;
use crate::gatherers::tickers::TickerValidator;
use crate::providers::{Brokerage, ForumPost, SocialData};
use crate::types::{Signal, SignalSource};
use crate::util::{extract_tickers, flair_multiplier, lexicon_sentiment, quality_score};

/// Hot posts pulled per subgroup.
const POSTS_LIMIT: usize = 25;

#[derive(Debug, Default)]
struct TickerAccumulator {
    raw_sum: f64,
    weighted_sum: f64,
    mentions: u32,
    upvotes: u32,
    comments: u32,
    best_flair: Option<String>,
    freshest: Option<DateTime<Utc>>,
    subgroups: Vec<String>,
}

impl TickerAccumulator {
    fn absorb(&mut self, post: &ForumPost, sentiment: f64, weight: f64) {
        self.raw_sum += sentiment;
        self.weighted_sum += sentiment * weight;
        self.mentions += 1;
        self.upvotes += post.upvotes;
        self.comments += post.comments;

        let flair = post.flair.clone().unwrap_or_default();
        let better = self
            .best_flair
            .as_deref()
            .map(|current| flair_multiplier(&flair) > flair_multiplier(current))
            .unwrap_or(true);
        if better && !flair.is_empty() {
            self.best_flair = Some(flair);
        }

        if self.freshest.map(|f| post.created_at > f).unwrap_or(true) {
            self.freshest = Some(post.created_at);
        }
        if !self.subgroups.contains(&post.subgroup) {
            self.subgroups.push(post.subgroup.clone());
        }
    }
}

/// Gather per-ticker signals across every configured subgroup. A failed
/// subgroup is skipped; the rest still contribute.
pub async fn gather(
    social: &dyn SocialData,
    brokerage: &dyn Brokerage,
    validator: &TickerValidator,
    params: &GatherParams,
    now: DateTime<Utc>,
) -> AgentResult<Vec<Signal>> {
    let mut accumulators: HashMap<String, TickerAccumulator> = HashMap::new();

    for subgroup in &params.forum_subgroups {
        let posts = match social.hot_posts(subgroup, POSTS_LIMIT).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!(subgroup = %subgroup, error = %e, "subgroup fetch failed — skipping");
                continue;
            }
        };

        for post in &posts {
            let text = format!("{} {}", post.title, post.body);
            let tickers = extract_tickers(&text, &params.ticker_blacklist);
            if tickers.is_empty() {
                continue;
            }

            let sentiment = lexicon_sentiment(&text);
            let age_minutes = (now - post.created_at).num_seconds() as f64 / 60.0;
            let weight = quality_score(
                age_minutes,
                post.upvotes,
                post.comments,
                post.flair.as_deref().unwrap_or(""),
                params.source_weight_forum,
            );

            for ticker in tickers {
                accumulators
                    .entry(ticker)
                    .or_default()
                    .absorb(post, sentiment, weight);
            }
        }
    }

    let mut signals = Vec::with_capacity(accumulators.len());
    for (symbol, acc) in accumulators {
        if !validator.is_valid(&symbol, brokerage).await {
            debug!(symbol = %symbol, "extracted token failed validation — dropped");
            continue;
        }

        let count = acc.mentions.max(1) as f64;
        let sentiment = (acc.raw_sum / count).clamp(-1.0, 1.0);
        let weighted = (acc.weighted_sum / count).clamp(-2.0, 2.0);

        signals.push(Signal {
            symbol,
            source: SignalSource::Forum,
            sentiment,
            weighted_sentiment: weighted,
            volume: acc.mentions,
            timestamp: acc.freshest.unwrap_or(now),
            reason: format!(
                "forum: {} mentions across {:?}, {} upvotes, {} comments{}",
                acc.mentions,
                acc.subgroups,
                acc.upvotes,
                acc.comments,
                acc.best_flair
                    .as_deref()
                    .map(|f| format!(", best flair {f}"))
                    .unwrap_or_default()
            ),
            upvotes: Some(acc.upvotes),
            momentum_pct: None,
            is_crypto: false,
            price: None,
            sources: acc.subgroups,
        });
    }

    debug!(count = signals.len(), "forum gatherer produced signals");
    Ok(signals)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::providers::{
        Account, AssetInfo, MarketClock, OrderRequest, SocialMessage,
    };
    use crate::types::Position;
    use async_trait::async_trait;
    use chrono::Duration;

    struct FakeSocial;

    #[async_trait]
    impl SocialData for FakeSocial {
        async fn trending_symbols(&self, _limit: usize) -> AgentResult<Vec<String>> {
            Ok(vec![])
        }
        async fn symbol_messages(
            &self,
            _symbol: &str,
            _limit: usize,
        ) -> AgentResult<Vec<SocialMessage>> {
            Ok(vec![])
        }
        async fn hot_posts(&self, subgroup: &str, _limit: usize) -> AgentResult<Vec<ForumPost>> {
            if subgroup != "wallstreetbets" {
                return Ok(vec![]);
            }
            let now = Utc::now();
            Ok(vec![
                ForumPost {
                    title: "$NVDA calls are printing".into(),
                    body: "bullish breakout, loading more calls".into(),
                    flair: Some("DD".into()),
                    upvotes: 1200,
                    comments: 300,
                    created_at: now - Duration::minutes(30),
                    subgroup: subgroup.into(),
                },
                ForumPost {
                    title: "$NVDA might dip".into(),
                    body: "taking puts, bearish short term".into(),
                    flair: Some("Meme".into()),
                    upvotes: 10,
                    comments: 2,
                    created_at: now - Duration::minutes(200),
                    subgroup: subgroup.into(),
                },
                ForumPost {
                    title: "$FAKET to the moon".into(),
                    body: "buy buy buy".into(),
                    flair: None,
                    upvotes: 5,
                    comments: 0,
                    created_at: now - Duration::minutes(10),
                    subgroup: subgroup.into(),
                },
            ])
        }
        async fn breaking_headlines(&self, _symbol: &str) -> AgentResult<Vec<String>> {
            Ok(vec![])
        }
    }

    struct FakeBroker;

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
        async fn get_asset(&self, _symbol: &str) -> AgentResult<Option<AssetInfo>> {
            Ok(None)
        }
        async fn create_order(&self, _order: OrderRequest) -> AgentResult<serde_json::Value> {
            Err(AgentError::InvariantViolation("unused".into()))
        }
        async fn close_position(&self, _symbol: &str) -> AgentResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn aggregates_mentions_and_drops_invalid_tickers() {
        let validator = TickerValidator::new("http://127.0.0.1:1/unreachable");
        validator.seed_sec_set(vec!["NVDA".to_string()]);
        let params = GatherParams::default();

        let signals = gather(&FakeSocial, &FakeBroker, &validator, &params, Utc::now())
            .await
            .unwrap();

        // FAKET fails validation; only NVDA survives.
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.symbol, "NVDA");
        assert_eq!(signal.volume, 2);
        assert_eq!(signal.upvotes, Some(1210));
        // The heavy DD post dominates the meme post.
        assert!(signal.weighted_sentiment > 0.0);
        assert!(signal.reason.contains("best flair DD"));
    }
}
