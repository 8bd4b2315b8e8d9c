// =============================================================================
// Social sources reference client — trending stream + forum JSON API
// =============================================================================
//
// Two public surfaces behind one handle:
//   - a Stocktwits-compatible trending/messages API. 403-class blocks are
//     common; they surface as permanent errors the gatherer degrades on.
//   - a reddit-compatible `<subgroup>/hot.json` listing for forum posts.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{AgentError, AgentResult};
use crate::providers::{ForumPost, SocialData, SocialMessage};

/// Reference social-data client.
pub struct SocialClient {
    client: reqwest::Client,
    trending_url: String,
    forum_url: String,
}

impl SocialClient {
    pub fn new(trending_url: impl Into<String>, forum_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("polaris-bot/1.0")
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            trending_url: trending_url.into(),
            forum_url: forum_url.into(),
        }
    }

    pub fn public() -> Self {
        Self::new("https://api.stocktwits.com/api/2", "https://www.reddit.com/r")
    }

    async fn get_json(&self, url: &str, provider: &str) -> AgentResult<serde_json::Value> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            AgentError::ProviderTransient {
                provider: provider.to_string(),
                message: format!("GET {url} failed: {e}"),
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::from_http(
                provider,
                Some(status.as_u16()),
                format!("GET {url} returned {status}: {body}"),
            ));
        }

        resp.json()
            .await
            .map_err(|e| AgentError::Parse(format!("{provider} response not JSON: {e}")))
    }
}

#[async_trait]
impl SocialData for SocialClient {
    async fn trending_symbols(&self, limit: usize) -> AgentResult<Vec<String>> {
        let url = format!("{}/trending/symbols.json", self.trending_url);
        let body = self.get_json(&url, "stocktwits").await?;

        let symbols: Vec<String> = body["symbols"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r["symbol"].as_str().map(|s| s.to_string()))
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default();

        debug!(count = symbols.len(), "trending symbols fetched");
        Ok(symbols)
    }

    async fn symbol_messages(
        &self,
        symbol: &str,
        limit: usize,
    ) -> AgentResult<Vec<SocialMessage>> {
        let url = format!("{}/streams/symbol/{}.json", self.trending_url, symbol);
        let body = self.get_json(&url, "stocktwits").await?;

        let messages: Vec<SocialMessage> = body["messages"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .take(limit)
                    .filter_map(|r| {
                        let created_at = r["created_at"]
                            .as_str()
                            .and_then(|s| s.parse::<DateTime<Utc>>().ok())?;
                        let declared_bullish = match r["entities"]["sentiment"]["basic"].as_str()
                        {
                            Some("Bullish") => Some(true),
                            Some("Bearish") => Some(false),
                            _ => None,
                        };
                        Some(SocialMessage {
                            body: r["body"].as_str().unwrap_or_default().to_string(),
                            created_at,
                            declared_bullish,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(messages)
    }

    async fn hot_posts(&self, subgroup: &str, limit: usize) -> AgentResult<Vec<ForumPost>> {
        let url = format!("{}/{}/hot.json?limit={}", self.forum_url, subgroup, limit);
        let body = self.get_json(&url, "forum").await?;

        let posts: Vec<ForumPost> = body["data"]["children"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| {
                        let data = &r["data"];
                        let created_at = data["created_utc"]
                            .as_f64()
                            .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0))?;
                        Some(ForumPost {
                            title: data["title"].as_str().unwrap_or_default().to_string(),
                            body: data["selftext"].as_str().unwrap_or_default().to_string(),
                            flair: data["link_flair_text"].as_str().map(|s| s.to_string()),
                            upvotes: data["ups"].as_u64().unwrap_or(0) as u32,
                            comments: data["num_comments"].as_u64().unwrap_or(0) as u32,
                            created_at,
                            subgroup: subgroup.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        debug!(subgroup, count = posts.len(), "hot posts fetched");
        Ok(posts)
    }

    async fn breaking_headlines(&self, symbol: &str) -> AgentResult<Vec<String>> {
        // The trending source doubles as a cheap headline feed: titles of the
        // most recent messages that look like news links.
        let messages = self.symbol_messages(symbol, 10).await?;
        Ok(messages
            .into_iter()
            .filter(|m| m.body.contains("http"))
            .map(|m| m.body)
            .take(3)
            .collect())
    }
}

impl std::fmt::Debug for SocialClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocialClient")
            .field("trending_url", &self.trending_url)
            .field("forum_url", &self.forum_url)
            .finish()
    }
}
