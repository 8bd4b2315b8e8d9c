// =============================================================================
// Macro indicators reference client — tolerant quote multiplexing
// =============================================================================
//
// Feeds the crisis monitor. Each indicator resolves independently: a failed
// or unavailable source yields `None` for that scalar and never an error for
// the snapshot. The reference client multiplexes a Yahoo-style chart API;
// series it cannot source (TED, HY OAS, breadth, Fed balance sheet) stay
// `None` until a deployment wires a richer source behind the same trait.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join;
use tracing::debug;

use crate::error::AgentResult;
use crate::providers::MacroData;
use crate::state::IndicatorSnapshot;

/// Yahoo-compatible chart endpoint client.
pub struct YahooMacroClient {
    client: reqwest::Client,
    base_url: String,
}

impl YahooMacroClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn public() -> Self {
        Self::new("https://query1.finance.yahoo.com")
    }

    /// Fetch closes for the last week of daily bars. `None` on any failure.
    async fn weekly_closes(&self, symbol: &str) -> Option<Vec<f64>> {
        let url = format!(
            "{}/v8/finance/chart/{}?range=7d&interval=1d",
            self.base_url, symbol
        );
        let body: serde_json::Value = self.client.get(&url).send().await.ok()?.json().await.ok()?;

        let closes: Vec<f64> = body["chart"]["result"][0]["indicators"]["quote"][0]["close"]
            .as_array()?
            .iter()
            .filter_map(|v| v.as_f64())
            .collect();

        (!closes.is_empty()).then_some(closes)
    }

    /// Latest close. `None` on any failure.
    async fn quote(&self, symbol: &str) -> Option<f64> {
        let closes = self.weekly_closes(symbol).await?;
        closes.last().copied()
    }

    /// Percent change over the fetched week. `None` on any failure.
    async fn weekly_change_pct(&self, symbol: &str) -> Option<f64> {
        let closes = self.weekly_closes(symbol).await?;
        let first = *closes.first()?;
        let last = *closes.last()?;
        if first.abs() < f64::EPSILON {
            return None;
        }
        Some((last - first) / first * 100.0)
    }
}

#[async_trait]
impl MacroData for YahooMacroClient {
    async fn fetch_indicators(&self) -> AgentResult<IndicatorSnapshot> {
        // Fan out in pairs to bound concurrency against a public endpoint.
        let (vix_closes, dxy) = join(self.weekly_closes("^VIX"), self.quote("DX-Y.NYB")).await;
        let (usdjpy, usdt_peg) = join(self.quote("USDJPY=X"), self.quote("USDT-USD")).await;
        let (gold, silver) = join(self.quote("GC=F"), self.quote("SI=F")).await;
        let (btc_closes, kre_weekly) =
            join(self.weekly_closes("BTC-USD"), self.weekly_change_pct("KRE")).await;
        let (silver_weekly, tnx) =
            join(self.weekly_change_pct("SI=F"), self.quote("^TNX")).await;
        let two_year = self.quote("2YY=F").await;

        let vix = vix_closes.as_ref().and_then(|c| c.last().copied());
        let vix_change_pct = vix_closes.as_ref().and_then(|c| {
            let first = *c.first()?;
            let last = *c.last()?;
            (first.abs() > f64::EPSILON).then(|| (last - first) / first * 100.0)
        });

        let btc_price = btc_closes.as_ref().and_then(|c| c.last().copied());
        let btc_weekly_pct = btc_closes.as_ref().and_then(|c| {
            let first = *c.first()?;
            let last = *c.last()?;
            (first.abs() > f64::EPSILON).then(|| (last - first) / first * 100.0)
        });

        let gold_silver_ratio = match (gold, silver) {
            (Some(g), Some(s)) if s.abs() > f64::EPSILON => Some(g / s),
            _ => None,
        };

        // ^TNX quotes the 10-year yield times ten.
        let yield_curve_2s10s = match (tnx, two_year) {
            (Some(t), Some(two)) => Some(t / 10.0 - two),
            _ => None,
        };

        let snapshot = IndicatorSnapshot {
            vix,
            vix_change_pct,
            hy_spread_bps: None,
            yield_curve_2s10s,
            ted_spread: None,
            dxy,
            usdjpy,
            kre_weekly_pct: kre_weekly,
            silver_weekly_pct: silver_weekly,
            fed_balance_sheet_weekly_pct: None,
            btc_weekly_pct,
            usdt_peg,
            gold_silver_ratio,
            stocks_above_200ma_pct: None,
            gold_price: gold,
            silver_price: silver,
            btc_price,
        };

        debug!(
            vix = ?snapshot.vix,
            btc_weekly = ?snapshot.btc_weekly_pct,
            "macro indicators fetched"
        );
        Ok(snapshot)
    }
}

impl std::fmt::Debug for YahooMacroClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YahooMacroClient")
            .field("base_url", &self.base_url)
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
    fn snapshot_defaults_to_all_none() {
        let snap = IndicatorSnapshot::default();
        assert!(snap.vix.is_none());
        assert!(snap.usdt_peg.is_none());
        assert!(snap.gold_silver_ratio.is_none());
    }
}
