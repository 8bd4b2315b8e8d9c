// =============================================================================
// LLM Research — per-symbol verdicts and the batch analyst pass
// =============================================================================
//
// Two kinds of calls, both cached per symbol with a TTL:
//   - per-signal research on the cheap model (180 s TTL)
//   - crypto research on the cheap model (300 s TTL)
//   - the batch analyst on the smart model, at most once per analyst interval
//
// A malformed or missing LLM response yields `None`; callers treat that as
// "skip this opportunity", never as a default BUY/SELL. Every call is costed
// against the tracker using a hard-coded per-model price table; an unknown
// model is billed at the most expensive known rate.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::providers::{with_deadline, ChatMessage, CompletionRequest, LlmProvider};
use crate::state::AgentState;
use crate::types::{
    AnalystRecommendation, AnalystReport, EntryQuality, Position, RecommendedAction, Signal,
    SignalResearch, Verdict,
};

/// TTL for per-signal stock research.
pub const SIGNAL_RESEARCH_TTL_SECS: i64 = 180;
/// TTL for crypto research.
pub const CRYPTO_RESEARCH_TTL_SECS: i64 = 300;

// ---------------------------------------------------------------------------
// Price table
// ---------------------------------------------------------------------------

/// (model prefix, USD per 1M input tokens, USD per 1M output tokens).
const MODEL_PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-4o", 2.50, 10.00),
    ("o1", 15.00, 60.00),
    ("grok-3", 3.00, 15.00),
];

/// Cost of one call. Unknown models are billed at the most expensive known
/// rate — overestimating is the safe failure mode for a budget.
pub fn call_cost_usd(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let (input_rate, output_rate) = MODEL_PRICES
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, i, o)| (*i, *o))
        .unwrap_or_else(|| {
            let max_in = MODEL_PRICES.iter().map(|(_, i, _)| *i).fold(0.0, f64::max);
            let max_out = MODEL_PRICES.iter().map(|(_, _, o)| *o).fold(0.0, f64::max);
            (max_in, max_out)
        });

    prompt_tokens as f64 / 1_000_000.0 * input_rate
        + completion_tokens as f64 / 1_000_000.0 * output_rate
}

// ---------------------------------------------------------------------------
// Strict-JSON parsing
// ---------------------------------------------------------------------------

/// Extract the first JSON object from an LLM response, tolerating markdown
/// fences and leading prose.
pub fn parse_json_object(content: &str) -> Option<serde_json::Value> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}

fn parse_verdict(raw: &str) -> Option<Verdict> {
    match raw.trim().to_uppercase().as_str() {
        "BUY" => Some(Verdict::Buy),
        "SKIP" => Some(Verdict::Skip),
        "WAIT" => Some(Verdict::Wait),
        _ => None,
    }
}

fn parse_entry_quality(raw: &str) -> EntryQuality {
    match raw.trim().to_lowercase().as_str() {
        "excellent" => EntryQuality::Excellent,
        "good" => EntryQuality::Good,
        "fair" => EntryQuality::Fair,
        _ => EntryQuality::Poor,
    }
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the strict-JSON research payload. `None` on any shape violation.
fn parse_research(value: &serde_json::Value, now: DateTime<Utc>) -> Option<SignalResearch> {
    let verdict = parse_verdict(value["verdict"].as_str()?)?;
    let confidence = value["confidence"].as_f64()?;
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return None;
    }

    Some(SignalResearch {
        verdict,
        confidence,
        entry_quality: parse_entry_quality(value["entry_quality"].as_str().unwrap_or("poor")),
        reasoning: value["reasoning"].as_str().unwrap_or_default().to_string(),
        red_flags: string_list(&value["red_flags"]),
        catalysts: string_list(&value["catalysts"]),
        timestamp: now,
    })
}

// ---------------------------------------------------------------------------
// Per-signal research
// ---------------------------------------------------------------------------

/// Research one symbol with the cheap model, reusing a fresh cache entry.
///
/// Returns `None` on any provider or parse failure — the caller must skip
/// the opportunity.
pub async fn research_signal(
    state: &mut AgentState,
    llm: &dyn LlmProvider,
    signal: &Signal,
    current_price: Option<f64>,
    ttl_secs: i64,
    now: DateTime<Utc>,
) -> Option<SignalResearch> {
    if let Some(cached) = state.signal_research.get(&signal.symbol) {
        if now - cached.timestamp < Duration::seconds(ttl_secs) {
            return Some(cached.clone());
        }
    }

    let model = state.config.llm.llm_model_cheap.clone();
    let price_line = current_price
        .or(signal.price)
        .map(|p| format!("Current price: ${p:.4}."))
        .unwrap_or_default();

    let request = CompletionRequest {
        model: model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: "You are a fast trading research assistant. Respond with one JSON \
                          object only: {\"verdict\": \"BUY\"|\"SKIP\"|\"WAIT\", \
                          \"confidence\": 0.0-1.0, \"entry_quality\": \
                          \"excellent\"|\"good\"|\"fair\"|\"poor\", \"reasoning\": string, \
                          \"red_flags\": [string], \"catalysts\": [string]}"
                    .to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!(
                    "Symbol {} has weighted social sentiment {:.3} from sources {:?} with {} \
                     mentions. {} Should we enter now?",
                    signal.symbol,
                    signal.weighted_sentiment,
                    signal.sources,
                    signal.volume,
                    price_line
                ),
            },
        ],
        max_tokens: state.config.llm.llm_max_tokens,
        temperature: 0.2,
        json_mode: true,
    };

    let completion = match with_deadline("llm", llm.complete(request)).await {
        Ok(completion) => completion,
        Err(e) => {
            warn!(symbol = %signal.symbol, error = %e, "signal research call failed");
            return None;
        }
    };

    state.cost.record(
        call_cost_usd(&model, completion.prompt_tokens, completion.completion_tokens),
        completion.prompt_tokens,
        completion.completion_tokens,
    );

    let research = parse_json_object(&completion.content)
        .and_then(|value| parse_research(&value, now));

    match research {
        Some(research) => {
            debug!(
                symbol = %signal.symbol,
                verdict = %research.verdict,
                confidence = research.confidence,
                "signal researched"
            );
            state
                .signal_research
                .insert(signal.symbol.clone(), research.clone());
            Some(research)
        }
        None => {
            warn!(symbol = %signal.symbol, "malformed research payload — treated as missing");
            None
        }
    }
}

/// Research the top `limit` signals by |weighted sentiment| that clear the
/// minimum sentiment gate.
pub async fn research_top_signals(
    state: &mut AgentState,
    llm: &dyn LlmProvider,
    limit: usize,
    now: DateTime<Utc>,
) {
    let min_sentiment = state.config.stock.min_sentiment_score;
    let candidates: Vec<Signal> = state
        .signal_cache
        .iter()
        .filter(|s| s.weighted_sentiment.abs() >= min_sentiment)
        .take(limit)
        .cloned()
        .collect();

    for signal in candidates {
        let ttl = if signal.is_crypto {
            CRYPTO_RESEARCH_TTL_SECS
        } else {
            SIGNAL_RESEARCH_TTL_SECS
        };
        let _ = research_signal(state, llm, &signal, None, ttl, now).await;
    }
}

// ---------------------------------------------------------------------------
// Batch analyst
// ---------------------------------------------------------------------------

fn parse_action(raw: &str) -> Option<RecommendedAction> {
    match raw.trim().to_uppercase().as_str() {
        "BUY" => Some(RecommendedAction::Buy),
        "SELL" => Some(RecommendedAction::Sell),
        "HOLD" => Some(RecommendedAction::Hold),
        _ => None,
    }
}

/// Parse the batch analyst payload. Rows with an unknown action or a
/// non-finite confidence are dropped rather than defaulted.
fn parse_report(value: &serde_json::Value, now: DateTime<Utc>) -> AnalystReport {
    let recommendations = value["recommendations"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let action = parse_action(row["action"].as_str()?)?;
                    let symbol = row["symbol"].as_str()?.to_string();
                    let confidence = row["confidence"].as_f64()?;
                    if !confidence.is_finite() {
                        return None;
                    }
                    Some(AnalystRecommendation {
                        action,
                        symbol,
                        confidence: confidence.clamp(0.0, 1.0),
                        reasoning: row["reasoning"].as_str().unwrap_or_default().to_string(),
                        suggested_size_pct: row["suggested_size_pct"].as_f64(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    AnalystReport {
        recommendations,
        market_summary: value["market_summary"].as_str().unwrap_or_default().to_string(),
        high_conviction_plays: string_list(&value["high_conviction_plays"]),
        timestamp: now,
    }
}

/// Run the batch analyst over the account, current positions, and the signal
/// cache. `None` on provider or parse failure.
pub async fn analyze_signals(
    state: &mut AgentState,
    llm: &dyn LlmProvider,
    cash: f64,
    equity: f64,
    positions: &[Position],
    now: DateTime<Utc>,
) -> Option<AnalystReport> {
    let model = state.config.llm.llm_model_smart.clone();

    let position_lines: Vec<String> = positions
        .iter()
        .map(|p| {
            let held = state
                .position_entries
                .get(&p.symbol)
                .map(|e| (now - e.entry_time).num_minutes())
                .unwrap_or(0);
            format!(
                "{}: {:.1} sh, P&L {:+.2}%, held {}m",
                p.symbol,
                p.qty,
                p.pl_pct(),
                held
            )
        })
        .collect();

    // Up to 10 aggregated candidates plus 20 raw signals.
    let candidate_lines: Vec<String> = state
        .signal_cache
        .iter()
        .take(10)
        .map(|s| {
            format!(
                "{}: weighted {:+.3}, {} mentions via {:?}",
                s.symbol, s.weighted_sentiment, s.volume, s.sources
            )
        })
        .collect();
    let raw_lines: Vec<String> = state
        .signal_cache
        .iter()
        .take(20)
        .map(|s| format!("{} {:+.2}", s.symbol, s.weighted_sentiment))
        .collect();

    let request = CompletionRequest {
        model: model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: "You are a portfolio analyst. Respond with one JSON object only: \
                          {\"recommendations\": [{\"action\": \"BUY\"|\"SELL\"|\"HOLD\", \
                          \"symbol\": string, \"confidence\": 0.0-1.0, \"reasoning\": string, \
                          \"suggested_size_pct\": number?}], \"market_summary\": string, \
                          \"high_conviction_plays\": [string]}"
                    .to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!(
                    "Account: ${cash:.0} cash, ${equity:.0} equity.\nPositions:\n{}\n\
                     Top candidates:\n{}\nRaw signals: {}",
                    position_lines.join("\n"),
                    candidate_lines.join("\n"),
                    raw_lines.join(", ")
                ),
            },
        ],
        max_tokens: state.config.llm.llm_max_tokens * 2,
        temperature: 0.3,
        json_mode: true,
    };

    let completion = match with_deadline("llm", llm.complete(request)).await {
        Ok(completion) => completion,
        Err(e) => {
            warn!(error = %e, "batch analyst call failed");
            return None;
        }
    };

    state.cost.record(
        call_cost_usd(&model, completion.prompt_tokens, completion.completion_tokens),
        completion.prompt_tokens,
        completion.completion_tokens,
    );

    let report = parse_json_object(&completion.content).map(|value| parse_report(&value, now));
    if report.is_none() {
        warn!("malformed analyst payload — treated as missing");
    }
    report
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, AgentResult};
    use crate::providers::Completion;
    use crate::types::SignalSource;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FakeLlm {
        responses: Mutex<Vec<String>>,
        calls: Mutex<u32>,
    }

    impl FakeLlm {
        fn with(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(|s| s.to_string()).collect()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FakeLlm {
        async fn complete(&self, _request: CompletionRequest) -> AgentResult<Completion> {
            *self.calls.lock() += 1;
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(AgentError::ProviderTransient {
                    provider: "llm".into(),
                    message: "no scripted response".into(),
                });
            }
            Ok(Completion {
                content: responses.remove(0),
                prompt_tokens: 500,
                completion_tokens: 100,
            })
        }
    }

    fn make_signal(symbol: &str) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            source: SignalSource::Forum,
            sentiment: 0.5,
            weighted_sentiment: 0.8,
            volume: 12,
            timestamp: Utc::now(),
            reason: "test".into(),
            upvotes: None,
            momentum_pct: None,
            is_crypto: false,
            price: Some(100.0),
            sources: vec!["wallstreetbets".into()],
        }
    }

    const GOOD_RESEARCH: &str = r#"{"verdict": "BUY", "confidence": 0.8,
        "entry_quality": "excellent", "reasoning": "strong flow",
        "red_flags": [], "catalysts": ["earnings"]}"#;

    #[test]
    fn price_table_known_and_fallback() {
        // 1M input + 1M output on gpt-4o-mini.
        let mini = call_cost_usd("gpt-4o-mini", 1_000_000, 1_000_000);
        assert!((mini - 0.75).abs() < 1e-9);
        // Unknown model bills at the most expensive known rate (o1).
        let unknown = call_cost_usd("mystery-model", 1_000_000, 1_000_000);
        assert!((unknown - 75.0).abs() < 1e-9);
    }

    #[test]
    fn parse_json_object_strips_fences() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(parse_json_object(fenced).unwrap()["a"], 1);
        assert!(parse_json_object("no json here").is_none());
    }

    #[tokio::test]
    async fn research_parses_and_caches() {
        let mut state = AgentState::default();
        let llm = FakeLlm::with(vec![GOOD_RESEARCH]);
        let signal = make_signal("AAPL");
        let now = Utc::now();

        let research = research_signal(&mut state, &llm, &signal, None, 180, now)
            .await
            .unwrap();
        assert_eq!(research.verdict, Verdict::Buy);
        assert_eq!(research.entry_quality, EntryQuality::Excellent);
        assert!(state.cost.total_usd > 0.0);
        assert_eq!(state.cost.api_calls, 1);

        // Second call inside the TTL is a cache hit: no scripted response
        // remains, so a real call would error.
        let again = research_signal(&mut state, &llm, &signal, None, 180, now)
            .await
            .unwrap();
        assert_eq!(again.verdict, Verdict::Buy);
        assert_eq!(*llm.calls.lock(), 1);
    }

    #[tokio::test]
    async fn malformed_research_is_none_not_default() {
        let mut state = AgentState::default();
        let llm = FakeLlm::with(vec!["{\"verdict\": \"MAYBE\", \"confidence\": 0.9}"]);
        let signal = make_signal("AAPL");

        let research =
            research_signal(&mut state, &llm, &signal, None, 180, Utc::now()).await;
        assert!(research.is_none());
        // Cost is still accounted for the failed parse.
        assert_eq!(state.cost.api_calls, 1);
    }

    #[tokio::test]
    async fn confidence_out_of_range_rejected() {
        let mut state = AgentState::default();
        let llm = FakeLlm::with(vec![
            r#"{"verdict": "BUY", "confidence": 1.7, "entry_quality": "good",
                "reasoning": "", "red_flags": [], "catalysts": []}"#,
        ]);
        let signal = make_signal("TSLA");
        let research =
            research_signal(&mut state, &llm, &signal, None, 180, Utc::now()).await;
        assert!(research.is_none());
    }

    #[tokio::test]
    async fn analyst_report_parses_rows_and_drops_bad_ones() {
        let mut state = AgentState::default();
        state.signal_cache.push(make_signal("AAPL"));
        let llm = FakeLlm::with(vec![
            r#"{"recommendations": [
                {"action": "BUY", "symbol": "AAPL", "confidence": 0.9, "reasoning": "flow"},
                {"action": "NUKE", "symbol": "TSLA", "confidence": 0.8, "reasoning": "bad row"},
                {"action": "SELL", "symbol": "MSFT", "confidence": 0.7, "reasoning": "weak"}
            ], "market_summary": "risk-on", "high_conviction_plays": ["AAPL"]}"#,
        ]);

        let report = analyze_signals(&mut state, &llm, 5_000.0, 10_000.0, &[], Utc::now())
            .await
            .unwrap();
        assert_eq!(report.recommendations.len(), 2);
        assert_eq!(report.recommendations[0].action, RecommendedAction::Buy);
        assert_eq!(report.market_summary, "risk-on");
    }
}
