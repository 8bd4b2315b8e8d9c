// =============================================================================
// Numerical contracts — sentiment weighting, ticker extraction, slippage
// =============================================================================
//
// Every threshold table the engines consult lives here or in config; engines
// never carry inline magic numbers.
// =============================================================================

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::SlippageModel;

// ---------------------------------------------------------------------------
// Time decay
// ---------------------------------------------------------------------------

/// Half-life of social-post freshness, minutes.
pub const DECAY_HALF_LIFE_MINUTES: f64 = 120.0;

/// Exponential freshness decay for a post of the given age, clamped to
/// [0.2, 1.0] so stale-but-aggregated sources are dampened, never erased.
pub fn time_decay(age_minutes: f64) -> f64 {
    if age_minutes <= 0.0 {
        return 1.0;
    }
    let decay = 0.5_f64.powf(age_minutes / DECAY_HALF_LIFE_MINUTES);
    decay.clamp(0.2, 1.0)
}

// ---------------------------------------------------------------------------
// Engagement brackets
// ---------------------------------------------------------------------------

fn upvote_multiplier(upvotes: u32) -> f64 {
    match upvotes {
        u if u >= 1_000 => 1.5,
        u if u >= 500 => 1.3,
        u if u >= 200 => 1.2,
        u if u >= 100 => 1.1,
        u if u >= 50 => 1.0,
        _ => 0.8,
    }
}

fn comment_multiplier(comments: u32) -> f64 {
    match comments {
        c if c >= 500 => 1.4,
        c if c >= 200 => 1.25,
        c if c >= 100 => 1.15,
        c if c >= 50 => 1.05,
        c if c >= 20 => 1.0,
        _ => 0.85,
    }
}

/// Stepwise engagement multiplier: mean of the upvote and comment brackets.
pub fn engagement_multiplier(upvotes: u32, comments: u32) -> f64 {
    (upvote_multiplier(upvotes) + comment_multiplier(comments)) / 2.0
}

// ---------------------------------------------------------------------------
// Flair table
// ---------------------------------------------------------------------------

/// Post-flair quality multiplier. Unknown flair is neutral.
pub fn flair_multiplier(flair: &str) -> f64 {
    match flair.trim().to_lowercase().as_str() {
        "dd" => 1.5,
        "technical analysis" | "ta" => 1.3,
        "news" => 1.2,
        "discussion" => 1.0,
        "daily discussion" => 0.7,
        "yolo" => 0.6,
        "meme" => 0.4,
        "shitpost" => 0.3,
        _ => 1.0,
    }
}

/// Combined post quality score: decay x engagement x flair x source weight.
pub fn quality_score(
    age_minutes: f64,
    upvotes: u32,
    comments: u32,
    flair: &str,
    source_weight: f64,
) -> f64 {
    time_decay(age_minutes) * engagement_multiplier(upvotes, comments) * flair_multiplier(flair)
        * source_weight
}

// ---------------------------------------------------------------------------
// Ticker extraction
// ---------------------------------------------------------------------------

/// Words that look like tickers but never are. Merged with the user blacklist
/// from config at the call site.
pub const TICKER_BLACKLIST: &[&str] = &[
    "A", "I", "DD", "CEO", "CFO", "IPO", "ATH", "ATL", "EPS", "ETF", "FYI", "GDP", "IMO", "IRS",
    "LOL", "NFT", "OMG", "PSA", "SEC", "TLDR", "USA", "USD", "WSB", "YOLO", "EOD", "EOY", "FOMO",
    "HODL", "AI", "API", "AM", "PM", "EST", "PST", "UTC", "IT", "US", "UK", "EU", "OK", "TV",
    "PE", "PT", "ER", "DOW", "FED", "FDA", "AND", "THE", "FOR", "ALL", "ANY", "BUY", "CALL",
    "PUT", "PUTS", "MOON", "BULL", "BEAR", "HOLD", "SELL", "STOP", "RIP", "NOT", "ARE", "YOU",
];

/// Context words that make a bare uppercase token plausible as a ticker.
const TRADING_KEYWORDS: &[&str] = &[
    "calls", "puts", "shares", "stock", "buy", "bought", "sell", "sold", "long", "short",
    "price", "earnings", "moon", "dip", "rally", "position", "entry", "target", "strike",
    "options", "gap", "squeeze", "breakout",
];

static DOLLAR_TICKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Z]{1,5})\b").expect("dollar ticker regex"));

static BARE_TICKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z]{2,5})\b").expect("bare ticker regex"));

/// Extract candidate ticker symbols from free text.
///
/// `$SYM` (1–5 uppercase) is always a candidate. A bare uppercase token
/// (2–5 letters) only counts when a trading keyword appears within the next
/// few words. Both the built-in and the supplied user blacklist apply.
pub fn extract_tickers(text: &str, user_blacklist: &[String]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    let blacklisted = |sym: &str| {
        TICKER_BLACKLIST.contains(&sym)
            || user_blacklist.iter().any(|b| b.eq_ignore_ascii_case(sym))
    };

    for cap in DOLLAR_TICKER_RE.captures_iter(text) {
        let sym = cap[1].to_string();
        if !blacklisted(&sym) && !found.contains(&sym) {
            found.push(sym);
        }
    }

    for cap in BARE_TICKER_RE.captures_iter(text) {
        let m = cap.get(1).expect("group 1");
        let sym = m.as_str();
        if blacklisted(sym) || found.iter().any(|f| f == sym) {
            continue;
        }
        // Look for a trading keyword within the ~50 chars after the token.
        // The regex match ends on an ASCII letter, so the start is always a
        // char boundary; walk the end forward to one.
        let tail_start = m.end();
        let mut tail_end = (m.end() + 50).min(text.len());
        while !text.is_char_boundary(tail_end) {
            tail_end += 1;
        }
        let tail = text[tail_start..tail_end].to_lowercase();
        if TRADING_KEYWORDS.iter().any(|kw| tail.contains(kw)) {
            found.push(sym.to_string());
        }
    }

    found
}

// ---------------------------------------------------------------------------
// Sentiment lexicon
// ---------------------------------------------------------------------------

const BULLISH_WORDS: &[(&str, f64)] = &[
    ("moon", 0.5),
    ("mooning", 0.5),
    ("rocket", 0.4),
    ("calls", 0.3),
    ("bull", 0.4),
    ("bullish", 0.5),
    ("buy", 0.3),
    ("long", 0.3),
    ("squeeze", 0.4),
    ("breakout", 0.4),
    ("rally", 0.4),
    ("undervalued", 0.4),
    ("beat", 0.3),
    ("upgrade", 0.3),
    ("surge", 0.4),
    ("rip", 0.3),
    ("gains", 0.3),
    ("winner", 0.3),
];

const BEARISH_WORDS: &[(&str, f64)] = &[
    ("puts", -0.3),
    ("bear", -0.4),
    ("bearish", -0.5),
    ("sell", -0.3),
    ("short", -0.3),
    ("crash", -0.5),
    ("dump", -0.4),
    ("tank", -0.4),
    ("overvalued", -0.4),
    ("miss", -0.3),
    ("downgrade", -0.3),
    ("bagholder", -0.4),
    ("drill", -0.4),
    ("plunge", -0.5),
    ("bankrupt", -0.6),
    ("scam", -0.5),
    ("loss", -0.3),
];

/// Keyword-lexicon sentiment for a post, clamped to [-1, +1].
pub fn lexicon_sentiment(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let mut score = 0.0;
    for (word, weight) in BULLISH_WORDS {
        if lower.contains(word) {
            score += weight;
        }
    }
    for (word, weight) in BEARISH_WORDS {
        if lower.contains(word) {
            score += weight;
        }
    }
    score.clamp(-1.0, 1.0)
}

// ---------------------------------------------------------------------------
// Crypto symbol normalization
// ---------------------------------------------------------------------------

/// Normalize any of "BTC", "BTCUSD", "BTC-USD", "btc/usd" to "BTC/USD".
pub fn normalize_crypto_symbol(symbol: &str) -> String {
    let s = symbol.trim().to_uppercase().replace('-', "/");
    if s.contains('/') {
        return s;
    }
    if let Some(base) = s.strip_suffix("USD") {
        if !base.is_empty() {
            return format!("{base}/USD");
        }
    }
    format!("{s}/USD")
}

// ---------------------------------------------------------------------------
// Slippage
// ---------------------------------------------------------------------------

/// Slippage fraction for a simulated fill of `position_usd` against a pool
/// with `liquidity_usd` depth. Capped at 15 %.
pub fn slippage_fraction(model: SlippageModel, position_usd: f64, liquidity_usd: f64) -> f64 {
    if liquidity_usd <= 0.0 {
        return match model {
            SlippageModel::None => 0.0,
            _ => 0.15,
        };
    }
    match model {
        SlippageModel::None => 0.0,
        SlippageModel::Conservative => (0.005 + 2.0 * position_usd / liquidity_usd).min(0.15),
        SlippageModel::Realistic => (0.01 + 5.0 * position_usd / liquidity_usd).min(0.15),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_decay_clamps_and_halves() {
        assert_eq!(time_decay(0.0), 1.0);
        assert!((time_decay(120.0) - 0.5).abs() < 1e-9);
        assert!((time_decay(240.0) - 0.25).abs() < 1e-9);
        // Very old posts floor at 0.2.
        assert_eq!(time_decay(10_000.0), 0.2);
    }

    #[test]
    fn engagement_brackets() {
        // 1000 upvotes (1.5) + 20 comments (1.0) -> 1.25
        assert!((engagement_multiplier(1_000, 20) - 1.25).abs() < 1e-9);
        // Low everything -> (0.8 + 0.85) / 2
        assert!((engagement_multiplier(3, 1) - 0.825).abs() < 1e-9);
    }

    #[test]
    fn flair_table_lookup() {
        assert_eq!(flair_multiplier("DD"), 1.5);
        assert_eq!(flair_multiplier("Meme"), 0.4);
        assert_eq!(flair_multiplier("whatever"), 1.0);
    }

    #[test]
    fn dollar_tickers_always_extracted() {
        let t = extract_tickers("loading up on $TSLA and $F today", &[]);
        assert!(t.contains(&"TSLA".to_string()));
        assert!(t.contains(&"F".to_string()));
    }

    #[test]
    fn bare_tickers_need_context() {
        let with_ctx = extract_tickers("NVDA calls printing", &[]);
        assert!(with_ctx.contains(&"NVDA".to_string()));

        let without_ctx = extract_tickers("NVDA is a company", &[]);
        assert!(without_ctx.is_empty());
    }

    #[test]
    fn blacklists_apply() {
        let t = extract_tickers("YOLO calls on $CEO and $GME", &["GME".to_string()]);
        assert!(!t.contains(&"YOLO".to_string()));
        assert!(!t.contains(&"CEO".to_string()));
        assert!(!t.contains(&"GME".to_string()));
    }

    #[test]
    fn lexicon_scores_direction() {
        assert!(lexicon_sentiment("to the moon, bullish breakout") > 0.5);
        assert!(lexicon_sentiment("total dump, bearish crash incoming") < -0.5);
        assert_eq!(lexicon_sentiment("nothing to see"), 0.0);
    }

    #[test]
    fn crypto_symbol_normalization() {
        assert_eq!(normalize_crypto_symbol("BTC"), "BTC/USD");
        assert_eq!(normalize_crypto_symbol("btcusd"), "BTC/USD");
        assert_eq!(normalize_crypto_symbol("ETH-USD"), "ETH/USD");
        assert_eq!(normalize_crypto_symbol("SOL/USD"), "SOL/USD");
    }

    #[test]
    fn slippage_models() {
        assert_eq!(slippage_fraction(SlippageModel::None, 1_000.0, 10_000.0), 0.0);
        let cons = slippage_fraction(SlippageModel::Conservative, 100.0, 20_000.0);
        assert!((cons - (0.005 + 2.0 * 100.0 / 20_000.0)).abs() < 1e-12);
        let real = slippage_fraction(SlippageModel::Realistic, 100.0, 20_000.0);
        assert!((real - (0.01 + 5.0 * 100.0 / 20_000.0)).abs() < 1e-12);
        // Cap at 15 %.
        assert_eq!(
            slippage_fraction(SlippageModel::Realistic, 1_000_000.0, 10_000.0),
            0.15
        );
    }
}
