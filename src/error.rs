// =============================================================================
// Error taxonomy for the Polaris agent
// =============================================================================
//
// Classification drives retry/skip behavior at the scheduler:
//   - ProviderTransient  -> degraded source for this tick, retried next tick
//   - ProviderPermanent  -> skipped without retry
//   - Parse              -> treated as missing data, never a default decision
//   - InvariantViolation -> the specific action aborts, tick continues
//   - State              -> repaired to defaults at load, logged
// =============================================================================

use thiserror::Error;

/// Agent error classification.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Retryable provider failure: 5xx, 429, timeout, connection reset.
    #[error("transient provider error ({provider}): {message}")]
    ProviderTransient { provider: String, message: String },

    /// Non-retryable provider failure: 4xx other than 429.
    #[error("permanent provider error ({provider}): {message}")]
    ProviderPermanent { provider: String, message: String },

    /// Malformed payload (usually LLM JSON). Callers treat this as "no data".
    #[error("parse error: {0}")]
    Parse(String),

    /// A pre-flight check failed (empty symbol, non-finite size, cap hit).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Persisted state could not be read or was corrupt beyond field repair.
    #[error("state error: {0}")]
    State(String),
}

impl AgentError {
    /// Classify a reqwest failure into transient vs permanent.
    pub fn from_http(provider: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            Some(429) => Self::ProviderTransient {
                provider: provider.to_string(),
                message,
            },
            Some(code) if (400..500).contains(&code) => Self::ProviderPermanent {
                provider: provider.to_string(),
                message,
            },
            _ => Self::ProviderTransient {
                provider: provider.to_string(),
                message,
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderTransient { .. })
    }
}

/// Result alias used throughout the agent core.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_is_transient() {
        let err = AgentError::from_http("chart", Some(429), "rate limited");
        assert!(err.is_transient());
    }

    #[test]
    fn http_400_is_permanent() {
        let err = AgentError::from_http("chart", Some(400), "token too new");
        assert!(!err.is_transient());
    }

    #[test]
    fn http_5xx_and_no_status_are_transient() {
        assert!(AgentError::from_http("brokerage", Some(503), "down").is_transient());
        assert!(AgentError::from_http("brokerage", None, "timeout").is_transient());
    }
}
