// =============================================================================
// SOL/USD price cache — process-wide, 5-minute TTL, fixed fallback
// =============================================================================
//
// The only currency translation inside the DEX engine. Deliberately a
// process-global (unlike per-provider throttle state): it is an idempotent,
// read-heavy fallback and every subsystem must see the same value within a
// tick.
// =============================================================================

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

/// Cache time-to-live.
const TTL: Duration = Duration::from_secs(300);

/// Last-resort price when no fetch has ever succeeded.
pub const FALLBACK_SOL_USD: f64 = 200.0;

struct CacheInner {
    price: f64,
    fetched_at: Option<Instant>,
}

/// Process-wide SOL/USD cache.
pub struct SolPriceCache {
    inner: RwLock<CacheInner>,
}

static GLOBAL: Lazy<SolPriceCache> = Lazy::new(SolPriceCache::new);

impl SolPriceCache {
    fn new() -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                price: FALLBACK_SOL_USD,
                fetched_at: None,
            }),
        }
    }

    /// The shared process-wide instance.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Current price: the cached value when fresh, otherwise the last known
    /// value (which starts at the fallback constant). Never fails.
    pub fn price(&self) -> f64 {
        self.inner.read().price
    }

    /// Whether the cached value is stale and a refresh should be attempted.
    pub fn needs_refresh(&self) -> bool {
        match self.inner.read().fetched_at {
            None => true,
            Some(at) => at.elapsed() >= TTL,
        }
    }

    /// Store a freshly fetched price. Non-finite or non-positive values are
    /// ignored so a bad payload can never poison the cache.
    pub fn update(&self, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            debug!(price, "ignoring invalid SOL/USD price");
            return;
        }
        let mut inner = self.inner.write();
        inner.price = price;
        inner.fetched_at = Some(Instant::now());
        debug!(price, "SOL/USD cache updated");
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_fallback_and_needs_refresh() {
        let cache = SolPriceCache::new();
        assert_eq!(cache.price(), FALLBACK_SOL_USD);
        assert!(cache.needs_refresh());
    }

    #[test]
    fn update_sets_price_and_freshness() {
        let cache = SolPriceCache::new();
        cache.update(173.5);
        assert_eq!(cache.price(), 173.5);
        assert!(!cache.needs_refresh());
    }

    #[test]
    fn invalid_updates_are_ignored() {
        let cache = SolPriceCache::new();
        cache.update(f64::NAN);
        cache.update(-5.0);
        cache.update(0.0);
        assert_eq!(cache.price(), FALLBACK_SOL_USD);
        assert!(cache.needs_refresh());
    }
}
