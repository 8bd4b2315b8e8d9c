// =============================================================================
// Application context — the one shared handle behind scheduler and API
// =============================================================================
//
// The durable `AgentState` sits behind a single async mutex: the scheduler
// tick and every control-plane handler lock it for their full critical
// section, which is the whole single-writer guarantee. Everything else on
// the context is immutable or internally synchronized.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::error;

use crate::gatherers::tickers::TickerValidator;
use crate::persistence::StateStore;
use crate::providers::Providers;
use crate::state::AgentState;

/// Shared application context. Wrapped in `Arc` at startup.
pub struct AppContext {
    /// Single-writer durable state. Lock order: this is the only lock the
    /// core takes, so no ordering concerns exist.
    pub state: Mutex<AgentState>,
    pub store: StateStore,
    pub providers: Providers,
    pub validator: TickerValidator,
    /// Monotonic version bumped on every meaningful mutation.
    pub state_version: AtomicU64,
    pub start_time: std::time::Instant,
    /// Where the agent config JSON lives, for save-on-change.
    pub config_path: PathBuf,
}

impl AppContext {
    pub fn new(
        state: AgentState,
        store: StateStore,
        providers: Providers,
        validator: TickerValidator,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state: Mutex::new(state),
            store,
            providers,
            validator,
            state_version: AtomicU64::new(1),
            start_time: std::time::Instant::now(),
            config_path: config_path.into(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Persist the given state snapshot, logging rather than propagating a
    /// failure: persistence errors must never abort a tick.
    pub fn persist(&self, state: &AgentState) {
        if let Err(e) = self.store.save(state) {
            error!(error = %e, "state persist failed");
        }
    }
}
