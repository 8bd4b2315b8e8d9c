// =============================================================================
// State Store — one opaque key, atomic writes
// =============================================================================
//
// The entire `AgentState` maps to a single JSON file. Writes go to a `.tmp`
// sibling then rename, so a crash mid-write can never corrupt the snapshot.
// Last-writer-wins is sound because exactly one writer exists.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::state::AgentState;

/// File-backed store for the serialized agent state.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, or return `None` when no file exists yet (first
    /// boot). Corrupt scalars are repaired in place via `sanitize`.
    pub fn load(&self) -> Result<Option<AgentState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state from {}", self.path.display()))?;

        let mut state: AgentState = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse state from {}", self.path.display()))?;

        let repairs = state.sanitize();
        if repairs > 0 {
            warn!(repairs, "state loaded with field repairs");
        } else {
            info!(path = %self.path.display(), "state loaded");
        }

        Ok(Some(state))
    }

    /// Load the snapshot, falling back to a default state (written
    /// immediately) on first boot.
    pub fn load_or_default(&self) -> Result<AgentState> {
        match self.load()? {
            Some(state) => Ok(state),
            None => {
                let state = AgentState::default();
                self.save(&state)?;
                info!(path = %self.path.display(), "first boot — default state written");
                Ok(state)
            }
        }
    }

    /// Persist the snapshot atomically (write `.tmp`, rename).
    pub fn save(&self, state: &AgentState) -> Result<()> {
        let content =
            serde_json::to_string(state).context("failed to serialise agent state to JSON")?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp state to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename tmp state to {}", self.path.display()))?;

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> StateStore {
        let dir = std::env::temp_dir().join("polaris-state-tests");
        std::fs::create_dir_all(&dir).unwrap();
        StateStore::new(dir.join(name))
    }

    #[test]
    fn first_boot_writes_default_state() {
        let store = temp_store("first_boot.json");
        let _ = std::fs::remove_file(store.path());

        let state = store.load_or_default().unwrap();
        assert!(!state.enabled);
        assert!(store.path().exists());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let store = temp_store("roundtrip.json");
        let mut state = AgentState::default();
        state.enabled = true;
        state.dex.paper_balance_sol = 4.2;
        store.save(&state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.enabled);
        assert!((loaded.dex.paper_balance_sol - 4.2).abs() < 1e-12);
    }

    #[test]
    fn corrupt_scalars_are_repaired_on_load() {
        let store = temp_store("corrupt.json");
        let mut state = AgentState::default();
        store.save(&state).unwrap();

        // Introduce a null balance by hand (JSON has no NaN literal; a null
        // numeric field would fail to parse as f64, so simulate corruption by
        // replacing the balance with a huge bogus literal and verifying
        // sanitize keeps the state usable).
        state.dex.paper_balance_sol = -3.0;
        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.dex.paper_balance_sol >= 0.0);
    }
}
