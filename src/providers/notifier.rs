// =============================================================================
// Alert sinks — reference implementations of the notifier boundary
// =============================================================================
//
// The core emits `AlertEvent`s; transports (Telegram, Discord, webhooks) live
// behind the `AlertSink` trait outside this repo. The reference sink renders
// events to the structured log so a bare deployment still surfaces them.
// =============================================================================

use tracing::{info, warn};

use crate::providers::AlertSink;
use crate::types::AlertEvent;

/// Sink that renders alerts to the tracing log.
#[derive(Debug, Default, Clone)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn send(&self, event: AlertEvent) {
        match &event {
            AlertEvent::TradeEntry {
                symbol,
                venue,
                notional,
                reason,
            } => {
                info!(symbol, venue, notional, reason, "ALERT trade entry");
            }
            AlertEvent::TradeExit {
                symbol,
                venue,
                pnl_pct,
                reason,
            } => {
                info!(symbol, venue, pnl_pct, reason, "ALERT trade exit");
            }
            AlertEvent::CrisisLevelChange { from, to, triggered } => {
                warn!(
                    from = from.as_u8(),
                    to = to.as_u8(),
                    triggered = ?triggered,
                    "ALERT crisis level change"
                );
            }
            AlertEvent::KillSwitch => {
                warn!("ALERT kill switch activated");
            }
        }
    }
}

/// Sink that records events in memory; used by tests.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default, Clone)]
    pub struct RecordingSink {
        pub events: Arc<Mutex<Vec<AlertEvent>>>,
    }

    impl AlertSink for RecordingSink {
        fn send(&self, event: AlertEvent) {
            self.events.lock().push(event);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::test_support::RecordingSink;
    use super::*;
    use crate::types::CrisisLevel;

    #[test]
    fn recording_sink_captures_events() {
        let sink = RecordingSink::default();
        sink.send(AlertEvent::KillSwitch);
        sink.send(AlertEvent::CrisisLevelChange {
            from: CrisisLevel::Normal,
            to: CrisisLevel::Caution,
            triggered: vec!["VIX elevated".to_string()],
        });
        assert_eq!(sink.events.lock().len(), 2);
    }

    #[test]
    fn tracing_sink_accepts_all_variants() {
        let sink = TracingAlertSink;
        sink.send(AlertEvent::TradeEntry {
            symbol: "AAPL".into(),
            venue: "stock".into(),
            notional: 800.0,
            reason: "analyst buy".into(),
        });
        sink.send(AlertEvent::TradeExit {
            symbol: "AAPL".into(),
            venue: "stock".into(),
            pnl_pct: 10.5,
            reason: "take profit".into(),
        });
    }
}
