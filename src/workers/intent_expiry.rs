//! Payment-intent expiry sweep.
//!
//! Periodically feeds `payment_failed` to pending orders whose intent
//! passed its deadline with no callback. The sweep reuses the
//! orchestrator's per-order lock and transition table, so any number of
//! instances can run it concurrently; the worker loop itself never
//! propagates a failure upward — one bad cycle is logged and the next
//! cycle starts fresh.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::services::settlement::SettlementOrchestrator;

#[derive(Debug, Clone)]
pub struct IntentExpiryConfig {
    /// How often the worker wakes up.
    pub poll_interval: Duration,
    /// Maximum intents processed per cycle.
    pub batch_size: i64,
}

impl Default for IntentExpiryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

impl IntentExpiryConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("INTENT_EXPIRY_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("INTENT_EXPIRY_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

pub async fn run(
    orchestrator: Arc<SettlementOrchestrator>,
    config: IntentExpiryConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        poll_interval_secs = config.poll_interval.as_secs(),
        batch_size = config.batch_size,
        "intent expiry worker started"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("intent expiry worker shutting down");
                    return;
                }
            }
        }

        match orchestrator.expire_intents(config.batch_size).await {
            Ok(0) => {}
            Ok(count) => info!(count, "expired payment intents processed"),
            Err(e) => error!(error = %e, "intent expiry cycle failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let cfg = IntentExpiryConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.batch_size, 100);
    }
}
