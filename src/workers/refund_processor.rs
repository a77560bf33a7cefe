//! Refund processor.
//!
//! Drains refunds enqueued by cancel-after-payment transitions: calls the
//! owning gateway's refund direction and, on success, moves the order's
//! payment axis to `refunded`. Claiming uses `FOR UPDATE SKIP LOCKED`, so
//! multiple instances share the queue without double-refunding, and
//! attempts are bounded per row.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::database::error::DatabaseError;
use crate::database::intent_repository::IntentRepository;
use crate::database::order_repository::OrderRepository;
use crate::database::refund_repository::{Refund, RefundRepository};
use crate::gateways::{GatewayFactory, GatewayName, RefundRequest};
use crate::money::Money;
use crate::orders::PaymentStatus;

#[derive(Debug, Clone)]
pub struct RefundProcessorConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// Attempts per refund before it stays failed for manual review.
    pub max_attempts: i32,
}

impl Default for RefundProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 20,
            max_attempts: 5,
        }
    }
}

impl RefundProcessorConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("REFUND_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("REFUND_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg.max_attempts = std::env::var("REFUND_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(cfg.max_attempts);
        cfg
    }
}

pub struct RefundProcessor {
    pool: PgPool,
    gateways: Arc<GatewayFactory>,
    refunds: RefundRepository,
    intents: IntentRepository,
    config: RefundProcessorConfig,
}

impl RefundProcessor {
    pub fn new(pool: PgPool, gateways: Arc<GatewayFactory>, config: RefundProcessorConfig) -> Self {
        Self {
            refunds: RefundRepository::new(pool.clone()),
            intents: IntentRepository::new(pool.clone()),
            pool,
            gateways,
            config,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "refund processor started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("refund processor shutting down");
                        return;
                    }
                }
            }

            match self.drain_once().await {
                Ok(0) => {}
                Ok(count) => info!(count, "refunds processed"),
                Err(e) => error!(error = %e, "refund cycle failed"),
            }
        }
    }

    /// Claim and process one batch; returns how many refunds completed.
    pub async fn drain_once(&self) -> Result<usize, DatabaseError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
        let claimed = RefundRepository::claim_pending(
            conn.as_mut(),
            self.config.batch_size,
            self.config.max_attempts,
        )
        .await?;
        drop(conn);

        // Refunds in a batch belong to different orders, so they can run
        // concurrently.
        let results =
            futures::future::join_all(claimed.iter().map(|refund| self.process_one(refund))).await;

        let mut completed = 0;
        for (refund, result) in claimed.iter().zip(results) {
            match result {
                Ok(()) => completed += 1,
                Err(e) => {
                    warn!(
                        refund_id = %refund.id,
                        order_id = %refund.order_id,
                        attempts = refund.attempts,
                        error = %e,
                        "refund attempt failed"
                    );
                    let _ = self.refunds.mark_failed(refund.id, &e.to_string()).await;
                }
            }
        }
        Ok(completed)
    }

    async fn process_one(&self, refund: &Refund) -> anyhow::Result<()> {
        let provider = GatewayName::from_str(&refund.provider)?;
        let gateway = self.gateways.get(provider)?;

        let intent = self
            .intents
            .find_by_id(refund.intent_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("refund {} references missing intent", refund.id))?;

        let issued = gateway
            .refund(RefundRequest {
                order_id: refund.order_id,
                transaction_reference: intent.id.to_string(),
                provider_transaction_ref: intent
                    .provider_transaction_ref
                    .clone()
                    .unwrap_or_else(|| intent.id.to_string()),
                amount: Money::from_minor(refund.amount)?,
                reason: "order cancelled".to_string(),
            })
            .await?;

        self.refunds
            .mark_completed(refund.id, &issued.provider_refund_ref)
            .await?;

        // completed -> refunded is the one sanctioned reversal on the
        // payment axis.
        let mut tx = self.pool.begin().await?;
        if let Some(order) = OrderRepository::lock_by_id(tx.as_mut(), refund.order_id).await? {
            if order.payment_status() == Some(PaymentStatus::Completed) {
                if let Some(status) = order.status() {
                    OrderRepository::apply_transition(
                        tx.as_mut(),
                        order.id,
                        status,
                        Some(PaymentStatus::Refunded),
                        None,
                        false,
                    )
                    .await?;
                }
            }
        }
        tx.commit().await?;

        info!(
            refund_id = %refund.id,
            order_id = %refund.order_id,
            provider_refund_ref = %issued.provider_refund_ref,
            "refund completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let cfg = RefundProcessorConfig::default();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.batch_size, 20);
    }
}
