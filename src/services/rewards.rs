//! Promotion and loyalty side effects of settlement.
//!
//! Both operations are written to run inside the caller's settlement
//! transaction: a rollback of the order transition rolls back counter
//! increments, usage rows and ledger entries with it. Both failure modes
//! are deliberately non-fatal — an order settles fine without its discount
//! or with points already credited by an earlier attempt.

use sqlx::PgConnection;
use tracing::{info, warn};

use crate::database::error::DatabaseError;
use crate::database::loyalty_repository::{LoyaltyActivity, LoyaltyRepository};
use crate::database::order_repository::Order;
use crate::database::promotion_repository::{Promotion, PromotionRepository};
use crate::money::Money;

/// What happened to the discount at settlement time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionFinalization {
    Applied { discount_amount: i64 },
    /// Limit consumed by a concurrent order since cart-time validation.
    Exhausted,
    /// Per-user cap reached since cart-time validation.
    PerUserCapReached,
    NoPromotion,
}

/// What happened to the loyalty accrual.
#[derive(Debug, Clone)]
pub enum LoyaltyAccrual {
    Credited(LoyaltyActivity),
    /// A prior attempt already credited this order.
    AlreadyCredited,
    NothingToAccrue,
}

#[derive(Debug, Clone)]
pub struct RewardsConfig {
    /// Points per order as basis points of the total (100 = 1%).
    pub loyalty_earn_bps: u32,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            loyalty_earn_bps: 100,
        }
    }
}

impl RewardsConfig {
    pub fn from_env() -> Self {
        Self {
            loyalty_earn_bps: std::env::var("LOYALTY_EARN_BPS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(100),
        }
    }
}

/// Coordinates promotion counters and the loyalty ledger as transactional
/// side effects of order transitions.
pub struct RewardsCoordinator {
    config: RewardsConfig,
}

impl RewardsCoordinator {
    pub fn new(config: RewardsConfig) -> Self {
        Self { config }
    }

    /// Discount for a live promotion against an order subtotal, used at
    /// cart time. Truncates to whole minor units and honors the absolute
    /// cap.
    pub fn compute_discount(
        &self,
        promotion: &Promotion,
        subtotal: Money,
    ) -> Result<Money, crate::money::MoneyError> {
        let raw = subtotal.percentage(promotion.discount_bps.max(0) as u32)?;
        if promotion.max_discount_amount > 0 && raw.minor() > promotion.max_discount_amount {
            return Money::from_minor(promotion.max_discount_amount);
        }
        Ok(raw)
    }

    /// Points earned for a completed order, rounded down.
    pub fn points_for(&self, total_amount: i64) -> i64 {
        (i128::from(total_amount) * i128::from(self.config.loyalty_earn_bps) / 10_000) as i64
    }

    /// Settlement-time promotion finalization.
    ///
    /// Cart-time validation happened minutes ago; the limits are re-checked
    /// here with the guarded counter UPDATE so the global limit can never be
    /// oversubscribed, and the per-user count is taken inside the same
    /// transaction.
    pub async fn finalize_promotion(
        &self,
        conn: &mut PgConnection,
        order: &Order,
    ) -> Result<PromotionFinalization, DatabaseError> {
        let Some(code) = order.promotion_code.as_deref() else {
            return Ok(PromotionFinalization::NoPromotion);
        };

        let Some(promotion) = PromotionRepository::find_by_code_tx(conn, code).await? else {
            // The code vanished between cart and settlement; settle without
            // the discount rather than failing the payment.
            warn!(order_id = %order.id, code, "promotion disappeared before settlement");
            return Ok(PromotionFinalization::Exhausted);
        };

        let user_usages =
            PromotionRepository::count_user_usages(conn, promotion.id, order.user_id).await?;
        if user_usages >= i64::from(promotion.max_per_user) {
            info!(
                order_id = %order.id,
                code,
                "per-user promotion cap reached at settlement"
            );
            return Ok(PromotionFinalization::PerUserCapReached);
        }

        if !PromotionRepository::try_consume_slot(conn, promotion.id).await? {
            info!(order_id = %order.id, code, "promotion exhausted at settlement");
            return Ok(PromotionFinalization::Exhausted);
        }

        PromotionRepository::insert_usage(
            conn,
            promotion.id,
            order.id,
            order.user_id,
            order.discount_amount,
        )
        .await?;

        info!(
            order_id = %order.id,
            code,
            discount = order.discount_amount,
            "promotion finalized"
        );
        Ok(PromotionFinalization::Applied {
            discount_amount: order.discount_amount,
        })
    }

    /// Give back a consumed slot when a finalized order is cancelled. A
    /// no-op when no usage row exists (promotion never finalized).
    pub async fn release_promotion(
        &self,
        conn: &mut PgConnection,
        order: &Order,
    ) -> Result<(), DatabaseError> {
        let Some(code) = order.promotion_code.as_deref() else {
            return Ok(());
        };
        let Some(promotion) = PromotionRepository::find_by_code_tx(conn, code).await? else {
            return Ok(());
        };
        if PromotionRepository::delete_usage(conn, promotion.id, order.id).await? {
            PromotionRepository::release_slot(conn, promotion.id).await?;
            info!(order_id = %order.id, code, "promotion slot released");
        }
        Ok(())
    }

    /// Credit loyalty points for a delivered order, exactly once.
    ///
    /// The account row lock serializes balance math per user; the
    /// `(order_id, 'earned')` uniqueness turns a replayed settlement into
    /// `AlreadyCredited` instead of a double credit.
    pub async fn accrue_loyalty(
        &self,
        conn: &mut PgConnection,
        order: &Order,
    ) -> Result<LoyaltyAccrual, DatabaseError> {
        let points = self.points_for(order.total_amount);
        if points <= 0 {
            return Ok(LoyaltyAccrual::NothingToAccrue);
        }

        let balance = LoyaltyRepository::lock_account_balance(conn, order.user_id).await?;
        let activity = LoyaltyRepository::insert_earned(
            conn,
            order.user_id,
            order.id,
            points,
            balance + points,
        )
        .await?;

        match activity {
            Some(activity) => {
                info!(
                    order_id = %order.id,
                    user_id = %order.user_id,
                    points,
                    balance = activity.balance,
                    "loyalty points credited"
                );
                Ok(LoyaltyAccrual::Credited(activity))
            }
            None => {
                info!(order_id = %order.id, "loyalty accrual already exists, skipping");
                Ok(LoyaltyAccrual::AlreadyCredited)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn coordinator() -> RewardsCoordinator {
        RewardsCoordinator::new(RewardsConfig {
            loyalty_earn_bps: 100,
        })
    }

    fn promotion(discount_bps: i32, max_discount: i64) -> Promotion {
        Promotion {
            id: Uuid::new_v4(),
            code: "SUMMER".to_string(),
            discount_bps,
            max_discount_amount: max_discount,
            usage_limit: 10,
            max_per_user: 1,
            current_redemptions: 0,
            is_active: true,
            starts_at: None,
            ends_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn points_are_one_percent_rounded_down() {
        let c = coordinator();
        assert_eq!(c.points_for(100_000), 1_000);
        assert_eq!(c.points_for(99), 0);
        assert_eq!(c.points_for(150), 1);
    }

    #[test]
    fn discount_truncates_and_respects_cap() {
        let c = coordinator();
        let subtotal = Money::from_minor(99_999).unwrap();
        // 10% of 99999 = 9999.9 -> 9999
        let discount = c.compute_discount(&promotion(1000, 0), subtotal).unwrap();
        assert_eq!(discount.minor(), 9_999);

        let capped = c
            .compute_discount(&promotion(1000, 5_000), subtotal)
            .unwrap();
        assert_eq!(capped.minor(), 5_000);
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        let c = coordinator();
        let subtotal = Money::from_minor(10_000).unwrap();
        // 100% promotion
        let discount = c.compute_discount(&promotion(10_000, 0), subtotal).unwrap();
        assert!(discount.minor() <= subtotal.minor());
    }
}
