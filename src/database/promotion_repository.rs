use crate::database::error::DatabaseError;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

const PROMOTION_COLUMNS: &str =
    "id, code, discount_bps, max_discount_amount, usage_limit, max_per_user, \
     current_redemptions, is_active, starts_at, ends_at, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct Promotion {
    pub id: Uuid,
    pub code: String,
    /// Discount as basis points of the order subtotal.
    pub discount_bps: i32,
    /// Cap on the absolute discount; 0 means uncapped.
    pub max_discount_amount: i64,
    pub usage_limit: i32,
    pub max_per_user: i32,
    pub current_redemptions: i32,
    pub is_active: bool,
    pub starts_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ends_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Promotion {
    pub fn is_live(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.is_active
            && self.starts_at.map_or(true, |s| s <= now)
            && self.ends_at.map_or(true, |e| e > now)
    }
}

/// Usage row tying a redemption to one order.
#[derive(Debug, Clone, FromRow)]
pub struct PromotionUsage {
    pub promotion_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub discount_amount: i64,
    pub applied_at: chrono::DateTime<chrono::Utc>,
}

pub struct PromotionRepository {
    pool: PgPool,
}

impl PromotionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<Promotion>, DatabaseError> {
        sqlx::query_as::<_, Promotion>(&format!(
            "SELECT {PROMOTION_COLUMNS} FROM promotions WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_code_tx(
        conn: &mut PgConnection,
        code: &str,
    ) -> Result<Option<Promotion>, DatabaseError> {
        sqlx::query_as::<_, Promotion>(&format!(
            "SELECT {PROMOTION_COLUMNS} FROM promotions WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Atomically take one redemption slot.
    ///
    /// The `current_redemptions < usage_limit` guard lives in the UPDATE
    /// itself: under 2x usage_limit concurrent settlements exactly
    /// usage_limit of them match the row. No affected row means the pool
    /// was drained between cart time and settlement.
    pub async fn try_consume_slot(
        conn: &mut PgConnection,
        promotion_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE promotions \
             SET current_redemptions = current_redemptions + 1, updated_at = NOW() \
             WHERE id = $1 AND current_redemptions < usage_limit",
        )
        .bind(promotion_id)
        .execute(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    /// Give a consumed slot back (cancellation); floored at zero.
    pub async fn release_slot(
        conn: &mut PgConnection,
        promotion_id: Uuid,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE promotions \
             SET current_redemptions = GREATEST(current_redemptions - 1, 0), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(promotion_id)
        .execute(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn count_user_usages(
        conn: &mut PgConnection,
        promotion_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM promotion_usages WHERE promotion_id = $1 AND user_id = $2",
        )
        .bind(promotion_id)
        .bind(user_id)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(count.0)
    }

    pub async fn insert_usage(
        conn: &mut PgConnection,
        promotion_id: Uuid,
        order_id: Uuid,
        user_id: Uuid,
        discount_amount: i64,
    ) -> Result<PromotionUsage, DatabaseError> {
        sqlx::query_as::<_, PromotionUsage>(
            "INSERT INTO promotion_usages (promotion_id, order_id, user_id, discount_amount) \
             VALUES ($1, $2, $3, $4) \
             RETURNING promotion_id, order_id, user_id, discount_amount, applied_at",
        )
        .bind(promotion_id)
        .bind(order_id)
        .bind(user_id)
        .bind(discount_amount)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Remove the usage row on cancel; reports whether one existed so the
    /// caller knows whether a slot needs releasing.
    pub async fn delete_usage(
        conn: &mut PgConnection,
        promotion_id: Uuid,
        order_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM promotion_usages WHERE promotion_id = $1 AND order_id = $2")
                .bind(promotion_id)
                .bind(order_id)
                .execute(conn)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn promotion(active: bool, start_offset: i64, end_offset: i64) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: Uuid::new_v4(),
            code: "TET2026".to_string(),
            discount_bps: 1000,
            max_discount_amount: 0,
            usage_limit: 100,
            max_per_user: 1,
            current_redemptions: 0,
            is_active: active,
            starts_at: Some(now + Duration::minutes(start_offset)),
            ends_at: Some(now + Duration::minutes(end_offset)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn liveness_respects_window_and_flag() {
        let now = Utc::now();
        assert!(promotion(true, -60, 60).is_live(now));
        assert!(!promotion(false, -60, 60).is_live(now));
        assert!(!promotion(true, 10, 60).is_live(now));
        assert!(!promotion(true, -60, -10).is_live(now));
    }
}
