use crate::database::error::DatabaseError;
use crate::orders::{OrderStatus, OrderView, PaymentStatus};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, user_id, restaurant_id, status, payment_method, payment_status, \
     subtotal_amount, discount_amount, total_amount, promotion_code, payment_retries, \
     cancellation_reason, needs_reconciliation, rating, rating_comment, created_at, updated_at";

/// Order entity
#[derive(Debug, Clone, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    pub status: String,
    pub payment_method: String,
    pub payment_status: String,
    pub subtotal_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub promotion_code: Option<String>,
    pub payment_retries: i32,
    pub cancellation_reason: Option<String>,
    pub needs_reconciliation: bool,
    pub rating: Option<i32>,
    pub rating_comment: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Order {
    pub fn status(&self) -> Option<OrderStatus> {
        OrderStatus::from_db_status(&self.status)
    }

    pub fn payment_status(&self) -> Option<PaymentStatus> {
        PaymentStatus::from_db_status(&self.payment_status)
    }

    /// Snapshot for the state machine; `None` when the stored strings are
    /// not part of the vocabulary (corrupt row).
    pub fn view(&self) -> Option<OrderView> {
        Some(OrderView {
            status: self.status()?,
            payment_status: self.payment_status()?,
            payment_retries: self.payment_retries,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    pub payment_method: String,
    pub subtotal_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub promotion_code: Option<String>,
}

/// Repository for orders.
///
/// Reads go through the pool; every write takes a `&mut PgConnection` so it
/// composes into the caller's transaction. The settlement orchestrator owns
/// transaction boundaries, not this layer.
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        conn: &mut PgConnection,
        new_order: &NewOrder,
    ) -> Result<Order, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders \
             (user_id, restaurant_id, status, payment_method, payment_status, \
              subtotal_amount, discount_amount, total_amount, promotion_code) \
             VALUES ($1, $2, 'pending', $3, 'pending', $4, $5, $6, $7) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(new_order.user_id)
        .bind(new_order.restaurant_id)
        .bind(&new_order.payment_method)
        .bind(new_order.subtotal_amount)
        .bind(new_order.discount_amount)
        .bind(new_order.total_amount)
        .bind(&new_order.promotion_code)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Acquire the per-order serialization: a row lock held for the rest of
    /// the enclosing transaction. Concurrent events for the same order queue
    /// here; different orders proceed in parallel.
    pub async fn lock_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Persist an accepted transition. `payment_status`/`cancellation_reason`
    /// are only written when the transition set them.
    pub async fn apply_transition(
        conn: &mut PgConnection,
        id: Uuid,
        status: OrderStatus,
        payment_status: Option<PaymentStatus>,
        cancellation_reason: Option<&str>,
        increment_payment_retries: bool,
    ) -> Result<Order, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders \
             SET status = $2, \
                 payment_status = COALESCE($3, payment_status), \
                 cancellation_reason = COALESCE($4, cancellation_reason), \
                 payment_retries = payment_retries + $5, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(payment_status.map(|p| p.as_str()))
        .bind(cancellation_reason)
        .bind(if increment_payment_retries { 1i32 } else { 0i32 })
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Flag a confirmed-amount disagreement for manual review; orthogonal to
    /// the state machine, the order status is left alone.
    pub async fn flag_needs_reconciliation(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE orders SET needs_reconciliation = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn set_rating(
        &self,
        id: Uuid,
        rating: i32,
        comment: Option<&str>,
    ) -> Result<Order, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders \
             SET rating = $2, rating_comment = $3, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(rating)
        .bind(comment)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE user_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_row(status: &str, payment_status: &str) -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            restaurant_id: Uuid::new_v4(),
            status: status.to_string(),
            payment_method: "momo".to_string(),
            payment_status: payment_status.to_string(),
            subtotal_amount: 100_000,
            discount_amount: 0,
            total_amount: 100_000,
            promotion_code: None,
            payment_retries: 0,
            cancellation_reason: None,
            needs_reconciliation: false,
            rating: None,
            rating_comment: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn view_parses_known_status_strings() {
        let view = order_row("ready_for_pickup", "completed").view().unwrap();
        assert_eq!(view.status, OrderStatus::ReadyForPickup);
        assert_eq!(view.payment_status, PaymentStatus::Completed);
    }

    #[test]
    fn view_rejects_unknown_status_strings() {
        assert!(order_row("limbo", "completed").view().is_none());
        assert!(order_row("pending", "half-paid").view().is_none());
    }
}
