use crate::database::error::DatabaseError;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

const REFUND_COLUMNS: &str = "id, order_id, intent_id, provider, amount, status, attempts, \
     provider_refund_ref, last_error, created_at, updated_at";

/// A refund owed to a customer, enqueued by a cancel-after-payment
/// transition and drained by the refund processor.
#[derive(Debug, Clone, FromRow)]
pub struct Refund {
    pub id: Uuid,
    pub order_id: Uuid,
    pub intent_id: Uuid,
    pub provider: String,
    pub amount: i64,
    pub status: String,
    pub attempts: i32,
    pub provider_refund_ref: Option<String>,
    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub mod refund_status {
    pub const PENDING: &str = "pending";
    pub const PROCESSING: &str = "processing";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

pub struct RefundRepository {
    pool: PgPool,
}

impl RefundRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue inside the settlement transaction. One refund per order; a
    /// duplicate enqueue (replayed cancel) collapses into the existing row.
    pub async fn enqueue(
        conn: &mut PgConnection,
        order_id: Uuid,
        intent_id: Uuid,
        provider: &str,
        amount: i64,
    ) -> Result<Option<Refund>, DatabaseError> {
        sqlx::query_as::<_, Refund>(&format!(
            "INSERT INTO refunds (order_id, intent_id, provider, amount, status) \
             VALUES ($1, $2, $3, $4, 'pending') \
             ON CONFLICT (order_id) DO NOTHING \
             RETURNING {REFUND_COLUMNS}"
        ))
        .bind(order_id)
        .bind(intent_id)
        .bind(provider)
        .bind(amount)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Claim a batch for processing. `FOR UPDATE SKIP LOCKED` lets several
    /// worker instances drain the queue without stepping on each other.
    pub async fn claim_pending(
        conn: &mut PgConnection,
        batch_size: i64,
        max_attempts: i32,
    ) -> Result<Vec<Refund>, DatabaseError> {
        sqlx::query_as::<_, Refund>(&format!(
            "UPDATE refunds \
             SET status = 'processing', attempts = attempts + 1, updated_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM refunds \
                 WHERE status IN ('pending', 'failed') AND attempts < $2 \
                 ORDER BY created_at ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {REFUND_COLUMNS}"
        ))
        .bind(batch_size)
        .bind(max_attempts)
        .fetch_all(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_completed(
        &self,
        id: Uuid,
        provider_refund_ref: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE refunds \
             SET status = 'completed', provider_refund_ref = $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(provider_refund_ref)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE refunds SET status = 'failed', last_error = $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Refund>, DatabaseError> {
        sqlx::query_as::<_, Refund>(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
