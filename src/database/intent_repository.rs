use crate::database::error::DatabaseError;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

const INTENT_COLUMNS: &str = "id, order_id, provider, amount, provider_transaction_ref, status, \
     created_at, expires_at";

/// One attempt to collect payment for an order through one gateway.
///
/// An order accumulates intents across retries; at most one may ever reach
/// `confirmed` (enforced by a partial unique index).
#[derive(Debug, Clone, FromRow)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    pub amount: i64,
    pub provider_transaction_ref: Option<String>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Intent lifecycle strings kept in one place.
pub mod intent_status {
    pub const INITIATED: &str = "initiated";
    pub const AWAITING_CALLBACK: &str = "awaiting_callback";
    pub const CONFIRMED: &str = "confirmed";
    pub const FAILED: &str = "failed";
    pub const EXPIRED: &str = "expired";
}

pub struct IntentRepository {
    pool: PgPool,
}

impl IntentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        conn: &mut PgConnection,
        order_id: Uuid,
        provider: &str,
        amount: i64,
        ttl_secs: i64,
    ) -> Result<PaymentIntent, DatabaseError> {
        sqlx::query_as::<_, PaymentIntent>(&format!(
            "INSERT INTO payment_intents (order_id, provider, amount, status, expires_at) \
             VALUES ($1, $2, $3, 'initiated', NOW() + make_interval(secs => $4)) \
             RETURNING {INTENT_COLUMNS}"
        ))
        .bind(order_id)
        .bind(provider)
        .bind(amount)
        .bind(ttl_secs as f64)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Record the provider's reference once `initiate` succeeded and move
    /// the intent to `awaiting_callback`.
    pub async fn mark_awaiting_callback(
        &self,
        id: Uuid,
        provider_transaction_ref: &str,
    ) -> Result<PaymentIntent, DatabaseError> {
        sqlx::query_as::<_, PaymentIntent>(&format!(
            "UPDATE payment_intents \
             SET status = 'awaiting_callback', provider_transaction_ref = $2 \
             WHERE id = $1 \
             RETURNING {INTENT_COLUMNS}"
        ))
        .bind(id)
        .bind(provider_transaction_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_status(
        conn: &mut PgConnection,
        id: Uuid,
        status: &str,
    ) -> Result<PaymentIntent, DatabaseError> {
        sqlx::query_as::<_, PaymentIntent>(&format!(
            "UPDATE payment_intents SET status = $2 WHERE id = $1 RETURNING {INTENT_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Resolve a callback to its intent. Unlocked on purpose: lock order is
    /// always order row first, then intent, so the caller re-reads under
    /// `lock_by_id` after taking the order lock.
    pub async fn find_by_provider_ref(
        conn: &mut PgConnection,
        provider: &str,
        provider_transaction_ref: &str,
    ) -> Result<Option<PaymentIntent>, DatabaseError> {
        sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE provider = $1 AND provider_transaction_ref = $2"
        ))
        .bind(provider)
        .bind(provider_transaction_ref)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentIntent>, DatabaseError> {
        sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn lock_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<PaymentIntent>, DatabaseError> {
        sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// The intent that actually collected money, if any. At most one exists
    /// per order (partial unique index on `confirmed`).
    pub async fn find_confirmed_for_order(
        conn: &mut PgConnection,
        order_id: Uuid,
    ) -> Result<Option<PaymentIntent>, DatabaseError> {
        sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE order_id = $1 AND status = 'confirmed' \
             LIMIT 1"
        ))
        .bind(order_id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_latest_for_order(
        conn: &mut PgConnection,
        order_id: Uuid,
    ) -> Result<Option<PaymentIntent>, DatabaseError> {
        sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE order_id = $1 \
             ORDER BY created_at DESC \
             LIMIT 1"
        ))
        .bind(order_id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Candidates for the expiry sweep: intents still waiting past their
    /// deadline. The sweep re-checks each one under the order lock before
    /// acting, so reading without locks here is fine.
    pub async fn find_expired_awaiting(
        &self,
        batch_size: i64,
    ) -> Result<Vec<PaymentIntent>, DatabaseError> {
        sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE status IN ('initiated', 'awaiting_callback') \
               AND expires_at < NOW() \
               AND provider <> 'cod' \
             ORDER BY expires_at ASC \
             LIMIT $1"
        ))
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
