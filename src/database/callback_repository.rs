use crate::database::error::DatabaseError;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// Idempotency ledger entry: one received provider notification, duplicate
/// or not.
#[derive(Debug, Clone, FromRow)]
pub struct CallbackEvent {
    pub id: Uuid,
    pub idempotency_key: String,
    pub provider: String,
    pub raw_payload: serde_json::Value,
    pub signature_valid: bool,
    pub outcome: String,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// Ledger outcome vocabulary, also surfaced in webhook acknowledgements.
pub mod callback_outcome {
    pub const APPLIED: &str = "applied";
    pub const IGNORED_DUPLICATE: &str = "ignored_duplicate";
    pub const REJECTED_INVALID_SIGNATURE: &str = "rejected_invalid_signature";
}

/// Result of the atomic insert-if-absent.
#[derive(Debug)]
pub struct RecordedCallback {
    pub is_new: bool,
    pub event: Option<CallbackEvent>,
}

pub struct CallbackRepository {
    pool: PgPool,
}

impl CallbackRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deterministic key over the event's immutable identifiers.
    pub fn idempotency_key(provider: &str, provider_transaction_ref: &str, event_type: &str) -> String {
        format!("{provider}:{provider_transaction_ref}:{event_type}")
    }

    /// The single atomic insert-if-absent behind all duplicate suppression.
    ///
    /// Runs on the caller's transaction connection: under concurrent
    /// duplicate delivery exactly one transaction observes `is_new = true`,
    /// and if that transaction later rolls back, the key is released with it
    /// so the provider's retry gets a clean attempt.
    pub async fn record(
        conn: &mut PgConnection,
        idempotency_key: &str,
        provider: &str,
        raw_payload: &serde_json::Value,
        signature_valid: bool,
        outcome: &str,
    ) -> Result<RecordedCallback, DatabaseError> {
        let inserted = sqlx::query_as::<_, CallbackEvent>(
            "INSERT INTO processed_callbacks \
             (idempotency_key, provider, raw_payload, signature_valid, outcome, processed_at) \
             VALUES ($1, $2, $3, $4, $5, NOW()) \
             ON CONFLICT (idempotency_key) DO NOTHING \
             RETURNING id, idempotency_key, provider, raw_payload, signature_valid, outcome, \
                       processed_at, received_at",
        )
        .bind(idempotency_key)
        .bind(provider)
        .bind(raw_payload)
        .bind(signature_valid)
        .bind(outcome)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(RecordedCallback {
            is_new: inserted.is_some(),
            event: inserted,
        })
    }

    pub async fn find_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<CallbackEvent>, DatabaseError> {
        sqlx::query_as::<_, CallbackEvent>(
            "SELECT id, idempotency_key, provider, raw_payload, signature_valid, outcome, \
                    processed_at, received_at \
             FROM processed_callbacks WHERE idempotency_key = $1",
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_deterministic() {
        let a = CallbackRepository::idempotency_key("momo", "ord-1", "payment");
        let b = CallbackRepository::idempotency_key("momo", "ord-1", "payment");
        assert_eq!(a, b);
        assert_eq!(a, "momo:ord-1:payment");
        assert_ne!(
            a,
            CallbackRepository::idempotency_key("momo", "ord-1", "refund")
        );
        assert_ne!(
            a,
            CallbackRepository::idempotency_key("zalopay", "ord-1", "payment")
        );
    }
}
