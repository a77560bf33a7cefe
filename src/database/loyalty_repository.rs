use crate::database::error::DatabaseError;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// Ledger entry for point movement; every row carries the running balance.
#[derive(Debug, Clone, FromRow)]
pub struct LoyaltyActivity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub activity_type: String,
    pub points: i64,
    pub balance: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Ledger activity vocabulary.
pub mod activity_type {
    pub const EARNED: &str = "earned";
    pub const REDEEMED: &str = "redeemed";
    pub const EXPIRED: &str = "expired";
    pub const ADJUSTED: &str = "adjusted";
}

pub struct LoyaltyRepository {
    pool: PgPool,
}

impl LoyaltyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock (and lazily create) the account row.
    ///
    /// The `FOR UPDATE` serializes balance math per user for the rest of the
    /// transaction, so `balance(N) = balance(N-1) + points` holds under
    /// concurrent settlements.
    pub async fn lock_account_balance(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<i64, DatabaseError> {
        sqlx::query(
            "INSERT INTO loyalty_accounts (user_id, balance) VALUES ($1, 0) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let row: (i64,) =
            sqlx::query_as("SELECT balance FROM loyalty_accounts WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_one(conn)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(row.0)
    }

    /// Append an `earned` entry and advance the balance.
    ///
    /// The `(order_id, activity_type)` unique constraint makes a replayed
    /// settlement insert nothing; `Ok(None)` reports that the credit already
    /// exists. Call with the account row locked.
    pub async fn insert_earned(
        conn: &mut PgConnection,
        user_id: Uuid,
        order_id: Uuid,
        points: i64,
        new_balance: i64,
    ) -> Result<Option<LoyaltyActivity>, DatabaseError> {
        let inserted = sqlx::query_as::<_, LoyaltyActivity>(
            "INSERT INTO loyalty_activities (user_id, order_id, activity_type, points, balance) \
             VALUES ($1, $2, 'earned', $3, $4) \
             ON CONFLICT (order_id, activity_type) DO NOTHING \
             RETURNING id, user_id, order_id, activity_type, points, balance, created_at",
        )
        .bind(user_id)
        .bind(order_id)
        .bind(points)
        .bind(new_balance)
        .fetch_optional(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if inserted.is_some() {
            sqlx::query(
                "UPDATE loyalty_accounts SET balance = $2, updated_at = NOW() WHERE user_id = $1",
            )
            .bind(user_id)
            .bind(new_balance)
            .execute(conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        }

        Ok(inserted)
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LoyaltyActivity>, DatabaseError> {
        sqlx::query_as::<_, LoyaltyActivity>(
            "SELECT id, user_id, order_id, activity_type, points, balance, created_at \
             FROM loyalty_activities \
             WHERE user_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<i64, DatabaseError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT balance FROM loyalty_accounts WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(|r| r.0).unwrap_or(0))
    }
}
