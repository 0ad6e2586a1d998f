use chrono::{DateTime, Utc};
use sqlx::Row;

use leadsync_core::domain::connection::UserId;

use super::{parse_timestamp, OAuthStateRecord, OAuthStateStore, RepositoryError};
use crate::DbPool;

pub struct SqlOAuthStateStore {
    pool: DbPool,
}

impl SqlOAuthStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OAuthStateStore for SqlOAuthStateStore {
    async fn insert_state(
        &self,
        state: &str,
        user_id: &UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO oauth_state (state, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(state)
            .bind(&user_id.0)
            .bind(expires_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn take_state(&self, state: &str) -> Result<Option<OAuthStateRecord>, RepositoryError> {
        let row = sqlx::query("SELECT user_id, expires_at FROM oauth_state WHERE state = ?")
            .bind(state)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        // The delete is the claim. If another caller consumed the row between
        // the select and here, rows_affected is zero and the state is treated
        // as already spent.
        let deleted = sqlx::query("DELETE FROM oauth_state WHERE state = ?")
            .bind(state)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(OAuthStateRecord {
            user_id: UserId(row.get::<String, _>("user_id")),
            expires_at: parse_timestamp(&row.get::<String, _>("expires_at"))?,
        }))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM oauth_state WHERE expires_at < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
