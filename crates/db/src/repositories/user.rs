use chrono::{DateTime, Utc};
use sqlx::Row;

use leadsync_core::domain::connection::{Connection, User, UserId};

use super::{parse_timestamp, ConnectionStore, RepositoryError, UserStore};
use crate::DbPool;

pub struct SqlUserStore {
    pool: DbPool,
}

impl SqlUserStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserStore for SqlUserStore {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT id, email FROM app_user WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| User {
            id: UserId(row.get::<String, _>("id")),
            email: row.get::<String, _>("email"),
        }))
    }
}

#[async_trait::async_trait]
impl ConnectionStore for SqlUserStore {
    async fn find_connection(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Connection>, RepositoryError> {
        let row = sqlx::query(
            "SELECT hubspot_access_token, hubspot_refresh_token, hubspot_owner_id,
                    hubspot_token_expires_at
             FROM app_user WHERE id = ?",
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let access_token: Option<String> = row.get("hubspot_access_token");
        let refresh_token: Option<String> = row.get("hubspot_refresh_token");
        let (Some(access_token), Some(refresh_token)) = (access_token, refresh_token) else {
            return Ok(None);
        };

        let expires_at = row
            .get::<Option<String>, _>("hubspot_token_expires_at")
            .map(|raw| parse_timestamp(&raw))
            .transpose()?;

        Ok(Some(Connection {
            access_token,
            refresh_token,
            owner_id: row.get("hubspot_owner_id"),
            expires_at,
        }))
    }

    async fn save_connection(
        &self,
        user_id: &UserId,
        access_token: &str,
        refresh_token: &str,
        owner_id: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE app_user
             SET hubspot_access_token = ?, hubspot_refresh_token = ?,
                 hubspot_owner_id = ?, hubspot_token_expires_at = ?,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?",
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(owner_id)
        .bind(expires_at.to_rfc3339())
        .bind(&user_id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("app_user {user_id}")));
        }
        Ok(())
    }

    async fn clear_connection(&self, user_id: &UserId) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE app_user
             SET hubspot_access_token = NULL, hubspot_refresh_token = NULL,
                 hubspot_owner_id = NULL, hubspot_token_expires_at = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?",
        )
        .bind(&user_id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("app_user {user_id}")));
        }
        Ok(())
    }
}
