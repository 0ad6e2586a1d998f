//! Seed helpers shared by tests and local development tooling.

use crate::DbPool;

pub async fn seed_user(pool: &DbPool, id: &str, email: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO app_user (id, email) VALUES (?, ?)")
        .bind(id)
        .bind(email)
        .execute(pool)
        .await?;
    Ok(())
}

/// Seeds a user that already holds provider tokens, for exercising the
/// connected paths without walking the OAuth flow.
pub async fn seed_connected_user(
    pool: &DbPool,
    id: &str,
    email: &str,
    access_token: &str,
    refresh_token: &str,
    expires_at_rfc3339: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO app_user
             (id, email, hubspot_access_token, hubspot_refresh_token, hubspot_token_expires_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(email)
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at_rfc3339)
    .execute(pool)
    .await?;
    Ok(())
}
