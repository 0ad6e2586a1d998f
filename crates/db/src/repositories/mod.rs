use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use leadsync_core::domain::connection::{Connection, User, UserId};

pub mod memory;
pub mod oauth_state;
pub mod user;

pub use memory::{InMemoryOAuthStateStore, InMemoryUserStore};
pub use oauth_state::SqlOAuthStateStore;
pub use user::SqlUserStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("row not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
}

/// Persistence seam for the per-user provider connection. `find_connection`
/// returns `None` both for unknown users and for users without a stored
/// access token; callers that need to tell these apart check [`UserStore`]
/// first.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn find_connection(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Connection>, RepositoryError>;

    /// Writes the full connection record in one update. The owner travels
    /// with the tokens so a failed second write can never leave fresh
    /// tokens next to a stale owner.
    async fn save_connection(
        &self,
        user_id: &UserId,
        access_token: &str,
        refresh_token: &str,
        owner_id: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn clear_connection(&self, user_id: &UserId) -> Result<(), RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthStateRecord {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

/// Short-lived anti-forgery state issued at authorization time. `take_state`
/// consumes: a given state value is handed out at most once, even under
/// concurrent callbacks.
#[async_trait]
pub trait OAuthStateStore: Send + Sync {
    async fn insert_state(
        &self,
        state: &str,
        user_id: &UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn take_state(&self, state: &str) -> Result<Option<OAuthStateRecord>, RepositoryError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {err}")))
}
