use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use leadsync_core::domain::connection::{Connection, User, UserId};

use super::{
    ConnectionStore, OAuthStateRecord, OAuthStateStore, RepositoryError, UserStore,
};

struct UserRecord {
    user: User,
    connection: Option<Connection>,
}

/// Map-backed stand-in for [`super::SqlUserStore`], used by service-level
/// tests that do not want a database.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserStore {
    pub async fn insert_user(&self, user: User) {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), UserRecord { user, connection: None });
    }

    pub async fn insert_connected_user(&self, user: User, connection: Connection) {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), UserRecord { user, connection: Some(connection) });
    }
}

#[async_trait::async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).map(|record| record.user.clone()))
    }
}

#[async_trait::async_trait]
impl ConnectionStore for InMemoryUserStore {
    async fn find_connection(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Connection>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&user_id.0).and_then(|record| record.connection.clone()))
    }

    async fn save_connection(
        &self,
        user_id: &UserId,
        access_token: &str,
        refresh_token: &str,
        owner_id: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        let record = users
            .get_mut(&user_id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("app_user {user_id}")))?;

        record.connection = Some(Connection {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            owner_id: owner_id.map(str::to_string),
            expires_at: Some(expires_at),
        });
        Ok(())
    }

    async fn clear_connection(&self, user_id: &UserId) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        let record = users
            .get_mut(&user_id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("app_user {user_id}")))?;
        record.connection = None;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOAuthStateStore {
    states: RwLock<HashMap<String, OAuthStateRecord>>,
}

#[async_trait::async_trait]
impl OAuthStateStore for InMemoryOAuthStateStore {
    async fn insert_state(
        &self,
        state: &str,
        user_id: &UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        states
            .insert(state.to_string(), OAuthStateRecord { user_id: user_id.clone(), expires_at });
        Ok(())
    }

    async fn take_state(&self, state: &str) -> Result<Option<OAuthStateRecord>, RepositoryError> {
        let mut states = self.states.write().await;
        Ok(states.remove(state))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, record| record.expires_at >= now);
        Ok((before - states.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use leadsync_core::domain::connection::{Connection, User, UserId};

    use crate::repositories::{
        ConnectionStore, InMemoryOAuthStateStore, InMemoryUserStore, OAuthStateStore,
        RepositoryError, UserStore,
    };

    fn user(id: &str) -> User {
        User { id: UserId(id.to_string()), email: format!("{id}@example.com") }
    }

    #[tokio::test]
    async fn connection_lifecycle_round_trips() {
        let store = InMemoryUserStore::default();
        store.insert_user(user("u-1")).await;
        let user_id = UserId("u-1".to_string());

        assert!(store.find_by_id(&user_id).await.unwrap().is_some());
        assert!(store.find_connection(&user_id).await.unwrap().is_none());

        let expires_at = Utc::now() + Duration::minutes(30);
        store
            .save_connection(&user_id, "access", "refresh", Some("owner-1"), expires_at)
            .await
            .unwrap();

        let connection = store.find_connection(&user_id).await.unwrap().unwrap();
        assert_eq!(connection.access_token, "access");
        assert_eq!(connection.owner_id.as_deref(), Some("owner-1"));

        store.clear_connection(&user_id).await.unwrap();
        assert!(store.find_connection(&user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_connection_replaces_the_owner_in_the_same_write() {
        let store = InMemoryUserStore::default();
        let user_id = UserId("u-1".to_string());
        store
            .insert_connected_user(
                user("u-1"),
                Connection {
                    access_token: "old-access".to_string(),
                    refresh_token: "old-refresh".to_string(),
                    owner_id: Some("owner-1".to_string()),
                    expires_at: None,
                },
            )
            .await;

        store
            .save_connection(&user_id, "new-access", "new-refresh", None, Utc::now())
            .await
            .unwrap();

        let connection = store.find_connection(&user_id).await.unwrap().unwrap();
        assert_eq!(connection.access_token, "new-access");
        assert!(connection.owner_id.is_none());
    }

    #[tokio::test]
    async fn writes_for_unknown_user_fail() {
        let store = InMemoryUserStore::default();
        let user_id = UserId("nope".to_string());

        let error = store
            .save_connection(&user_id, "a", "r", None, Utc::now())
            .await
            .expect_err("should fail");
        assert!(matches!(error, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn oauth_state_is_single_use() {
        let store = InMemoryOAuthStateStore::default();
        let user_id = UserId("u-1".to_string());
        store.insert_state("s", &user_id, Utc::now() + Duration::minutes(10)).await.unwrap();

        assert!(store.take_state("s").await.unwrap().is_some());
        assert!(store.take_state("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_expired_counts_removed_states() {
        let store = InMemoryOAuthStateStore::default();
        let user_id = UserId("u-1".to_string());
        let now = Utc::now();
        store.insert_state("old", &user_id, now - Duration::minutes(1)).await.unwrap();
        store.insert_state("new", &user_id, now + Duration::minutes(1)).await.unwrap();

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.take_state("new").await.unwrap().is_some());
    }
}
