//! Connection lifecycle: authorization handshake, token storage, refresh.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use leadsync_core::domain::connection::UserId;
use leadsync_db::repositories::{
    ConnectionStore, OAuthStateStore, RepositoryError, UserStore,
};

use crate::client::OAuthApi;
use crate::error::HubSpotError;

const STATE_TTL_MINUTES: i64 = 10;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub owner_id: Option<String>,
}

pub struct ConnectionManager {
    users: Arc<dyn UserStore>,
    connections: Arc<dyn ConnectionStore>,
    states: Arc<dyn OAuthStateStore>,
    oauth: Arc<dyn OAuthApi>,
    // One lock per user so concurrent refreshes collapse into a single
    // provider call. Entries are never evicted; the map is bounded by the
    // number of distinct users seen by this process.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConnectionManager {
    pub fn new(
        users: Arc<dyn UserStore>,
        connections: Arc<dyn ConnectionStore>,
        states: Arc<dyn OAuthStateStore>,
        oauth: Arc<dyn OAuthApi>,
    ) -> Self {
        Self { users, connections, states, oauth, refresh_locks: Mutex::new(HashMap::new()) }
    }

    /// Issues a fresh single-use state and returns the provider
    /// authorization URL carrying it.
    pub async fn issue_authorization_url(
        &self,
        user_id: &UserId,
    ) -> Result<String, HubSpotError> {
        self.require_user(user_id).await?;

        let state = generate_state();
        let now = Utc::now();
        self.states
            .insert_state(&state, user_id, now + Duration::minutes(STATE_TTL_MINUTES))
            .await?;

        // Opportunistic cleanup so abandoned handshakes do not pile up.
        let purged = self.states.purge_expired(now).await?;
        if purged > 0 {
            debug!(purged, "purged expired oauth states");
        }

        Ok(self.oauth.authorization_url(&state))
    }

    /// Consumes the state and returns the user it was issued for. A state
    /// is valid at most once; expiry is judged after consumption, so an
    /// expired state is also spent by this call.
    pub async fn validate_state(&self, state: &str) -> Result<UserId, HubSpotError> {
        let record = self.states.take_state(state).await?.ok_or(HubSpotError::InvalidState)?;
        if record.expires_at < Utc::now() {
            return Err(HubSpotError::ExpiredState);
        }
        Ok(record.user_id)
    }

    /// Exchanges the authorization code, resolves the portal owner for the
    /// user's email, and persists the connection. Returns the owner id, if
    /// one matched.
    pub async fn connect_user(
        &self,
        user_id: &UserId,
        code: &str,
    ) -> Result<Option<String>, HubSpotError> {
        let user = self.require_user(user_id).await?;

        let tokens = self.oauth.exchange_code(code).await?;
        let owner_id = match self.oauth.find_owner_id(&tokens.access_token, &user.email).await {
            Ok(owner_id) => owner_id,
            Err(error) => {
                warn!(user_id = %user_id, error = %error, "owner lookup failed during connect");
                None
            }
        };

        // Tokens and owner land in one write, only after both provider
        // calls have settled.
        let now = Utc::now();
        self.connections
            .save_connection(
                user_id,
                &tokens.access_token,
                &tokens.refresh_token,
                owner_id.as_deref(),
                tokens.expires_at(now),
            )
            .await?;

        info!(user_id = %user_id, owner_resolved = owner_id.is_some(), "hubspot connected");
        Ok(owner_id)
    }

    /// Returns an access token that is valid right now, refreshing it first
    /// if the stored one has expired. Concurrent callers for the same user
    /// serialize on a per-user lock and share one refresh.
    pub async fn valid_access_token(&self, user_id: &UserId) -> Result<String, HubSpotError> {
        self.require_user(user_id).await?;

        let connection = self
            .connections
            .find_connection(user_id)
            .await?
            .ok_or(HubSpotError::NotConnected)?;
        if !connection.is_expired(Utc::now()) {
            return Ok(connection.access_token);
        }

        let lock = self.refresh_lock(user_id).await;
        let _guard = lock.lock().await;

        // Another caller may have refreshed while this one waited.
        let connection = self
            .connections
            .find_connection(user_id)
            .await?
            .ok_or(HubSpotError::NotConnected)?;
        let now = Utc::now();
        if !connection.is_expired(now) {
            return Ok(connection.access_token);
        }

        let tokens = self.oauth.refresh_tokens(&connection.refresh_token).await?;
        self.connections
            .save_connection(
                user_id,
                &tokens.access_token,
                &tokens.refresh_token,
                connection.owner_id.as_deref(),
                tokens.expires_at(now),
            )
            .await?;

        info!(user_id = %user_id, "hubspot access token refreshed");
        Ok(tokens.access_token)
    }

    /// Drops all stored provider credentials for the user.
    pub async fn disconnect_user(&self, user_id: &UserId) -> Result<(), HubSpotError> {
        self.connections.clear_connection(user_id).await.map_err(|error| match error {
            RepositoryError::NotFound(_) => HubSpotError::UserNotFound,
            other => HubSpotError::Store(other),
        })?;
        info!(user_id = %user_id, "hubspot disconnected");
        Ok(())
    }

    pub async fn connection_status(
        &self,
        user_id: &UserId,
    ) -> Result<ConnectionStatus, HubSpotError> {
        self.require_user(user_id).await?;
        let connection = self.connections.find_connection(user_id).await?;
        Ok(ConnectionStatus {
            connected: connection.is_some(),
            owner_id: connection.and_then(|connection| connection.owner_id),
        })
    }

    /// Stored owner id for the user, used to stamp CRM writes.
    pub async fn owner_id(&self, user_id: &UserId) -> Result<Option<String>, HubSpotError> {
        Ok(self
            .connections
            .find_connection(user_id)
            .await?
            .and_then(|connection| connection.owner_id))
    }

    async fn require_user(
        &self,
        user_id: &UserId,
    ) -> Result<leadsync_core::domain::connection::User, HubSpotError> {
        self.users.find_by_id(user_id).await?.ok_or(HubSpotError::UserNotFound)
    }

    async fn refresh_lock(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks.entry(user_id.0.clone()).or_default().clone()
    }
}

fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use tokio::sync::Mutex;

    use leadsync_core::domain::connection::{Connection, TokenPair, User, UserId};
    use leadsync_db::repositories::{
        ConnectionStore, InMemoryOAuthStateStore, InMemoryUserStore, OAuthStateStore,
    };

    use super::{generate_state, ConnectionManager};
    use crate::client::OAuthApi;
    use crate::error::HubSpotError;

    #[derive(Default)]
    struct FakeOAuth {
        exchange_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        owner_id: Mutex<Option<String>>,
        owner_lookup_fails: bool,
    }

    #[async_trait]
    impl OAuthApi for FakeOAuth {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://provider.example/authorize?state={state}")
        }

        async fn exchange_code(&self, code: &str) -> Result<TokenPair, HubSpotError> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenPair {
                access_token: format!("access-for-{code}"),
                refresh_token: format!("refresh-for-{code}"),
                expires_in_secs: 1800,
            })
        }

        async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, HubSpotError> {
            let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            // Widen the race window so overlapping callers really overlap.
            tokio::time::sleep(StdDuration::from_millis(25)).await;
            Ok(TokenPair {
                access_token: format!("refreshed-{call}-from-{refresh_token}"),
                refresh_token: format!("rotated-{call}"),
                expires_in_secs: 1800,
            })
        }

        async fn find_owner_id(
            &self,
            _access_token: &str,
            _email: &str,
        ) -> Result<Option<String>, HubSpotError> {
            if self.owner_lookup_fails {
                return Err(HubSpotError::Upstream("owner list returned 500".to_string()));
            }
            Ok(self.owner_id.lock().await.clone())
        }
    }

    struct Harness {
        manager: Arc<ConnectionManager>,
        users: Arc<InMemoryUserStore>,
        states: Arc<InMemoryOAuthStateStore>,
        oauth: Arc<FakeOAuth>,
    }

    async fn harness(oauth: FakeOAuth) -> Harness {
        let users = Arc::new(InMemoryUserStore::default());
        users
            .insert_user(User { id: UserId("u-1".to_string()), email: "ada@example.com".into() })
            .await;
        let states = Arc::new(InMemoryOAuthStateStore::default());
        let oauth = Arc::new(oauth);
        let manager = Arc::new(ConnectionManager::new(
            users.clone(),
            users.clone(),
            states.clone(),
            oauth.clone(),
        ));
        Harness { manager, users, states, oauth }
    }

    fn user_id() -> UserId {
        UserId("u-1".to_string())
    }

    #[tokio::test]
    async fn authorization_url_requires_a_known_user() {
        let harness = harness(FakeOAuth::default()).await;

        let error = harness
            .manager
            .issue_authorization_url(&UserId("ghost".to_string()))
            .await
            .expect_err("unknown user should fail");
        assert!(matches!(error, HubSpotError::UserNotFound));
    }

    #[tokio::test]
    async fn issued_state_round_trips_through_validation_exactly_once() {
        let harness = harness(FakeOAuth::default()).await;

        let url = harness.manager.issue_authorization_url(&user_id()).await.expect("issue url");
        let state = url.rsplit("state=").next().expect("url carries state").to_string();
        assert_eq!(state.len(), 64);

        let validated = harness.manager.validate_state(&state).await.expect("first validation");
        assert_eq!(validated, user_id());

        let error =
            harness.manager.validate_state(&state).await.expect_err("second use should fail");
        assert!(matches!(error, HubSpotError::InvalidState));
    }

    #[tokio::test]
    async fn expired_state_is_rejected_and_consumed() {
        let harness = harness(FakeOAuth::default()).await;
        harness
            .states
            .insert_state("stale", &user_id(), Utc::now() - Duration::minutes(1))
            .await
            .expect("insert state");

        let error = harness.manager.validate_state("stale").await.expect_err("expired state");
        assert!(matches!(error, HubSpotError::ExpiredState));

        let error = harness.manager.validate_state("stale").await.expect_err("spent state");
        assert!(matches!(error, HubSpotError::InvalidState));
    }

    #[tokio::test]
    async fn connect_stores_tokens_and_owner() {
        let mut oauth = FakeOAuth::default();
        oauth.owner_id = Mutex::new(Some("owner-7".to_string()));
        let harness = harness(oauth).await;

        let owner = harness.manager.connect_user(&user_id(), "code-1").await.expect("connect");
        assert_eq!(owner.as_deref(), Some("owner-7"));

        let connection = harness
            .users
            .find_connection(&user_id())
            .await
            .expect("load connection")
            .expect("connected");
        assert_eq!(connection.access_token, "access-for-code-1");
        assert_eq!(connection.refresh_token, "refresh-for-code-1");
        assert_eq!(connection.owner_id.as_deref(), Some("owner-7"));
        assert!(!connection.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn reconnect_replaces_a_stale_owner_with_the_tokens() {
        let harness = harness(FakeOAuth::default()).await;
        harness
            .users
            .insert_connected_user(
                User { id: user_id(), email: "ada@example.com".into() },
                Connection {
                    access_token: "old-access".to_string(),
                    refresh_token: "old-refresh".to_string(),
                    owner_id: Some("owner-old".to_string()),
                    expires_at: None,
                },
            )
            .await;

        let owner = harness.manager.connect_user(&user_id(), "code-2").await.expect("connect");
        assert!(owner.is_none());

        let connection = harness
            .users
            .find_connection(&user_id())
            .await
            .expect("load connection")
            .expect("connected");
        assert_eq!(connection.access_token, "access-for-code-2");
        assert!(connection.owner_id.is_none(), "previous owner must not outlive its tokens");
    }

    #[tokio::test]
    async fn owner_lookup_failure_still_connects() {
        let harness = harness(FakeOAuth { owner_lookup_fails: true, ..Default::default() }).await;

        let owner = harness.manager.connect_user(&user_id(), "code-1").await.expect("connect");
        assert!(owner.is_none());

        let status = harness.manager.connection_status(&user_id()).await.expect("status");
        assert!(status.connected);
        assert!(status.owner_id.is_none());
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_a_refresh() {
        let harness = harness(FakeOAuth::default()).await;
        harness
            .users
            .save_connection(
                &user_id(),
                "live",
                "refresh",
                None,
                Utc::now() + Duration::minutes(30),
            )
            .await
            .expect("seed connection");

        let token = harness.manager.valid_access_token(&user_id()).await.expect("token");
        assert_eq!(token, "live");
        assert_eq!(harness.oauth.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_rotated_tokens_are_stored() {
        let harness = harness(FakeOAuth::default()).await;
        harness
            .users
            .save_connection(
                &user_id(),
                "dead",
                "old-refresh",
                Some("owner-7"),
                Utc::now() - Duration::minutes(1),
            )
            .await
            .expect("seed connection");

        let token = harness.manager.valid_access_token(&user_id()).await.expect("token");
        assert_eq!(token, "refreshed-1-from-old-refresh");

        let connection = harness
            .users
            .find_connection(&user_id())
            .await
            .expect("load connection")
            .expect("connected");
        assert_eq!(connection.refresh_token, "rotated-1");
        assert_eq!(connection.owner_id.as_deref(), Some("owner-7"));
        assert!(!connection.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_refresh() {
        let harness = harness(FakeOAuth::default()).await;
        harness
            .users
            .save_connection(
                &user_id(),
                "dead",
                "old-refresh",
                None,
                Utc::now() - Duration::minutes(1),
            )
            .await
            .expect("seed connection");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = harness.manager.clone();
            handles.push(tokio::spawn(async move {
                manager.valid_access_token(&UserId("u-1".to_string())).await
            }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.expect("join").expect("token"));
        }

        assert_eq!(harness.oauth.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|token| token == &tokens[0]));
    }

    #[tokio::test]
    async fn missing_connection_is_not_connected() {
        let harness = harness(FakeOAuth::default()).await;

        let error =
            harness.manager.valid_access_token(&user_id()).await.expect_err("no connection");
        assert!(matches!(error, HubSpotError::NotConnected));
    }

    #[tokio::test]
    async fn disconnect_clears_the_connection() {
        let harness = harness(FakeOAuth::default()).await;
        harness
            .users
            .insert_connected_user(
                User { id: UserId("u-2".to_string()), email: "grace@example.com".into() },
                Connection {
                    access_token: "a".to_string(),
                    refresh_token: "r".to_string(),
                    owner_id: Some("owner-1".to_string()),
                    expires_at: None,
                },
            )
            .await;

        let user = UserId("u-2".to_string());
        harness.manager.disconnect_user(&user).await.expect("disconnect");

        let status = harness.manager.connection_status(&user).await.expect("status");
        assert!(!status.connected);

        let error = harness
            .manager
            .disconnect_user(&UserId("ghost".to_string()))
            .await
            .expect_err("unknown user");
        assert!(matches!(error, HubSpotError::UserNotFound));
    }

    #[test]
    fn generated_states_are_long_and_unique() {
        let first = generate_state();
        let second = generate_state();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }
}
