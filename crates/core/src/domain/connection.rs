use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locally stored user record, as exposed by the persistence layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

/// Token pair returned by the provider's token endpoint, with the relative
/// expiry already attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_secs: i64,
}

impl TokenPair {
    /// Absolute expiry instant computed from "now".
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(self.expires_in_secs)
    }
}

/// Per-user provider connection. A record without an access token means
/// "not connected"; the store returns `None` in that case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub access_token: String,
    pub refresh_token: String,
    pub owner_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Connection, TokenPair};

    fn connection(expires_offset: Option<Duration>) -> Connection {
        let now = Utc::now();
        Connection {
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            owner_id: None,
            expires_at: expires_offset.map(|offset| now + offset),
        }
    }

    #[test]
    fn connection_with_future_expiry_is_not_expired() {
        assert!(!connection(Some(Duration::minutes(5))).is_expired(Utc::now()));
    }

    #[test]
    fn connection_with_past_expiry_is_expired() {
        assert!(connection(Some(Duration::minutes(-5))).is_expired(Utc::now()));
    }

    #[test]
    fn connection_without_expiry_is_never_expired() {
        assert!(!connection(None).is_expired(Utc::now()));
    }

    #[test]
    fn token_pair_expiry_is_relative_to_now() {
        let now = Utc::now();
        let pair = TokenPair {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in_secs: 1800,
        };
        assert_eq!(pair.expires_at(now), now + Duration::seconds(1800));
    }
}
