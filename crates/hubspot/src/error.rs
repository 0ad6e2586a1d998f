use thiserror::Error;

use leadsync_db::repositories::RepositoryError;

/// Failure taxonomy for the HubSpot integration. Variants map one-to-one
/// onto interface responses, so handlers match on them rather than on
/// message strings.
#[derive(Debug, Error)]
pub enum HubSpotError {
    #[error("HubSpot connection required")]
    NotConnected,
    #[error("invalid or already used OAuth state")]
    InvalidState,
    #[error("OAuth state expired")]
    ExpiredState,
    #[error("user not found")]
    UserNotFound,
    #[error("email or LinkedIn handle required")]
    MissingContactIdentifier,
    #[error("LinkedIn company ID required (url: {url})")]
    MissingCompanyIdentifier { url: String },
    #[error("HubSpot rejected the request: {0}")]
    Validation(String),
    #[error("HubSpot authentication failed, reconnect required")]
    Authentication,
    #[error("HubSpot permission denied, check OAuth scopes")]
    Permission,
    #[error("HubSpot object not found: {0}")]
    NotFound(String),
    #[error("HubSpot request failed: {0}")]
    Upstream(String),
    #[error("store error: {0}")]
    Store(#[from] RepositoryError),
}
