pub mod client;
pub mod error;
pub mod oauth;
pub mod sync;
pub mod types;

pub use client::{CrmApi, HubSpotClient, OAuthApi};
pub use error::HubSpotError;
pub use oauth::{ConnectionManager, ConnectionStatus};
pub use sync::SyncEngine;
