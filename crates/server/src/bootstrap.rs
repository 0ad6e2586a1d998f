use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use leadsync_core::config::{AppConfig, ConfigError, LoadOptions};
use leadsync_db::repositories::{SqlOAuthStateStore, SqlUserStore};
use leadsync_db::{connect_with_settings, migrations, DbPool};
use leadsync_hubspot::{ConnectionManager, HubSpotClient, SyncEngine};

use crate::hubspot::HubSpotState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub hubspot: HubSpotState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!("starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!("database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!("database migrations applied");

    let user_store = Arc::new(SqlUserStore::new(db_pool.clone()));
    let state_store = Arc::new(SqlOAuthStateStore::new(db_pool.clone()));
    let client =
        Arc::new(HubSpotClient::new(&config.hubspot).map_err(BootstrapError::HttpClient)?);

    let connections = Arc::new(ConnectionManager::new(
        user_store.clone(),
        user_store,
        state_store,
        client.clone(),
    ));
    let engine = Arc::new(SyncEngine::new(client));

    Ok(Application { config, db_pool, hubspot: HubSpotState { connections, engine } })
}

#[cfg(test)]
mod tests {
    use leadsync_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                hubspot_client_id: Some("client-id".to_string()),
                hubspot_client_secret: Some("client-secret".to_string()),
                hubspot_redirect_uri: Some("https://app.example.com/callback".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_hubspot_credentials() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("hubspot.client_id"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_integration() {
        let app = bootstrap(valid_overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('app_user', 'oauth_state')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected baseline tables to be available after bootstrap");
        assert_eq!(table_count, 2, "bootstrap should expose the user and oauth state tables");

        app.db_pool.close().await;
    }
}
