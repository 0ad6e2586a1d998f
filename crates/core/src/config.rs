use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub hubspot: HubSpotConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct HubSpotConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    /// Space/comma separated scope override; the default CRM scope set is
    /// used when absent.
    pub scopes: Option<String>,
    pub api_base_url: String,
    pub authorize_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub hubspot_client_id: Option<String>,
    pub hubspot_client_secret: Option<String>,
    pub hubspot_redirect_uri: Option<String>,
    pub hubspot_scopes: Option<String>,
    pub hubspot_api_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://leadsync.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            hubspot: HubSpotConfig {
                client_id: String::new(),
                client_secret: String::new().into(),
                redirect_uri: String::new(),
                scopes: None,
                api_base_url: "https://api.hubapi.com".to_string(),
                authorize_url: "https://app.hubspot.com/oauth/authorize".to_string(),
                timeout_secs: 20,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3000,
                health_check_port: 8080,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadsync.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(hubspot) = patch.hubspot {
            if let Some(client_id) = hubspot.client_id {
                self.hubspot.client_id = client_id;
            }
            if let Some(client_secret) = hubspot.client_secret {
                self.hubspot.client_secret = secret_value(client_secret);
            }
            if let Some(redirect_uri) = hubspot.redirect_uri {
                self.hubspot.redirect_uri = redirect_uri;
            }
            if let Some(scopes) = hubspot.scopes {
                self.hubspot.scopes = Some(scopes);
            }
            if let Some(api_base_url) = hubspot.api_base_url {
                self.hubspot.api_base_url = api_base_url;
            }
            if let Some(authorize_url) = hubspot.authorize_url {
                self.hubspot.authorize_url = authorize_url;
            }
            if let Some(timeout_secs) = hubspot.timeout_secs {
                self.hubspot.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADSYNC_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADSYNC_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEADSYNC_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADSYNC_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEADSYNC_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADSYNC_HUBSPOT_CLIENT_ID") {
            self.hubspot.client_id = value;
        }
        if let Some(value) = read_env("LEADSYNC_HUBSPOT_CLIENT_SECRET") {
            self.hubspot.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("LEADSYNC_HUBSPOT_REDIRECT_URI") {
            self.hubspot.redirect_uri = value;
        }
        if let Some(value) = read_env("LEADSYNC_HUBSPOT_SCOPES") {
            self.hubspot.scopes = Some(value);
        }
        if let Some(value) = read_env("LEADSYNC_HUBSPOT_API_BASE_URL") {
            self.hubspot.api_base_url = value;
        }
        if let Some(value) = read_env("LEADSYNC_HUBSPOT_AUTHORIZE_URL") {
            self.hubspot.authorize_url = value;
        }
        if let Some(value) = read_env("LEADSYNC_HUBSPOT_TIMEOUT_SECS") {
            self.hubspot.timeout_secs = parse_u64("LEADSYNC_HUBSPOT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADSYNC_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADSYNC_SERVER_PORT") {
            self.server.port = parse_u16("LEADSYNC_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADSYNC_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("LEADSYNC_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        let log_level =
            read_env("LEADSYNC_LOGGING_LEVEL").or_else(|| read_env("LEADSYNC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADSYNC_LOGGING_FORMAT").or_else(|| read_env("LEADSYNC_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(client_id) = overrides.hubspot_client_id {
            self.hubspot.client_id = client_id;
        }
        if let Some(client_secret) = overrides.hubspot_client_secret {
            self.hubspot.client_secret = secret_value(client_secret);
        }
        if let Some(redirect_uri) = overrides.hubspot_redirect_uri {
            self.hubspot.redirect_uri = redirect_uri;
        }
        if let Some(scopes) = overrides.hubspot_scopes {
            self.hubspot.scopes = Some(scopes);
        }
        if let Some(api_base_url) = overrides.hubspot_api_base_url {
            self.hubspot.api_base_url = api_base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_hubspot(&self.hubspot)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadsync.toml"), PathBuf::from("config/leadsync.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_hubspot(hubspot: &HubSpotConfig) -> Result<(), ConfigError> {
    if hubspot.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "hubspot.client_id is required. Get it from your HubSpot app's Auth settings"
                .to_string(),
        ));
    }

    if hubspot.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "hubspot.client_secret is required. Get it from your HubSpot app's Auth settings"
                .to_string(),
        ));
    }

    let redirect_uri = hubspot.redirect_uri.trim();
    if redirect_uri.is_empty() {
        return Err(ConfigError::Validation(
            "hubspot.redirect_uri is required and must match the app's registered redirect URL"
                .to_string(),
        ));
    }
    if !redirect_uri.starts_with("http://") && !redirect_uri.starts_with("https://") {
        return Err(ConfigError::Validation(
            "hubspot.redirect_uri must start with http:// or https://".to_string(),
        ));
    }

    for (key, value) in
        [("api_base_url", &hubspot.api_base_url), ("authorize_url", &hubspot.authorize_url)]
    {
        if !value.starts_with("http://") && !value.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "hubspot.{key} must start with http:// or https://"
            )));
        }
    }

    if hubspot.timeout_secs == 0 || hubspot.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "hubspot.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    hubspot: Option<HubSpotPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct HubSpotPatch {
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    scopes: Option<String>,
    api_base_url: Option<String>,
    authorize_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn valid_overrides() -> ConfigOverrides {
        ConfigOverrides {
            hubspot_client_id: Some("client-id".to_string()),
            hubspot_client_secret: Some("client-secret".to_string()),
            hubspot_redirect_uri: Some("https://app.example.com/callback".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_HUBSPOT_CLIENT_SECRET", "secret-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadsync.toml");
            fs::write(
                &path,
                r#"
[hubspot]
client_id = "file-client-id"
client_secret = "${TEST_HUBSPOT_CLIENT_SECRET}"
redirect_uri = "https://app.example.com/callback"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.hubspot.client_secret.expose_secret() == "secret-from-env",
                "client secret should be interpolated from environment",
            )?;
            ensure(
                config.hubspot.client_id == "file-client-id",
                "client id should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_HUBSPOT_CLIENT_SECRET"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADSYNC_DATABASE_URL", "sqlite://from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadsync.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..valid_overrides()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(&["LEADSYNC_DATABASE_URL"]);
        result
    }

    #[test]
    fn validation_fails_fast_without_hubspot_credentials() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => return Err("expected validation failure but config load succeeded".into()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("hubspot.client_id")
        );
        ensure(has_message, "validation failure should mention hubspot.client_id")
    }

    #[test]
    fn redirect_uri_must_be_absolute() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                hubspot_redirect_uri: Some("app.example.com/callback".to_string()),
                ..valid_overrides()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure for relative redirect uri".into()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("hubspot.redirect_uri")
        );
        ensure(has_message, "validation failure should mention hubspot.redirect_uri")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                hubspot_client_secret: Some("super-secret-value".to_string()),
                ..valid_overrides()
            },
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;
        let debug = format!("{config:?}");

        ensure(
            !debug.contains("super-secret-value"),
            "debug output should not contain the client secret",
        )?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADSYNC_LOG_LEVEL", "warn");
        env::set_var("LEADSYNC_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config =
                AppConfig::load(LoadOptions { overrides: valid_overrides(), ..Default::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "log level should be set from env alias")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "log format should be set from env alias",
            )?;
            Ok(())
        })();

        clear_vars(&["LEADSYNC_LOG_LEVEL", "LEADSYNC_LOG_FORMAT"]);
        result
    }
}
