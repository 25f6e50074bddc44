//! API configuration module.
//!
//! ## Load Order
//! ```text
//! ApiConfig::default()          built-in development values
//!        │
//!        ▼
//! harvest.toml (optional)       checked into deployments
//!        │
//!        ▼
//! HARVEST_* environment         HARVEST_SERVER__PORT=8080
//!                               HARVEST_AUTH__JWT_SECRET=...
//!                               HARVEST_YOCO__SECRET_KEY=sk_live_...
//! ```
//!
//! A `.env` file in the working directory is read first, so its values
//! behave exactly like exported variables.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Secret shipped in the defaults; refused outside development.
pub const DEV_JWT_SECRET: &str = "harvest-dev-secret-change-in-production";

/// API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub yoco: YocoConfig,
    pub mail: MailConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
    /// `development` relaxes secret checks.
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            environment: "development".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`.
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "./harvest.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider.
    pub jwt_secret: String,
    /// Lifetime of tokens minted by this service (dev tooling and tests).
    pub token_lifetime_secs: i64,
    /// User granted `admin` at startup when no admin exists yet.
    pub bootstrap_admin: Option<String>,
    /// Shared secret the payment provider sends in `X-Webhook-Secret`.
    pub webhook_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_lifetime_secs: 3600,
            bootstrap_admin: None,
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YocoConfig {
    pub base_url: String,
    /// Without a key, provider methods answer 502.
    pub secret_key: Option<String>,
    pub currency: String,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub failure_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for YocoConfig {
    fn default() -> Self {
        YocoConfig {
            base_url: "https://payments.yoco.com/api".to_string(),
            secret_key: None,
            currency: harvest_core::DEFAULT_CURRENCY.to_string(),
            success_url: None,
            cancel_url: None,
            failure_url: None,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Transactional mail endpoint; unset means mail is only logged.
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        MailConfig {
            api_url: None,
            api_key: None,
            from: "Harvest POS <no-reply@harvest.local>".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `pretty` or `json`.
    pub format: String,
    /// Used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            format: "pretty".to_string(),
            filter: "info,harvest_api=debug,harvest_db=debug".to_string(),
        }
    }
}

impl ApiConfig {
    /// Load configuration from defaults, `harvest.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config: ApiConfig = Config::builder()
            .add_source(Config::try_from(&ApiConfig::default())?)
            .add_source(File::with_name("harvest").required(false))
            .add_source(
                Environment::with_prefix("HARVEST")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn is_development(&self) -> bool {
        self.server.environment.eq_ignore_ascii_case("development")
    }

    /// Checks combinations a single field cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue("server.port".to_string()));
        }
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingRequired("database.path".to_string()));
        }
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("auth.jwt_secret".to_string()));
        }
        if !self.is_development() && self.auth.jwt_secret == DEV_JWT_SECRET {
            return Err(ConfigError::InvalidValue(
                "auth.jwt_secret (development secret outside development)".to_string(),
            ));
        }
        // The webhook is outside bearer auth; the shared secret is its only check.
        let has_webhook_secret = self
            .auth
            .webhook_secret
            .as_deref()
            .is_some_and(|secret| !secret.trim().is_empty());
        if !self.is_development() && self.yoco.secret_key.is_some() && !has_webhook_secret {
            return Err(ConfigError::MissingRequired("auth.webhook_secret".to_string()));
        }
        if self.auth.token_lifetime_secs <= 0 {
            return Err(ConfigError::InvalidValue("auth.token_lifetime_secs".to_string()));
        }
        if self.mail.api_url.is_some() && self.mail.api_key.is_none() {
            return Err(ConfigError::IncompleteMailConfig);
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidValue("logging.format".to_string()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Mail API URL set but no API key provided")]
    IncompleteMailConfig,

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),
}
