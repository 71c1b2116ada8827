// Centralized configuration management for the headshot backend
// Load ALL env vars ONCE at startup, validate the required shape, fail fast

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Global application configuration loaded once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    // For tests, load .env file first
    #[cfg(test)]
    dotenv::dotenv().ok();

    AppConfig::from_env().expect("Failed to load configuration")
});

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub rust_log: String,
    pub disable_embedded_migrations: bool,

    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub google: GoogleConfig,
    pub stripe: StripeConfig,
    pub replicate: ReplicateConfig,
    pub storage: StorageConfig,
    pub email: EmailConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Externally reachable base URL, used for provider webhooks and the training zip URL
    pub public_base_url: String,
    /// Frontend origin used for checkout and OAuth redirects
    pub client_url: String,
    pub cors_allowed_origins: Vec<String>,
}

/// Environment type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "test" => Environment::Test,
            "staging" | "stage" => Environment::Staging,
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
    pub max_lifetime: u64,
}

/// JWT configuration (mobile/API clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_expiry: u64,
    pub refresh_expiry: u64,
}

/// Browser session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_days: i64,
    pub secure_cookie: bool,
}

/// Google OAuth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

/// Stripe configuration, including the token package price ids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_url: String,
    pub price_small: String,
    pub price_medium: String,
    pub price_large: String,
    /// Pending checkout sessions older than this are expired by the sweep
    pub payment_expiry_hours: i64,
}

/// Replicate (inference provider) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateConfig {
    pub api_token: String,
    pub api_url: String,
    /// Account that owns the per-user destination models
    pub owner: String,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
}

/// Local file storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: String,
    pub generated_dir: String,
    pub max_upload_files: usize,
    pub max_upload_bytes: usize,
    /// Key for the signed photo bundle links handed to the trainer
    pub bundle_link_secret: String,
    pub bundle_link_ttl_secs: u64,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub resend_api_key: String,
    pub resend_api_url: String,
    pub from_email: String,
    pub from_name: String,
    pub frontend_url: String, // Used to build links inside emails
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Helper function to get required env var
        let get_required = |key: &str| -> Result<String, ConfigError> {
            match env::var(key) {
                Ok(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(ConfigError::MissingVar(key.to_string())),
            }
        };

        // Helper function to get optional env var with default
        let get_or_default = |key: &str, default: &str| -> String {
            env::var(key).unwrap_or_else(|_| default.to_string())
        };

        // Helper function to parse env var with default
        let parse_or_default = |key: &str, default: &str| -> Result<u32, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u32".to_string())
            })
        };

        let parse_u64_or_default = |key: &str, default: &str| -> Result<u64, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u64".to_string())
            })
        };

        let parse_bool_or_default = |key: &str, default: &str| -> bool {
            get_or_default(key, default).to_lowercase() == "true"
        };

        let require_secret = |key: &str| -> Result<String, ConfigError> {
            let secret = get_required(key)?;
            if secret.len() < 32 {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "Secret must be at least 32 characters long".to_string(),
                ));
            }
            Ok(secret)
        };

        let environment = Environment::from(get_or_default("ENVIRONMENT", "development"));
        let rust_log = get_or_default("RUST_LOG", "info");

        // Parse bind address to extract port
        let bind_address = get_or_default("BIND_ADDRESS", "0.0.0.0:5000");
        let port = bind_address
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5000);

        let public_base_url = get_or_default("PUBLIC_BASE_URL", &format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&public_base_url).map_err(|e| {
            ConfigError::InvalidValue("PUBLIC_BASE_URL".to_string(), e.to_string())
        })?;

        let client_url = get_or_default("CLIENT_URL", "http://localhost:5173")
            .trim_end_matches('/')
            .to_string();

        let cors_allowed_origins: Vec<String> = get_or_default("CORS_ALLOWED_ORIGINS", &client_url)
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let server = ServerConfig {
            bind_address,
            port,
            public_base_url: public_base_url.clone(),
            client_url: client_url.clone(),
            cors_allowed_origins,
        };

        let database = DatabaseConfig {
            url: get_required("DATABASE_URL")?,
            max_connections: parse_or_default("DATABASE_MAX_CONNECTIONS", "20")?,
            min_connections: parse_or_default("DATABASE_MIN_CONNECTIONS", "2")?,
            connect_timeout: parse_u64_or_default("DATABASE_CONNECT_TIMEOUT", "30")?,
            idle_timeout: parse_u64_or_default("DATABASE_IDLE_TIMEOUT", "600")?,
            max_lifetime: parse_u64_or_default("DATABASE_MAX_LIFETIME", "1800")?,
        };

        let jwt = JwtConfig {
            access_secret: require_secret("JWT_SECRET")?,
            refresh_secret: require_secret("REFRESH_TOKEN_SECRET")?,
            access_expiry: parse_u64_or_default("JWT_ACCESS_EXPIRY", "3600")?,
            refresh_expiry: parse_u64_or_default("JWT_REFRESH_EXPIRY", "604800")?,
        };

        let session = SessionConfig {
            cookie_name: get_or_default("SESSION_COOKIE_NAME", "sid"),
            ttl_days: parse_or_default("SESSION_TTL_DAYS", "30")? as i64,
            secure_cookie: environment == Environment::Production
                && parse_bool_or_default("FORCE_SECURE_COOKIE", "false"),
        };

        let google = GoogleConfig {
            client_id: get_or_default("GOOGLE_CLIENT_ID", ""),
            client_secret: get_or_default("GOOGLE_CLIENT_SECRET", ""),
            callback_url: get_or_default(
                "GOOGLE_CALLBACK_URL",
                &format!("{}/auth/google/callback", public_base_url),
            ),
        };

        let stripe = StripeConfig {
            secret_key: get_required("STRIPE_SECRET_KEY")?,
            webhook_secret: get_required("STRIPE_WEBHOOK_SECRET")?,
            api_url: get_or_default("STRIPE_API_URL", "https://api.stripe.com/v1"),
            price_small: get_required("STRIPE_PRICE_10_TOKENS")?,
            price_medium: get_required("STRIPE_PRICE_30_TOKENS")?,
            price_large: get_required("STRIPE_PRICE_70_TOKENS")?,
            payment_expiry_hours: parse_or_default("PAYMENT_EXPIRY_HOURS", "24")? as i64,
        };

        let replicate = ReplicateConfig {
            api_token: get_required("REPLICATE_API_TOKEN")?,
            api_url: get_or_default("REPLICATE_API_URL", "https://api.replicate.com/v1"),
            owner: get_or_default("REPLICATE_OWNER", "duchovs"),
            poll_interval_secs: parse_u64_or_default("TRAINING_POLL_INTERVAL_SECS", "30")?,
            poll_max_attempts: parse_or_default("TRAINING_POLL_MAX_ATTEMPTS", "120")?,
        };

        let storage = StorageConfig {
            upload_dir: get_or_default("UPLOAD_DIR", "data/uploads"),
            generated_dir: get_or_default("GENERATED_DIR", "data/generated"),
            max_upload_files: parse_or_default("MAX_UPLOAD_FILES", "20")? as usize,
            max_upload_bytes: parse_or_default("MAX_UPLOAD_BYTES", "5242880")? as usize,
            bundle_link_secret: get_or_default("PHOTO_BUNDLE_SECRET", &jwt.access_secret),
            bundle_link_ttl_secs: parse_u64_or_default("PHOTO_BUNDLE_TTL_SECS", "86400")?,
        };

        let email = EmailConfig {
            resend_api_key: get_or_default("RESEND_API_KEY", ""),
            resend_api_url: get_or_default("RESEND_API_URL", "https://api.resend.com/emails"),
            from_email: get_or_default("EMAIL_FROM_ADDRESS", "no-reply@aismartsolution.ai"),
            from_name: get_or_default("EMAIL_FROM_NAME", "Headshot AI"),
            frontend_url: get_or_default("EMAIL_FRONTEND_URL", &client_url),
        };

        Ok(Self {
            environment,
            rust_log,
            disable_embedded_migrations: parse_bool_or_default(
                "DISABLE_EMBEDDED_MIGRATIONS",
                "false",
            ),
            server,
            database,
            jwt,
            session,
            google,
            stripe,
            replicate,
            storage,
            email,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Check if running in development
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

/// Get the global configuration instance
/// This is the primary way to access configuration throughout the app
pub fn config() -> &'static AppConfig {
    &CONFIG
}
