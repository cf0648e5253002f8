//! Centralized configuration for api-server.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at request time.

use axum::http::HeaderValue;
use domain::config::EngineConfig;
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Authentication provider mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProvider {
    /// Debug mode: accepts X-Debug-User header (DO NOT USE IN PRODUCTION)
    None,
    /// Identity asserted by a trusted auth proxy via X-Forwarded-Email
    Proxy,
}

impl AuthProvider {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("proxy") {
            Self::Proxy
        } else {
            Self::None
        }
    }
}

/// Storage backend provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    /// In-memory storage (data lost on restart)
    Memory,
    /// SQLite file-based storage
    Sqlite,
    /// Redis, one JSON value per link
    Redis,
}

impl StorageProvider {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("sqlite") {
            Self::Sqlite
        } else if s.eq_ignore_ascii_case("redis") {
            Self::Redis
        } else {
            Self::Memory
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error for {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Server configuration loaded from environment variables.
///
/// All fields are validated at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3001)
    pub port: u16,
    /// Authentication provider
    pub auth_provider: AuthProvider,
    /// Allowed email domain for admin users
    pub allowed_domain: Option<String>,
    /// Emails with admin rights (lowercased)
    pub admin_emails: Vec<String>,
    /// CORS allow origin
    pub cors_allow_origin: HeaderValue,
    /// Storage provider
    pub storage_provider: StorageProvider,
    /// SQLite database path (when using sqlite storage)
    pub db_path: PathBuf,
    /// Redis URL (required when using redis storage)
    pub redis_url: Option<String>,
    /// Log format
    pub log_format: LogFormat,
    /// Public origin of this service, e.g. `https://go.acme.com`
    pub public_origin: Option<String>,
    /// Where `GET /` redirects
    pub home_url: Option<String>,
    /// Engine settings (fallback URL, user-agent patterns, key length)
    pub engine: EngineConfig,
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// Fails fast on invalid configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Treat empty values as unset
        let var = |name: &str| var(name).filter(|s| !s.trim().is_empty());

        // Port
        let port = match var("PORT") {
            Some(s) => s.parse().map_err(|_| ConfigError {
                field: "PORT",
                message: format!("Invalid port '{}'", s),
            })?,
            None => 3001,
        };

        // Auth
        let auth_provider =
            AuthProvider::from_str(&var("AUTH_PROVIDER").unwrap_or_else(|| "none".into()));
        let allowed_domain = var("ALLOWED_DOMAIN").map(|d| d.trim().to_string());
        let admin_emails = var("ADMIN_EMAILS")
            .map(|s| {
                s.split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        // CORS allow origin
        let cors_origin_str = var("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".into());
        let cors_allow_origin = if cors_origin_str == "*" {
            HeaderValue::from_static("*")
        } else {
            HeaderValue::from_str(&cors_origin_str).map_err(|e| ConfigError {
                field: "CORS_ALLOW_ORIGIN",
                message: format!("Invalid header value '{}': {}", cors_origin_str, e),
            })?
        };

        // Storage
        let storage_provider =
            StorageProvider::from_str(&var("STORAGE_PROVIDER").unwrap_or_else(|| "memory".into()));
        let db_path = PathBuf::from(var("DB_PATH").unwrap_or_else(|| "./data/links.db".into()));
        let redis_url = var("REDIS_URL");
        if storage_provider == StorageProvider::Redis && redis_url.is_none() {
            return Err(ConfigError {
                field: "REDIS_URL",
                message: "Required when STORAGE_PROVIDER=redis".into(),
            });
        }

        // Log format
        let log_format = LogFormat::from_str(&var("LOG_FORMAT").unwrap_or_else(|| "pretty".into()));

        // Public URLs
        let public_origin = var("PUBLIC_ORIGIN").map(|s| s.trim_end_matches('/').to_string());
        let home_url = var("HOME_URL");

        let engine = engine_config(&var)?;

        Ok(Self {
            port,
            auth_provider,
            allowed_domain,
            admin_emails,
            cors_allow_origin,
            storage_provider,
            db_path,
            redis_url,
            log_format,
            public_origin,
            home_url,
            engine,
        })
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|a| a.eq_ignore_ascii_case(email))
    }

    /// Log warnings about insecure configuration.
    pub fn warn_if_insecure(&self) {
        if self.auth_provider == AuthProvider::None {
            tracing::warn!(
                "AUTH_PROVIDER=none: Using debug authentication via X-Debug-User header. \
                 DO NOT USE IN PRODUCTION."
            );
        }
        if self.allowed_domain.is_none() {
            tracing::warn!(
                "ALLOWED_DOMAIN not set: any authenticated email may register links. \
                 Set ALLOWED_DOMAIN for domain restriction."
            );
        }
        if self.storage_provider == StorageProvider::Memory {
            tracing::warn!("STORAGE_PROVIDER=memory: links are lost on restart.");
        }
    }
}

fn engine_config<F>(var: &F) -> Result<EngineConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let fallback = var("FALLBACK_URL").ok_or_else(|| ConfigError {
        field: "FALLBACK_URL",
        message: "Required".into(),
    })?;
    let invalid = |field: &'static str| {
        move |e: domain::CoreError| ConfigError {
            field,
            message: e.to_string(),
        }
    };

    let mut engine = EngineConfig::new(fallback).map_err(invalid("FALLBACK_URL"))?;
    if let Some(p) = var("APP_UA_REGEX") {
        engine = engine
            .with_app_webview_pattern(&p)
            .map_err(invalid("APP_UA_REGEX"))?;
    }
    if let Some(p) = var("IOS_SAFE_UA_REGEX") {
        engine = engine
            .with_ios_safe_browser_pattern(&p)
            .map_err(invalid("IOS_SAFE_UA_REGEX"))?;
    }
    if let Some(s) = var("APP_OPEN_URI_SCHEME") {
        engine = engine.with_app_open_scheme(s);
    }
    if let Some(s) = var("KEY_LENGTH") {
        let n: usize = s.parse().map_err(|_| ConfigError {
            field: "KEY_LENGTH",
            message: format!("Invalid number '{}'", s),
        })?;
        engine = engine.with_key_length(n).map_err(invalid("KEY_LENGTH"))?;
    }
    Ok(engine)
}
