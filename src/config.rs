use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "PhysioDesk";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_BIND: &str = "127.0.0.1:5000";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 8 * 60 * 60;
pub const DEFAULT_DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_CALENDLY_BASE_URL: &str = "https://api.calendly.com";
pub const DEFAULT_STRIPE_BASE_URL: &str = "https://api.stripe.com";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "physiodesk=info,physiodesk_lib=info,tower_http=warn"
}

/// Get the application data directory
/// ~/PhysioDesk/ on all platforms, falling back to the working directory.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn default_database_path() -> PathBuf {
    app_data_dir().join("physiodesk.db")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    /// Base64 of the 32-byte field encryption key.
    pub field_encryption_key: Option<String>,
    pub session_ttl_secs: u64,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_base_url: String,
    pub deepseek_api_key: Option<String>,
    pub deepseek_base_url: String,
    pub calendly_base_url: String,
    /// Externally reachable origin used to build OAuth and checkout redirects.
    pub public_base_url: String,
}

impl AppConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Ignoring unreadable .env file");
            }
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_raw = get("PHYSIODESK_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr: SocketAddr = bind_raw.parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::Invalid {
                name: "PHYSIODESK_BIND",
                reason: e.to_string(),
            }
        })?;

        let session_ttl_secs = match get("SESSION_TTL_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: "SESSION_TTL_SECS",
                reason: e.to_string(),
            })?,
            None => DEFAULT_SESSION_TTL_SECS,
        };

        let public_base_url = get("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://{bind_addr}"))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            bind_addr,
            database_path: get("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_database_path),
            field_encryption_key: get("FIELD_ENCRYPTION_KEY"),
            session_ttl_secs,
            stripe_secret_key: get("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: get("STRIPE_WEBHOOK_SECRET"),
            stripe_base_url: get("STRIPE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_STRIPE_BASE_URL.to_string()),
            deepseek_api_key: get("DEEPSEEK_API_KEY"),
            deepseek_base_url: get("DEEPSEEK_BASE_URL")
                .unwrap_or_else(|| DEFAULT_DEEPSEEK_BASE_URL.to_string()),
            calendly_base_url: get("CALENDLY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CALENDLY_BASE_URL.to_string()),
            public_base_url,
        })
    }

    /// Defaults pointed at a specific database file.
    pub fn for_database(path: PathBuf) -> Self {
        Self {
            database_path: path,
            ..Self::default()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let bind_addr = SocketAddr::from(([127, 0, 0, 1], 5000));
        Self {
            bind_addr,
            database_path: default_database_path(),
            field_encryption_key: None,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_base_url: DEFAULT_STRIPE_BASE_URL.to_string(),
            deepseek_api_key: None,
            deepseek_base_url: DEFAULT_DEEPSEEK_BASE_URL.to_string(),
            calendly_base_url: DEFAULT_CALENDLY_BASE_URL.to_string(),
            public_base_url: format!("http://{bind_addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND);
        assert_eq!(config.session_ttl_secs, DEFAULT_SESSION_TTL_SECS);
        assert!(config.stripe_secret_key.is_none());
        assert_eq!(config.public_base_url, "http://127.0.0.1:5000");
        assert!(config.database_path.ends_with("physiodesk.db"));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PHYSIODESK_BIND", "0.0.0.0:8080"),
            ("SESSION_TTL_SECS", "60"),
            ("DEEPSEEK_API_KEY", "sk-test"),
            ("PUBLIC_BASE_URL", "https://desk.example/"),
            ("STRIPE_SECRET_KEY", "  "),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.session_ttl_secs, 60);
        assert_eq!(config.deepseek_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.public_base_url, "https://desk.example");
        assert!(config.stripe_secret_key.is_none());
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = AppConfig::from_lookup(lookup(&[("SESSION_TTL_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("SESSION_TTL_SECS"));
        assert!(AppConfig::from_lookup(lookup(&[("PHYSIODESK_BIND", "nowhere")])).is_err());
    }

    #[test]
    fn app_data_dir_ends_with_app_name() {
        assert!(app_data_dir().ends_with("PhysioDesk"));
    }
}
