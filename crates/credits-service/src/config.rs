//! Service configuration.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

/// Which `LedgerStore` implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-process maps. State is lost on restart.
    Memory,
    /// `RocksDB` under `data_dir`. Requires the `rocksdb-backend` feature.
    RocksDb,
    /// PostgreSQL at `database_url`.
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" | "rocks" => Ok(Self::RocksDb),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Storage backend (default: memory).
    pub storage_backend: StorageBackend,

    /// Path to `RocksDB` data directory (default: "/data/credits").
    pub data_dir: String,

    /// PostgreSQL connection string, required for the postgres backend.
    pub database_url: Option<String>,

    /// Maximum PostgreSQL pool size.
    pub database_max_connections: u32,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Admin API key for administrative endpoints.
    pub admin_api_key: Option<String>,

    /// JSON plan catalog file. The built-in catalog is used when unset.
    pub plans_file: Option<String>,

    /// Reconcile before every balance read.
    pub reconcile_on_read: bool,

    /// Entries per page when the reconciler scans the ledger.
    pub reconcile_page_size: usize,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// API key secrets file structure.
#[derive(Debug, Deserialize)]
struct ApiKeySecrets {
    #[serde(default)]
    service_api_key: Option<String>,
    #[serde(default)]
    admin_api_key: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let (service_api_key, admin_api_key) = load_api_keys();

        Self {
            listen_addr: env_or("LISTEN_ADDR", defaults.listen_addr),
            storage_backend: std::env::var("STORAGE_BACKEND")
                .ok()
                .and_then(|s| match s.parse() {
                    Ok(backend) => Some(backend),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring STORAGE_BACKEND");
                        None
                    }
                })
                .unwrap_or(defaults.storage_backend),
            data_dir: env_or("DATA_DIR", defaults.data_dir),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            service_api_key,
            admin_api_key,
            plans_file: std::env::var("PLANS_FILE").ok(),
            reconcile_on_read: std::env::var("RECONCILE_ON_READ")
                .ok()
                .map_or(defaults.reconcile_on_read, |s| parse_flag(&s)),
            reconcile_page_size: env_parse("RECONCILE_PAGE_SIZE", defaults.reconcile_page_size),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            storage_backend: StorageBackend::Memory,
            data_dir: "/data/credits".into(),
            database_url: None,
            database_max_connections: 10,
            service_api_key: None,
            admin_api_key: None,
            plans_file: None,
            reconcile_on_read: false,
            reconcile_page_size: crate::reconcile::DEFAULT_PAGE_SIZE,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024, // 1MB
            request_timeout_seconds: 30,
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Load API keys from a secrets file, falling back to the environment.
fn load_api_keys() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/credits.json", "../.secrets/credits.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<ApiKeySecrets>(path) {
            tracing::info!(path = %path, "Loaded API keys from file");
            return (secrets.service_api_key, secrets.admin_api_key);
        }
    }

    tracing::debug!("API key secrets file not found, using environment variables");
    (
        std::env::var("SERVICE_API_KEY").ok(),
        std::env::var("ADMIN_API_KEY").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backends() {
        assert_eq!("memory".parse(), Ok(StorageBackend::Memory));
        assert_eq!("RocksDB".parse(), Ok(StorageBackend::RocksDb));
        assert_eq!("postgresql".parse(), Ok(StorageBackend::Postgres));
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn parses_flags() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("off"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn secrets_file_loads_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credits.json");
        std::fs::write(&path, r#"{"service_api_key": "svc", "admin_api_key": "adm"}"#).unwrap();

        let secrets: ApiKeySecrets = load_secrets_file(path.to_str().unwrap()).unwrap();
        assert_eq!(secrets.service_api_key.as_deref(), Some("svc"));
        assert_eq!(secrets.admin_api_key.as_deref(), Some("adm"));
    }

    #[test]
    fn default_is_memory_backed() {
        let config = ServiceConfig::default();
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
    }
}
