use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::logic::{ReconcileOptions, DEFAULT_WARNING_DAYS};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub connection_string: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Refuse runs that would delete more than this share of the catalog.
    pub max_removal_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub output_dir: String,
    pub expiry_warning_days: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            max_connections: Some(5),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: "exports".to_string(),
            expiry_warning_days: DEFAULT_WARNING_DAYS,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("config").required(false));

        // CATALOG_SYNC__MAX_REMOVAL_RATIO=0.5 sets sync.max_removal_ratio
        config = config.add_source(
            config::Environment::with_prefix("CATALOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        if let Some(ratio) = app_config.sync.max_removal_ratio {
            anyhow::ensure!(
                (0.0..=1.0).contains(&ratio),
                "sync.max_removal_ratio must be between 0 and 1, got {}",
                ratio
            );
        }

        Ok(app_config)
    }

    /// Get the database URL from config or environment
    pub fn database_url(&self) -> String {
        if let Some(connection_string) = &self.database.connection_string {
            return connection_string.clone();
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            return url;
        }

        "sqlite://instruments.db?mode=rwc".to_string()
    }

    pub fn max_connections(&self) -> u32 {
        self.database.max_connections.unwrap_or(5)
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            max_removal_ratio: self.sync.max_removal_ratio,
        }
    }

    pub fn export_dir(&self) -> PathBuf {
        PathBuf::from(&self.export.output_dir)
    }
}
