use std::{env, fmt::Debug, net::SocketAddr, path::Path};

use anyhow::{Context, Result};
use blob_store::{BlobStorageConfig, Bucket};
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    // Export spans over OTLP.
    #[serde(default)]
    pub enable_tracing: bool,
    // OTLP collector endpoint, the exporter default is used when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub state_store_path: String,
    pub database: String,
    pub users_collection: String,
    pub blob_storage: BlobStorageConfig,
    pub structured_logging: bool,
    pub telemetry: TelemetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let state_store_path = env::current_dir()
            .unwrap_or_default()
            .join("user_store/state");
        ServerConfig {
            listen_addr: "0.0.0.0:8080".to_string(),
            state_store_path: state_store_path.to_string_lossy().to_string(),
            database: "mydb".to_string(),
            users_collection: "users".to_string(),
            blob_storage: Default::default(),
            structured_logging: false,
            telemetry: Default::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &Path) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("error reading config file {}", path.display()))?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<ServerConfig> {
        let config: ServerConfig = Figment::new().merge(Yaml::string(config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Collection holding the metadata of uploaded images.
    pub fn files_collection(&self) -> String {
        Bucket::files_collection(&self.blob_storage.bucket)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        if self.database.is_empty() {
            return Err(anyhow::anyhow!("database name must not be empty"));
        }
        if self.users_collection.is_empty() {
            return Err(anyhow::anyhow!("users collection name must not be empty"));
        }
        if self.blob_storage.bucket.is_empty() {
            return Err(anyhow::anyhow!("blob storage bucket must not be empty"));
        }
        if self.users_collection == self.files_collection() {
            return Err(anyhow::anyhow!(
                "users collection {} collides with the image files collection",
                self.users_collection
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.database, "mydb");
        assert_eq!(config.users_collection, "users");
        assert_eq!(config.files_collection(), "fs.files");
    }

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let config = ServerConfig::from_yaml(
            r#"
listen_addr: 127.0.0.1:9000
blob_storage:
  path: memory:///
structured_logging: true
"#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.database, "mydb");
        assert_eq!(config.blob_storage.path, "memory:///");
        assert_eq!(config.blob_storage.bucket, "fs");
        assert!(config.structured_logging);
        assert!(!config.telemetry.enable_tracing);
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        assert!(ServerConfig::from_yaml("listen_addr: not-an-address").is_err());
        assert!(ServerConfig::from_yaml("database: ''").is_err());
        assert!(ServerConfig::from_yaml("users_collection: fs.files").is_err());
    }

    #[test]
    fn test_from_path_reads_yaml_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yaml");
        let config = ServerConfig {
            users_collection: "people".to_string(),
            ..Default::default()
        };
        std::fs::write(&path, serde_yaml::to_string(&config)?)?;

        let loaded = ServerConfig::from_path(&path)?;
        assert_eq!(loaded.users_collection, "people");
        assert!(ServerConfig::from_path(&dir.path().join("missing.yaml")).is_err());
        Ok(())
    }
}
