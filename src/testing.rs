use anyhow::Result;
use axum::Router;
use blob_store::BlobStorageConfig;
use tempfile::TempDir;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{config::ServerConfig, routes::create_routes, service::Service};

pub struct TestService {
    pub service: Service,
    // Keeps the state and blob directories alive for the duration of a test.
    _temp_dir: TempDir,
}

impl TestService {
    pub async fn new() -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let temp_dir = tempfile::tempdir()?;

        let cfg = ServerConfig {
            state_store_path: temp_dir
                .path()
                .join("state_store")
                .to_string_lossy()
                .to_string(),
            blob_storage: BlobStorageConfig::new(
                &temp_dir.path().join("blob_store").to_string_lossy(),
            ),
            ..Default::default()
        };
        let srv = Service::new(cfg).await?;

        Ok(Self {
            service: srv,
            _temp_dir: temp_dir,
        })
    }

    pub fn router(&self) -> Router {
        create_routes(self.service.route_state())
    }
}
