use std::{net::SocketAddr, path::Path, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::{BlobStorage, Bucket};
use data_model::{ImageFile, User};
use document_store::{Collection, DocumentStore};
use tokio::signal;
use tracing::{error, info};

use super::routes::RouteState;
use crate::{config::ServerConfig, routes::create_routes};

#[derive(Clone)]
#[allow(dead_code)]
pub struct Service {
    pub config: ServerConfig,
    pub document_store: Arc<DocumentStore>,
    pub blob_storage: Arc<BlobStorage>,
    pub users: Collection<User>,
    pub images: Bucket,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let blob_storage = Arc::new(
            BlobStorage::new(&config.blob_storage).context("error initializing BlobStorage")?,
        );

        let files_collection = config.files_collection();
        let document_store = DocumentStore::open(
            Path::new(&config.state_store_path),
            &config.database,
            &[config.users_collection.as_str(), files_collection.as_str()],
        )
        .context("error opening document store")?;

        let users = document_store
            .collection::<User>(&config.users_collection)
            .context("error opening users collection")?;
        let files = document_store
            .collection::<ImageFile>(&files_collection)
            .context("error opening image files collection")?;
        let images = Bucket::new(&config.blob_storage.bucket, files, blob_storage.clone());

        info!(
            database = %config.database,
            users = %config.users_collection,
            bucket = %config.blob_storage.bucket,
            "connected to document store"
        );

        Ok(Self {
            config,
            document_store,
            blob_storage,
            users,
            images,
        })
    }

    pub fn route_state(&self) -> RouteState {
        RouteState {
            users: self.users.clone(),
            images: self.images.clone(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let routes = create_routes(self.route_state());
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
}
