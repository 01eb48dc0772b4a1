use std::{env, sync::Arc};

use anyhow::{anyhow, Result};
use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use object_store::{
    aws::AmazonS3ConfigKey,
    parse_url,
    parse_url_opts,
    path::Path,
    ObjectStore,
    ObjectStoreScheme,
    PutPayload,
    WriteMultipart,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

pub mod bucket;

pub use bucket::Bucket;

fn default_bucket() -> String {
    "fs".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    /// Object store url, e.g. `file:///var/lib/user-store/blobs` or
    /// `s3://bucket/prefix`.
    pub path: String,
    /// Name of the large-object bucket images are uploaded into.
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

impl BlobStorageConfig {
    pub fn new(path: &str) -> Self {
        BlobStorageConfig {
            path: format!("file://{}", path),
            bucket: default_bucket(),
        }
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        let blob_store_path = env::current_dir()
            .unwrap_or_default()
            .join("user_store/blobs");
        info!("using blob store path: {}", blob_store_path.display());
        BlobStorageConfig::new(&blob_store_path.to_string_lossy())
    }
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub url: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
}

#[derive(Clone)]
pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,
    path: Path,
}

impl BlobStorage {
    pub fn new(config: &BlobStorageConfig) -> Result<Self> {
        let (object_store, path) = Self::build_object_store(&config.path)?;
        Ok(Self {
            object_store: Arc::new(object_store),
            path,
        })
    }

    pub fn build_object_store(url_str: &str) -> Result<(Box<dyn ObjectStore>, Path)> {
        let url = &url_str.parse::<Url>()?;
        let (scheme, _) = ObjectStoreScheme::parse(url)?;
        match scheme {
            ObjectStoreScheme::AmazonS3 => {
                // inject AWS environment variables to prioritize keys over instance metadata
                // credentials.
                let opts: Vec<(AmazonS3ConfigKey, String)> = std::env::vars_os()
                    .filter_map(|(os_key, os_value)| {
                        if let (Some(key), Some(value)) = (os_key.to_str(), os_value.to_str()) {
                            if key.starts_with("AWS_") {
                                if let Ok(config_key) = key.to_ascii_lowercase().parse() {
                                    return Some((config_key, String::from(value)));
                                }
                            }
                        }
                        None
                    })
                    .collect();
                Ok(parse_url_opts(url, opts)?)
            }
            _ => Ok(parse_url(url)?),
        }
    }

    fn path_for(&self, key: &str) -> Path {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.path.clone(), |path, part| path.child(part))
    }

    /// Streams `data` into the store under `key`, hashing it on the way.
    pub async fn put(
        &self,
        key: &str,
        mut data: impl futures::Stream<Item = Result<Bytes>> + Send + Unpin,
    ) -> Result<PutResult> {
        let path = self.path_for(key);
        let mut hasher = Sha256::new();
        let mut size_bytes = 0;

        // Multipart uploads need at least one part on some stores.
        let first = match data.next().await {
            Some(chunk) => chunk?,
            None => {
                self.object_store.put(&path, PutPayload::new()).await?;
                return Ok(Self::put_result(&path, size_bytes, hasher));
            }
        };

        let upload = self.object_store.put_multipart(&path).await?;
        let mut writer = WriteMultipart::new(upload);
        let mut next = Some(Ok(first));
        while let Some(chunk) = next {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    writer.abort().await?;
                    return Err(e);
                }
            };
            writer.wait_for_capacity(1).await?;
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            writer.write(&chunk);
            next = data.next().await;
        }
        writer.finish().await?;

        Ok(Self::put_result(&path, size_bytes, hasher))
    }

    fn put_result(path: &Path, size_bytes: u64, hasher: Sha256) -> PutResult {
        let hash = format!("{:x}", hasher.finalize());
        debug!(url = %path, size_bytes, "stored blob");
        PutResult {
            url: path.to_string(),
            size_bytes,
            sha256_hash: hash,
        }
    }

    pub async fn get(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let get_result = self
            .object_store
            .get(&Path::from(url))
            .await
            .map_err(|e| anyhow!("can't get blob {:?}: {:?}", url, e))?;
        let url = url.to_string();
        Ok(get_result
            .into_stream()
            .map_err(move |e| anyhow!("error reading blob {:?}: {:?}", url, e))
            .boxed())
    }

    pub async fn delete(&self, url: &str) -> Result<()> {
        self.object_store.delete(&Path::from(url)).await?;
        Ok(())
    }

    pub async fn read_bytes(&self, url: &str) -> Result<Bytes> {
        let mut reader = self.get(url).await?;
        let mut bytes = BytesMut::new();
        while let Some(chunk) = reader.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes.into())
    }
}
