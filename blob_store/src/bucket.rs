use std::sync::Arc;

use bytes::Bytes;
use data_model::{get_epoch_time_in_ms, ImageFile, ObjectId};
use document_store::{Collection, Error};
use futures::stream::BoxStream;
use tracing::{info, warn};

use crate::BlobStorage;

/// A named large-object bucket.
///
/// File metadata lives in the `<bucket>.files` document collection and the
/// content in blob storage under `<bucket>/<blob id>`. Uploading a name that
/// already exists stores another version next to the old ones.
#[derive(Clone)]
pub struct Bucket {
    name: String,
    files: Collection<ImageFile>,
    storage: Arc<BlobStorage>,
}

impl Bucket {
    pub fn new(name: &str, files: Collection<ImageFile>, storage: Arc<BlobStorage>) -> Self {
        Self {
            name: name.to_string(),
            files,
            storage,
        }
    }

    pub fn files_collection(bucket: &str) -> String {
        format!("{}.files", bucket)
    }

    pub async fn upload(
        &self,
        filename: &str,
        data: impl futures::Stream<Item = anyhow::Result<Bytes>> + Send + Unpin,
        mime_type: &str,
    ) -> Result<ObjectId, Error> {
        let key = format!("{}/{}", self.name, ObjectId::new());
        let put_result = self.storage.put(&key, data).await?;

        let file = ImageFile {
            id: None,
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            length: put_result.size_bytes,
            sha256: put_result.sha256_hash,
            upload_date: get_epoch_time_in_ms(),
            blob_url: put_result.url.clone(),
        };
        match self.files.insert(file) {
            Ok(id) => {
                info!(
                    bucket = %self.name,
                    %id,
                    filename,
                    size_bytes = put_result.size_bytes,
                    "uploaded file"
                );
                Ok(id)
            }
            Err(e) => {
                // Without its metadata the blob is unreachable.
                if let Err(err) = self.storage.delete(&put_result.url).await {
                    warn!(url = %put_result.url, "failed to delete orphaned blob: {:?}", err);
                }
                Err(e)
            }
        }
    }

    pub fn find(&self, id: &ObjectId) -> Result<ImageFile, Error> {
        self.files.find_by_id(id)
    }

    /// All stored versions of `filename`, oldest first.
    pub fn find_by_name(&self, filename: &str) -> Result<Vec<ImageFile>, Error> {
        let mut files = self.files.find_all_by(|f| f.filename == filename)?;
        files.sort_by_key(|f| (f.upload_date, f.id));
        Ok(files)
    }

    pub async fn open_download_stream(
        &self,
        id: &ObjectId,
    ) -> Result<(ImageFile, BoxStream<'static, anyhow::Result<Bytes>>), Error> {
        let file = self.find(id)?;
        let stream = self.storage.get(&file.blob_url).await?;
        Ok((file, stream))
    }

    pub async fn read_bytes(&self, id: &ObjectId) -> Result<Bytes, Error> {
        let file = self.find(id)?;
        Ok(self.storage.read_bytes(&file.blob_url).await?)
    }
}
