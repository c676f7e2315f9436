use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::backend::{bounded, BlobStore, StoreConfig};
use crate::error::{Result, StoreError};
use crate::models::ImageMetadata;

/// Image payloads live in the content-addressed blob store; documents only
/// carry the returned id.
#[derive(Clone)]
pub struct ImageStore {
    blobs: Arc<dyn BlobStore>,
    config: StoreConfig,
}

impl ImageStore {
    pub fn new(blobs: Arc<dyn BlobStore>, config: StoreConfig) -> Self {
        Self { blobs, config }
    }

    pub async fn store_image(
        &self,
        data: Bytes,
        content_type: &str,
        keywords: Vec<String>,
    ) -> Result<ImageMetadata> {
        if data.is_empty() {
            return Err(StoreError::InvalidInput("empty image".to_string()));
        }
        let size = data.len() as u64;
        let blob_id = bounded("blob_put", self.config.call_timeout, self.blobs.put(data)).await?;
        debug!(blob = %blob_id, size, content_type, "Stored image blob");

        Ok(ImageMetadata {
            blob_id,
            content_type: content_type.to_string(),
            size,
            keywords,
        })
    }

    /// Fetch the payload, rejecting it if the size disagrees with the record.
    pub async fn load_image(&self, meta: &ImageMetadata) -> Result<Bytes> {
        let data = bounded(
            "blob_get",
            self.config.call_timeout,
            self.blobs.get(&meta.blob_id),
        )
        .await?;
        if data.len() as u64 != meta.size {
            return Err(StoreError::InvalidInput(format!(
                "blob {} is {} bytes, record says {}",
                meta.blob_id,
                data.len(),
                meta.size
            )));
        }
        Ok(data)
    }
}
