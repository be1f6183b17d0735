use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use hex;
use sha2::{Digest, Sha256};

use super::{ObjectStore, StorageError};

#[derive(Clone)]
pub struct S3Service {
    client: Client,
}

impl S3Service {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn calculate_image_hash(image_data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image_data);
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl ObjectStore for S3Service {
    fn public_url(&self, path: &str, bucket: &str) -> String {
        format!("https://{}.s3.amazonaws.com/{}", bucket, path)
    }

    async fn upload(
        &self,
        image_bytes: Vec<u8>,
        path: &str,
        bucket: &str,
        mime_type: &str,
    ) -> Result<String, StorageError> {
        let body = ByteStream::from(image_bytes);

        self.client
            .put_object()
            .bucket(bucket)
            .key(path)
            .body(body)
            .content_type(mime_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        log::info!("File uploaded: {}", path);
        Ok(self.public_url(path, bucket))
    }
}
