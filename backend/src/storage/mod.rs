pub mod s3_service;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Upload(String),
}

/// Blob store that keeps uploaded images behind a public URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Address the object at `path` will be served from once uploaded.
    fn public_url(&self, path: &str, bucket: &str) -> String;

    async fn upload(
        &self,
        image_bytes: Vec<u8>,
        path: &str,
        bucket: &str,
        mime_type: &str,
    ) -> Result<String, StorageError>;
}

/// Process-local store for tests and running without cloud credentials.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    fn key(bucket: &str, path: &str) -> String {
        format!("{}/{}", bucket, path)
    }

    #[cfg(test)]
    pub fn get(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(&Self::key(bucket, path)).cloned())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn public_url(&self, path: &str, bucket: &str) -> String {
        format!("memory://{}", Self::key(bucket, path))
    }

    async fn upload(
        &self,
        image_bytes: Vec<u8>,
        path: &str,
        bucket: &str,
        _mime_type: &str,
    ) -> Result<String, StorageError> {
        self.objects
            .lock()
            .map_err(|_| StorageError::Upload("object map poisoned".to_string()))?
            .insert(Self::key(bucket, path), image_bytes);
        Ok(self.public_url(path, bucket))
    }
}
