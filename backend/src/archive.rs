use chrono::{DateTime, Utc};
use shared::{ClassificationOutcome, PredictionRecord};
use std::sync::Arc;

use crate::db::{RecordStore, RepositoryError};
use crate::storage::ObjectStore;
use crate::storage::s3_service::S3Service;

/// Persists images and outcomes after the caller already has its answer.
#[derive(Clone)]
pub struct PredictionArchive {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    bucket: String,
}

impl PredictionArchive {
    pub fn new(objects: Arc<dyn ObjectStore>, records: Arc<dyn RecordStore>, bucket: String) -> Self {
        Self {
            objects,
            records,
            bucket,
        }
    }

    pub fn object_path(user_id: &str, file_name: &str, at: DateTime<Utc>) -> String {
        format!(
            "mobile_predictions/{}/{}_{}",
            user_id,
            at.format("%Y%m%d_%H%M%S"),
            file_name
        )
    }

    pub fn public_url(&self, path: &str) -> String {
        self.objects.public_url(path, &self.bucket)
    }

    /// Best effort: failures are logged, never returned. A failed upload
    /// still produces a record, without an image URL.
    pub async fn archive(
        &self,
        user_id: String,
        image_bytes: Vec<u8>,
        path: String,
        mime_type: String,
        outcome: ClassificationOutcome,
    ) {
        let image_hash = S3Service::calculate_image_hash(&image_bytes);

        let image_url = match self
            .objects
            .upload(image_bytes, &path, &self.bucket, &mime_type)
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                log::error!("Upload failed for {}: {}", path, e);
                None
            }
        };

        let record = PredictionRecord::new(user_id, &outcome, image_url, image_hash);
        if let Err(e) = self.records.save(&record).await {
            log::error!(
                "Failed to save prediction {} for user {}: {}",
                record.id,
                record.user_id,
                e
            );
        }
    }

    pub async fn history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, RepositoryError> {
        self.records.list_for_caller(user_id, limit).await
    }
}
