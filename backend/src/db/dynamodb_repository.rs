use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use shared::{LeafClass, PredictionRecord};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::{RecordStore, RepositoryError};

/// Global secondary index on `user_id` with `created_at` as sort key.
const USER_INDEX: &str = "user_id-created_at-index";

#[derive(Clone)]
pub struct DynamoDbRepository {
    client: Client,
    predictions_table: String,
}

impl DynamoDbRepository {
    pub fn new(client: Client, predictions_table: String) -> Self {
        Self {
            client,
            predictions_table,
        }
    }

    fn record_to_item(record: &PredictionRecord) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(record.id.to_string()));
        item.insert(
            "user_id".to_string(),
            AttributeValue::S(record.user_id.clone()),
        );
        item.insert(
            "prediction".to_string(),
            AttributeValue::S(record.prediction.to_string()),
        );
        item.insert(
            "confidence".to_string(),
            AttributeValue::N(record.confidence.to_string()),
        );
        item.insert(
            "is_healthy".to_string(),
            AttributeValue::Bool(record.is_healthy),
        );
        item.insert(
            "model_version".to_string(),
            AttributeValue::S(record.model_version.clone()),
        );
        if let Some(image_url) = &record.image_url {
            item.insert(
                "image_url".to_string(),
                AttributeValue::S(image_url.clone()),
            );
        }
        item.insert(
            "image_hash".to_string(),
            AttributeValue::S(record.image_hash.clone()),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(record.created_at.to_rfc3339()),
        );
        item
    }

    fn parse_record_from_item(
        item: HashMap<String, AttributeValue>,
    ) -> Result<PredictionRecord, RepositoryError> {
        let id = item
            .get("id")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid id".to_string()))?;

        let user_id = item
            .get("user_id")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid user_id".to_string()))?
            .clone();

        let prediction = item
            .get("prediction")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| LeafClass::from_str(s).ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid prediction".to_string()))?;

        let confidence = item
            .get("confidence")
            .and_then(|v| v.as_n().ok())
            .and_then(|s| s.parse::<f32>().ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid confidence".to_string()))?;

        let is_healthy = *item
            .get("is_healthy")
            .and_then(|v| v.as_bool().ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid is_healthy".to_string()))?;

        let model_version = item
            .get("model_version")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid model_version".to_string()))?
            .clone();

        let image_url = item
            .get("image_url")
            .and_then(|v| v.as_s().ok())
            .cloned();

        let image_hash = item
            .get("image_hash")
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default();

        let created_at = item
            .get("created_at")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| RepositoryError::InvalidData("Invalid created_at".to_string()))?;

        Ok(PredictionRecord {
            id,
            user_id,
            prediction,
            confidence,
            is_healthy,
            model_version,
            image_url,
            image_hash,
            created_at,
        })
    }
}

#[async_trait]
impl RecordStore for DynamoDbRepository {
    async fn save(&self, record: &PredictionRecord) -> Result<(), RepositoryError> {
        self.client
            .put_item()
            .table_name(&self.predictions_table)
            .set_item(Some(Self::record_to_item(record)))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        log::info!(
            "Saved prediction {} for user {} in '{}'",
            record.id,
            record.user_id,
            self.predictions_table
        );
        Ok(())
    }

    async fn list_for_caller(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, RepositoryError> {
        let result = self
            .client
            .query()
            .table_name(&self.predictions_table)
            .index_name(USER_INDEX)
            .key_condition_expression("user_id = :user_id")
            .expression_attribute_values(":user_id", AttributeValue::S(user_id.to_string()))
            .scan_index_forward(false)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        let mut records = Vec::new();
        if let Some(items) = result.items {
            for item in items {
                records.push(Self::parse_record_from_item(item)?);
            }
        }
        Ok(records)
    }
}
