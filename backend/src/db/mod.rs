pub mod dynamodb_repository;

use async_trait::async_trait;
use shared::PredictionRecord;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Invalid data format: {0}")]
    InvalidData(String),
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

/// Durable log of predictions, keyed by caller.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save(&self, record: &PredictionRecord) -> Result<(), RepositoryError>;

    /// Most recent first.
    async fn list_for_caller(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, RepositoryError>;
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<PredictionRecord>>,
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, record: &PredictionRecord) -> Result<(), RepositoryError> {
        self.records
            .lock()
            .map_err(|_| RepositoryError::Unavailable("record list poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }

    async fn list_for_caller(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, RepositoryError> {
        let records = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Unavailable("record list poisoned".to_string()))?;
        let mut mine: Vec<PredictionRecord> = records
            .iter()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        mine.truncate(limit);
        Ok(mine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shared::{ClassificationOutcome, LeafClass};

    fn record(user: &str, label: LeafClass, age_minutes: i64) -> PredictionRecord {
        let mut outcome = ClassificationOutcome::new(label, 80.0, "1.0.0");
        outcome.timestamp -= Duration::minutes(age_minutes);
        PredictionRecord::new(user, &outcome, None, "hash".to_string())
    }

    #[tokio::test]
    async fn lists_only_callers_records_newest_first() {
        let store = MemoryRecordStore::default();
        store.save(&record("alice", LeafClass::Moko, 30)).await.unwrap();
        store.save(&record("bob", LeafClass::Panama, 5)).await.unwrap();
        store.save(&record("alice", LeafClass::HealthyLeaf, 1)).await.unwrap();
        store.save(&record("alice", LeafClass::InsectPest, 10)).await.unwrap();

        let history = store.list_for_caller("alice", 2).await.unwrap();
        let labels: Vec<_> = history.iter().map(|r| r.prediction).collect();
        assert_eq!(labels, vec![LeafClass::HealthyLeaf, LeafClass::InsectPest]);
    }
}
