use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumCount, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;

/// Leaf categories the classifier can emit, in model output order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
    AsRefStr,
)]
pub enum LeafClass {
    #[serde(rename = "Banana Black Sigatoka Disease")]
    #[strum(serialize = "Banana Black Sigatoka Disease")]
    BlackSigatoka,
    #[serde(rename = "Banana Bract Mosaic Virus Disease")]
    #[strum(serialize = "Banana Bract Mosaic Virus Disease")]
    BractMosaicVirus,
    #[serde(rename = "Banana Healthy Leaf")]
    #[strum(serialize = "Banana Healthy Leaf")]
    HealthyLeaf,
    #[serde(rename = "Banana Insect Pest Disease")]
    #[strum(serialize = "Banana Insect Pest Disease")]
    InsectPest,
    #[serde(rename = "Banana Moko Disease")]
    #[strum(serialize = "Banana Moko Disease")]
    Moko,
    #[serde(rename = "Banana Panama Disease")]
    #[strum(serialize = "Banana Panama Disease")]
    Panama,
    #[serde(rename = "Banana Yellow Sigatoka Disease")]
    #[strum(serialize = "Banana Yellow Sigatoka Disease")]
    YellowSigatoka,
}

impl LeafClass {
    pub const HEALTHY: LeafClass = LeafClass::HealthyLeaf;

    /// Maps a model output index to its class.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    pub fn is_healthy(self) -> bool {
        self == Self::HEALTHY
    }
}

/// Result of scoring one image. Never mutated after it is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    pub label: LeafClass,
    /// Probability of `label` scaled to 0..=100.
    pub confidence: f32,
    pub is_healthy: bool,
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
}

impl ClassificationOutcome {
    pub fn new(label: LeafClass, confidence: f32, model_version: impl Into<String>) -> Self {
        Self {
            label,
            confidence,
            is_healthy: label.is_healthy(),
            model_version: model_version.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleStatus {
    Loading,
    Ready,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthState {
    pub healthy: bool,
    pub status: LifecycleStatus,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub model_version: String,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
}

/// Envelope used by every successful JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionData {
    pub prediction: LeafClass,
    pub confidence: f32,
    pub is_healthy: bool,
    pub model_version: String,
    pub image_url: String,
    pub timestamp: DateTime<Utc>,
}

impl PredictionData {
    pub fn from_outcome(outcome: &ClassificationOutcome, image_url: String) -> Self {
        Self {
            prediction: outcome.label,
            confidence: outcome.confidence,
            is_healthy: outcome.is_healthy,
            model_version: outcome.model_version.clone(),
            image_url,
            timestamp: outcome.timestamp,
        }
    }
}

/// Durable log entry for one prediction made on behalf of a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub prediction: LeafClass,
    pub confidence: f32,
    pub is_healthy: bool,
    pub model_version: String,
    pub image_url: Option<String>,
    pub image_hash: String,
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn new(
        user_id: impl Into<String>,
        outcome: &ClassificationOutcome,
        image_url: Option<String>,
        image_hash: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            prediction: outcome.label,
            confidence: outcome.confidence,
            is_healthy: outcome.is_healthy,
            model_version: outcome.model_version.clone(),
            image_url,
            image_hash,
            created_at: outcome.timestamp,
        }
    }
}
