use shared::{ClassificationOutcome, LeafClass};
use strum::EnumCount;

use super::preprocess::{CHANNELS, Tensor};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScoreError {
    #[error("model loading error: {0}")]
    Load(String),
    #[cfg(feature = "torch")]
    #[error("model inference error: {0}")]
    Inference(String),
    #[error("model returned {got} scores, expected {expected}")]
    MalformedOutput { expected: usize, got: usize },
    #[error("model returned a non-finite score")]
    NonFinite,
}

/// A loaded classification network.
///
/// Takes `&mut self` and carries no `Send`/`Sync` bound: a model is created
/// on the dispatch thread and never leaves it.
pub trait ClassifierModel {
    /// Class probabilities for one input, in [`LeafClass`] order.
    fn predict(&mut self, input: &Tensor) -> Result<Vec<f32>, ScoreError>;
}

/// Builds the model on the thread that will own it.
pub type ModelLoader = Box<dyn FnOnce() -> Result<Box<dyn ClassifierModel>, ScoreError> + Send>;

pub struct Scorer {
    model: Box<dyn ClassifierModel>,
    model_version: String,
}

impl Scorer {
    /// Loads the model and primes it with one dummy inference.
    ///
    /// A failed warm-up is only logged; a failed load is returned.
    pub fn load_and_warm(
        loader: ModelLoader,
        model_version: impl Into<String>,
        input_size: u32,
    ) -> Result<Self, ScoreError> {
        let model = loader()?;
        let mut scorer = Self {
            model,
            model_version: model_version.into(),
        };
        scorer.warm_up(input_size);
        Ok(scorer)
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn score(&mut self, tensor: Tensor) -> Result<ClassificationOutcome, ScoreError> {
        let probabilities = self.model.predict(&tensor)?;
        let (label, confidence) = classify(&probabilities)?;
        Ok(ClassificationOutcome::new(
            label,
            confidence,
            self.model_version.clone(),
        ))
    }

    fn warm_up(&mut self, input_size: u32) {
        let side = input_size as usize;
        let dummy = Tensor::zeros((side, side, CHANNELS));
        match self.model.predict(&dummy) {
            Ok(_) => log::info!("Model warmed up successfully"),
            Err(e) => log::warn!("Model warm-up failed: {}", e),
        }
    }
}

/// Picks the most probable class and scales its probability to 0..=100.
pub fn classify(probabilities: &[f32]) -> Result<(LeafClass, f32), ScoreError> {
    if probabilities.len() != LeafClass::COUNT {
        return Err(ScoreError::MalformedOutput {
            expected: LeafClass::COUNT,
            got: probabilities.len(),
        });
    }
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(ScoreError::NonFinite);
    }

    let (index, probability) = probabilities
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or(ScoreError::MalformedOutput {
            expected: LeafClass::COUNT,
            got: 0,
        })?;
    let label = LeafClass::from_index(index).ok_or(ScoreError::MalformedOutput {
        expected: LeafClass::COUNT,
        got: probabilities.len(),
    })?;

    Ok((label, (probability * 100.0).clamp(0.0, 100.0)))
}
