use shared::LifecycleStatus;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::{mpsc, watch};

use super::error::PredictionError;
use super::handle::PredictionResult;
use super::preprocess::Preprocessor;
use super::queue::InferenceRequest;
use super::scorer::Scorer;

/// Sole consumer of the admission queue and sole owner of the model.
pub struct DispatchLoop {
    receiver: mpsc::Receiver<InferenceRequest>,
    preprocessor: Preprocessor,
    scorer: Scorer,
    lifecycle: watch::Receiver<LifecycleStatus>,
}

impl DispatchLoop {
    pub fn new(
        receiver: mpsc::Receiver<InferenceRequest>,
        preprocessor: Preprocessor,
        scorer: Scorer,
        lifecycle: watch::Receiver<LifecycleStatus>,
    ) -> Self {
        Self {
            receiver,
            preprocessor,
            scorer,
            lifecycle,
        }
    }

    /// Serves requests one at a time until the service is stopped, then
    /// scores whatever was already admitted before returning.
    pub async fn run(mut self) {
        let mut lifecycle = self.lifecycle.clone();
        log::info!(
            "Dispatch loop started for model v{}",
            self.scorer.model_version()
        );

        loop {
            tokio::select! {
                biased;
                _ = lifecycle.wait_for(|status| *status == LifecycleStatus::Stopped) => break,
                request = self.receiver.recv() => match request {
                    Some(request) => self.dispatch(request),
                    None => {
                        log::info!("All producers are gone, dispatch loop exiting");
                        return;
                    }
                },
            }
        }

        self.receiver.close();
        let mut drained = 0usize;
        while let Some(request) = self.receiver.recv().await {
            self.dispatch(request);
            drained += 1;
        }
        log::info!("Dispatch loop stopped after draining {} queued requests", drained);
    }

    fn dispatch(&mut self, request: InferenceRequest) {
        let InferenceRequest {
            payload,
            resolver,
            admitted_at,
            slot,
        } = request;
        log::debug!(
            "Dequeued {} byte image after {:?} in queue",
            payload.len(),
            admitted_at.elapsed()
        );

        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(&payload))) {
            Ok(result) => result,
            Err(cause) => {
                let detail = panic_message(cause.as_ref());
                log::error!("Scoring panicked: {}", detail);
                Err(PredictionError::Internal(detail))
            }
        };

        match &result {
            Ok(outcome) => log::debug!(
                "Scored {} ({:.2}%)",
                outcome.label,
                outcome.confidence
            ),
            Err(PredictionError::Validation(e)) => log::info!("Image rejected: {}", e),
            Err(e) => log::error!("Prediction error: {}", e),
        }

        // Free the slot first so a caller that sees its outcome also sees the
        // capacity it held returned.
        drop(slot);
        if !resolver.resolve(result) {
            log::debug!("Caller stopped waiting, discarding outcome");
        }
    }

    fn evaluate(&mut self, payload: &[u8]) -> PredictionResult {
        let tensor = self.preprocessor.validate_and_tensorize(payload)?;
        Ok(self.scorer.score(tensor)?)
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = cause.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
