use chrono::Utc;
use shared::{ClassificationOutcome, HealthState, LifecycleStatus};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::{oneshot, watch};

use super::dispatch::DispatchLoop;
use super::error::PredictionError;
use super::handle::{self, ResultHandle};
use super::preprocess::Preprocessor;
use super::queue::{AdmissionError, AdmissionQueue, InferenceRequest};
use super::scorer::{ModelLoader, ScoreError, Scorer};
use crate::config::ServiceConfig;

/// Public entry point of the inference subsystem.
///
/// Cheap to clone; every clone feeds the same queue and dispatch thread.
#[derive(Clone)]
pub struct PredictionService {
    queue: AdmissionQueue,
    preprocessor: Preprocessor,
    lifecycle: watch::Receiver<LifecycleStatus>,
    model_version: String,
    environment: String,
}

/// Owner's handle on the dispatch thread.
pub struct DispatchHandle {
    lifecycle: Arc<watch::Sender<LifecycleStatus>>,
    finished: oneshot::Receiver<()>,
}

impl PredictionService {
    /// Spawns the dispatch thread, which loads and warms the model before
    /// the service reports ready.
    pub fn start(
        config: &ServiceConfig,
        loader: ModelLoader,
    ) -> std::io::Result<(Self, DispatchHandle)> {
        let preprocessor = Preprocessor::new(config.max_image_bytes, config.input_size);
        let (queue, receiver) = AdmissionQueue::bounded(config.queue_capacity);
        let (status_tx, status_rx) = watch::channel(LifecycleStatus::Loading);
        let status_tx = Arc::new(status_tx);
        let (finished_tx, finished_rx) = oneshot::channel();

        let worker = {
            let status_tx = status_tx.clone();
            let status_rx = status_rx.clone();
            let preprocessor = preprocessor.clone();
            let model_version = config.model_version.clone();
            let environment = config.environment.clone();
            let input_size = config.input_size;

            move || {
                let loaded = panic::catch_unwind(AssertUnwindSafe(|| {
                    Scorer::load_and_warm(loader, model_version.clone(), input_size)
                }))
                .unwrap_or_else(|_| Err(ScoreError::Load("model loader panicked".into())));

                let scorer = match loaded {
                    Ok(scorer) => scorer,
                    Err(e) => {
                        log::error!("Model loading error: {}", e);
                        status_tx.send_replace(LifecycleStatus::Failed);
                        let _ = finished_tx.send(());
                        return;
                    }
                };

                let runtime = match tokio::runtime::Builder::new_current_thread().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        log::error!("Failed to build dispatch runtime: {}", e);
                        status_tx.send_replace(LifecycleStatus::Failed);
                        let _ = finished_tx.send(());
                        return;
                    }
                };

                let promoted = status_tx.send_if_modified(|status| {
                    if *status == LifecycleStatus::Loading {
                        *status = LifecycleStatus::Ready;
                        true
                    } else {
                        false
                    }
                });
                if promoted {
                    log::info!(
                        "Model v{} loaded successfully in {} environment",
                        model_version,
                        environment
                    );
                }

                runtime.block_on(DispatchLoop::new(receiver, preprocessor, scorer, status_rx).run());
                let _ = finished_tx.send(());
            }
        };

        thread::Builder::new()
            .name("banamon-dispatch".to_string())
            .spawn(worker)?;

        let service = Self {
            queue,
            preprocessor,
            lifecycle: status_rx,
            model_version: config.model_version.clone(),
            environment: config.environment.clone(),
        };
        let handle = DispatchHandle {
            lifecycle: status_tx,
            finished: finished_rx,
        };
        Ok((service, handle))
    }

    /// Classifies one image, suspending only on this request's own result.
    pub async fn submit(&self, image: Vec<u8>) -> Result<ClassificationOutcome, PredictionError> {
        self.admit(image)?.await
    }

    /// Synchronous half of [`submit`](Self::submit): gate, precheck, enqueue.
    pub fn admit(&self, image: Vec<u8>) -> Result<ResultHandle, PredictionError> {
        if !self.is_ready() {
            return Err(PredictionError::ServiceUnavailable);
        }
        self.preprocessor.precheck(&image)?;

        let (resolver, handle) = handle::channel();
        match self.queue.enqueue(InferenceRequest::new(image, resolver)) {
            Ok(()) => Ok(handle),
            Err(AdmissionError::Full) => {
                log::warn!(
                    "Prediction queue is full ({} pending), rejecting request",
                    self.queue.depth()
                );
                Err(PredictionError::Overloaded)
            }
            Err(AdmissionError::Closed) => Err(PredictionError::ServiceUnavailable),
        }
    }

    pub fn health(&self) -> HealthState {
        let status = self.status();
        HealthState {
            healthy: status == LifecycleStatus::Ready,
            status,
            queue_depth: self.queue.depth(),
            queue_capacity: self.queue.capacity(),
            model_version: self.model_version.clone(),
            environment: self.environment.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Waits for the model load to settle and returns the resulting status.
    pub async fn ready(&self) -> LifecycleStatus {
        let mut lifecycle = self.lifecycle.clone();
        match lifecycle
            .wait_for(|status| *status != LifecycleStatus::Loading)
            .await
        {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    pub fn status(&self) -> LifecycleStatus {
        *self.lifecycle.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == LifecycleStatus::Ready
    }

    pub fn max_image_bytes(&self) -> usize {
        self.preprocessor.max_bytes()
    }
}

impl DispatchHandle {
    /// Stops admission immediately, then resolves once every request that
    /// was already queued has been scored and the dispatch thread is done.
    pub fn stop(self) -> impl Future<Output = ()> {
        self.lifecycle.send_if_modified(|status| match status {
            LifecycleStatus::Loading | LifecycleStatus::Ready => {
                *status = LifecycleStatus::Stopped;
                true
            }
            LifecycleStatus::Failed | LifecycleStatus::Stopped => false,
        });
        let finished = self.finished;
        async move {
            let _ = finished.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::preprocess::ValidationError;
    use crate::inference::testing::{
        FixedModel, Gate, GatedModel, encode_image, failing_loader, loader, solid_png, tagged_png,
    };
    use futures::future::join_all;
    use image::ImageFormat;
    use shared::LeafClass;
    use strum::IntoEnumIterator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    fn test_config(capacity: usize) -> ServiceConfig {
        ServiceConfig {
            queue_capacity: capacity,
            input_size: 32,
            model_version: "test-1".to_string(),
            ..ServiceConfig::default()
        }
    }

    async fn started(config: &ServiceConfig, loader: ModelLoader) -> (PredictionService, DispatchHandle) {
        let (service, dispatch) = PredictionService::start(config, loader).unwrap();
        assert_eq!(service.ready().await, LifecycleStatus::Ready);
        (service, dispatch)
    }

    struct GatedFixture {
        service: PredictionService,
        dispatch: DispatchHandle,
        gate: Arc<Gate>,
        seen: Arc<Mutex<Vec<u8>>>,
        entered: mpsc::UnboundedReceiver<u8>,
    }

    async fn gated(capacity: usize) -> GatedFixture {
        let gate = Arc::new(Gate::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered) = mpsc::unbounded_channel();
        let model = GatedModel::new(gate.clone(), seen.clone(), entered_tx);
        let (service, dispatch) = started(&test_config(capacity), loader(model)).await;
        GatedFixture {
            service,
            dispatch,
            gate,
            seen,
            entered,
        }
    }

    #[tokio::test]
    async fn healthy_leaf_png_is_classified() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = FixedModel::new(LeafClass::HealthyLeaf, calls.clone());
        let (service, dispatch) = started(&test_config(4), loader(model)).await;

        let image = solid_png(40, 40, [30, 160, 40]);
        assert!(image.len() < 5 * 1024);
        let outcome = service.submit(image).await.unwrap();

        assert_eq!(outcome.label.to_string(), "Banana Healthy Leaf");
        assert!(outcome.is_healthy);
        assert!((0.0..=100.0).contains(&outcome.confidence));
        assert_eq!(outcome.model_version, "test-1");
        dispatch.stop().await;
    }

    #[tokio::test]
    async fn jpeg_is_classified_end_to_end() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = FixedModel::new(LeafClass::YellowSigatoka, calls.clone());
        let (service, dispatch) = started(&test_config(4), loader(model)).await;

        let image = encode_image(64, 48, [200, 190, 40], ImageFormat::Jpeg);
        let outcome = service.submit(image).await.unwrap();

        assert!(LeafClass::iter().any(|label| label == outcome.label));
        assert_eq!(outcome.label, LeafClass::YellowSigatoka);
        assert!(!outcome.is_healthy);
        assert!((0.0..=100.0).contains(&outcome.confidence));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        dispatch.stop().await;
    }

    #[tokio::test]
    async fn oversized_payload_never_reaches_scorer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = FixedModel::new(LeafClass::Moko, calls.clone());
        let config = ServiceConfig {
            max_image_bytes: 256,
            ..test_config(4)
        };
        let (service, dispatch) = started(&config, loader(model)).await;

        for extra in [1usize, 100, 4096] {
            let result = service.submit(vec![0x89; 256 + extra]).await;
            assert_eq!(result, Err(PredictionError::Validation(ValidationError::TooLarge)));
        }

        dispatch.stop().await;
        // warm-up only
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn corrupt_jpeg_fails_alone_and_loop_keeps_serving() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = FixedModel::new(LeafClass::BlackSigatoka, calls.clone());
        let (service, dispatch) = started(&test_config(4), loader(model)).await;

        let mut corrupt = vec![0xFF, 0xD8, 0xFF, 0xE0];
        corrupt.extend_from_slice(&[0xAB; 512]);
        assert_eq!(
            service.submit(corrupt).await,
            Err(PredictionError::Validation(ValidationError::Corrupt))
        );

        let outcome = service.submit(solid_png(8, 8, [1, 2, 3])).await.unwrap();
        assert_eq!(outcome.label, LeafClass::BlackSigatoka);
        assert!(service.is_ready());
        dispatch.stop().await;
    }

    #[tokio::test]
    async fn load_failure_gates_admission_permanently() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (service, dispatch) = PredictionService::start(
            &test_config(4),
            failing_loader_counting("weights missing", attempts.clone()),
        )
        .unwrap();

        assert_eq!(service.ready().await, LifecycleStatus::Failed);
        for _ in 0..5 {
            assert_eq!(
                service.submit(solid_png(8, 8, [0, 0, 0])).await,
                Err(PredictionError::ServiceUnavailable)
            );
        }

        let health = service.health();
        assert!(!health.healthy);
        assert_eq!(health.status, LifecycleStatus::Failed);
        assert_eq!(health.queue_depth, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        dispatch.stop().await;
        assert_eq!(service.status(), LifecycleStatus::Failed);
    }

    fn failing_loader_counting(message: &'static str, attempts: Arc<AtomicUsize>) -> ModelLoader {
        Box::new(move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            failing_loader(message)()
        })
    }

    #[tokio::test]
    async fn concurrent_requests_are_scored_in_admission_order() {
        let mut fx = gated(16).await;
        fx.gate.open();

        let images: Vec<_> = (1..=12).map(tagged_png).collect();
        let results = join_all(images.into_iter().map(|image| fx.service.submit(image))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(*fx.seen.lock().unwrap(), (1..=12).collect::<Vec<u8>>());
        for _ in 1..=12 {
            fx.entered.recv().await.unwrap();
        }
        fx.dispatch.stop().await;
    }

    #[tokio::test]
    async fn full_queue_rejects_exactly_the_overflow() {
        let mut fx = gated(50).await;

        let admitted: Vec<_> = (1..=51).map(|tag| fx.service.admit(tagged_png(tag))).collect();
        assert_eq!(fx.entered.recv().await, Some(1));
        assert_eq!(fx.service.health().queue_depth, 50);

        let rejected: Vec<_> = admitted.iter().filter(|r| r.is_err()).collect();
        assert_eq!(rejected.len(), 1);
        assert!(matches!(admitted[50], Err(PredictionError::Overloaded)));

        fx.gate.open();
        let handles = admitted.into_iter().take(50).map(Result::unwrap);
        let results = join_all(handles).await;
        assert!(results.iter().all(Result::is_ok));

        assert_eq!(*fx.seen.lock().unwrap(), (1..=50).collect::<Vec<u8>>());
        fx.dispatch.stop().await;
    }

    #[tokio::test]
    async fn concurrent_burst_over_capacity_gets_one_overloaded() {
        let fx = gated(50).await;

        let opener = tokio::spawn({
            let gate = fx.gate.clone();
            let service = fx.service.clone();
            async move {
                while service.health().queue_depth < 50 {
                    tokio::task::yield_now().await;
                }
                gate.open();
            }
        });
        let submissions = (1..=51).map(|tag| fx.service.submit(tagged_png(tag)));
        let results = join_all(submissions).await;
        opener.await.unwrap();

        let overloaded = results
            .iter()
            .filter(|r| **r == Err(PredictionError::Overloaded))
            .count();
        let scored = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(overloaded, 1);
        assert_eq!(scored, 50);
        assert_eq!(fx.seen.lock().unwrap().len(), 50);
        fx.dispatch.stop().await;
    }

    #[tokio::test]
    async fn health_reports_live_queue_depth() {
        let mut fx = gated(8).await;
        let plug = fx.service.admit(tagged_png(1)).unwrap();
        assert_eq!(fx.entered.recv().await, Some(1));

        let queued: Vec<_> = (2..=4)
            .map(|tag| fx.service.admit(tagged_png(tag)).unwrap())
            .collect();
        let health = fx.service.health();
        assert!(health.healthy);
        assert_eq!(health.status, LifecycleStatus::Ready);
        // three waiting plus the one being scored
        assert_eq!(health.queue_depth, 4);
        assert_eq!(health.queue_capacity, 8);
        assert_eq!(health.model_version, "test-1");

        fx.gate.open();
        assert!(plug.await.is_ok());
        for handle in queued {
            assert!(handle.await.is_ok());
        }
        assert_eq!(fx.service.health().queue_depth, 0);
        fx.dispatch.stop().await;
    }

    #[tokio::test]
    async fn stop_rejects_new_work_and_drains_the_backlog() {
        let mut fx = gated(8).await;
        let plug = fx.service.admit(tagged_png(1)).unwrap();
        assert_eq!(fx.entered.recv().await, Some(1));
        let queued: Vec<_> = (2..=4)
            .map(|tag| fx.service.admit(tagged_png(tag)).unwrap())
            .collect();

        let stopped = fx.dispatch.stop();
        assert_eq!(fx.service.status(), LifecycleStatus::Stopped);
        assert_eq!(
            fx.service.submit(tagged_png(9)).await,
            Err(PredictionError::ServiceUnavailable)
        );

        fx.gate.open();
        stopped.await;

        assert!(plug.await.is_ok());
        for handle in queued {
            assert!(handle.await.is_ok());
        }
        assert_eq!(*fx.seen.lock().unwrap(), vec![1, 2, 3, 4]);
        assert!(!fx.service.health().healthy);
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_disturb_the_loop() {
        let mut fx = gated(4).await;
        let abandoned = fx.service.admit(tagged_png(5)).unwrap();
        assert_eq!(fx.entered.recv().await, Some(5));
        drop(abandoned);

        fx.gate.open();
        assert!(fx.service.submit(tagged_png(6)).await.is_ok());
        assert_eq!(*fx.seen.lock().unwrap(), vec![5, 6]);
        fx.dispatch.stop().await;
    }

    #[tokio::test]
    async fn scorer_panic_is_confined_to_its_request() {
        let fx = gated(4).await;
        fx.gate.open();

        let result = fx.service.submit(tagged_png(GatedModel::PANIC_TAG)).await;
        assert!(matches!(result, Err(PredictionError::Internal(_))));

        let outcome = fx.service.submit(tagged_png(7)).await.unwrap();
        assert_eq!(outcome.label, LeafClass::HealthyLeaf);
        fx.dispatch.stop().await;
    }

    #[tokio::test]
    async fn request_queued_behind_a_panic_is_not_delayed() {
        let mut fx = gated(4).await;
        let plug = fx.service.admit(tagged_png(1)).unwrap();
        assert_eq!(fx.entered.recv().await, Some(1));
        let doomed = fx.service.admit(tagged_png(GatedModel::PANIC_TAG)).unwrap();
        let next = fx.service.admit(tagged_png(2)).unwrap();

        fx.gate.open();
        assert!(plug.await.is_ok());
        assert!(matches!(doomed.await, Err(PredictionError::Internal(_))));

        let started = std::time::Instant::now();
        assert!(next.await.is_ok());
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        assert_eq!(fx.service.health().queue_depth, 0);
        fx.dispatch.stop().await;
    }
}
