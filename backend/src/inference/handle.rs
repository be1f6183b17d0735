use shared::ClassificationOutcome;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use super::error::PredictionError;

pub type PredictionResult = Result<ClassificationOutcome, PredictionError>;

const ABANDONED: &str = "request was dropped before it was scored";

/// Creates the two halves of a per-request result slot.
pub fn channel() -> (Resolver, ResultHandle) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx }, ResultHandle { rx })
}

/// Write half, held by the dispatch loop. Consumed by `resolve`.
#[derive(Debug)]
pub struct Resolver {
    tx: oneshot::Sender<PredictionResult>,
}

impl Resolver {
    /// Returns `false` when the caller stopped waiting; the value is dropped.
    pub fn resolve(self, result: PredictionResult) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// Read half, awaited by the caller.
///
/// Polling again after it has yielded its value panics, as with any
/// completed oneshot receiver.
#[derive(Debug)]
pub struct ResultHandle {
    rx: oneshot::Receiver<PredictionResult>,
}

impl Future for ResultHandle {
    type Output = PredictionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(PredictionError::Internal(ABANDONED.into())))
        })
    }
}
