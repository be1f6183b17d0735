use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use super::handle::Resolver;

pub const MAX_QUEUE_SIZE: usize = 50;

/// One admitted image and the slot its outcome goes to.
///
/// `slot` is the capacity permit taken at admission; it is released when
/// the request is dropped, i.e. after its handle has been resolved.
#[derive(Debug)]
pub struct InferenceRequest {
    pub payload: Vec<u8>,
    pub resolver: Resolver,
    pub admitted_at: Instant,
    pub slot: Option<OwnedSemaphorePermit>,
}

impl InferenceRequest {
    pub fn new(payload: Vec<u8>, resolver: Resolver) -> Self {
        Self {
            payload,
            resolver,
            admitted_at: Instant::now(),
            slot: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("admission queue is full")]
    Full,
    #[error("admission queue is closed")]
    Closed,
}

/// Producer side of the bounded FIFO between callers and the dispatch loop.
///
/// Capacity counts outstanding requests: queued ones and the one being
/// scored. A slot frees only when its request is dropped by the consumer.
#[derive(Debug, Clone)]
pub struct AdmissionQueue {
    tx: mpsc::Sender<InferenceRequest>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionQueue {
    /// `capacity` must be non-zero.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<InferenceRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            tx,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        };
        (queue, rx)
    }

    /// Never waits for space.
    pub fn enqueue(&self, mut request: InferenceRequest) -> Result<(), AdmissionError> {
        let slot = self.slots.clone().try_acquire_owned().map_err(|err| match err {
            TryAcquireError::NoPermits => AdmissionError::Full,
            TryAcquireError::Closed => AdmissionError::Closed,
        })?;
        request.slot = Some(slot);

        // The channel is as large as the permit pool, so `Full` only shows
        // up if a caller bypassed the permits.
        self.tx.try_send(request).map_err(|err| match err {
            TrySendError::Full(_) => AdmissionError::Full,
            TrySendError::Closed(_) => AdmissionError::Closed,
        })
    }

    /// Admitted requests whose handle has not been resolved yet.
    pub fn depth(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
