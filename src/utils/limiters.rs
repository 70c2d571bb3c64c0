use crate::utils::error::ApiError;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Token-bucket rate limiter used as admission control in front of the LLM
/// provider and the chat endpoint.
///
/// Refill only advances `last_refill` once at least one whole token has
/// accrued, so sub-token progress is never lost to rounding.
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: usize, refill_per_second: f64) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            capacity,
            refill_per_second: refill_per_second.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        let gained = elapsed * self.refill_per_second;
        if gained >= 1.0 {
            state.tokens = (state.tokens + gained).min(self.capacity);
            state.last_refill = Instant::now();
        }
    }

    /// Non-blocking admission attempt. Returns immediately.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Poll `try_acquire` at ~100ms intervals until success or timeout.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = (deadline - now).min(Duration::from_millis(100));
            tokio::time::sleep(wait).await;
        }
    }

    /// Currently available whole tokens.
    pub fn available(&self) -> usize {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens as usize
    }
}

/// Bounded FIFO queue capping in-flight concurrency.
///
/// Jobs past `max_concurrency` wait in a backlog of at most `max_backlog`;
/// anything beyond that is rejected immediately with `queue_full`.
/// `clear()` rejects every waiting job with `queue_cleared` and leaves
/// running jobs untouched.
pub struct RequestQueue {
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    max_backlog: usize,
    cleared_tx: watch::Sender<u64>,
}

/// An admitted slot. Holding it counts against `max_concurrency`; dropping
/// it releases the slot on every exit path.
pub struct QueueSlot {
    _permit: OwnedSemaphorePermit,
    running: Arc<AtomicUsize>,
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RequestQueue {
    pub fn new(max_concurrency: usize, max_backlog: usize) -> Self {
        let (cleared_tx, _) = watch::channel(0u64);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            pending: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            max_backlog,
            cleared_tx,
        }
    }

    /// Admit a job and hold its slot until the returned guard is dropped.
    ///
    /// Used directly for streaming LLM calls, where the slot must outlive
    /// the initial request and cover the whole stream.
    pub async fn acquire_slot(&self) -> Result<QueueSlot, ApiError> {
        // Fast path: a concurrency slot is free, no backlog involved.
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(self.slot(permit));
        }

        // Backlog admission.
        if self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| {
                if p >= self.max_backlog {
                    None
                } else {
                    Some(p + 1)
                }
            })
            .is_err()
        {
            debug!(max_backlog = self.max_backlog, "request queue backlog full");
            return Err(ApiError::QueueFull(format!(
                "request queue backlog of {} exceeded",
                self.max_backlog
            )));
        }

        let mut cleared_rx = self.cleared_tx.subscribe();
        let result = tokio::select! {
            biased;
            permit = self.semaphore.clone().acquire_owned() => {
                permit
                    .map(|p| self.slot(p))
                    .map_err(|_| ApiError::QueueCleared("request queue shut down".to_string()))
            }
            _ = cleared_rx.changed() => {
                Err(ApiError::QueueCleared("request queue cleared".to_string()))
            }
        };
        self.pending.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn slot(&self, permit: OwnedSemaphorePermit) -> QueueSlot {
        self.running.fetch_add(1, Ordering::SeqCst);
        QueueSlot {
            _permit: permit,
            running: self.running.clone(),
        }
    }

    /// Run `job` once a slot is available; the slot is released when the
    /// job resolves, whether it succeeded or failed.
    pub async fn submit<F, T>(&self, job: F) -> Result<T, ApiError>
    where
        F: Future<Output = T>,
    {
        let slot = self.acquire_slot().await?;
        let out = job.await;
        drop(slot);
        Ok(out)
    }

    /// Reject all backlogged jobs with `queue_cleared`. Running jobs keep
    /// their slots.
    pub fn clear(&self) {
        self.cleared_tx.send_modify(|generation| *generation += 1);
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}
