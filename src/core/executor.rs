use crate::core::warp::warp_element;
use crate::io::raster::RasterStore;
use crate::types::{MapElement, OrthoError, OrthoResult, WarpedTile};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Handle to one task submitted to the pool.
pub struct TaskHandle<T> {
    rx: Receiver<T>,
}

/// Why a wait on a task handle did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The wall-clock budget elapsed; the task may still be running
    Timeout,
    /// The worker dropped the result channel without sending (panic)
    Disconnected,
}

impl<T> TaskHandle<T> {
    /// Wait for the task result with a wall-clock bound.
    pub fn wait(self, timeout: Duration) -> Result<T, WaitError> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(WaitError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(WaitError::Disconnected),
        }
    }
}

/// Bounded pool for CPU-bound per-image work.
///
/// `reset` builds a brand-new thread pool; workers of the old one finish or
/// keep hanging in the background without ever being handed new work, so a
/// stuck task cannot poison later batches.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    size: usize,
    generation: u64,
}

impl WorkerPool {
    pub fn new(size: usize) -> OrthoResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size.max(1))
            .build()
            .map_err(|e| OrthoError::Processing(format!("worker pool construction: {}", e)))?;
        Ok(Self {
            pool,
            size,
            generation: 0,
        })
    }

    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.pool.spawn(move || {
            let _ = tx.send(task());
        });
        TaskHandle { rx }
    }

    /// Replace the underlying thread pool.
    pub fn reset(&mut self) -> OrthoResult<()> {
        let next = rayon::ThreadPoolBuilder::new()
            .num_threads(self.size.max(1))
            .build()
            .map_err(|e| OrthoError::Processing(format!("worker pool reset: {}", e)))?;
        self.pool = next;
        self.generation += 1;
        Ok(())
    }

    /// Number of times the pool has been rebuilt.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of warping one element: the tile is absent when the element was
/// degraded to "no image data" by a timeout.
#[derive(Debug)]
pub struct WarpOutcome {
    pub index: u32,
    pub tile: Option<WarpedTile>,
}

/// Loads and warps elements in fixed-size batches on a bounded worker pool.
///
/// A timed-out element is kept as a placeholder without pixel data and the
/// batch's partial results are accepted; the pool is rebuilt before the next
/// batch so stuck workers are never reused. An unexpected error fails the
/// whole batch, which is retried on a fresh pool up to the retry cap.
pub struct ParallelWarpExecutor {
    pool: WorkerPool,
    store: Arc<dyn RasterStore>,
    timeout: Duration,
    retry_cap: usize,
}

impl ParallelWarpExecutor {
    pub fn new(
        store: Arc<dyn RasterStore>,
        worker_count: usize,
        timeout: Duration,
        retry_cap: usize,
    ) -> OrthoResult<Self> {
        Ok(Self {
            pool: WorkerPool::new(worker_count)?,
            store,
            timeout,
            retry_cap: retry_cap.max(1),
        })
    }

    pub fn pool_generation(&self) -> u64 {
        self.pool.generation()
    }

    /// Warp one batch of elements, returning exactly one outcome per element.
    pub fn warp_batch(&mut self, batch: &[MapElement]) -> OrthoResult<Vec<WarpOutcome>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_batch(batch) {
                Ok((outcomes, timed_out)) => {
                    if timed_out {
                        // Partial results are accepted as-is, but the next
                        // batch must not inherit a possibly-stuck worker.
                        self.pool.reset()?;
                    }
                    return Ok(outcomes);
                }
                Err(e) => {
                    if attempt >= self.retry_cap {
                        return Err(OrthoError::StageExhausted(format!(
                            "warp batch still failing after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    log::warn!(
                        "Warp batch attempt {} failed ({}), recreating pool and retrying",
                        attempt,
                        e
                    );
                    self.pool.reset()?;
                }
            }
        }
    }

    fn try_batch(&self, batch: &[MapElement]) -> OrthoResult<(Vec<WarpOutcome>, bool)> {
        let handles: Vec<TaskHandle<OrthoResult<WarpedTile>>> = batch
            .iter()
            .map(|element| {
                let store = Arc::clone(&self.store);
                let element = element.clone();
                self.pool.submit(move || warp_element(store.as_ref(), &element))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(batch.len());
        let mut timed_out = false;
        for (handle, element) in handles.into_iter().zip(batch.iter()) {
            match handle.wait(self.timeout) {
                Ok(Ok(tile)) => outcomes.push(WarpOutcome {
                    index: element.index,
                    tile: Some(tile),
                }),
                Ok(Err(e)) => {
                    return Err(OrthoError::BatchFailure(format!(
                        "element {}: {}",
                        element.index, e
                    )))
                }
                Err(WaitError::Timeout) => {
                    log::warn!(
                        "Element {} timed out after {:?}, keeping it without image data",
                        element.index,
                        self.timeout
                    );
                    timed_out = true;
                    outcomes.push(WarpOutcome {
                        index: element.index,
                        tile: None,
                    });
                }
                Err(WaitError::Disconnected) => {
                    return Err(OrthoError::BatchFailure(format!(
                        "worker for element {} dropped its result channel",
                        element.index
                    )))
                }
            }
        }
        Ok((outcomes, timed_out))
    }
}
