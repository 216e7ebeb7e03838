#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The batch writer (spec §4.D): drains the ingress queue into the store,
//! one transaction per batch, with exponential backoff on transient store
//! failure and a bounded flush on shutdown.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use rand::Rng;
use sysmon_queue::IngressQueue;
use sysmon_store::Store;
use sysmon_types::Sample;

/// Writer configuration (spec §4.D defaults).
#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// Maximum samples drained per transaction.
    pub batch_size: usize,
    /// Maximum time to wait for a batch to fill before flushing whatever
    /// has accumulated.
    pub batch_timeout: Duration,
    /// Maximum number of retries on a transient store failure.
    pub max_retries: u32,
    /// Backoff cap, in milliseconds, for the exponential-with-jitter
    /// retry delay.
    pub backoff_cap: Duration,
    /// Maximum time the writer spends flushing on shutdown before giving
    /// up and exiting anyway.
    pub shutdown_grace: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_millis(1000),
            max_retries: 5,
            backoff_cap: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// What happened to one drained batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Nothing was waiting in the queue; no transaction was attempted.
    Empty,
    /// The batch was committed, after `retries` transient retries.
    Committed {
        /// Number of samples written in the committed batch.
        written: usize,
        /// Number of transient retries before the commit succeeded.
        retries: u32,
    },
    /// The batch was dropped after exhausting retries on a persistent
    /// failure.
    Dropped {
        /// Number of samples lost when the batch was dropped.
        lost: usize,
    },
}

/// Drains `queue` into `store`, one batch at a time.
pub struct BatchWriter {
    queue: Arc<IngressQueue<Sample>>,
    store: Store,
    config: WriterConfig,
}

impl BatchWriter {
    /// Builds a writer over `queue` and `store` with `config`.
    pub fn new(queue: Arc<IngressQueue<Sample>>, store: Store, config: WriterConfig) -> Self {
        Self { queue, store, config }
    }

    /// Blocks for up to `batch_timeout` waiting for samples, then drains
    /// and commits up to `batch_size` of them in a single transaction,
    /// retrying transient failures with capped exponential backoff and
    /// jitter.
    pub fn run_once(&self) -> WriteOutcome {
        let batch = self.queue.drain_blocking(self.config.batch_size, self.config.batch_timeout);
        if batch.is_empty() {
            return WriteOutcome::Empty;
        }
        self.commit_with_retry(&batch)
    }

    /// Drains whatever is currently queued, without waiting for more to
    /// arrive, committing it in a single best-effort transaction within
    /// `shutdown_grace`. Called once, at shutdown.
    pub fn flush_shutdown(&self) -> WriteOutcome {
        let deadline = Instant::now() + self.config.shutdown_grace;
        let batch = self.queue.drain_available(usize::MAX);
        if batch.is_empty() {
            return WriteOutcome::Empty;
        }
        self.commit_with_retry_until(&batch, deadline)
    }

    fn commit_with_retry(&self, batch: &[Sample]) -> WriteOutcome {
        self.commit_with_retry_until(batch, Instant::now() + Duration::from_secs(u64::MAX / 2))
    }

    fn commit_with_retry_until(&self, batch: &[Sample], deadline: Instant) -> WriteOutcome {
        let mut retries = 0u32;
        loop {
            match self.store.insert_samples(batch) {
                Ok(written) => return WriteOutcome::Committed { written, retries },
                Err(sysmon_store::Error::Busy { reason }) if retries < self.config.max_retries => {
                    tracing::warn!(retries, reason, "transient store failure, retrying batch write");
                    let delay = backoff_delay(retries, self.config.backoff_cap);
                    if Instant::now() + delay >= deadline {
                        tracing::error!(lost = batch.len(), "shutdown grace exhausted, dropping batch");
                        return WriteOutcome::Dropped { lost: batch.len() };
                    }
                    std::thread::sleep(delay);
                    retries += 1;
                }
                Err(err) => {
                    tracing::error!(
                        lost = batch.len(),
                        error = %err,
                        "persistent store failure, dropping batch"
                    );
                    return WriteOutcome::Dropped { lost: batch.len() };
                }
            }
        }
    }
}

/// Exponential backoff with full jitter, capped at `cap`. `attempt` is
/// zero-based (the delay before the first retry).
fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let base_ms = 20u64.saturating_mul(1u64 << attempt.min(10));
    let capped_ms = base_ms.min(cap.as_millis() as u64);
    let jittered_ms = rand::thread_rng().gen_range(0..=capped_ms.max(1));
    Duration::from_millis(jittered_ms)
}
