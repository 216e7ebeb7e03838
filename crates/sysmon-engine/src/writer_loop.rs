//! The writer thread (spec §5): drains the ingress queue in batches and
//! commits them to the store. On shutdown, performs one final bounded
//! flush before exiting; in-flight store transactions are never aborted.

use std::time::Duration;

use sysmon_writer::{BatchWriter, WriteOutcome};

use crate::shutdown::ShutdownToken;

/// Runs the writer loop until `shutdown` is signalled, then flushes
/// whatever remains in the queue (spec §5's shutdown grace) before
/// returning.
pub fn run(writer: &BatchWriter, shutdown: &ShutdownToken) {
    while !shutdown.is_set() {
        match writer.run_once() {
            WriteOutcome::Empty => {
                if shutdown.wait_timeout(Duration::from_millis(200)) {
                    break;
                }
            }
            WriteOutcome::Committed { written, retries } => {
                tracing::debug!(written, retries, "batch committed");
            }
            WriteOutcome::Dropped { lost } => {
                tracing::error!(lost, "batch dropped after exhausting retries");
            }
        }
    }

    match writer.flush_shutdown() {
        WriteOutcome::Empty => {}
        WriteOutcome::Committed { written, retries } => {
            tracing::info!(written, retries, "final shutdown flush committed");
        }
        WriteOutcome::Dropped { lost } => {
            tracing::error!(lost, "samples lost during shutdown flush");
        }
    }
    tracing::info!("writer thread exiting");
}
