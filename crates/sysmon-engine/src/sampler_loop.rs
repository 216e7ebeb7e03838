//! The sampler thread (spec §5): one tick per `rate_seconds`, drift
//! corrected so the mean cadence matches the target over a rolling window
//! even when a tick runs long. Ticks are never skipped; a tick may be late.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use sysmon_platform::Sampler;
use sysmon_queue::IngressQueue;
use sysmon_types::Sample;

use crate::shutdown::ShutdownToken;

/// Runs the sampler loop until `shutdown` is signalled. Exits at the end
/// of the current tick, never mid-read.
pub fn run(mut sampler: Sampler, queue: Arc<IngressQueue<Sample>>, rate: Duration, shutdown: &ShutdownToken) {
    let start = Instant::now();
    let mut tick: u64 = 0;

    while !shutdown.is_set() {
        let now_wall = wall_clock_seconds();
        match sampler.sample_once(now_wall) {
            Ok(sample) => queue.push(sample),
            Err(err) => tracing::warn!(error = %err, "sampler tick dropped"),
        }

        tick += 1;
        let target = start + rate.saturating_mul(tick as u32);
        let sleep_for = target.saturating_duration_since(Instant::now());
        if shutdown.wait_timeout(sleep_for) {
            break;
        }
    }
    tracing::info!("sampler thread exiting");
}

fn wall_clock_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use std::thread;

    use sysmon_types::{PlatformAdapter, RawCounters, SamplerError};

    use super::*;

    struct CountingAdapter;
    impl PlatformAdapter for CountingAdapter {
        fn read_counters(&mut self, _now: i64) -> Result<RawCounters, SamplerError> {
            Ok(RawCounters { cpu_pct: Some(1.0), ..Default::default() })
        }
    }

    #[test]
    fn ticks_keep_arriving_until_shutdown_is_signalled() {
        let queue = Arc::new(IngressQueue::new(100));
        let sampler = Sampler::new("h1", Box::new(CountingAdapter));
        let shutdown = ShutdownToken::new();

        let loop_shutdown = shutdown.clone();
        let loop_queue = queue.clone();
        let handle = thread::spawn(move || {
            run(sampler, loop_queue, Duration::from_millis(5), &loop_shutdown);
        });

        thread::sleep(Duration::from_millis(40));
        shutdown.signal();
        handle.join().unwrap();

        assert!(queue.len() >= 2, "expected multiple ticks, got {}", queue.len());
    }
}
