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

//! The platform sampler (spec §4.A) and rate deriver (spec §4.B): turns a
//! `PlatformAdapter` read into a `Sample`, deriving per-second rates from
//! monotonically increasing byte counters.

mod rate;
mod sysinfo_adapter;

pub use rate::RateDeriver;
pub use sysinfo_adapter::SysinfoPlatformAdapter;
use sysmon_types::{PlatformAdapter, RawCounters, Sample, SamplerError};

/// Reads one `Sample` per call to `sample_once`, deriving rates with a
/// `RateDeriver` per byte-counter stream. The drift-correcting tick timer
/// itself is a scheduling concern and lives in `sysmon-engine`; this type
/// only does the one-shot "read counters, build a Sample" work.
pub struct Sampler {
    host: String,
    adapter: Box<dyn PlatformAdapter>,
    disk_read: RateDeriver,
    disk_write: RateDeriver,
    net_up: RateDeriver,
    net_down: RateDeriver,
}

impl Sampler {
    /// Creates a new sampler for `host`, reading counters through `adapter`.
    pub fn new(host: impl Into<String>, adapter: Box<dyn PlatformAdapter>) -> Self {
        Self {
            host: host.into(),
            adapter,
            disk_read: RateDeriver::new(),
            disk_write: RateDeriver::new(),
            net_up: RateDeriver::new(),
            net_down: RateDeriver::new(),
        }
    }

    /// Performs one sampling tick at wall-clock second `now`.
    ///
    /// A transient read error (a single counter unavailable) is not
    /// propagated: the corresponding `Sample` field is absent and a
    /// warning is logged. A full failure (`SamplerError`, no counter could
    /// be read at all) is propagated so the caller can drop the tick.
    pub fn sample_once(&mut self, now: i64) -> Result<Sample, SamplerError> {
        let counters = self.adapter.read_counters(now)?;
        Ok(self.build_sample(now, &counters))
    }

    fn build_sample(&mut self, now: i64, counters: &RawCounters) -> Sample {
        if counters.cpu_pct.is_none() {
            tracing::warn!(host = %self.host, ts = now, "cpu_pct unavailable this tick");
        }
        if counters.mem_pct.is_none() {
            tracing::warn!(host = %self.host, ts = now, "mem_pct unavailable this tick");
        }

        let disk_read_bps = self.disk_read.derive_from_counter(counters.disk_read_bytes, now);
        let disk_write_bps = self.disk_write.derive_from_counter(counters.disk_write_bytes, now);
        let net_up_bps = self.net_up.derive_from_counter(counters.net_up_bytes, now);
        let net_down_bps = self.net_down.derive_from_counter(counters.net_down_bytes, now);

        Sample {
            ts: now,
            host: self.host.clone(),
            cpu_pct: counters.cpu_pct.unwrap_or(0.0),
            mem_pct: counters.mem_pct.unwrap_or(0.0),
            disk_read_bps,
            disk_write_bps,
            net_up_bps,
            net_down_bps,
            swap_pct: counters.swap_pct.unwrap_or(0.0),
            proc_count: counters.proc_count.unwrap_or(0),
            cpu_temp: counters.cpu_temp,
        }
    }
}
