//! Reference `PlatformAdapter` implementation (spec §6.2) built on the
//! `sysinfo` crate, the same crate `otap-dataflow`'s `controller` and
//! `perf_exporter` crates use for self-observation. Platform-specific
//! sensor access beyond what `sysinfo` exposes is out of scope.

use sysinfo::{Components, Disks, Networks, System};
use sysmon_types::{PlatformAdapter, RawCounters, SamplerError};

/// A `PlatformAdapter` that reads CPU, memory, swap, process count, disk
/// I/O, network I/O, and (best-effort) CPU temperature through `sysinfo`.
pub struct SysinfoPlatformAdapter {
    system: System,
    disks: Disks,
    networks: Networks,
    components: Components,
}

impl SysinfoPlatformAdapter {
    /// Creates a new adapter, performing the first (throwaway) refresh
    /// `sysinfo` requires before its counters are meaningful.
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self {
            system,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoPlatformAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for SysinfoPlatformAdapter {
    fn read_counters(&mut self, _now: i64) -> Result<RawCounters, SamplerError> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        self.disks.refresh();
        self.networks.refresh();
        self.components.refresh();

        let cpu_pct = Some(self.system.global_cpu_usage() as f64);
        let total_mem = self.system.total_memory();
        let mem_pct = if total_mem > 0 {
            Some(self.system.used_memory() as f64 / total_mem as f64 * 100.0)
        } else {
            None
        };
        let total_swap = self.system.total_swap();
        let swap_pct = if total_swap > 0 {
            Some(self.system.used_swap() as f64 / total_swap as f64 * 100.0)
        } else {
            None
        };
        let proc_count = Some(self.system.processes().len() as u32);

        let (disk_read_bytes, disk_write_bytes) = self
            .disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(read, write), disk| {
                let usage = disk.usage();
                (read + usage.total_read_bytes, write + usage.total_written_bytes)
            });

        let (net_up_bytes, net_down_bytes) =
            self.networks
                .iter()
                .fold((0u64, 0u64), |(up, down), (_name, data)| {
                    (up + data.total_transmitted(), down + data.total_received())
                });

        let cpu_temp = self
            .components
            .iter()
            .find(|c| c.label().to_lowercase().contains("cpu"))
            .map(|c| c.temperature() as f64);

        if cpu_pct.is_none() && mem_pct.is_none() {
            return Err(SamplerError::Unavailable {
                reason: "sysinfo returned neither cpu nor memory counters".to_string(),
            });
        }

        Ok(RawCounters {
            cpu_pct,
            mem_pct,
            swap_pct,
            proc_count,
            disk_read_bytes: Some(disk_read_bytes),
            disk_write_bytes: Some(disk_write_bytes),
            net_up_bytes: Some(net_up_bytes),
            net_down_bytes: Some(net_down_bytes),
            cpu_temp,
        })
    }
}
