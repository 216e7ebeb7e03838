//! CSV and JSON export (spec §6.5).

use sysmon_types::Sample;

use crate::Error;

const HEADER: &str =
    "ts,host,cpu_pct,mem_pct,disk_read_bps,disk_write_bps,net_up_bps,net_down_bps,swap_pct,proc_count,cpu_temp";

pub(crate) fn to_csv(samples: &[Sample]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for s in samples {
        let cpu_temp = s.cpu_temp.map(|t| t.to_string()).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{}\n",
            s.ts,
            s.host,
            s.cpu_pct,
            s.mem_pct,
            s.disk_read_bps,
            s.disk_write_bps,
            s.net_up_bps,
            s.net_down_bps,
            s.swap_pct,
            s.proc_count,
            cpu_temp,
        ));
    }
    out
}

pub(crate) fn to_json(samples: &[Sample]) -> Result<String, Error> {
    serde_json::to_string(samples).map_err(|err| Error::Fatal { reason: err.to_string() })
}
