#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results,
    variant_size_differences
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! sysmon is a single-host, always-on resource monitoring agent: it
//! samples CPU, memory, disk, network, swap, and process-count metrics on
//! a fixed cadence, persists them to an embedded store, flags anomalous
//! behaviour with a calibrated isolation forest, projects time-to-
//! threshold with a per-metric regressor, and raises cooldown-gated
//! alerts through a pluggable notifier.
//!
//! The pipeline is three long-running threads sharing one store and one
//! shutdown signal: a sampler, a batch writer, and a maintenance worker
//! that trains models, scores recent history, and evaluates rules. See
//! `sysmon_engine::spawn` for the entry point.

pub use sysmon_anomaly as anomaly;
pub use sysmon_config as config;
pub use sysmon_engine as engine;
pub use sysmon_features as features;
pub use sysmon_forecast as forecast;
pub use sysmon_platform as platform;
pub use sysmon_queue as queue;
pub use sysmon_rules as rules;
pub use sysmon_store as store;
pub use sysmon_types as types;
pub use sysmon_writer as writer;
