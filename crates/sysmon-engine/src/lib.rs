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

//! Thread orchestration (spec §5): spawns the sampler, writer, and
//! maintenance workers as native `std::thread`s sharing one `Store`, one
//! `ShutdownToken`, and a small set of hot-reloadable config fields
//! (spec §9(a)). Everything else in `Config` is fixed for the lifetime of
//! the spawned agent.

mod maintenance;
mod sampler_loop;
mod shutdown;
mod writer_loop;

use std::{
    sync::{Arc, Mutex},
    thread::JoinHandle,
    time::Duration,
};

use maintenance::Reloadable;
pub use shutdown::ShutdownToken;
use sysmon_config::Config;
use sysmon_platform::Sampler;
use sysmon_queue::IngressQueue;
use sysmon_store::Store;
use sysmon_types::{Notifier, PlatformAdapter, Sample};
use sysmon_writer::{BatchWriter, WriterConfig};

/// Errors raised while spawning or running an agent.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The supplied config failed validation.
    #[error(transparent)]
    Config(#[from] sysmon_config::Error),

    /// The store could not be opened.
    #[error(transparent)]
    Store(#[from] sysmon_store::Error),
}

/// A running agent: the three spec §5 worker threads plus the handles
/// needed to query the store, reload config, and shut down cleanly.
pub struct Handle {
    shutdown: ShutdownToken,
    reloadable: Arc<Mutex<Reloadable>>,
    store: Store,
    sampler_thread: Option<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<()>>,
    maintenance_thread: Option<JoinHandle<()>>,
}

impl Handle {
    /// The shared store. Safe to query concurrently from the calling
    /// thread (e.g. to serve an export or a status query) while the
    /// worker threads keep running.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Applies the spec §9(a) conservative reload: thresholds, rule
    /// cooldown, and forecast horizon take effect on the maintenance
    /// thread's next tick. Cadence, db path, feature windows, and model
    /// hyperparameters are not reloadable; a changed value there is
    /// silently ignored by the running agent (a restart is required).
    pub fn reload(&self, new: &Config) {
        let mut reloadable = self.reloadable.lock().unwrap_or_else(|p| p.into_inner());
        *reloadable = Reloadable::from_config(new);
    }

    /// Signals all three worker threads to stop and joins them in the
    /// order spec §5 describes: the sampler finishes its current tick,
    /// the writer performs one final bounded flush, and the maintenance
    /// thread exits at its next sleep wakeup. No in-flight store
    /// transaction is aborted.
    pub fn shutdown(mut self) {
        self.shutdown.signal();
        if let Some(t) = self.sampler_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.writer_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.maintenance_thread.take() {
            let _ = t.join();
        }
    }
}

/// Spawns a full agent: validates `config`, opens the store, and starts
/// the sampler, writer, and maintenance threads (spec §5).
pub fn spawn(
    config: Config,
    host: impl Into<String>,
    platform: Box<dyn PlatformAdapter>,
    notifier: Box<dyn Notifier>,
) -> Result<Handle, Error> {
    config.validate_sections()?;
    let host = host.into();

    let store = Store::open(&config.storage.db_path, config.storage.wal_checkpoint_interval)?;
    let queue = Arc::new(IngressQueue::<Sample>::new(config.sampling.max_queue_size));
    let shutdown = ShutdownToken::new();
    let reloadable = Arc::new(Mutex::new(Reloadable::from_config(&config)));

    let sampler = Sampler::new(host.clone(), platform);
    let writer_config = WriterConfig { batch_size: config.sampling.batch_size, ..WriterConfig::default() };
    let writer = BatchWriter::new(queue.clone(), store.clone(), writer_config);
    let worker = maintenance::Worker::new(&config, store.clone(), notifier, reloadable.clone()).with_host(host);

    let rate = Duration::from_secs_f64(config.sampling.rate_seconds.max(0.01));

    let sampler_shutdown = shutdown.clone();
    let sampler_thread = std::thread::Builder::new()
        .name("sysmon-sampler".to_string())
        .spawn(move || sampler_loop::run(sampler, queue, rate, &sampler_shutdown))
        .expect("failed to spawn sampler thread");

    let writer_shutdown = shutdown.clone();
    let writer_thread = std::thread::Builder::new()
        .name("sysmon-writer".to_string())
        .spawn(move || writer_loop::run(&writer, &writer_shutdown))
        .expect("failed to spawn writer thread");

    let maintenance_shutdown = shutdown.clone();
    let maintenance_thread = std::thread::Builder::new()
        .name("sysmon-maintenance".to_string())
        .spawn(move || maintenance::run(worker, &maintenance_shutdown))
        .expect("failed to spawn maintenance thread");

    Ok(Handle {
        shutdown,
        reloadable,
        store,
        sampler_thread: Some(sampler_thread),
        writer_thread: Some(writer_thread),
        maintenance_thread: Some(maintenance_thread),
    })
}
