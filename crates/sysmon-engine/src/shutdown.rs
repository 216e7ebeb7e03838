//! A single shutdown token shared by all three worker threads (spec §5).

use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

/// Cooperative shutdown signal. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct ShutdownToken {
    signalled: Arc<Mutex<bool>>,
    condvar: Arc<Condvar>,
}

impl ShutdownToken {
    /// Creates a new, unset token.
    pub fn new() -> Self {
        Self {
            signalled: Arc::new(Mutex::new(false)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Signals shutdown and wakes any thread sleeping in `wait_timeout`.
    pub fn signal(&self) {
        let mut signalled = self.signalled.lock().unwrap_or_else(|poison| poison.into_inner());
        *signalled = true;
        self.condvar.notify_all();
    }

    /// Whether shutdown has been signalled.
    pub fn is_set(&self) -> bool {
        *self.signalled.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Sleeps for up to `timeout`, waking early if shutdown is signalled.
    /// Returns whether shutdown was observed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let signalled = self.signalled.lock().unwrap_or_else(|poison| poison.into_inner());
        let (signalled, _timeout_result) = self
            .condvar
            .wait_timeout_while(signalled, timeout, |s| !*s)
            .unwrap_or_else(|poison| poison.into_inner());
        *signalled
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}
