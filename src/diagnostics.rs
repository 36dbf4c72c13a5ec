//! Where problems go. Fatal conditions are plain `Err` returns; everything else funnels through
//! this sink so that a phase can accumulate errors and fail once at its end, warnings fire at
//! most once, and symbol-trace output has a single home.

use crate::Error;
use crate::Result;
use crossbeam_queue::SegQueue;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Default)]
pub struct Diagnostics {
    errors: SegQueue<Error>,
    warned: Mutex<hashbrown::HashSet<String>>,
}

impl Diagnostics {
    /// Records a non-fatal error. The phase that owns the current pass should call
    /// `take_result` before moving on.
    pub(crate) fn error(&self, error: Error) {
        tracing::error!("{error:#}");
        self.errors.push(error);
    }

    /// Fails if any errors were recorded since the last call. Only the first error is returned;
    /// the rest were already logged.
    pub fn take_result(&self) -> Result {
        let first = self.errors.pop();
        while self.errors.pop().is_some() {}
        match first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Emits a warning, suppressing repeats with the same key.
    pub(crate) fn warn_once(&self, key: &str, message: impl std::fmt::Display) {
        let mut warned = self.warned.lock().unwrap();
        if warned.insert(key.to_owned()) {
            tracing::warn!("{message}");
        }
    }

    /// Reports a `--trace-symbol` event.
    pub(crate) fn trace(&self, message: impl std::fmt::Display) {
        tracing::info!(target: "trace-symbol", "{message}");
    }
}

/// Installs a fmt subscriber filtered by the usual environment variable. Embedders that already
/// have a subscriber should skip this.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init();
}
