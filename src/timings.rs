//! Latency probes for the hot path, compiled in only with the `timings` feature.

use std::future::Future;

#[cfg(feature = "timings")]
mod probe {
    use std::time::Instant;

    /// Logs the time between creation and drop on the `timings` target.
    pub(super) struct Probe {
        label: &'static str,
        started: Instant,
    }

    impl Probe {
        pub(super) fn start(label: &'static str) -> Self {
            Self {
                label,
                started: Instant::now(),
            }
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            let elapsed_us = self.started.elapsed().as_secs_f64() * 1e6;
            tracing::info!(target: "timings", label = self.label, elapsed_us);
        }
    }
}

#[cfg(feature = "timings")]
pub(crate) fn time_block<T>(label: &'static str, f: impl FnOnce() -> T) -> T {
    let _probe = probe::Probe::start(label);
    f()
}

#[cfg(not(feature = "timings"))]
pub(crate) fn time_block<T>(_label: &'static str, f: impl FnOnce() -> T) -> T {
    f()
}

/// Await `fut` under a probe; used for the signed order round-trip.
#[cfg(feature = "timings")]
pub(crate) async fn time_async_block<T>(label: &'static str, fut: impl Future<Output = T>) -> T {
    let _probe = probe::Probe::start(label);
    fut.await
}

#[cfg(not(feature = "timings"))]
pub(crate) async fn time_async_block<T>(_label: &'static str, fut: impl Future<Output = T>) -> T {
    fut.await
}
