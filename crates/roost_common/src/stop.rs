//! Interruptible stop signal for background scan threads.
//!
//! The liveness monitor and event drain sleep between sweeps; a bare
//! `thread::sleep` would hold shutdown hostage for a full interval. This
//! Condvar-backed signal wakes sleepers within milliseconds of `stop()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A cooperative stop signal shared between a control plane and its
/// background threads. Cloning shares the underlying state.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

struct StopInner {
    stopped: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Request stop. Wakes all waiters immediately.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.condvar.notify_all();
    }

    /// Non-blocking check.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for at most `interval`, waking early on `stop()`. Returns true
    /// when the caller should exit its loop.
    pub fn sleep(&self, interval: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        let guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        let (_guard, _timed_out) = self
            .inner
            .condvar
            .wait_timeout(guard, interval)
            .unwrap_or_else(|e| e.into_inner());
        self.is_stopped()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_fresh_signal_not_stopped() {
        let sig = StopSignal::new();
        assert!(!sig.is_stopped());
    }

    #[test]
    fn test_sleep_returns_immediately_after_stop() {
        let sig = StopSignal::new();
        sig.stop();
        let start = Instant::now();
        assert!(sig.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_sleep_wakes_on_concurrent_stop() {
        let sig = StopSignal::new();
        let sig2 = sig.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let stopped = sig2.sleep(Duration::from_secs(10));
            (stopped, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        sig.stop();
        let (stopped, elapsed) = handle.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_expires_without_stop() {
        let sig = StopSignal::new();
        assert!(!sig.sleep(Duration::from_millis(10)));
    }
}
