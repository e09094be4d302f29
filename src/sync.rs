//! Blocking rendezvous primitives shared by the pipeline and encoder.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// A one-way latch: starts closed, opens once, and every `block()` after
/// that returns immediately. Used for "resources ready" and teardown
/// confirmations between the control thread and the worker threads.
#[derive(Clone)]
pub struct SignalFlag {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl SignalFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                open: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Opens the latch and wakes all waiters.
    pub fn open(&self) {
        let mut open = self.inner.open.lock();
        *open = true;
        self.inner.condvar.notify_all();
    }

    /// Resets the latch to closed.
    pub fn close(&self) {
        *self.inner.open.lock() = false;
    }

    /// Blocks until the latch is open.
    pub fn block(&self) {
        let mut open = self.inner.open.lock();
        while !*open {
            self.inner.condvar.wait(&mut open);
        }
    }

    /// Blocks until the latch is open or the timeout expires. Returns true
    /// when the latch opened in time.
    pub fn block_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut open = self.inner.open.lock();
        while !*open {
            if self.inner.condvar.wait_until(&mut open, deadline).timed_out() {
                break;
            }
        }
        *open
    }

    pub fn is_open(&self) -> bool {
        *self.inner.open.lock()
    }
}

impl Default for SignalFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts written frames and lets callers block until the first one lands.
#[derive(Clone)]
pub struct FrameGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    count: Mutex<u64>,
    condvar: Condvar,
}

impl FrameGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                count: Mutex::new(0),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn increment(&self) {
        let mut count = self.inner.count.lock();
        *count += 1;
        self.inner.condvar.notify_all();
    }

    pub fn count(&self) -> u64 {
        *self.inner.count.lock()
    }

    /// Blocks until at least one frame has been counted or the timeout
    /// expires. Returns the count observed on wake-up.
    pub fn wait_for_first(&self, timeout: Duration) -> u64 {
        let deadline = std::time::Instant::now() + timeout;
        let mut count = self.inner.count.lock();
        while *count == 0 {
            if self.inner.condvar.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        *count
    }
}

impl Default for FrameGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_opens_across_threads() {
        let flag = SignalFlag::new();
        let worker_flag = flag.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            worker_flag.open();
        });
        flag.block();
        assert!(flag.is_open());
        handle.join().unwrap();
    }

    #[test]
    fn test_block_after_open_returns_immediately() {
        let flag = SignalFlag::new();
        flag.open();
        flag.block();
        flag.block();
    }

    #[test]
    fn test_block_timeout_expires() {
        let flag = SignalFlag::new();
        assert!(!flag.block_timeout(Duration::from_millis(10)));
        flag.open();
        assert!(flag.block_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_frame_gate_counts() {
        let gate = FrameGate::new();
        assert_eq!(gate.count(), 0);
        let worker_gate = gate.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            worker_gate.increment();
        });
        let seen = gate.wait_for_first(Duration::from_secs(5));
        assert!(seen >= 1);
        handle.join().unwrap();
    }
}
