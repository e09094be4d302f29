//! Pause-aware session clock for timestamp rebasing.
//!
//! The drain loop stamps every muxed sample with
//! `wall_clock_micros() - total_paused_micros()` so that paused wall time is
//! squeezed out of the recording. `pause`/`resume` are the only writers of
//! the pause total; the drain loop only reads it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct RecordClock {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    started_at: Instant,
    /// Accumulated pause time in microseconds, excluding a pause in progress.
    total_paused_micros: AtomicU64,
    /// Wall-clock micros at which the current pause began; meaningless
    /// unless `paused` is set.
    pause_started_micros: AtomicU64,
    paused: AtomicBool,
}

impl RecordClock {
    /// Starts the session clock at the current instant.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                started_at: Instant::now(),
                total_paused_micros: AtomicU64::new(0),
                pause_started_micros: AtomicU64::new(0),
                paused: AtomicBool::new(false),
            }),
        }
    }

    /// Microseconds since the session clock started.
    pub fn wall_clock_micros(&self) -> u64 {
        self.inner.started_at.elapsed().as_micros() as u64
    }

    /// Total completed pause time. A pause still in progress is not counted
    /// until `resume()`.
    pub fn total_paused_micros(&self) -> u64 {
        self.inner.total_paused_micros.load(Ordering::Acquire)
    }

    /// Wall clock with pause time removed; the timebase of muxed samples.
    pub fn media_time_micros(&self) -> u64 {
        self.wall_clock_micros()
            .saturating_sub(self.total_paused_micros())
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Marks the start of a pause. A second `pause()` without an intervening
    /// `resume()` is ignored.
    pub fn pause(&self) {
        if self
            .inner
            .paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner
                .pause_started_micros
                .store(self.wall_clock_micros(), Ordering::Release);
            log::debug!("[CLOCK] paused at {}us", self.wall_clock_micros());
        }
    }

    /// Ends the current pause and folds its duration into the total.
    pub fn resume(&self) {
        if self
            .inner
            .paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let started = self.inner.pause_started_micros.load(Ordering::Acquire);
            let paused_for = self.wall_clock_micros().saturating_sub(started);
            self.inner
                .total_paused_micros
                .fetch_add(paused_for, Ordering::AcqRel);
            log::debug!("[CLOCK] resumed, pause lasted {}us", paused_for);
        }
    }
}

impl Default for RecordClock {
    fn default() -> Self {
        Self::new()
    }
}
