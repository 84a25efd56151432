//! In this module we keep the runtime stats of the processing loop.
//! Counters are plain atomics so the UI or a logging thread can read them
//! while the loop is running, without ever making the loop wait.

use std::{
    fmt,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use crate::rate::{RateState, DEFAULT_FRAME_RATE};

#[derive(Debug)]
pub struct LoopMonitor {
    frames: AtomicU64,
    starved: AtomicU64,
    overruns: AtomicU64,
    rejected: AtomicU64,
    dropped_returns: AtomicU64,
    frame_rate: AtomicU32,
    // f64 bits
    load: AtomicU64,
}

impl Default for LoopMonitor {
    fn default() -> Self {
        Self {
            frames: AtomicU64::new(0),
            starved: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dropped_returns: AtomicU64::new(0),
            frame_rate: AtomicU32::new(DEFAULT_FRAME_RATE),
            load: AtomicU64::new(0f64.to_bits()),
        }
    }
}

impl LoopMonitor {
    pub(crate) fn frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn starved(&self) {
        self.starved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped_return(&self) {
        self.dropped_returns.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the controller state for readers on other threads
    pub(crate) fn publish(&self, state: RateState) {
        self.frame_rate.store(state.frame_rate, Ordering::Relaxed);
        self.load.store(state.load.to_bits(), Ordering::Relaxed);
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate.load(Ordering::Relaxed)
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.load.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> LoopStats {
        LoopStats {
            frames: self.frames.load(Ordering::Relaxed),
            starved: self.starved.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped_returns: self.dropped_returns.load(Ordering::Relaxed),
            frame_rate: self.frame_rate(),
            load: self.load(),
        }
    }
}

/// Point-in-time copy of the loop counters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoopStats {
    /// Frames delivered to the sink
    pub frames: u64,
    /// Polls that timed out with no input
    pub starved: u64,
    /// Frames that used up their whole budget
    pub overruns: u64,
    /// Packets that could not be transformed
    pub rejected: u64,
    /// Packets the return queue had no room for
    pub dropped_returns: u64,
    pub frame_rate: u32,
    pub load: f64,
}

impl fmt::Display for LoopStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames @ {} fps (load {:.2}), {} starved, {} overruns, {} rejected, {} dropped returns",
            self.frames,
            self.frame_rate,
            self.load,
            self.starved,
            self.overruns,
            self.rejected,
            self.dropped_returns
        )
    }
}
