//! This module contains the (synthetic) capture logic.
//!
//! Real deployments feed the exchange from a radio front end. Here a tone
//! generator does one thing: fill spent buffers with IQ samples as fast as the
//! configured sample rate would, and push them back to the processing loop.

use std::{
    f64::consts::TAU,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use tracing::{debug, info};

use crate::{exchange::Acquisition, packet::SamplePacket};

// How long to wait on the pool before checking whether we should stop
const POOL_TIMEOUT: Duration = Duration::from_millis(100);

/// Complex exponential at a fixed offset from the center frequency
#[derive(Debug, Clone)]
pub struct ToneSource {
    center: u64,
    sample_rate: u32,
    offset_hz: f64,
    amplitude: f32,
    phase: f64,
}

impl ToneSource {
    pub fn new(center: u64, sample_rate: u32, offset_hz: f64, amplitude: f32) -> Self {
        Self {
            center,
            sample_rate,
            offset_hz,
            amplitude,
            phase: 0.0,
        }
    }

    pub fn center(&self) -> u64 {
        self.center
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Overwrite `packet` with the next block of the tone. Phase carries over
    /// between blocks.
    pub fn fill(&mut self, packet: &mut SamplePacket) {
        let step = TAU * self.offset_hz / self.sample_rate as f64;
        let (re, im) = packet.samples_mut();
        for (r, i) in re.iter_mut().zip(im.iter_mut()) {
            *r = self.amplitude * self.phase.cos() as f32;
            *i = self.amplitude * self.phase.sin() as f32;
            self.phase = (self.phase + step) % TAU;
        }
        packet.set_frequency(self.center);
        packet.set_sample_rate(self.sample_rate);
    }

    /// Wall-clock time a block of `size` samples spans at this sample rate
    pub fn block_duration(&self, size: usize) -> Duration {
        Duration::from_secs_f64(size as f64 / self.sample_rate.max(1) as f64)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub produced: u64,
    /// Blocks overwritten because the loop hadn't taken the previous one
    pub overflows: u64,
}

/// Keep the exchange fed until `running` goes false
pub fn run_tone_source(
    acq: Acquisition,
    mut source: ToneSource,
    running: &AtomicBool,
    interval: Duration,
) -> CaptureStats {
    let mut stats = CaptureStats::default();
    // A filled block the loop had no room for, refilled instead of pulling another
    let mut spare: Option<SamplePacket> = None;
    info!(
        center = source.center(),
        sample_rate = source.sample_rate(),
        "Tone source started"
    );
    while running.load(Ordering::SeqCst) {
        let mut packet = match spare.take().or_else(|| acq.take_empty(POOL_TIMEOUT)) {
            Some(p) => p,
            // Keep truckin, the loop will give buffers back eventually
            None => continue,
        };
        source.fill(&mut packet);
        match acq.submit(packet) {
            Ok(()) => stats.produced += 1,
            Err(packet) => {
                stats.overflows += 1;
                debug!("Input queue full, overwriting block");
                spare = Some(packet);
            }
        }
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
    info!(
        produced = stats.produced,
        overflows = stats.overflows,
        "Tone source stopped"
    );
    stats
}
