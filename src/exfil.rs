//! This module is responsible for getting finished frames out of the loop
//! and into whatever draws them.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info};

/// Consumer of magnitude frames (the waterfall / spectrum display).
///
/// `draw` is called synchronously from the processing loop and its run time
/// counts against the frame budget. `mag` is only valid for the duration of
/// the call; copy it to keep it.
pub trait FrameSink: Send {
    fn draw(&mut self, mag: &[f32], frequency: u64, sample_rate: u32, frame_rate: u32, load: f64);
}

impl<F> FrameSink for F
where
    F: FnMut(&[f32], u64, u32, u32, f64) + Send,
{
    fn draw(&mut self, mag: &[f32], frequency: u64, sample_rate: u32, frame_rate: u32, load: f64) {
        self(mag, frequency, sample_rate, frame_rate, load)
    }
}

/// An owned copy of everything handed to a sink for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub magnitudes: Vec<f32>,
    pub frequency: u64,
    pub sample_rate: u32,
    pub frame_rate: u32,
    pub load: f64,
}

impl Frame {
    /// Absolute frequency (Hz) of recentered bin `idx`
    pub fn bin_frequency(&self, idx: usize) -> f64 {
        bin_frequency(idx, self.magnitudes.len(), self.frequency, self.sample_rate)
    }
}

/// Absolute frequency of a bin in a recentered frame of `size` bins
pub fn bin_frequency(idx: usize, size: usize, center: u64, sample_rate: u32) -> f64 {
    let offset = idx as f64 - (size / 2) as f64;
    center as f64 + offset * sample_rate as f64 / size as f64
}

/// Hands copies of frames to another thread through a short queue.
///
/// Delivery never blocks: when the renderer hasn't caught up the frame is
/// dropped and counted, so a slow renderer can't stall the loop.
pub struct ChannelSink {
    sender: Sender<Frame>,
    dropped: u64,
}

/// Build a channel sink holding at most `depth` undelivered frames
pub fn channel_sink(depth: usize) -> (ChannelSink, Receiver<Frame>) {
    let (sender, receiver) = bounded(depth.max(1));
    (ChannelSink { sender, dropped: 0 }, receiver)
}

impl ChannelSink {
    /// Frames thrown away because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for ChannelSink {
    fn draw(&mut self, mag: &[f32], frequency: u64, sample_rate: u32, frame_rate: u32, load: f64) {
        let frame = Frame {
            magnitudes: mag.to_vec(),
            frequency,
            sample_rate,
            frame_rate,
            load,
        };
        // We don't care if this errors, the renderer just misses a frame
        match self.sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                debug!(dropped = self.dropped, "Renderer behind, dropping frame");
            }
        }
    }
}

/// Strongest bin of a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub bin: usize,
    /// Absolute frequency in Hz
    pub frequency: f64,
    pub db: f32,
}

/// Find the strongest bin of a recentered frame
pub fn find_peak(mag: &[f32], center: u64, sample_rate: u32) -> Option<Peak> {
    let (bin, &db) = mag
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    Some(Peak {
        bin,
        frequency: bin_frequency(bin, mag.len(), center, sample_rate),
        db,
    })
}

/// A headless "display" that logs the strongest signal every `every` frames
pub struct PeakReporter {
    every: u64,
    seen: u64,
    last: Option<Peak>,
}

impl PeakReporter {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            seen: 0,
            last: None,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.seen
    }

    pub fn last_peak(&self) -> Option<Peak> {
        self.last
    }
}

impl FrameSink for PeakReporter {
    fn draw(&mut self, mag: &[f32], frequency: u64, sample_rate: u32, frame_rate: u32, load: f64) {
        self.seen += 1;
        self.last = find_peak(mag, frequency, sample_rate);
        if self.seen % self.every != 0 {
            return;
        }
        if let Some(peak) = self.last {
            info!(
                "Peak {:.3} MHz at {:.1} dB ({} fps, load {:.2})",
                peak.frequency / 1e6,
                peak.db,
                frame_rate,
                load
            );
        }
    }
}
