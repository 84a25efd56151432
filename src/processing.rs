//! The analyzer processing loop.
//!
//! Pulls sample packets off the exchange, turns each one into a magnitude
//! frame, hands it to the sink and then sleeps whatever is left of the frame
//! budget. The rate controller trades frame rate for headroom so that every
//! frame covers (roughly) the same wall-clock time, which keeps the time axis
//! of a waterfall linear no matter how fast the host is.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use tracing::{debug, info, trace, warn};

use crate::{
    config::AnalyzerConfig,
    error::ConfigError,
    exchange::{Exchange, Interrupter, Poll},
    exfil::FrameSink,
    f_engine::SpectralTransform,
    monitoring::{LoopMonitor, LoopStats},
    rate::{Pacing, RateController, RateState},
};

/// What one pass through the loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A frame went out to the sink
    Frame,
    /// A packet came in but couldn't be transformed
    Rejected,
    /// No input within the frame budget
    Starved,
    /// Asked to stop while waiting for input, or the producer went away
    Stopped,
}

// Settings pushed from other threads, applied at the next iteration boundary
#[derive(Debug)]
struct Shared {
    stop_requested: AtomicBool,
    dynamic: AtomicBool,
    // 0 means "nothing pending"
    requested_rate: AtomicU32,
    monitor: LoopMonitor,
}

/// Thread-safe remote for a processing loop
#[derive(Clone)]
pub struct LoopControl {
    shared: Arc<Shared>,
    interrupter: Interrupter,
}

impl LoopControl {
    /// Ask the loop to stop. It finishes the frame in flight; a loop waiting
    /// on input wakes up right away.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.interrupter.interrupt();
    }

    pub fn is_running(&self) -> bool {
        !self.shared.stop_requested.load(Ordering::SeqCst)
    }

    /// Frame rate as of the last finished frame
    pub fn frame_rate(&self) -> u32 {
        self.shared.monitor.frame_rate()
    }

    /// Request a new frame rate. Clamped into the configured bounds when applied.
    pub fn set_frame_rate(&self, frame_rate: u32) {
        self.shared
            .requested_rate
            .store(frame_rate.max(1), Ordering::SeqCst);
    }

    pub fn load(&self) -> f64 {
        self.shared.monitor.load()
    }

    pub fn is_dynamic_frame_rate(&self) -> bool {
        self.shared.dynamic.load(Ordering::SeqCst)
    }

    pub fn set_dynamic_frame_rate(&self, dynamic: bool) {
        self.shared.dynamic.store(dynamic, Ordering::SeqCst);
    }

    pub fn stats(&self) -> LoopStats {
        self.shared.monitor.snapshot()
    }
}

/// Sets the stop flag however `run` exits, panicking sinks included
struct StopOnExit<'a>(&'a AtomicBool);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct ProcessingLoop<S> {
    transform: SpectralTransform,
    rate: RateController,
    exchange: Exchange,
    sink: S,
    control: LoopControl,
}

impl<S: FrameSink> ProcessingLoop<S> {
    /// Build a stopped loop. Fails only on invalid configuration.
    pub fn new(config: &AnalyzerConfig, exchange: Exchange, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let transform = SpectralTransform::new(config.fft_size, config.window)?;
        let rate = RateController::from_config(config)?;
        let monitor = LoopMonitor::default();
        monitor.publish(rate.state());
        let control = LoopControl {
            shared: Arc::new(Shared {
                stop_requested: AtomicBool::new(true),
                dynamic: AtomicBool::new(rate.is_dynamic()),
                requested_rate: AtomicU32::new(0),
                monitor,
            }),
            interrupter: exchange.interrupter(),
        };
        Ok(Self {
            transform,
            rate,
            exchange,
            sink,
            control,
        })
    }

    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    pub fn fft_size(&self) -> usize {
        self.transform.fft_size()
    }

    pub fn frame_rate(&self) -> u32 {
        self.rate.frame_rate()
    }

    pub fn set_frame_rate(&mut self, frame_rate: u32) -> u32 {
        let applied = self.rate.set_frame_rate(frame_rate);
        self.control.shared.monitor.publish(self.rate.state());
        applied
    }

    pub fn is_dynamic_frame_rate(&self) -> bool {
        self.rate.is_dynamic()
    }

    pub fn set_dynamic_frame_rate(&mut self, dynamic: bool) {
        self.rate.set_dynamic(dynamic);
        self.control.shared.dynamic.store(dynamic, Ordering::SeqCst);
    }

    /// Lowest and highest frame rate the controller may pick
    pub fn frame_rate_bounds(&self) -> (u32, u32) {
        self.rate.bounds()
    }

    /// Narrow or widen the frame rate range. The current rate is clamped into
    /// the new range.
    pub fn set_frame_rate_bounds(&mut self, min: u32, max: u32) -> Result<(), ConfigError> {
        self.rate.set_bounds(min, max)?;
        self.control.shared.monitor.publish(self.rate.state());
        Ok(())
    }

    /// Load thresholds (low, high) of the hysteresis band
    pub fn thresholds(&self) -> (f64, f64) {
        self.rate.thresholds()
    }

    pub fn set_thresholds(&mut self, low: f64, high: f64) -> Result<(), ConfigError> {
        self.rate.set_thresholds(low, high)?;
        self.control.shared.monitor.publish(self.rate.state());
        Ok(())
    }

    pub fn rate_state(&self) -> RateState {
        self.rate.state()
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run on a dedicated thread. The loop reports running as soon as this
    /// returns.
    pub fn start(mut self) -> io::Result<LoopHandle<S>>
    where
        S: 'static,
    {
        let control = self.control();
        self.arm();
        let spawned = thread::Builder::new()
            .name("analyzer-processing".to_owned())
            .spawn(move || {
                self.run_until_stopped();
                self
            });
        match spawned {
            Ok(thread) => Ok(LoopHandle { control, thread }),
            Err(e) => {
                control.shared.stop_requested.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Run on the calling thread until stopped
    pub fn run(&mut self) {
        self.arm();
        self.run_until_stopped();
    }

    // Clear the stop flag and any interrupt left over from a previous run
    fn arm(&mut self) {
        self.exchange.clear_interrupts();
        self.control
            .shared
            .stop_requested
            .store(false, Ordering::SeqCst);
    }

    fn run_until_stopped(&mut self) {
        let shared = Arc::clone(&self.control.shared);
        let _exit = StopOnExit(&shared.stop_requested);
        info!(
            fft_size = self.transform.fft_size(),
            pool_capacity = self.exchange.capacity(),
            frame_rate = self.rate.frame_rate(),
            "Processing loop started"
        );
        while !shared.stop_requested.load(Ordering::SeqCst) {
            if self.step() == Step::Stopped {
                break;
            }
        }
        info!(stats = %shared.monitor.snapshot(), "Processing loop stopped");
    }

    /// One iteration: wait for a packet, transform, deliver, pace
    pub fn step(&mut self) -> Step {
        self.apply_requests();
        let shared = &self.control.shared;
        let start = Instant::now();

        let mut packet = match self.exchange.poll_input(self.rate.frame_budget()) {
            Poll::Packet(packet) => packet,
            Poll::Timeout => {
                debug!("Timeout while waiting on input data, skipping");
                shared.monitor.starved();
                return Step::Starved;
            }
            Poll::Interrupted => {
                debug!("Interrupted while waiting on input data, stopping");
                shared.stop_requested.store(true, Ordering::SeqCst);
                return Step::Stopped;
            }
            Poll::Disconnected => {
                info!("Input queue closed, stopping");
                shared.stop_requested.store(true, Ordering::SeqCst);
                return Step::Stopped;
            }
        };

        let frequency = packet.frequency();
        let sample_rate = packet.sample_rate();
        let transformed = self.transform.transform(&mut packet);

        if !self.exchange.offer_return(packet) {
            warn!("Return queue full, dropping sample buffer");
            shared.monitor.dropped_return();
        }

        let mag = match transformed {
            Ok(mag) => mag,
            Err(e) => {
                warn!("Skipping packet: {e}");
                shared.monitor.rejected();
                return Step::Rejected;
            }
        };

        self.sink.draw(
            mag,
            frequency,
            sample_rate,
            self.rate.frame_rate(),
            self.rate.load(),
        );

        match self.rate.settle(start.elapsed()) {
            Pacing::Sleep(remaining) => {
                trace!(
                    frame_rate = self.rate.frame_rate(),
                    load = self.rate.load(),
                    "Sleeping {remaining:?}"
                );
                shared.monitor.publish(self.rate.state());
                thread::sleep(remaining);
            }
            Pacing::Overrun => {
                trace!(
                    frame_rate = self.rate.frame_rate(),
                    "Couldn't meet requested frame rate"
                );
                shared.monitor.publish(self.rate.state());
                shared.monitor.overrun();
            }
        }
        shared.monitor.frame();
        Step::Frame
    }

    fn apply_requests(&mut self) {
        let shared = &self.control.shared;
        self.rate.set_dynamic(shared.dynamic.load(Ordering::SeqCst));
        let requested = shared.requested_rate.swap(0, Ordering::SeqCst);
        if requested != 0 {
            let applied = self.rate.set_frame_rate(requested);
            debug!(requested, applied, "Frame rate changed");
            shared.monitor.publish(self.rate.state());
        }
    }
}

/// A loop running on its own thread
pub struct LoopHandle<S> {
    control: LoopControl,
    thread: JoinHandle<ProcessingLoop<S>>,
}

impl<S> LoopHandle<S> {
    pub fn control(&self) -> &LoopControl {
        &self.control
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Wait for the loop thread to exit and take the loop back
    pub fn join(self) -> thread::Result<ProcessingLoop<S>> {
        self.thread.join()
    }

    pub fn stop_and_join(self) -> thread::Result<ProcessingLoop<S>> {
        self.stop();
        self.join()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use super::*;
    use crate::{
        exchange::{buffer_pool, Acquisition},
        exfil::channel_sink,
        packet::SamplePacket,
    };

    type Draws = Arc<Mutex<Vec<(u32, f64)>>>;

    fn config(fft_size: usize, frame_rate: u32) -> AnalyzerConfig {
        AnalyzerConfig {
            fft_size,
            frame_rate,
            ..Default::default()
        }
    }

    fn recording_sink(delay: Duration) -> (impl FrameSink + 'static, Draws) {
        let draws: Draws = Default::default();
        let seen = Arc::clone(&draws);
        let sink = move |_: &[f32], _: u64, _: u32, frame_rate: u32, load: f64| {
            seen.lock().unwrap().push((frame_rate, load));
            thread::sleep(delay);
        };
        (sink, draws)
    }

    fn submit_dc(acq: &Acquisition) {
        let mut packet = acq.try_take_empty().unwrap();
        let (re, im) = packet.samples_mut();
        re.iter_mut().for_each(|x| *x = 1.0);
        im.iter_mut().for_each(|x| *x = 0.0);
        packet.set_frequency(100_000_000);
        packet.set_sample_rate(2_000_000);
        acq.submit(packet).unwrap();
    }

    #[test]
    fn test_invalid_fft_size_refuses_to_build() {
        let (_acq, exchange) = buffer_pool(2, 100);
        let (sink, _) = channel_sink(1);
        assert!(matches!(
            ProcessingLoop::new(&config(100, 10), exchange, sink),
            Err(ConfigError::FftSizeNotPowerOfTwo(100))
        ));
    }

    #[test]
    fn test_frame_is_recentered_and_delivered() {
        let (acq, exchange) = buffer_pool(2, 64);
        let (sink, frames) = channel_sink(4);
        let mut analyzer = ProcessingLoop::new(&config(64, 10), exchange, sink).unwrap();
        assert_eq!(analyzer.fft_size(), 64);
        submit_dc(&acq);

        assert_eq!(analyzer.step(), Step::Frame);
        let frame = frames.try_recv().unwrap();
        assert_eq!(frame.magnitudes.len(), 64);
        let peak = crate::exfil::find_peak(&frame.magnitudes, frame.frequency, frame.sample_rate)
            .unwrap();
        assert_eq!(peak.bin, 32);
        assert_eq!(peak.frequency, 100_000_000.0);
        assert_eq!(frame.frame_rate, 10);
        assert_eq!(frame.load, 0.0);
        // The buffer went straight back to the pool
        assert_eq!(acq.available(), 2);
        // A 64 point FFT is nowhere near 100ms, so the controller speeds up
        assert_eq!(analyzer.frame_rate(), 11);
        assert_eq!(analyzer.control().stats().frames, 1);
    }

    #[test]
    fn test_starvation_leaves_rate_alone() {
        let (_acq, exchange) = buffer_pool(2, 64);
        let (sink, draws) = recording_sink(Duration::ZERO);
        let mut analyzer = ProcessingLoop::new(&config(64, 20), exchange, sink).unwrap();

        for _ in 0..3 {
            assert_eq!(analyzer.step(), Step::Starved);
        }
        let state = analyzer.rate_state();
        assert_eq!(state.frame_rate, 20);
        assert_eq!(state.load, 0.0);
        assert!(draws.lock().unwrap().is_empty());
        assert_eq!(analyzer.control().stats().starved, 3);
    }

    #[test]
    fn test_overrun_saturates_load_and_steps_down() {
        let (acq, exchange) = buffer_pool(2, 64);
        // 150ms in the sink against a 100ms budget
        let (sink, draws) = recording_sink(Duration::from_millis(150));
        let mut analyzer = ProcessingLoop::new(&config(64, 10), exchange, sink).unwrap();
        submit_dc(&acq);
        submit_dc(&acq);

        assert_eq!(analyzer.step(), Step::Frame);
        assert_eq!(analyzer.frame_rate(), 9);
        assert_eq!(analyzer.rate_state().load, 1.0);

        assert_eq!(analyzer.step(), Step::Frame);
        assert_eq!(*draws.lock().unwrap(), vec![(10, 0.0), (9, 1.0)]);
        assert_eq!(analyzer.frame_rate(), 8);
        assert_eq!(analyzer.control().stats().overruns, 2);
    }

    #[test]
    fn test_fixed_rate_survives_overrun() {
        let (acq, exchange) = buffer_pool(2, 64);
        let (sink, _) = recording_sink(Duration::from_millis(150));
        let mut analyzer = ProcessingLoop::new(&config(64, 10), exchange, sink).unwrap();
        analyzer.set_dynamic_frame_rate(false);
        submit_dc(&acq);

        assert_eq!(analyzer.step(), Step::Frame);
        assert_eq!(analyzer.frame_rate(), 10);
        assert_eq!(analyzer.rate_state().load, 1.0);
    }

    #[test]
    fn test_narrowed_bounds_clamp_running_rate() {
        let (_acq, exchange) = buffer_pool(1, 64);
        let (sink, _) = channel_sink(1);
        let mut analyzer = ProcessingLoop::new(&config(64, 20), exchange, sink).unwrap();
        let control = analyzer.control();
        assert_eq!(analyzer.frame_rate_bounds(), (1, 30));

        analyzer.set_frame_rate_bounds(5, 12).unwrap();
        assert_eq!(analyzer.frame_rate_bounds(), (5, 12));
        assert_eq!(analyzer.frame_rate(), 12);
        assert_eq!(control.frame_rate(), 12);

        // Requests from other threads land inside the new range too
        control.set_frame_rate(2);
        assert_eq!(analyzer.step(), Step::Starved);
        assert_eq!(analyzer.frame_rate(), 5);

        assert!(matches!(
            analyzer.set_frame_rate_bounds(0, 12),
            Err(ConfigError::FrameRateBounds { .. })
        ));
        assert!(analyzer.set_frame_rate_bounds(12, 31).is_err());
        assert_eq!(analyzer.frame_rate_bounds(), (5, 12));
    }

    #[test]
    fn test_thresholds_change_step_decision() {
        let (acq, exchange) = buffer_pool(2, 64);
        // 60ms in the sink against a 100ms budget -> load around 0.6
        let (sink, _) = recording_sink(Duration::from_millis(60));
        let mut analyzer = ProcessingLoop::new(&config(64, 10), exchange, sink).unwrap();
        assert_eq!(analyzer.thresholds(), (0.65, 0.85));

        // With a 0.1 - 0.2 band the same load counts as too high
        analyzer.set_thresholds(0.1, 0.2).unwrap();
        assert_eq!(analyzer.thresholds(), (0.1, 0.2));
        submit_dc(&acq);
        assert_eq!(analyzer.step(), Step::Frame);
        assert_eq!(analyzer.frame_rate(), 9);

        assert!(matches!(
            analyzer.set_thresholds(0.9, 0.5),
            Err(ConfigError::Thresholds { .. })
        ));
        assert_eq!(analyzer.thresholds(), (0.1, 0.2));
    }

    #[test]
    fn test_mis_sized_packet_is_rejected_and_returned() {
        let (acq, exchange) = buffer_pool(2, 64);
        let (sink, frames) = channel_sink(1);
        let mut analyzer = ProcessingLoop::new(&config(64, 10), exchange, sink).unwrap();
        // Swap a pooled buffer for a wrong one so the pool size stays the same
        let _pooled = acq.try_take_empty().unwrap();
        acq.submit(SamplePacket::with_size(32)).unwrap();

        assert_eq!(analyzer.step(), Step::Rejected);
        assert!(frames.try_recv().is_err());
        assert_eq!(acq.available(), 2);
        let stats = analyzer.control().stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.frames, 0);
        assert_eq!(stats.dropped_returns, 0);
    }

    #[test]
    fn test_remote_settings_apply_at_next_iteration() {
        let (_acq, exchange) = buffer_pool(1, 64);
        let (sink, _) = channel_sink(1);
        let mut analyzer = ProcessingLoop::new(&config(64, 10), exchange, sink).unwrap();
        let control = analyzer.control();

        control.set_frame_rate(500);
        control.set_dynamic_frame_rate(false);
        assert_eq!(analyzer.frame_rate(), 10);
        assert_eq!(analyzer.step(), Step::Starved);
        assert_eq!(analyzer.frame_rate(), 30);
        assert!(!analyzer.is_dynamic_frame_rate());
        assert_eq!(control.frame_rate(), 30);
    }

    #[test]
    fn test_interrupt_while_waiting_stops() {
        let (_acq, exchange) = buffer_pool(1, 64);
        let (sink, _) = channel_sink(1);
        let mut analyzer = ProcessingLoop::new(&config(64, 1), exchange, sink).unwrap();
        analyzer.control().stop();
        assert_eq!(analyzer.step(), Step::Stopped);
        assert!(!analyzer.is_running());
    }

    #[test]
    fn test_lifecycle_and_prompt_stop() {
        let (_acq, exchange) = buffer_pool(2, 64);
        let (sink, _) = channel_sink(1);
        // One second budget, so the loop sits in a long poll
        let analyzer = ProcessingLoop::new(&config(64, 1), exchange, sink).unwrap();
        assert!(!analyzer.is_running());

        let handle = analyzer.start().unwrap();
        assert!(handle.is_running());
        thread::sleep(Duration::from_millis(50));

        let stopped_at = Instant::now();
        let control = handle.control().clone();
        let analyzer = handle.stop_and_join().unwrap();
        assert!(stopped_at.elapsed() < Duration::from_millis(900));
        assert!(!control.is_running());
        assert!(!analyzer.is_running());
        assert_eq!(control.stats().frames, 0);
    }

    #[test]
    fn test_dropped_producer_stops_loop() {
        let (acq, exchange) = buffer_pool(1, 64);
        let (sink, _) = channel_sink(1);
        let handle = ProcessingLoop::new(&config(64, 1), exchange, sink)
            .unwrap()
            .start()
            .unwrap();
        drop(acq);
        let analyzer = handle.join().unwrap();
        assert!(!analyzer.is_running());
    }

    #[test]
    fn test_panicking_sink_still_sets_stop_flag() {
        let (acq, exchange) = buffer_pool(1, 64);
        struct Broken;
        impl FrameSink for Broken {
            fn draw(&mut self, _: &[f32], _: u64, _: u32, _: u32, _: f64) {
                panic!("display went away");
            }
        }
        let sink = Broken;
        let handle = ProcessingLoop::new(&config(64, 10), exchange, sink)
            .unwrap()
            .start()
            .unwrap();
        let control = handle.control().clone();
        submit_dc(&acq);
        assert!(handle.join().is_err());
        assert!(!control.is_running());
    }

    #[test]
    fn test_every_buffer_comes_back() {
        const POOL: usize = 4;
        let (acq, exchange) = buffer_pool(POOL, 256);
        let (sink, draws) = recording_sink(Duration::ZERO);
        let handle = ProcessingLoop::new(&config(256, 30), exchange, sink)
            .unwrap()
            .start()
            .unwrap();

        let producing = Arc::new(AtomicBool::new(true));
        let producer = {
            let producing = Arc::clone(&producing);
            thread::spawn(move || {
                let mut phase = 0f32;
                while producing.load(Ordering::SeqCst) {
                    if let Some(mut packet) = acq.take_empty(Duration::from_millis(5)) {
                        let (re, im) = packet.samples_mut();
                        for (r, i) in re.iter_mut().zip(im.iter_mut()) {
                            *r = phase.cos();
                            *i = phase.sin();
                            phase += 0.1;
                        }
                        // Only POOL packets exist, so the input queue always has room
                        acq.submit(packet).unwrap();
                    }
                }
                acq
            })
        };

        thread::sleep(Duration::from_millis(300));
        let analyzer = handle.stop_and_join().unwrap();
        producing.store(false, Ordering::SeqCst);
        let acq = producer.join().unwrap();

        assert!(!draws.lock().unwrap().is_empty());
        assert_eq!(acq.pending() + acq.available(), POOL);
        assert_eq!(analyzer.control().stats().dropped_returns, 0);
    }
}
