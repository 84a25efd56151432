//! Closed-loop frame rate control.
//!
//! The controller knows nothing about clocks or sleeping. The processing loop
//! hands it the time an iteration took and gets back how long to wait, which
//! keeps the policy testable with synthetic load sequences.

use std::time::Duration;

use crate::{
    config::{validate_bounds, validate_thresholds, AnalyzerConfig},
    error::ConfigError,
};

/// Hard floor for the frame rate (frames/second)
pub const MIN_FRAME_RATE: u32 = 1;
/// Hard ceiling for the frame rate (frames/second)
pub const MAX_FRAME_RATE: u32 = 30;
pub const DEFAULT_FRAME_RATE: u32 = 10;
/// At every load below this the frame rate goes up
pub const LOW_THRESHOLD: f64 = 0.65;
/// At every load above this the frame rate goes down
pub const HIGH_THRESHOLD: f64 = 0.85;

/// What the loop should do with the rest of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Budget left over, wait this long before the next frame
    Sleep(Duration),
    /// The frame used up its whole budget
    Overrun,
}

/// Snapshot of the controller for diagnostics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateState {
    pub frame_rate: u32,
    pub load: f64,
    pub dynamic: bool,
}

#[derive(Debug, Clone)]
pub struct RateController {
    frame_rate: u32,
    load: f64,
    dynamic: bool,
    min_rate: u32,
    max_rate: u32,
    low: f64,
    high: f64,
}

impl Default for RateController {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            load: 0.0,
            dynamic: true,
            min_rate: MIN_FRAME_RATE,
            max_rate: MAX_FRAME_RATE,
            low: LOW_THRESHOLD,
            high: HIGH_THRESHOLD,
        }
    }
}

impl RateController {
    pub fn from_config(config: &AnalyzerConfig) -> Result<Self, ConfigError> {
        let mut rc = Self::default();
        rc.set_bounds(config.min_frame_rate, config.max_frame_rate)?;
        rc.set_thresholds(config.low_threshold, config.high_threshold)?;
        if !(rc.min_rate..=rc.max_rate).contains(&config.frame_rate) {
            return Err(ConfigError::FrameRateOutOfBounds {
                rate: config.frame_rate,
                min: rc.min_rate,
                max: rc.max_rate,
            });
        }
        rc.frame_rate = config.frame_rate;
        rc.dynamic = config.dynamic_frame_rate;
        Ok(rc)
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Set the frame rate, clamped into the configured bounds. Returns the rate
    /// actually applied.
    pub fn set_frame_rate(&mut self, frame_rate: u32) -> u32 {
        self.frame_rate = frame_rate.clamp(self.min_rate, self.max_rate);
        self.frame_rate
    }

    /// Fraction of the last frame's budget that was used
    pub fn load(&self) -> f64 {
        self.load
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn set_dynamic(&mut self, dynamic: bool) {
        self.dynamic = dynamic;
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.min_rate, self.max_rate)
    }

    pub fn set_bounds(&mut self, min: u32, max: u32) -> Result<(), ConfigError> {
        validate_bounds(min, max)?;
        self.min_rate = min;
        self.max_rate = max;
        self.frame_rate = self.frame_rate.clamp(min, max);
        Ok(())
    }

    pub fn thresholds(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    pub fn set_thresholds(&mut self, low: f64, high: f64) -> Result<(), ConfigError> {
        validate_thresholds(low, high)?;
        self.low = low;
        self.high = high;
        Ok(())
    }

    pub fn state(&self) -> RateState {
        RateState {
            frame_rate: self.frame_rate,
            load: self.load,
            dynamic: self.dynamic,
        }
    }

    /// Time allotted to one frame at the current rate, in whole milliseconds
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(1000 / self.frame_rate as u64)
    }

    /// Close out a frame that took `elapsed`.
    ///
    /// The load is measured against the budget of the rate the frame ran at,
    /// then the rate is nudged for the next one.
    pub fn settle(&mut self, elapsed: Duration) -> Pacing {
        match self.frame_budget().checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => {
                let load = elapsed.as_secs_f64() * self.frame_rate as f64;
                self.observe(load);
                Pacing::Sleep(remaining)
            }
            _ => {
                self.overrun();
                Pacing::Overrun
            }
        }
    }

    /// Record a measured load and apply the hysteresis policy (one step at most)
    pub fn observe(&mut self, load: f64) {
        self.load = load.max(0.0);
        if !self.dynamic {
            return;
        }
        if self.load < self.low && self.frame_rate < self.max_rate {
            self.frame_rate += 1;
        } else if self.load > self.high && self.frame_rate > self.min_rate {
            self.frame_rate -= 1;
        }
    }

    /// A frame ran past its budget: saturate the load and back off one step
    pub fn overrun(&mut self) {
        self.load = 1.0;
        if self.dynamic && self.frame_rate > self.min_rate {
            self.frame_rate -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(frame_rate: u32) -> RateController {
        let mut rc = RateController::default();
        rc.set_frame_rate(frame_rate);
        rc
    }

    #[test]
    fn test_low_load_climbs_to_ceiling() {
        let mut rc = controller(25);
        let mut last = rc.frame_rate();
        for _ in 0..5 {
            rc.observe(0.3);
            assert_eq!(rc.frame_rate(), last + 1);
            last = rc.frame_rate();
        }
        assert_eq!(last, MAX_FRAME_RATE);
        for _ in 0..3 {
            rc.observe(0.1);
            assert_eq!(rc.frame_rate(), MAX_FRAME_RATE);
        }
    }

    #[test]
    fn test_high_load_falls_to_floor() {
        let mut rc = controller(4);
        for expected in [3, 2, 1, 1, 1] {
            rc.observe(0.95);
            assert_eq!(rc.frame_rate(), expected);
        }
    }

    #[test]
    fn test_hysteresis_band_holds_rate() {
        let mut rc = controller(12);
        for load in [0.65, 0.7, 0.8, 0.85] {
            rc.observe(load);
            assert_eq!(rc.frame_rate(), 12);
        }
    }

    #[test]
    fn test_fixed_rate_ignores_load() {
        let mut rc = controller(12);
        rc.set_dynamic(false);
        rc.observe(0.1);
        rc.observe(2.0);
        rc.overrun();
        assert_eq!(rc.frame_rate(), 12);
        assert_eq!(rc.load(), 1.0);
    }

    #[test]
    fn test_overrun_saturates_and_steps_down() {
        let mut rc = controller(10);
        // 100ms budget
        assert_eq!(rc.settle(Duration::from_millis(140)), Pacing::Overrun);
        assert_eq!(rc.load(), 1.0);
        assert_eq!(rc.frame_rate(), 9);
        // Using the budget exactly leaves nothing to sleep
        let mut rc = controller(10);
        assert_eq!(rc.settle(Duration::from_millis(100)), Pacing::Overrun);
        assert_eq!(rc.frame_rate(), 9);
    }

    #[test]
    fn test_overrun_at_floor_keeps_rate() {
        let mut rc = controller(1);
        assert_eq!(rc.settle(Duration::from_secs(2)), Pacing::Overrun);
        assert_eq!(rc.frame_rate(), 1);
        assert_eq!(rc.load(), 1.0);
    }

    #[test]
    fn test_settle_measures_load_against_budget() {
        let mut rc = controller(10);
        assert_eq!(
            rc.settle(Duration::from_millis(20)),
            Pacing::Sleep(Duration::from_millis(80))
        );
        assert!((rc.load() - 0.2).abs() < 1e-9);
        assert_eq!(rc.frame_rate(), 11);

        let mut rc = controller(10);
        assert_eq!(
            rc.settle(Duration::from_millis(90)),
            Pacing::Sleep(Duration::from_millis(10))
        );
        assert!((rc.load() - 0.9).abs() < 1e-9);
        assert_eq!(rc.frame_rate(), 9);
    }

    #[test]
    fn test_budget_uses_integer_milliseconds() {
        assert_eq!(controller(3).frame_budget(), Duration::from_millis(333));
        assert_eq!(controller(30).frame_budget(), Duration::from_millis(33));
        assert_eq!(controller(1).frame_budget(), Duration::from_secs(1));
    }

    #[test]
    fn test_set_frame_rate_clamps() {
        let mut rc = RateController::default();
        assert_eq!(rc.set_frame_rate(0), MIN_FRAME_RATE);
        assert_eq!(rc.set_frame_rate(99), MAX_FRAME_RATE);
        rc.set_bounds(5, 20).unwrap();
        assert_eq!(rc.frame_rate(), 20);
        assert_eq!(rc.set_frame_rate(2), 5);
    }

    #[test]
    fn test_custom_bounds_limit_steps() {
        let config = AnalyzerConfig {
            frame_rate: 5,
            min_frame_rate: 5,
            max_frame_rate: 6,
            ..Default::default()
        };
        let mut rc = RateController::from_config(&config).unwrap();
        rc.observe(0.9);
        assert_eq!(rc.frame_rate(), 5);
        rc.observe(0.1);
        rc.observe(0.1);
        assert_eq!(rc.frame_rate(), 6);
    }

    #[test]
    fn test_from_config_rejects_bad_settings() {
        let config = AnalyzerConfig {
            low_threshold: 0.9,
            high_threshold: 0.8,
            ..Default::default()
        };
        assert!(RateController::from_config(&config).is_err());
        let config = AnalyzerConfig {
            frame_rate: 40,
            ..Default::default()
        };
        assert!(matches!(
            RateController::from_config(&config),
            Err(ConfigError::FrameRateOutOfBounds { rate: 40, .. })
        ));
    }
}
