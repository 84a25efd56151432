//! Construction-time settings for the analyzer core

use crate::{
    error::ConfigError,
    f_engine::WindowFunction,
    rate::{DEFAULT_FRAME_RATE, HIGH_THRESHOLD, LOW_THRESHOLD, MAX_FRAME_RATE, MIN_FRAME_RATE},
    DEFAULT_FFT_SIZE,
};

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    /// Number of complex samples per packet and bins per frame (power of two)
    pub fft_size: usize,
    /// Frame rate the loop starts at (frames/second)
    pub frame_rate: u32,
    /// Lower bound for the automatic frame rate control
    pub min_frame_rate: u32,
    /// Upper bound for the automatic frame rate control
    pub max_frame_rate: u32,
    /// Below this load the frame rate is raised
    pub low_threshold: f64,
    /// Above this load the frame rate is lowered
    pub high_threshold: f64,
    pub dynamic_frame_rate: bool,
    pub window: WindowFunction,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            frame_rate: DEFAULT_FRAME_RATE,
            min_frame_rate: MIN_FRAME_RATE,
            max_frame_rate: MAX_FRAME_RATE,
            low_threshold: LOW_THRESHOLD,
            high_threshold: HIGH_THRESHOLD,
            dynamic_frame_rate: true,
            window: WindowFunction::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn with_fft_size(fft_size: usize) -> Self {
        Self {
            fft_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_fft_size(self.fft_size)?;
        validate_bounds(self.min_frame_rate, self.max_frame_rate)?;
        if !(self.min_frame_rate..=self.max_frame_rate).contains(&self.frame_rate) {
            return Err(ConfigError::FrameRateOutOfBounds {
                rate: self.frame_rate,
                min: self.min_frame_rate,
                max: self.max_frame_rate,
            });
        }
        validate_thresholds(self.low_threshold, self.high_threshold)
    }
}

pub(crate) fn validate_fft_size(fft_size: usize) -> Result<(), ConfigError> {
    if fft_size.is_power_of_two() {
        Ok(())
    } else {
        Err(ConfigError::FftSizeNotPowerOfTwo(fft_size))
    }
}

pub(crate) fn validate_bounds(min: u32, max: u32) -> Result<(), ConfigError> {
    if MIN_FRAME_RATE <= min && min <= max && max <= MAX_FRAME_RATE {
        Ok(())
    } else {
        Err(ConfigError::FrameRateBounds {
            min,
            max,
            floor: MIN_FRAME_RATE,
            ceiling: MAX_FRAME_RATE,
        })
    }
}

pub(crate) fn validate_thresholds(low: f64, high: f64) -> Result<(), ConfigError> {
    // Written so that NaN fails every comparison
    if low > 0.0 && low < high && high <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Thresholds { low, high })
    }
}
