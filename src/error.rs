//! Error types for the analyzer core

use thiserror::Error;

/// Invalid construction-time settings. These are the only errors that stop
/// the core from being built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("FFT size must be a power of two, got {0}")]
    FftSizeNotPowerOfTwo(usize),
    #[error("frame rate bounds [{min}, {max}] must lie within [{floor}, {ceiling}] with min <= max")]
    FrameRateBounds {
        min: u32,
        max: u32,
        floor: u32,
        ceiling: u32,
    },
    #[error("frame rate {rate} is outside of [{min}, {max}]")]
    FrameRateOutOfBounds { rate: u32, min: u32, max: u32 },
    #[error("load thresholds must satisfy 0 < low < high <= 1, got low={low} high={high}")]
    Thresholds { low: f64, high: f64 },
}

/// Per-packet faults. The processing loop absorbs these and keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("sample packet has {re} real / {im} imaginary samples, expected {expected}")]
    SizeMismatch { expected: usize, re: usize, im: usize },
}
