//! Argument parsing for running from the command line

use clap::Parser;

use crate::{f_engine::WindowFunction, DEFAULT_FFT_SIZE, DEFAULT_POOL_CAPACITY};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// FFT size (power of two), which is also the number of samples per buffer
    #[clap(short, long, default_value_t = DEFAULT_FFT_SIZE, value_parser = valid_fft_size)]
    pub fft_size: usize,
    /// Number of sample buffers cycling between capture and processing
    #[clap(short, long, default_value_t = DEFAULT_POOL_CAPACITY)]
    pub capacity: usize,
    /// Frame rate to start at (frames/second)
    #[clap(short, long, default_value_t = 10)]
    #[clap(value_parser = clap::value_parser!(u32).range(1..=30))]
    pub rate: u32,
    /// Hold the frame rate fixed instead of adapting it to the load
    #[clap(long)]
    pub fixed_rate: bool,
    /// Window function (hann, blackman, rectangular)
    #[clap(short, long, default_value = "hann", value_parser = valid_window)]
    pub window: WindowFunction,
    /// Center frequency of the synthetic signal in Hz
    #[clap(long, default_value_t = 100_000_000)]
    pub frequency: u64,
    /// Sample rate of the synthetic signal in Hz
    #[clap(short, long, default_value_t = 2_000_000)]
    #[clap(value_parser = clap::value_parser!(u32).range(1..))]
    pub sample_rate: u32,
    /// Offset of the test tone from the center frequency in Hz
    #[clap(short, long, default_value_t = 250_000.0, allow_hyphen_values = true)]
    pub tone: f64,
    /// Stop after this many seconds (runs until Ctrl-C otherwise)
    #[clap(short, long)]
    pub duration: Option<u64>,
    /// Log the strongest bin every N frames
    #[clap(long, default_value_t = 10)]
    pub report_every: u64,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_fft_size(s: &str) -> Result<usize, String> {
    let size: usize = s.parse().map_err(|_| "Invalid integer".to_string())?;
    if size.is_power_of_two() {
        Ok(size)
    } else {
        Err(format!("{size} is not a power of two"))
    }
}

fn valid_window(s: &str) -> Result<WindowFunction, String> {
    s.parse()
}
