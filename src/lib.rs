pub mod args;
pub mod capture;
pub mod config;
pub mod error;
pub mod exchange;
pub mod exfil;
pub mod f_engine;
pub mod monitoring;
pub mod packet;
pub mod processing;
pub mod rate;

pub use config::AnalyzerConfig;
pub use error::{ConfigError, TransformError};
pub use exchange::{buffer_pool, Acquisition, Exchange, Poll};
pub use exfil::{channel_sink, ChannelSink, Frame, FrameSink, PeakReporter};
pub use f_engine::{SpectralTransform, WindowFunction, MAG_FLOOR_DB};
pub use monitoring::LoopStats;
pub use packet::SamplePacket;
pub use processing::{LoopControl, LoopHandle, ProcessingLoop, Step};
pub use rate::{Pacing, RateController, RateState};

/// Samples per buffer and bins per frame unless configured otherwise
pub const DEFAULT_FFT_SIZE: usize = 1024;
/// Buffers cycling between acquisition and the loop
pub const DEFAULT_POOL_CAPACITY: usize = 16;
