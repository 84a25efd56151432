//! Sample buffers exchanged between acquisition and the processing loop

/// One block of complex baseband samples plus the tuning it was captured at.
///
/// Packets are deliberately not `Clone`: a packet lives in exactly one queue
/// (or in the transform stage) at a time and moves between them by value.
#[derive(Debug, PartialEq)]
pub struct SamplePacket {
    re: Vec<f32>,
    im: Vec<f32>,
    frequency: u64,
    sample_rate: u32,
}

impl SamplePacket {
    /// Allocate a zeroed packet holding `size` complex samples
    pub fn with_size(size: usize) -> Self {
        Self {
            re: vec![0f32; size],
            im: vec![0f32; size],
            frequency: 0,
            sample_rate: 0,
        }
    }

    /// Build a packet from existing sample arrays
    pub fn from_parts(re: Vec<f32>, im: Vec<f32>, frequency: u64, sample_rate: u32) -> Self {
        Self {
            re,
            im,
            frequency,
            sample_rate,
        }
    }

    pub fn size(&self) -> usize {
        self.re.len()
    }

    pub fn re(&self) -> &[f32] {
        &self.re
    }

    pub fn im(&self) -> &[f32] {
        &self.im
    }

    /// Mutable access to both components at once
    pub fn samples_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.re, &mut self.im)
    }

    /// Center frequency in Hz at capture time
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: u64) {
        self.frequency = frequency;
    }

    /// Sample rate in Hz at capture time
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }
}
