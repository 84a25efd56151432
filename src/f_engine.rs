use std::{f32::consts::PI, fmt, str::FromStr, sync::Arc};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::{
    config::validate_fft_size,
    error::{ConfigError, TransformError},
    packet::SamplePacket,
};

// Every packet coming off the input queue becomes one display frame:
// * multiply with window function
// * FFT (in place)
// * normalized power -> dB
// * rotate by half a spectrum so DC sits in the middle

/// Lowest value a bin can take. Empty bins (log of zero) and NaN input land here.
pub const MAG_FLOOR_DB: f32 = -150.0;

/// Taper applied to both sample components before the FFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowFunction {
    #[default]
    Hann,
    Blackman,
    Rectangular,
}

impl WindowFunction {
    /// Window coefficients for a block of `size` samples
    pub fn coefficients(self, size: usize) -> Vec<f32> {
        if size <= 1 {
            return vec![1f32; size];
        }
        let denom = (size - 1) as f32;
        (0..size)
            .map(|n| {
                let x = 2.0 * PI * n as f32 / denom;
                match self {
                    Self::Hann => 0.5 * (1.0 - x.cos()),
                    Self::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                    Self::Rectangular => 1.0,
                }
            })
            .collect()
    }
}

impl fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hann => "hann",
            Self::Blackman => "blackman",
            Self::Rectangular => "rectangular",
        };
        f.write_str(name)
    }
}

impl FromStr for WindowFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hann" | "hanning" => Ok(Self::Hann),
            "blackman" => Ok(Self::Blackman),
            "rectangular" | "rect" | "none" => Ok(Self::Rectangular),
            other => Err(format!("Unknown window function {other}")),
        }
    }
}

/// Windowed FFT producing a recentered dB magnitude frame.
///
/// All buffers are sized once at construction; `transform` never allocates.
pub struct SpectralTransform {
    fft_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    mag: Vec<f32>,
}

impl SpectralTransform {
    pub fn new(fft_size: usize, window: WindowFunction) -> Result<Self, ConfigError> {
        validate_fft_size(fft_size)?;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Ok(Self {
            fft_size,
            window: window.coefficients(fft_size),
            fft,
            buffer: vec![Complex::default(); fft_size],
            scratch,
            mag: vec![MAG_FLOOR_DB; fft_size],
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// The most recently computed frame
    pub fn magnitudes(&self) -> &[f32] {
        &self.mag
    }

    /// Transform `packet` into the magnitude frame.
    ///
    /// The packet's arrays are overwritten with the raw FFT output, so its
    /// contents are only good for returning to the pool afterwards.
    pub fn transform(&mut self, packet: &mut SamplePacket) -> Result<&[f32], TransformError> {
        let n = self.fft_size;
        let (re, im) = packet.samples_mut();
        if re.len() != n || im.len() != n {
            return Err(TransformError::SizeMismatch {
                expected: n,
                re: re.len(),
                im: im.len(),
            });
        }

        // Multiply time series by window function
        for i in 0..n {
            re[i] *= self.window[i];
            im[i] *= self.window[i];
            self.buffer[i] = Complex::new(re[i], im[i]);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let half = n / 2;
        for (i, bin) in self.buffer.iter().enumerate() {
            re[i] = bin.re;
            im[i] = bin.im;
            self.mag[(i + half) % n] = bin_to_db(bin.re, bin.im, n);
        }
        Ok(&self.mag)
    }
}

/// 10 * log10(sqrt(p)) of the size-normalized power, clamped at the floor
fn bin_to_db(re: f32, im: f32, n: usize) -> f32 {
    let re = re / n as f32;
    let im = im / n as f32;
    let power = re * re + im * im;
    // f32::max drops NaN and -inf loses to the floor
    (10.0 * power.sqrt().log10()).max(MAG_FLOOR_DB)
}
