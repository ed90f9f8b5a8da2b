//! Core value types shared across the pipeline.
//!
//! Everything here is plain data: no type owns a lock or a thread. Values are
//! cloned at the boundaries the concurrency model requires (into a
//! `WorkerSlot` at dispatch, into a `ProcessedCPI` at gather) rather than
//! shared by reference, keeping the concurrency model's ownership handoffs explicit.

use crate::time::DataTics;

/// A single IQ sample. Alias for the complex type `rustfft` operates on, so
/// no conversion is needed at the FFT boundary.
pub type ComplexSample = rustfft::num_complex::Complex32;

/// Real/imag data kind a channel is carrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    RealOnly,
    ComplexIq,
}

/// Immutable per-CPI metadata, cloned into every `WorkerSlot` at dispatch and
/// into the resulting `ProcessedCPI` at gather. Field names follow
/// `CPIParameters.h`.
#[derive(Debug, Clone, Copy)]
pub struct CpiParams {
    /// Time-of-validity: monotonic device-time offset, in microseconds,
    /// relative to the stream epoch.
    pub tov_tics: DataTics,
    pub block_id: u64,
    pub adc_frame_count: u64,
    pub sample_rate: f64,
    pub samples_per_wri: usize,
    pub wris_per_cpi: usize,
    pub num_channels: usize,
    pub data_kind: DataKind,
}

/// Per-channel calibration coefficients. Copied by value into a worker's
/// inputs before `input-full` is raised — a worker never observes a partial
/// update.
#[derive(Debug, Clone)]
pub struct CalibrationCoeffs {
    /// Scalar DC offset, used unless `per_range_dc` is populated.
    pub dc: ComplexSample,
    /// Per-range-bin DC offset (length `samples_per_wri`), used in per-bin
    /// calibration mode.
    pub per_range_dc: Option<Vec<ComplexSample>>,
    /// 2x2 real whitening transform, row-major: `[x00, x01, x10, x11]`.
    pub transform: [f32; 4],
}

impl CalibrationCoeffs {
    /// Identity DC offset and transform, the coefficients a channel starts
    /// with before the estimator has produced its first snapshot.
    pub fn identity() -> CalibrationCoeffs {
        CalibrationCoeffs {
            dc: ComplexSample::new(0.0, 0.0),
            per_range_dc: None,
            transform: [1.0, 0.0, 0.0, 1.0],
        }
    }

    /// Applies `r'' = X * [r - dc_r, i - dc_i]` to one sample, optionally
    /// indexed by range bin `range_idx` in per-bin mode.
    pub fn apply(&self, sample: ComplexSample, range_idx: usize) -> ComplexSample {
        let dc = match &self.per_range_dc {
            Some(v) => v[range_idx],
            None => self.dc,
        };
        let r = sample.re - dc.re;
        let i = sample.im - dc.im;
        let x = &self.transform;
        ComplexSample::new(x[0] * r + x[1] * i, x[2] * r + x[3] * i)
    }
}

/// Complete processed result for one CPI, across all channels.
#[derive(Debug, Clone)]
pub struct ProcessedCpi {
    pub params: CpiParams,
    pub channels: Vec<ProcessedChannel>,
}

/// One channel's contribution to a `ProcessedCpi`.
#[derive(Debug, Clone)]
pub struct ProcessedChannel {
    /// Row-major `samples_per_wri * wris_per_cpi` log-power values, in
    /// pre-fftshift (natural FFT) Doppler order.
    pub log_power: Vec<f32>,
    pub peak_range_idx: usize,
    pub peak_doppler_idx: usize,
    pub peak_doppler_frac: f32,
    pub peak_amplitude_db: f32,
    /// Peak Doppler converted to velocity (m/s), filled in by the gather
    /// stage once the pre-shift index is known.
    pub peak_velocity_mps: f32,
}
