//! Cached 2D FFT engine and Doppler-axis fftshift.
//!
//! The "2D FFT" is separable: a forward transform over the range axis
//! (inner, length `S`) applied to every WRI row, followed by a forward
//! transform over the Doppler axis (outer, length `W`) applied to every
//! range column. Grounded in `processWorkers.cpp`'s use of an FFTW plan of
//! size `W x S` and its `fftshift()` helper.
//!
//! `rustfft` plans (`Arc<dyn Fft<f32>>`) are `Send + Sync` and safe to
//! execute concurrently once built, so rather than give every worker its own
//! plan this engine builds one row plan and one column plan under a single
//! planner, shared by every worker through an `Arc<FftEngine>`: serialize
//! the expensive planning step once at pool construction, then let execution
//! run lock-free on every worker thread.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner};

use crate::error::{RadarError, Result};
use crate::types::ComplexSample;

pub struct FftEngine {
    samples_per_wri: usize,
    wris_per_cpi: usize,
    row_fft: Arc<dyn Fft<f32>>,
    col_fft: Arc<dyn Fft<f32>>,
}

impl FftEngine {
    pub fn new(samples_per_wri: usize, wris_per_cpi: usize) -> Result<FftEngine> {
        if samples_per_wri == 0 || wris_per_cpi == 0 {
            return Err(RadarError::FftPlan {
                len: samples_per_wri.max(wris_per_cpi),
                reason: "transform length must be nonzero".into(),
            });
        }
        let mut planner = FftPlanner::<f32>::new();
        let row_fft = planner.plan_fft_forward(samples_per_wri);
        let col_fft = planner.plan_fft_forward(wris_per_cpi);
        Ok(FftEngine {
            samples_per_wri,
            wris_per_cpi,
            row_fft,
            col_fft,
        })
    }

    /// In-place forward 2D transform over a row-major `wris_per_cpi x
    /// samples_per_wri` matrix (row = WRI/Doppler axis, column = range axis).
    pub fn transform_2d(&self, data: &mut [ComplexSample]) {
        let s = self.samples_per_wri;
        let w = self.wris_per_cpi;
        debug_assert_eq!(data.len(), s * w);

        for row in data.chunks_mut(s) {
            self.row_fft.process(row);
        }

        let mut column = vec![ComplexSample::new(0.0, 0.0); w];
        for c in 0..s {
            for r in 0..w {
                column[r] = data[r * s + c];
            }
            self.col_fft.process(&mut column);
            for r in 0..w {
                data[r * s + c] = column[r];
            }
        }
    }
}

/// Swaps the upper and lower halves of the Doppler (row) axis in place, the
/// same block-swap `fftshift()` performs. Applying it twice is the identity;
/// an odd row count leaves the untouched middle row unaffected either way.
pub fn fftshift_rows<T: Copy>(data: &mut [T], cols: usize, rows: usize) {
    let half = rows / 2;
    if half == 0 {
        return;
    }
    let (first, rest) = data.split_at_mut(half * cols);
    let second = &mut rest[..half * cols];
    first.swap_with_slice(second);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fftshift_twice_is_identity() {
        let cols = 3;
        let rows = 6;
        let original: Vec<i32> = (0..(cols * rows) as i32).collect();
        let mut data = original.clone();
        fftshift_rows(&mut data, cols, rows);
        assert_ne!(data, original);
        fftshift_rows(&mut data, cols, rows);
        assert_eq!(data, original);
    }

    #[test]
    fn dc_input_produces_dc_bin_only() {
        let s = 4;
        let w = 4;
        let engine = FftEngine::new(s, w).unwrap();
        let mut data = vec![ComplexSample::new(1.0, 0.0); s * w];
        engine.transform_2d(&mut data);
        // All energy should land in bin (0,0); every other bin near zero.
        assert!((data[0].re - (s * w) as f32).abs() < 1e-3);
        for i in 1..data.len() {
            assert!(data[i].norm() < 1e-3, "unexpected energy at bin {i}: {:?}", data[i]);
        }
    }
}
