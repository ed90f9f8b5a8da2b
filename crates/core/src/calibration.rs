//! Adaptive DC-offset and whitening-transform estimation.
//!
//! Runs as a background task: the dispatcher hands it a raw CPI snapshot
//! every ~50 CPIs, it computes a new [`CalibrationCoeffs`] without
//! holding up the pipeline, and the dispatcher picks the result up
//! non-blockingly on a later cycle. Grounded in `calibration.cpp`
//! (`complexMean`, `covarianceSingleMean`, `complexMeanColumns3D`,
//! `covarianceRangeDepMean`, `whitenTransformCholesky`, `FadeMemAveDCSingle`,
//! `CalibrateFunction`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::warn;

use crate::types::{CalibrationCoeffs, ComplexSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalMode {
    DcOnly,
    PerRangeBin,
}

/// Number of initial calls that use the faster 0.5 smoothing factor before
/// settling to the configured `fade_mem_val`.
const FAST_SMOOTHING_CALLS: u64 = 20;
const FAST_SMOOTHING_ALPHA: f32 = 0.5;

/// Real/imag covariance, stored as the symmetric matrix `[a, b, c]` standing
/// for `[[a, b], [b, c]]`.
#[derive(Debug, Clone, Copy)]
struct Covariance {
    a: f32,
    b: f32,
    c: f32,
}

struct ChannelHistory {
    dc_scalar: ComplexSample,
    dc_per_bin: Vec<ComplexSample>,
    r_hist: Covariance,
    transform: [f32; 4],
}

impl ChannelHistory {
    fn new(samples_per_wri: usize) -> ChannelHistory {
        ChannelHistory {
            dc_scalar: ComplexSample::new(0.0, 0.0),
            dc_per_bin: vec![ComplexSample::new(0.0, 0.0); samples_per_wri],
            // Seeded away from zero so the first Cholesky solve is never
            // degenerate, matching CalibrateFunction's startup behavior.
            r_hist: Covariance { a: 1e-12, b: 0.0, c: 1e-12 },
            transform: [1.0, 0.0, 0.0, 1.0],
        }
    }

    fn coeffs(&self, mode: CalMode) -> CalibrationCoeffs {
        CalibrationCoeffs {
            dc: self.dc_scalar,
            per_range_dc: match mode {
                CalMode::DcOnly => None,
                CalMode::PerRangeBin => Some(self.dc_per_bin.clone()),
            },
            transform: self.transform,
        }
    }
}

pub struct CalibrationEstimator {
    mode: CalMode,
    samples_per_wri: usize,
    fade_mem_val: f32,
    call_count: u64,
    channels: Vec<ChannelHistory>,
}

impl CalibrationEstimator {
    pub fn new(num_channels: usize, samples_per_wri: usize, fade_mem_val: f64, mode: CalMode) -> CalibrationEstimator {
        CalibrationEstimator {
            mode,
            samples_per_wri,
            fade_mem_val: fade_mem_val as f32,
            call_count: 0,
            channels: (0..num_channels).map(|_| ChannelHistory::new(samples_per_wri)).collect(),
        }
    }

    pub fn coeffs(&self, channel: usize) -> CalibrationCoeffs {
        self.channels[channel].coeffs(self.mode)
    }

    /// Folds one raw CPI snapshot for `channel` into the running history and
    /// returns the (possibly unchanged) coefficients.
    pub fn update(&mut self, channel: usize, snapshot: &[ComplexSample]) -> CalibrationCoeffs {
        self.call_count += 1;
        let alpha = if self.call_count <= FAST_SMOOTHING_CALLS {
            FAST_SMOOTHING_ALPHA
        } else {
            self.fade_mem_val
        };

        let (new_dc_scalar, new_dc_per_bin, new_r) = match self.mode {
            CalMode::DcOnly => {
                let dc = complex_mean(snapshot);
                let r = covariance_about(snapshot, |_| dc);
                (dc, None, r)
            }
            CalMode::PerRangeBin => {
                let dc_per_bin = complex_mean_per_bin(snapshot, self.samples_per_wri);
                let r = covariance_about(snapshot, |i| dc_per_bin[i % self.samples_per_wri]);
                let dc_scalar = complex_mean(&dc_per_bin);
                (dc_scalar, Some(dc_per_bin), r)
            }
        };

        let hist = &mut self.channels[channel];
        hist.dc_scalar = smooth_complex(hist.dc_scalar, new_dc_scalar, alpha);
        if let Some(new_bins) = new_dc_per_bin {
            for (old, new) in hist.dc_per_bin.iter_mut().zip(new_bins.iter()) {
                *old = smooth_complex(*old, *new, alpha);
            }
        }
        hist.r_hist = Covariance {
            a: alpha * hist.r_hist.a + (1.0 - alpha) * new_r.a,
            b: alpha * hist.r_hist.b + (1.0 - alpha) * new_r.b,
            c: alpha * hist.r_hist.c + (1.0 - alpha) * new_r.c,
        };

        match cholesky_whiten(hist.r_hist) {
            Some(x) => hist.transform = x,
            None => warn!("calibration channel {channel}: covariance not positive definite, keeping previous transform"),
        }

        hist.coeffs(self.mode)
    }
}

fn smooth_complex(hist: ComplexSample, new: ComplexSample, alpha: f32) -> ComplexSample {
    ComplexSample::new(alpha * hist.re + (1.0 - alpha) * new.re, alpha * hist.im + (1.0 - alpha) * new.im)
}

fn complex_mean(samples: &[ComplexSample]) -> ComplexSample {
    let n = samples.len().max(1) as f32;
    let sum = samples.iter().fold(ComplexSample::new(0.0, 0.0), |acc, s| acc + s);
    ComplexSample::new(sum.re / n, sum.im / n)
}

/// Per-range-bin mean across WRIs: `samples` is row-major `wris * samples_per_wri`.
fn complex_mean_per_bin(samples: &[ComplexSample], samples_per_wri: usize) -> Vec<ComplexSample> {
    let mut sums = vec![ComplexSample::new(0.0, 0.0); samples_per_wri];
    let mut counts = vec![0u32; samples_per_wri];
    for (i, s) in samples.iter().enumerate() {
        let bin = i % samples_per_wri;
        sums[bin] += s;
        counts[bin] += 1;
    }
    sums.iter()
        .zip(counts.iter())
        .map(|(sum, count)| ComplexSample::new(sum.re / (*count).max(1) as f32, sum.im / (*count).max(1) as f32))
        .collect()
}

fn covariance_about(samples: &[ComplexSample], dc_of: impl Fn(usize) -> ComplexSample) -> Covariance {
    let n = samples.len().max(1) as f32;
    let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
    for (i, s) in samples.iter().enumerate() {
        let dc = dc_of(i);
        let dr = s.re - dc.re;
        let di = s.im - dc.im;
        a += dr * dr;
        b += dr * di;
        c += di * di;
    }
    Covariance { a: a / n, b: b / n, c: c / n }
}

/// Solves for the whitening transform `X` via Cholesky decomposition of
/// `R = [[a,b],[b,c]]`. Returns `None` when `R` is not positive definite,
/// in which case the caller should retain the previous transform.
fn cholesky_whiten(r: Covariance) -> Option<[f32; 4]> {
    let det = r.a * r.c - r.b * r.b;
    if !(det > 0.0 && r.a > 0.0 && r.c > 0.0) {
        return None;
    }
    if r.b == 0.0 {
        return Some([1.0, 0.0, 0.0, (r.a / r.c).sqrt()]);
    }
    let l11 = r.a.sqrt();
    let l12 = r.b / l11;
    let l22 = (r.c - l12 * l12).sqrt();
    let a11 = 1.0 / l11;
    let a12 = -l12 / (l11 * l22);
    let a22 = 1.0 / l22;
    Some([1.0, 0.0, a12 / a11, a22 / a11])
}

/// Non-blocking mailbox between the dispatcher and a background estimator
/// thread. The dispatcher's `try_submit_snapshot`/`try_take_ready` use
/// `Mutex::try_lock`, so a snapshot is skipped outright if the estimator is
/// busy rather than queued: the estimator thread holds the lock for the full
/// duration of a
/// `CalibrationEstimator::update` call, so a concurrent `try_lock` genuinely
/// fails while it is computing, not merely while it is queueing work.
struct CalSlotInner {
    snapshot: Option<(usize, Vec<ComplexSample>)>,
    ready: Option<(usize, CalibrationCoeffs)>,
    stop: bool,
}

pub struct CalibrationChannel {
    inner: Mutex<CalSlotInner>,
    cv: Condvar,
}

impl CalibrationChannel {
    pub fn new() -> CalibrationChannel {
        CalibrationChannel {
            inner: Mutex::new(CalSlotInner { snapshot: None, ready: None, stop: false }),
            cv: Condvar::new(),
        }
    }

    /// Dispatcher side. Returns `false` (snapshot dropped) if the estimator
    /// is currently busy processing a previous snapshot.
    pub fn try_submit_snapshot(&self, channel: usize, data: Vec<ComplexSample>) -> bool {
        match self.inner.try_lock() {
            Ok(mut guard) => {
                guard.snapshot = Some((channel, data));
                self.cv.notify_one();
                true
            }
            Err(_) => false,
        }
    }

    /// Dispatcher side. Non-blocking: returns `None` if the estimator is
    /// busy or has nothing new ready.
    pub fn try_take_ready(&self) -> Option<(usize, CalibrationCoeffs)> {
        match self.inner.try_lock() {
            Ok(mut guard) => guard.ready.take(),
            Err(_) => None,
        }
    }

    pub fn request_stop(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.stop = true;
        self.cv.notify_all();
    }
}

impl Default for CalibrationChannel {
    fn default() -> CalibrationChannel {
        CalibrationChannel::new()
    }
}

/// Spawns the estimator's background thread, looping until `request_stop`.
pub fn spawn_estimator_thread(
    channel: std::sync::Arc<CalibrationChannel>,
    mut estimator: CalibrationEstimator,
    stop_requested: std::sync::Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("radar-calibration".into())
        .spawn(move || {
            loop {
                let mut guard = channel.inner.lock().unwrap();
                loop {
                    if guard.stop {
                        return;
                    }
                    if guard.snapshot.is_some() {
                        break;
                    }
                    let (next_guard, wait_result) = channel.cv.wait_timeout(guard, Duration::from_millis(500)).unwrap();
                    guard = next_guard;
                    if wait_result.timed_out() && guard.snapshot.is_none() && !guard.stop && stop_requested.load(Ordering::Relaxed) {
                        return;
                    }
                }
                let (chan_idx, data) = guard.snapshot.take().expect("snapshot checked present above");
                // `guard` stays held across this call: a concurrent
                // `try_submit_snapshot`/`try_take_ready` observes "busy".
                let coeffs = estimator.update(chan_idx, &data);
                guard.ready = Some((chan_idx, coeffs));
            }
        })
        .expect("failed to spawn calibration estimator thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn log_power_zero_is_exact() {
        let p = 10.0 * (0f32 * 0f32 + 1e-15f32).log10();
        assert!((p - (-150.0)).abs() < 1e-4);
    }

    #[test]
    fn diagonal_covariance_gives_diagonal_transform() {
        let r = Covariance { a: 4.0, b: 0.0, c: 9.0 };
        let x = cholesky_whiten(r).unwrap();
        assert_eq!(x, [1.0, 0.0, 0.0, (4.0f32 / 9.0).sqrt()]);
    }

    #[test]
    fn non_positive_definite_returns_none() {
        let r = Covariance { a: 1.0, b: 2.0, c: 1.0 }; // det = 1 - 4 < 0
        assert!(cholesky_whiten(r).is_none());
    }

    #[test]
    fn converges_on_engineered_imbalance() {
        // i' = 2*i, r' = r + 0.5, drawn from unit-variance circular noise.
        let mut rng = rand::thread_rng();
        let mut estimator = CalibrationEstimator::new(1, 8, 0.95, CalMode::DcOnly);
        for _ in 0..80 {
            let snapshot: Vec<ComplexSample> = (0..512)
                .map(|_| {
                    let r: f32 = rng.gen_range(-1.0..1.0) + 0.5;
                    let i: f32 = rng.gen_range(-1.0..1.0) * 2.0;
                    ComplexSample::new(r, i)
                })
                .collect();
            estimator.update(0, &snapshot);
        }
        let coeffs = estimator.coeffs(0);
        assert!((coeffs.dc.re - 0.5).abs() < 0.05, "dc.re = {}", coeffs.dc.re);
        // Real channel gain stays exactly 1 by construction.
        assert_eq!(coeffs.transform[0], 1.0);
        assert_eq!(coeffs.transform[1], 0.0);
    }

    #[test]
    fn estimator_thread_round_trips_a_snapshot() {
        use std::sync::Arc;

        let channel = Arc::new(CalibrationChannel::new());
        let stop = Arc::new(AtomicBool::new(false));
        let estimator = CalibrationEstimator::new(1, 4, 0.95, CalMode::DcOnly);
        let handle = spawn_estimator_thread(Arc::clone(&channel), estimator, Arc::clone(&stop));

        let snapshot = vec![ComplexSample::new(1.0, 0.0); 16];
        assert!(channel.try_submit_snapshot(0, snapshot));

        let mut ready = None;
        for _ in 0..100 {
            if let Some(r) = channel.try_take_ready() {
                ready = Some(r);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let (chan_idx, coeffs) = ready.expect("estimator did not produce a result in time");
        assert_eq!(chan_idx, 0);
        assert!((coeffs.dc.re - 1.0).abs() < 0.5);

        channel.request_stop();
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
