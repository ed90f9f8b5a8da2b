//! Worker pool: calibrate, window, 2D FFT, log-power, peak search.
//!
//! Each worker owns one [`WorkerSlot`], a capacity-one mailbox the dispatcher
//! fills and the gather stage drains, both addressing it by integer index
//! rather than by shared pointer, avoiding a reference cycle between the
//! pool and its stages. Grounded in `processWorkers.cpp`'s `RadarWorkerFunction`
//! and `PeakEstimate`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;

use crate::fft::FftEngine;
use crate::types::{CalibrationCoeffs, ComplexSample, CpiParams, ProcessedChannel};

/// Three-point quadratic interpolation calibration constant for a Hamming
/// window.
const PEAK_INTERP_CAL_HAMMING: f32 = 0.60;

pub struct WorkerTask {
    pub params: CpiParams,
    pub channel: usize,
    pub coeffs: CalibrationCoeffs,
    /// Row-major `wris_per_cpi x samples_per_wri` matrix (row = WRI index).
    pub input: Vec<ComplexSample>,
}

pub struct WorkerResult {
    pub params: CpiParams,
    pub channel: usize,
    pub processed: ProcessedChannel,
}

enum WaitOutcome<T> {
    Ready(T),
    Stop,
    Timeout,
}

struct SlotInner {
    task: Option<WorkerTask>,
    result: Option<WorkerResult>,
    stop: bool,
}

/// A capacity-one mailbox tagged by slot index. Dispatcher and gather
/// address it by index only; it never escapes the pool. Both `task` and
/// `result` are input-full/output-full flags: a producer blocks rather than
/// overwrite a value its consumer hasn't taken yet, so the slot can hold at
/// most one in-flight CPI at a time.
pub struct WorkerSlot {
    inner: Mutex<SlotInner>,
    input_ready: Condvar,
    output_ready: Condvar,
    /// Notified whenever `task` or `result` is taken, so a blocked producer
    /// can recheck whether the slot has room.
    drained: Condvar,
}

impl WorkerSlot {
    fn new() -> WorkerSlot {
        WorkerSlot {
            inner: Mutex::new(SlotInner { task: None, result: None, stop: false }),
            input_ready: Condvar::new(),
            output_ready: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    /// Dispatcher side: blocks until the slot is free — the previous task
    /// has been taken by the worker and its result drained by gather — then
    /// fills the mailbox and wakes the worker. Returns `false`, dropping the
    /// task, if `stop_requested` fires before the slot frees up.
    pub fn dispatch(&self, task: WorkerTask, stop_requested: &AtomicBool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        while inner.task.is_some() || inner.result.is_some() {
            if stop_requested.load(Ordering::Relaxed) {
                return false;
            }
            let (guard, _) = self.drained.wait_timeout(inner, Duration::from_millis(200)).unwrap();
            inner = guard;
        }
        inner.task = Some(task);
        self.input_ready.notify_one();
        true
    }

    fn wait_for_task(&self, timeout: Duration) -> WaitOutcome<WorkerTask> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(task) = inner.task.take() {
                self.drained.notify_one();
                return WaitOutcome::Ready(task);
            }
            if inner.stop {
                return WaitOutcome::Stop;
            }
            let (guard, result) = self.input_ready.wait_timeout(inner, timeout).unwrap();
            inner = guard;
            if result.timed_out() && inner.task.is_none() && !inner.stop {
                return WaitOutcome::Timeout;
            }
        }
    }

    /// Worker side: blocks until the previous result has been drained by
    /// gather, then publishes a result and wakes the gather stage. Gives up
    /// and drops the result once `stop` is set, since nothing will drain it
    /// after shutdown.
    fn complete(&self, result: WorkerResult) {
        let mut inner = self.inner.lock().unwrap();
        while inner.result.is_some() {
            if inner.stop {
                return;
            }
            let (guard, _) = self.drained.wait_timeout(inner, Duration::from_millis(200)).unwrap();
            inner = guard;
        }
        inner.result = Some(result);
        self.output_ready.notify_one();
    }

    /// Gather side: waits for and takes the published result.
    pub fn wait_for_result(&self, timeout: Duration) -> Option<WorkerResult> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(result) = inner.result.take() {
                self.drained.notify_one();
                return Some(result);
            }
            let (guard, wait_result) = self.output_ready.wait_timeout(inner, timeout).unwrap();
            inner = guard;
            if wait_result.timed_out() && inner.result.is_none() {
                return None;
            }
        }
    }

    fn request_stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stop = true;
        self.input_ready.notify_all();
        self.output_ready.notify_all();
        self.drained.notify_all();
    }
}

pub struct WorkerPool {
    slots: Vec<Arc<WorkerSlot>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `num_workers` threads, each looping on its own `WorkerSlot`.
    pub fn start(num_workers: usize, fft: Arc<FftEngine>, window_s: Arc<Vec<f32>>, window_w: Arc<Vec<f32>>, stop_requested: Arc<AtomicBool>) -> WorkerPool {
        let slots: Vec<Arc<WorkerSlot>> = (0..num_workers).map(|_| Arc::new(WorkerSlot::new())).collect();
        let handles = slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| {
                let slot = Arc::clone(slot);
                let fft = Arc::clone(&fft);
                let window_s = Arc::clone(&window_s);
                let window_w = Arc::clone(&window_w);
                let stop_requested = Arc::clone(&stop_requested);
                std::thread::Builder::new()
                    .name(format!("radar-worker-{idx}"))
                    .spawn(move || worker_loop(&slot, &fft, &window_s, &window_w, &stop_requested))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        WorkerPool { slots, handles }
    }

    pub fn slot(&self, index: usize) -> &Arc<WorkerSlot> {
        &self.slots[index]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Signals every worker to stop and joins them.
    pub fn stop(self) {
        for slot in &self.slots {
            slot.request_stop();
        }
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(slot: &WorkerSlot, fft: &FftEngine, window_s: &[f32], window_w: &[f32], stop_requested: &AtomicBool) {
    loop {
        match slot.wait_for_task(Duration::from_millis(500)) {
            WaitOutcome::Ready(task) => {
                let result = process_task(task, fft, window_s, window_w);
                slot.complete(result);
            }
            WaitOutcome::Stop => break,
            WaitOutcome::Timeout => {
                if stop_requested.load(Ordering::Relaxed) {
                    break;
                }
                debug!("worker idle, no task within timeout");
            }
        }
    }
}

fn process_task(task: WorkerTask, fft: &FftEngine, window_s: &[f32], window_w: &[f32]) -> WorkerResult {
    let s = task.params.samples_per_wri;
    let w = task.params.wris_per_cpi;
    let mut data = task.input;
    debug_assert_eq!(data.len(), s * w);

    for row in 0..w {
        let wgt_w = window_w[row];
        for col in 0..s {
            let idx = row * s + col;
            let calibrated = task.coeffs.apply(data[idx], col);
            data[idx] = calibrated.scale(window_s[col] * wgt_w);
        }
    }

    fft.transform_2d(&mut data);

    let mut log_power = vec![0f32; s * w];
    let mut max_val = f32::MIN;
    let mut max_idx = 0usize;
    for (i, z) in data.iter().enumerate() {
        let p = 10.0 * (z.re * z.re + z.im * z.im + 1e-15).log10();
        log_power[i] = p;
        if p > max_val {
            max_val = p;
            max_idx = i;
        }
    }

    let peak_range_idx = max_idx % s;
    let peak_doppler_idx = max_idx / s;
    let frac = doppler_centroid(&data, s, w, peak_range_idx, peak_doppler_idx);

    WorkerResult {
        params: task.params,
        channel: task.channel,
        processed: ProcessedChannel {
            log_power,
            peak_range_idx,
            peak_doppler_idx,
            peak_doppler_frac: frac,
            peak_amplitude_db: max_val,
            peak_velocity_mps: 0.0,
        },
    }
}

/// Three-point quadratic interpolation around the Doppler peak:
/// `delta = cal * Re{(a - c) / (2b + a + c)}`, skipped at Doppler edges.
fn doppler_centroid(data: &[ComplexSample], s: usize, w: usize, range_idx: usize, doppler_idx: usize) -> f32 {
    if doppler_idx == 0 || doppler_idx + 1 >= w {
        return 0.0;
    }
    let a = data[(doppler_idx - 1) * s + range_idx];
    let b = data[doppler_idx * s + range_idx];
    let c = data[(doppler_idx + 1) * s + range_idx];
    let denom = b.scale(2.0) + a + c;
    if denom.norm() < 1e-12 {
        return 0.0;
    }
    (PEAK_INTERP_CAL_HAMMING * ((a - c) / denom).re).clamp(-0.5, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::hamming;
    use std::f32::consts::PI;

    fn make_tone(s: usize, w: usize, doppler_bin: f64, amp: f32) -> Vec<ComplexSample> {
        (0..w)
            .flat_map(|k| {
                let phase = 2.0 * PI as f64 * doppler_bin * k as f64 / w as f64;
                (0..s).map(move |_| ComplexSample::new(amp * phase.cos() as f32, amp * phase.sin() as f32))
            })
            .collect()
    }

    #[test]
    fn integer_bin_tone_has_zero_fractional_offset() {
        let s = 16;
        let w = 64;
        let fft = FftEngine::new(s, w).unwrap();
        let window_s = vec![1.0; s];
        let window_w = vec![1.0; w];
        let task = WorkerTask {
            params: CpiParams {
                tov_tics: 0,
                block_id: 0,
                adc_frame_count: 0,
                sample_rate: 48_000.0,
                samples_per_wri: s,
                wris_per_cpi: w,
                num_channels: 1,
                data_kind: crate::types::DataKind::ComplexIq,
            },
            channel: 0,
            coeffs: CalibrationCoeffs::identity(),
            input: make_tone(s, w, 10.0, 1.0),
        };
        let result = process_task(task, &fft, &window_s, &window_w);
        assert_eq!(result.processed.peak_doppler_idx, 10);
        assert!(result.processed.peak_doppler_frac.abs() < 1e-3);
    }

    #[test]
    fn fractional_bin_tone_recovers_offset_after_windowing() {
        let s = 16;
        let w = 128;
        let fft = FftEngine::new(s, w).unwrap();
        let window_s = vec![1.0; s];
        let window_w = hamming(w);
        let delta = 0.3;
        let task = WorkerTask {
            params: CpiParams {
                tov_tics: 0,
                block_id: 0,
                adc_frame_count: 0,
                sample_rate: 48_000.0,
                samples_per_wri: s,
                wris_per_cpi: w,
                num_channels: 1,
                data_kind: crate::types::DataKind::ComplexIq,
            },
            channel: 0,
            coeffs: CalibrationCoeffs::identity(),
            input: make_tone(s, w, 20.0 + delta as f64, 1.0),
        };
        let result = process_task(task, &fft, &window_s, &window_w);
        assert_eq!(result.processed.peak_doppler_idx, 20);
        assert!(
            (result.processed.peak_doppler_frac - delta).abs() < 0.05,
            "frac = {}",
            result.processed.peak_doppler_frac
        );
    }

    #[test]
    fn silent_input_sits_at_noise_floor() {
        let s = 8;
        let w = 16;
        let fft = FftEngine::new(s, w).unwrap();
        let window_s = vec![1.0; s];
        let window_w = vec![1.0; w];
        let task = WorkerTask {
            params: CpiParams {
                tov_tics: 0,
                block_id: 0,
                adc_frame_count: 0,
                sample_rate: 48_000.0,
                samples_per_wri: s,
                wris_per_cpi: w,
                num_channels: 1,
                data_kind: crate::types::DataKind::ComplexIq,
            },
            channel: 0,
            coeffs: CalibrationCoeffs::identity(),
            input: vec![ComplexSample::new(0.0, 0.0); s * w],
        };
        let result = process_task(task, &fft, &window_s, &window_w);
        assert!((result.processed.peak_amplitude_db - (-150.0)).abs() < 1.0);
    }
}
