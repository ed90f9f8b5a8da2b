//! Gather stage: fan-in in lockstep with the dispatcher's cursor.
//!
//! The gather stage is the sole consumer of a worker's output, so a slow
//! display stage throttles the dispatcher transitively through its
//! capacity-one queue. Grounded in `processWorkers.cpp`'s `OutputWorkerFunction`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::warn;

use crate::types::ProcessedCpi;
use crate::worker::WorkerPool;

const SLOT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);
const PUSH_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Unambiguous Doppler velocity scale, `c * f_s / (4 * S * f_c)` (GLOSSARY).
const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

struct QueueInner {
    item: Option<ProcessedCpi>,
    stop: bool,
}

/// Single-slot blocking handoff from the gather stage to the display stage.
/// A full slot blocks the pusher, giving the display stage the same
/// backpressure lever the gather stage has over the workers.
pub struct DisplayQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl DisplayQueue {
    pub fn new() -> DisplayQueue {
        DisplayQueue { inner: Mutex::new(QueueInner { item: None, stop: false }), cv: Condvar::new() }
    }

    pub fn push(&self, cpi: ProcessedCpi, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        while inner.item.is_some() && !inner.stop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(inner, remaining).unwrap();
            inner = guard;
        }
        if inner.stop {
            return false;
        }
        inner.item = Some(cpi);
        self.cv.notify_all();
        true
    }

    pub fn pop(&self, timeout: Duration) -> Option<ProcessedCpi> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.item.take() {
                self.cv.notify_all();
                return Some(item);
            }
            if inner.stop {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self.cv.wait_timeout(inner, remaining).unwrap();
            inner = guard;
        }
    }

    pub fn request_stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stop = true;
        self.cv.notify_all();
    }
}

impl Default for DisplayQueue {
    fn default() -> DisplayQueue {
        DisplayQueue::new()
    }
}

pub struct GatherStage {
    pool: Arc<WorkerPool>,
    output: Arc<DisplayQueue>,
    processed_recorder: Arc<dyn crate::sinks::ProcessedRecorder>,
    num_channels: usize,
    center_freq_hz: f64,
    wris_per_cpi: usize,
    cursor: usize,
    in_progress: Option<ProcessedCpi>,
    stop_requested: Arc<AtomicBool>,
}

impl GatherStage {
    pub fn new(
        pool: Arc<WorkerPool>,
        output: Arc<DisplayQueue>,
        processed_recorder: Arc<dyn crate::sinks::ProcessedRecorder>,
        num_channels: usize,
        center_freq_hz: f64,
        wris_per_cpi: usize,
        stop_requested: Arc<AtomicBool>,
    ) -> GatherStage {
        GatherStage { pool, output, processed_recorder, num_channels, center_freq_hz, wris_per_cpi, cursor: 0, in_progress: None, stop_requested }
    }

    pub fn run(&mut self) {
        while !self.stop_requested.load(Ordering::Relaxed) {
            let Some(mut result) = self.pool.slot(self.cursor).wait_for_result(SLOT_WAIT_TIMEOUT) else {
                continue;
            };

            let unamb_doppler = unambiguous_doppler(result.params.sample_rate, result.params.samples_per_wri as f64, self.center_freq_hz);
            let w = self.wris_per_cpi as f32;
            result.processed.peak_velocity_mps =
                unamb_doppler * 2.0 * (result.processed.peak_doppler_idx as f32 + result.processed.peak_doppler_frac - w / 2.0) / w;

            let channel = result.channel;
            let cpi = self.in_progress.get_or_insert_with(|| ProcessedCpi {
                params: result.params,
                channels: Vec::with_capacity(self.num_channels),
            });
            debug_assert_eq!(cpi.params.block_id, result.params.block_id);
            cpi.channels.push(result.processed);

            self.cursor = (self.cursor + 1) % self.pool.len();

            if channel == self.num_channels - 1 {
                let cpi = self.in_progress.take().expect("cpi filled above");
                if self.processed_recorder.is_enabled() {
                    if let Err(e) = self.processed_recorder.record(&cpi) {
                        warn!("processed recorder write failed: {e}");
                    }
                }
                if !self.output.push(cpi, PUSH_WAIT_TIMEOUT) {
                    warn!("display stage did not accept CPI before shutdown/timeout");
                }
            }
        }
    }
}

fn unambiguous_doppler(sample_rate: f64, samples_per_wri: f64, center_freq_hz: f64) -> f32 {
    (SPEED_OF_LIGHT_M_S * sample_rate / (4.0 * samples_per_wri * center_freq_hz)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_round_trips_an_item() {
        let queue = DisplayQueue::new();
        let cpi = ProcessedCpi {
            params: crate::types::CpiParams {
                tov_tics: 0,
                block_id: 3,
                adc_frame_count: 0,
                sample_rate: 48_000.0,
                samples_per_wri: 4,
                wris_per_cpi: 4,
                num_channels: 1,
                data_kind: crate::types::DataKind::ComplexIq,
            },
            channels: vec![],
        };
        assert!(queue.push(cpi, Duration::from_millis(100)));
        let popped = queue.pop(Duration::from_millis(100)).unwrap();
        assert_eq!(popped.params.block_id, 3);
    }

    #[test]
    fn queue_pop_times_out_when_empty() {
        let queue = DisplayQueue::new();
        assert!(queue.pop(Duration::from_millis(20)).is_none());
    }
}
