//! Dispatcher state machine.
//!
//! Owns the raw CPI buffer and the calibration coefficients currently in
//! effect; pulls blocks off the ring, shards each CPI by channel across the
//! worker pool in round-robin cursor order, and exchanges snapshots with the
//! calibration estimator. Grounded in `processMaster.cpp`'s `Process_data`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::calibration::CalibrationChannel;
use crate::config::Config;
use crate::raw_cpi::RawCpiBuffer;
use crate::ring::RingBuffer;
use crate::sinks::RawRecorder;
use crate::time::DataTics;
use crate::types::{CalibrationCoeffs, ComplexSample, CpiParams, DataKind};
use crate::worker::{WorkerPool, WorkerTask};

/// How often (in CPIs) a calibration snapshot is offered to the estimator.
const CALIBRATION_PERIOD_CPIS: u64 = 50;
const RING_WAIT_TIMEOUT: Duration = Duration::from_millis(200);

/// Injects a simulated target into the raw buffer's tail region for one
/// channel, standing in for `RawCPIBuffer::add_sim`'s caller. Used by the
/// frontend's simulated-ADC mode and by overlap/tone test scenarios; real
/// deployments pass `None`.
pub trait SimInjector: Send {
    fn generate(&mut self, channel: usize, block_id: u64, len: usize) -> Vec<ComplexSample>;
}

pub struct Dispatcher {
    config: Arc<Config>,
    ring: Arc<RingBuffer>,
    raw: RawCpiBuffer,
    pool: Arc<WorkerPool>,
    cal_channel: Arc<CalibrationChannel>,
    cal_coeffs: Vec<CalibrationCoeffs>,
    raw_recorder: Arc<dyn RawRecorder>,
    sim: Option<Box<dyn SimInjector>>,
    /// First observed device timestamp (τ₀), latched on the first block and
    /// used to compute every subsequent `tov_tics` relative to it.
    device_anchor: Option<DataTics>,
    cursor: usize,
    cal_cursor: usize,
    block_id: u64,
    stop_requested: Arc<AtomicBool>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        ring: Arc<RingBuffer>,
        pool: Arc<WorkerPool>,
        cal_channel: Arc<CalibrationChannel>,
        raw_recorder: Arc<dyn RawRecorder>,
        sim: Option<Box<dyn SimInjector>>,
        stop_requested: Arc<AtomicBool>,
    ) -> Dispatcher {
        let num_channels = config.num_channels();
        let raw = RawCpiBuffer::new(config.samples_per_wri, config.wris_per_cpi, config.wris_per_block, num_channels);
        Dispatcher {
            cal_coeffs: (0..num_channels).map(|_| CalibrationCoeffs::identity()).collect(),
            config,
            ring,
            raw,
            pool,
            cal_channel,
            raw_recorder,
            sim,
            device_anchor: None,
            cursor: 0,
            cal_cursor: 0,
            block_id: 0,
            stop_requested,
        }
    }

    /// Runs the `RUN` state until `stop_requested` is set, then returns.
    pub fn run(&mut self) {
        while !self.stop_requested.load(Ordering::Relaxed) {
            let Some(read_idx) = self.ring.wait_block(RING_WAIT_TIMEOUT) else {
                continue;
            };

            let data_kind = if self.config.receive_real_only { DataKind::RealOnly } else { DataKind::ComplexIq };
            let (samples, timestamp, frame_count) = self.ring.read_slot(read_idx, |s, ts, fc| (s.to_vec(), ts, fc));

            if self.raw_recorder.is_enabled() {
                if let Err(e) = self.raw_recorder.record(&samples) {
                    warn!("raw recorder write failed, disabling: {e}");
                }
            }

            let offset = self.raw.load(&samples, data_kind);
            if let Some(sim) = self.sim.as_mut() {
                let block_samples = self.config.samples_per_wri * self.config.wris_per_block;
                for channel in 0..self.config.num_channels() {
                    let sim_slice = sim.generate(channel, self.block_id, block_samples);
                    self.raw.add_sim(channel, &sim_slice, offset);
                }
            }

            self.ring.release();

            let anchor = *self.device_anchor.get_or_insert(timestamp);
            let params = CpiParams {
                tov_tics: timestamp - anchor,
                block_id: self.block_id,
                adc_frame_count: frame_count,
                sample_rate: self.config.sample_rate,
                samples_per_wri: self.config.samples_per_wri,
                wris_per_cpi: self.config.wris_per_cpi,
                num_channels: self.config.num_channels(),
                data_kind,
            };

            for channel in 0..self.config.num_channels() {
                let mut input = vec![ComplexSample::new(0.0, 0.0); self.raw.channel_len()];
                self.raw.copy_out(channel, &mut input);
                let task = WorkerTask { params, channel, coeffs: self.cal_coeffs[channel].clone(), input };
                if !self.pool.slot(self.cursor).dispatch(task, &self.stop_requested) {
                    warn!("dropped task for channel {channel} at block {}, shutting down", self.block_id);
                }
                self.cursor = (self.cursor + 1) % self.pool.len();
            }

            self.block_id += 1;

            if self.block_id % CALIBRATION_PERIOD_CPIS == 0 {
                let mut snapshot = vec![ComplexSample::new(0.0, 0.0); self.raw.channel_len()];
                self.raw.copy_out(self.cal_cursor, &mut snapshot);
                if !self.cal_channel.try_submit_snapshot(self.cal_cursor, snapshot) {
                    warn!("calibration estimator busy, dropping snapshot for channel {}", self.cal_cursor);
                }
                self.cal_cursor = (self.cal_cursor + 1) % self.config.num_channels();
            }

            if let Some((channel, coeffs)) = self.cal_channel.try_take_ready() {
                self.cal_coeffs[channel] = coeffs;
            }

            self.raw.shift_up();
        }
        info!("dispatcher stopping after {} CPIs", self.block_id);
    }

    pub fn block_id(&self) -> u64 {
        self.block_id
    }
}
