//! Top-level wiring: owns every thread and the shared stop flag, and
//! sequences startup/shutdown so the ring comes up first and the display
//! stage tears down first. Grounded in `RadarMain.cpp`'s `main()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::info;

use crate::calibration::{spawn_estimator_thread, CalMode, CalibrationChannel, CalibrationEstimator};
use crate::command::CommandState;
use crate::config::Config;
use crate::dispatcher::{Dispatcher, SimInjector};
use crate::display::{DisplayFormatter, DisplaySurfaces};
use crate::error::{RadarError, Result};
use crate::fft::FftEngine;
use crate::gather::{DisplayQueue, GatherStage};
use crate::ring::RingBuffer;
use crate::sinks::{DbSink, ProcessedRecorder, RawRecorder};
use crate::window::load_window;
use crate::worker::WorkerPool;

pub struct Pipeline {
    stop_requested: Arc<AtomicBool>,
    ring: Arc<RingBuffer>,
    command_state: Arc<CommandState>,
    display_surfaces: Arc<std::sync::Mutex<DisplaySurfaces>>,
    cal_channel: Arc<CalibrationChannel>,
    /// Kept alive only so `shutdown` can try to reclaim sole ownership once
    /// the gather and dispatcher threads (the pool's other referents) have
    /// been joined and have dropped their clones.
    pool: Arc<WorkerPool>,
    dispatcher_handle: Option<JoinHandle<()>>,
    calibration_handle: Option<JoinHandle<()>>,
    gather_handle: Option<JoinHandle<()>>,
    display_handle: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// `command_state` is supplied by the caller (rather than built
    /// internally) so a sim injector constructed before `start` is called can
    /// share the same instance the display and dispatcher threads read from.
    pub fn start(
        config: Arc<Config>,
        command_state: Arc<CommandState>,
        raw_recorder: Arc<dyn RawRecorder>,
        processed_recorder: Arc<dyn ProcessedRecorder>,
        db_sink: Arc<dyn DbSink>,
        sim: Option<Box<dyn SimInjector>>,
    ) -> Result<Pipeline> {
        let num_channels = config.num_channels();
        let block_len = config.samples_per_wri * config.wris_per_block * num_channels * 2;
        let ring = Arc::new(RingBuffer::new(config.ring_capacity, block_len));

        let fft = Arc::new(FftEngine::new(config.samples_per_wri, config.wris_per_cpi).map_err(|e| RadarError::FftPlan {
            len: config.samples_per_wri.max(config.wris_per_cpi),
            reason: e.to_string(),
        })?);
        let window_dir = config.window_dir.as_ref().map(std::path::Path::new);
        let window_s = Arc::new(load_window(window_dir, config.samples_per_wri, config.window_sidelobe_db));
        let window_w = Arc::new(crate::window::hamming(config.wris_per_cpi));

        let stop_requested = Arc::new(AtomicBool::new(false));

        let pool = Arc::new(WorkerPool::start(config.num_threads, Arc::clone(&fft), window_s, window_w, Arc::clone(&stop_requested)));

        let cal_mode = if config.dc_cal_only { CalMode::DcOnly } else { CalMode::PerRangeBin };
        let estimator = CalibrationEstimator::new(num_channels, config.samples_per_wri, config.fade_mem_val, cal_mode);
        let cal_channel = Arc::new(CalibrationChannel::new());
        let calibration_handle = spawn_estimator_thread(Arc::clone(&cal_channel), estimator, Arc::clone(&stop_requested));

        let display_queue = Arc::new(DisplayQueue::new());

        let mut display = DisplayFormatter::new(
            config.samples_per_wri,
            config.wris_per_cpi,
            config.dti_height,
            num_channels,
            config.scale_data_db,
            Arc::clone(&command_state),
            Arc::clone(&db_sink),
            Arc::clone(&display_queue),
            Arc::clone(&stop_requested),
        );
        let display_surfaces = display.shared_surfaces();
        let display_handle = std::thread::Builder::new()
            .name("radar-display".into())
            .spawn(move || display.run())
            .expect("failed to spawn display thread");

        let mut gather = GatherStage::new(
            Arc::clone(&pool),
            Arc::clone(&display_queue),
            Arc::clone(&processed_recorder),
            num_channels,
            config.center_freq_hz,
            config.wris_per_cpi,
            Arc::clone(&stop_requested),
        );
        let gather_handle = std::thread::Builder::new()
            .name("radar-gather".into())
            .spawn(move || gather.run())
            .expect("failed to spawn gather thread");

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&config),
            Arc::clone(&ring),
            Arc::clone(&pool),
            Arc::clone(&cal_channel),
            Arc::clone(&raw_recorder),
            sim,
            Arc::clone(&stop_requested),
        );
        let dispatcher_handle = std::thread::Builder::new()
            .name("radar-dispatcher".into())
            .spawn(move || dispatcher.run())
            .expect("failed to spawn dispatcher thread");

        Ok(Pipeline {
            stop_requested,
            ring,
            command_state,
            display_surfaces,
            cal_channel,
            pool,
            dispatcher_handle: Some(dispatcher_handle),
            calibration_handle: Some(calibration_handle),
            gather_handle: Some(gather_handle),
            display_handle: Some(display_handle),
        })
    }

    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    pub fn command_state(&self) -> &Arc<CommandState> {
        &self.command_state
    }

    pub fn display_surfaces(&self) -> Arc<std::sync::Mutex<DisplaySurfaces>> {
        Arc::clone(&self.display_surfaces)
    }

    /// Shuts every stage down in reverse dependency order: display and
    /// gather first (so nothing is left blocking on a consumer that quit),
    /// then the worker pool (now reclaimable, since gather and dispatcher
    /// have dropped their `Arc<WorkerPool>` clones), then the calibration
    /// estimator, then the dispatcher's own thread handle last.
    pub fn shutdown(mut self) {
        self.stop_requested.store(true, Ordering::Relaxed);
        self.cal_channel.request_stop();

        if let Some(handle) = self.display_handle.take() {
            join_one("display", handle);
        }
        if let Some(handle) = self.gather_handle.take() {
            join_one("gather", handle);
        }
        if let Some(handle) = self.dispatcher_handle.take() {
            join_one("dispatcher", handle);
        }
        match Arc::try_unwrap(self.pool) {
            Ok(pool) => pool.stop(),
            Err(_) => log::warn!("worker pool still shared at shutdown, workers will stop via their own idle timeout"),
        }
        if let Some(handle) = self.calibration_handle.take() {
            join_one("calibration", handle);
        }
        info!("pipeline shutdown complete");
    }
}

fn join_one(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::warn!("{name} thread panicked during shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{NoOpDbSink, NoOpProcessedRecorder, NoOpRawRecorder};

    #[test]
    fn pipeline_starts_and_shuts_down_cleanly() {
        let mut config = Config::default();
        config.num_radars = 1;
        config.num_threads = 2;
        config.samples_per_wri = 8;
        config.wris_per_cpi = 8;
        config.wris_per_block = 8;
        config.ring_capacity = 2;
        let config = Arc::new(config);

        let command_state = Arc::new(CommandState::new(config.min_ref_db, 40.0));
        let pipeline = Pipeline::start(config, command_state, Arc::new(NoOpRawRecorder), Arc::new(NoOpProcessedRecorder), Arc::new(NoOpDbSink), None).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        pipeline.shutdown();
    }
}
