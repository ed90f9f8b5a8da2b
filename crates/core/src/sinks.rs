//! Trait-like sinks the pipeline writes to without knowing their concrete
//! identity. `DisplayFormatter`'s `Palette` sink lives in `display.rs`; this
//! module covers the raw/processed recorders and the (intentionally minimal)
//! database sink.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use hound::{SampleFormat, WavSpec, WavWriter};
use log::{info, warn};

use crate::error::{RadarError, Result};
use crate::time::format_processed_log_timestamp;
use crate::types::ProcessedCpi;

pub trait RawRecorder: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn record(&self, interleaved_samples: &[f32]) -> Result<()>;
}

pub trait ProcessedRecorder: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn record(&self, cpi: &ProcessedCpi) -> Result<()>;
}

/// Optional database sink for the latest target Doppler lines. No concrete
/// database schema is part of this crate; the no-op implementation is the
/// only one shipped.
pub trait DbSink: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn publish(&self, channel: usize, target_line: &[f32]);
}

pub struct NoOpRawRecorder;
impl RawRecorder for NoOpRawRecorder {
    fn is_enabled(&self) -> bool {
        false
    }
    fn set_enabled(&self, _enabled: bool) {}
    fn record(&self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }
}

pub struct NoOpProcessedRecorder;
impl ProcessedRecorder for NoOpProcessedRecorder {
    fn is_enabled(&self) -> bool {
        false
    }
    fn set_enabled(&self, _enabled: bool) {}
    fn record(&self, _cpi: &ProcessedCpi) -> Result<()> {
        Ok(())
    }
}

pub struct NoOpDbSink;
impl DbSink for NoOpDbSink {
    fn is_enabled(&self) -> bool {
        false
    }
    fn publish(&self, _channel: usize, _target_line: &[f32]) {}
}

/// Raw data capture: interleaved-channel floating-point PCM, one file at a
/// time, rotated when open time exceeds `max_file_sec`. Grounded in
/// `sensorIO.cpp`'s capture path; written with `hound` as 32-bit float WAV.
pub struct WavRawRecorder {
    enabled: AtomicBool,
    dir: PathBuf,
    sample_rate: u32,
    channels: u16,
    max_file_sec: f64,
    state: Mutex<WavState>,
}

struct WavState {
    writer: Option<WavWriter<BufWriter<File>>>,
    opened_at: Instant,
}

impl WavRawRecorder {
    pub fn new(dir: PathBuf, sample_rate: u32, channels: u16, max_file_sec: f64) -> WavRawRecorder {
        WavRawRecorder {
            enabled: AtomicBool::new(false),
            dir,
            sample_rate,
            channels,
            max_file_sec,
            state: Mutex::new(WavState { writer: None, opened_at: Instant::now() }),
        }
    }

    fn open_new_file(&self) -> Result<WavWriter<BufWriter<File>>> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!("raw_{}.wav", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        let path = self.dir.join(name);
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        WavWriter::create(&path, spec).map_err(|e| RadarError::RecorderOpen {
            path,
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })
    }
}

impl RawRecorder for WavRawRecorder {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            if let Ok(mut state) = self.state.lock() {
                state.writer = None;
            }
        }
    }

    fn record(&self, interleaved_samples: &[f32]) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        let needs_rotation = state.writer.is_none() || state.opened_at.elapsed().as_secs_f64() > self.max_file_sec;
        if needs_rotation {
            match self.open_new_file() {
                Ok(writer) => {
                    state.writer = Some(writer);
                    state.opened_at = Instant::now();
                }
                Err(e) => {
                    warn!("failed to open raw recorder file, disabling recording: {e}");
                    drop(state);
                    self.set_enabled(false);
                    return Err(e);
                }
            }
        }
        let writer = state.writer.as_mut().expect("writer opened above");
        for &sample in interleaved_samples {
            writer
                .write_sample(sample)
                .map_err(|e| RadarError::RecorderOpen { path: self.dir.clone(), source: std::io::Error::new(std::io::ErrorKind::Other, e) })?;
        }
        Ok(())
    }
}

/// Processed-data log: one line per CPI, `block_id, <timestamp>` followed by
/// `C` pairs of `peakDoppler_m_s, peakAmplitude_dB`.
pub struct TextProcessedRecorder {
    enabled: AtomicBool,
    dir: PathBuf,
    max_file_sec: f64,
    state: Mutex<TextState>,
}

struct TextState {
    file: Option<BufWriter<File>>,
    opened_at: Instant,
}

impl TextProcessedRecorder {
    pub fn new(dir: PathBuf, max_file_sec: f64) -> TextProcessedRecorder {
        TextProcessedRecorder {
            enabled: AtomicBool::new(false),
            dir,
            max_file_sec,
            state: Mutex::new(TextState { file: None, opened_at: Instant::now() }),
        }
    }

    fn open_new_file(&self) -> Result<BufWriter<File>> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!("proc_{}.txt", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        let path = self.dir.join(name);
        let file = File::create(&path).map_err(|source| RadarError::RecorderOpen { path, source })?;
        Ok(BufWriter::new(file))
    }
}

impl ProcessedRecorder for TextProcessedRecorder {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            if let Ok(mut state) = self.state.lock() {
                state.file = None;
            }
        }
    }

    fn record(&self, cpi: &ProcessedCpi) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        use std::io::Write;

        let mut state = self.state.lock().unwrap();
        let needs_rotation = state.file.is_none() || state.opened_at.elapsed().as_secs_f64() > self.max_file_sec;
        if needs_rotation {
            match self.open_new_file() {
                Ok(file) => {
                    state.file = Some(file);
                    state.opened_at = Instant::now();
                }
                Err(e) => {
                    warn!("failed to open processed recorder file, disabling recording: {e}");
                    drop(state);
                    self.set_enabled(false);
                    return Err(e);
                }
            }
        }

        let epoch_wall = chrono::Utc::now() + chrono::Duration::microseconds(cpi.params.tov_tics);
        let mut line = format!("{}, {}", cpi.params.block_id, format_processed_log_timestamp(epoch_wall));
        for channel in &cpi.channels {
            line.push_str(&format!(", {:.3}, {:.2}", channel.peak_velocity_mps, channel.peak_amplitude_db));
        }
        line.push('\n');

        let file = state.file.as_mut().expect("file opened above");
        file.write_all(line.as_bytes())
            .map_err(|source| RadarError::RecorderOpen { path: self.dir.clone(), source })?;
        Ok(())
    }
}

pub fn recorder_dir_or_default(dir: Option<&str>) -> PathBuf {
    match dir {
        Some(d) => Path::new(d).to_path_buf(),
        None => std::env::temp_dir().join("radar-rtp"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CpiParams, DataKind, ProcessedChannel};

    #[test]
    fn processed_recorder_writes_a_line_when_enabled() {
        let dir = std::env::temp_dir().join(format!("radar-core-test-{}", std::process::id()));
        let recorder = TextProcessedRecorder::new(dir.clone(), 600.0);
        recorder.set_enabled(true);
        let cpi = ProcessedCpi {
            params: CpiParams {
                tov_tics: 0,
                block_id: 7,
                adc_frame_count: 0,
                sample_rate: 48_000.0,
                samples_per_wri: 4,
                wris_per_cpi: 4,
                num_channels: 1,
                data_kind: DataKind::ComplexIq,
            },
            channels: vec![ProcessedChannel {
                log_power: vec![],
                peak_range_idx: 0,
                peak_doppler_idx: 0,
                peak_doppler_frac: 0.0,
                peak_amplitude_db: -10.0,
                peak_velocity_mps: 1.5,
            }],
        };
        recorder.record(&cpi).unwrap();
        recorder.set_enabled(false);
        let entries: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert!(!entries.is_empty());
        let _ = info!("wrote to {dir:?}");
    }

    #[test]
    fn disabled_recorders_are_no_ops() {
        let raw = NoOpRawRecorder;
        assert!(raw.record(&[1.0, 2.0]).is_ok());
        assert!(!raw.is_enabled());
        let db = NoOpDbSink;
        db.publish(0, &[0.0]);
        assert!(!db.is_enabled());
    }
}
