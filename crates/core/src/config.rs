//! Immutable configuration record.
//!
//! Loaded once from a TOML file, optionally patched with CLI overrides by the
//! frontend, then validated. Field names and defaults follow `radarConfig.cpp`
//! in the originating system (an INI reader over the same settings).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RadarError, Result};

fn default_num_radars() -> usize {
    1
}
fn default_sample_rate() -> f64 {
    48_000.0
}
fn default_samples_per_wri() -> usize {
    64
}
fn default_wris_per_cpi() -> usize {
    128
}
fn default_wris_per_block() -> usize {
    32
}
fn default_num_threads() -> usize {
    16
}
fn default_center_freq_hz() -> f64 {
    24.125e9
}
fn default_bandwidth_hz() -> f64 {
    100.0e6
}
fn default_fade_mem_val() -> f64 {
    0.95
}
fn default_dti_height() -> usize {
    256
}
fn default_scale_data_db() -> f64 {
    0.0
}
fn default_min_ref_db() -> f64 {
    -100.0
}
fn default_max_raw_file_sec() -> f64 {
    600.0
}
fn default_max_proc_file_sec() -> f64 {
    86_400.0
}
fn default_ring_capacity() -> usize {
    8
}
fn default_window_sidelobe_db() -> f64 {
    80.0
}

/// Optional settings for the simulated ADC source used by the frontend in
/// place of a real driver binding. Not consulted by the pipeline core itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tone_bin: f64,
    #[serde(default)]
    pub amp_db: f64,
    #[serde(default = "default_noise_floor_db")]
    pub noise_floor_db: f64,
}

fn default_noise_floor_db() -> f64 {
    -60.0
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            enabled: false,
            tone_bin: 0.0,
            amp_db: -20.0,
            noise_floor_db: default_noise_floor_db(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_num_radars")]
    pub num_radars: usize,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_samples_per_wri")]
    pub samples_per_wri: usize,
    #[serde(default = "default_wris_per_cpi")]
    pub wris_per_cpi: usize,
    #[serde(default = "default_wris_per_block")]
    pub wris_per_block: usize,
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    #[serde(default = "default_center_freq_hz")]
    pub center_freq_hz: f64,
    #[serde(default = "default_bandwidth_hz")]
    pub bandwidth_hz: f64,
    #[serde(default)]
    pub receive_real_only: bool,
    #[serde(default)]
    pub dc_cal_only: bool,
    #[serde(default = "default_fade_mem_val")]
    pub fade_mem_val: f64,
    #[serde(default = "default_dti_height")]
    pub dti_height: usize,
    #[serde(default = "default_scale_data_db")]
    pub scale_data_db: f64,
    #[serde(default = "default_min_ref_db")]
    pub min_ref_db: f64,
    #[serde(default = "default_max_raw_file_sec")]
    pub max_raw_file_sec: f64,
    #[serde(default = "default_max_proc_file_sec")]
    pub max_proc_file_sec: f64,
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "default_window_sidelobe_db")]
    pub window_sidelobe_db: f64,
    #[serde(default)]
    pub window_dir: Option<String>,
    #[serde(default)]
    pub sim: SimConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_radars: default_num_radars(),
            sample_rate: default_sample_rate(),
            samples_per_wri: default_samples_per_wri(),
            wris_per_cpi: default_wris_per_cpi(),
            wris_per_block: default_wris_per_block(),
            num_threads: default_num_threads(),
            center_freq_hz: default_center_freq_hz(),
            bandwidth_hz: default_bandwidth_hz(),
            receive_real_only: false,
            dc_cal_only: false,
            fade_mem_val: default_fade_mem_val(),
            dti_height: default_dti_height(),
            scale_data_db: default_scale_data_db(),
            min_ref_db: default_min_ref_db(),
            max_raw_file_sec: default_max_raw_file_sec(),
            max_proc_file_sec: default_max_proc_file_sec(),
            ring_capacity: default_ring_capacity(),
            window_sidelobe_db: default_window_sidelobe_db(),
            window_dir: None,
            sim: SimConfig::default(),
        }
    }
}

impl Config {
    /// Number of IQ channels in the pipeline: two receivers per radar.
    pub fn num_channels(&self) -> usize {
        self.num_radars * 2
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        let cfg: Config = toml::from_str(text).map_err(|source| RadarError::ConfigParse {
            path: Path::new("<inline>").to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|source| RadarError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Config = toml::from_str(&text).map_err(|source| RadarError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Mirrors the bounds `radarConfig.cpp` enforces after reading the INI
    /// file: enough worker threads for every channel, a block that fits
    /// inside a CPI, and a smoothing factor that is actually a factor.
    pub fn validate(&self) -> Result<()> {
        if self.num_threads < 2 * self.num_radars {
            return Err(RadarError::Config(format!(
                "num_threads ({}) must be at least 2 * num_radars ({})",
                self.num_threads,
                2 * self.num_radars
            )));
        }
        if self.wris_per_block == 0 || self.wris_per_block > self.wris_per_cpi {
            return Err(RadarError::Config(format!(
                "wris_per_block ({}) must be in 1..=wris_per_cpi ({})",
                self.wris_per_block, self.wris_per_cpi
            )));
        }
        if !(self.fade_mem_val > 0.0 && self.fade_mem_val < 1.0) {
            return Err(RadarError::Config(format!(
                "fade_mem_val ({}) must be in (0, 1)",
                self.fade_mem_val
            )));
        }
        if self.samples_per_wri == 0 {
            return Err(RadarError::Config("samples_per_wri must be > 0".into()));
        }
        if self.wris_per_cpi == 0 {
            return Err(RadarError::Config("wris_per_cpi must be > 0".into()));
        }
        if self.num_radars == 0 {
            return Err(RadarError::Config("num_radars must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.num_channels(), 2);
    }

    #[test]
    fn rejects_too_few_threads() {
        let mut cfg = Config::default();
        cfg.num_radars = 4;
        cfg.num_threads = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_block_larger_than_cpi() {
        let mut cfg = Config::default();
        cfg.wris_per_block = cfg.wris_per_cpi + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_fade_mem_out_of_range() {
        let mut cfg = Config::default();
        cfg.fade_mem_val = 1.0;
        assert!(cfg.validate().is_err());
        cfg.fade_mem_val = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let cfg = Config::from_toml_str("num_radars = 2\n").unwrap();
        assert_eq!(cfg.num_radars, 2);
        assert_eq!(cfg.sample_rate, default_sample_rate());
    }
}
