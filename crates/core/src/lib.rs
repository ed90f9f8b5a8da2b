//! # radar-core
//!
//! Concurrent signal-processing pipeline for a coherent radar receiver: ADC
//! samples come in over a fixed-capacity ring buffer, get sharded by channel
//! across a worker pool that windows, calibrates, 2D-FFTs and peak-searches
//! each coherent processing interval, and the results fan back in for display
//! formatting and optional recording.
//!
//! ## Architecture
//!
//! - [`ring::RingBuffer`] — producer/consumer handoff from the ADC source
//! - [`dispatcher::Dispatcher`] — per-CPI state machine: load, shard, calibrate
//! - [`raw_cpi::RawCpiBuffer`] — overlapping-CPI raw sample storage per channel
//! - [`worker`] — windowing, calibration application, 2D FFT, peak search
//! - [`calibration`] — adaptive DC-offset and whitening-transform estimation
//! - [`gather::GatherStage`] — fan-in in dispatcher cursor order
//! - [`display::DisplayFormatter`] — scrolling DTI, paletted RDI, colormaps
//! - [`command::CommandState`] — the single mutator entry point for operator input
//! - [`sinks`] — raw/processed recorders and the optional database sink
//! - [`pipeline::Pipeline`] — wires every stage together and owns every thread
//! - [`config::Config`] — immutable configuration record
//! - [`error::RadarError`] — typed error taxonomy

pub mod calibration;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod display;
pub mod error;
pub mod fft;
pub mod gather;
pub mod pipeline;
pub mod raw_cpi;
pub mod ring;
pub mod sinks;
pub mod time;
pub mod types;
pub mod window;
pub mod worker;

pub use config::Config;
pub use error::{RadarError, Result};
pub use pipeline::Pipeline;
