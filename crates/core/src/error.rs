//! Typed error taxonomy for the radar pipeline.
//!
//! Variants are grouped by how a caller is expected to react rather than by
//! which module raised them: [`RadarError::is_fatal`] tells `main` whether to
//! exit, everything else is meant to be logged and recovered from at the call
//! site. Transient conditions (a worker-wait timeout, a dropped calibration
//! snapshot) are not represented here at all — they are plain log lines, the
//! same way the originating system treated them.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, RadarError>;

#[derive(Debug, thiserror::Error)]
pub enum RadarError {
    #[error("allocation failed while sizing {what} ({bytes} bytes)")]
    Allocation { what: &'static str, bytes: usize },

    #[error("FFT plan creation failed for length {len}: {reason}")]
    FftPlan { len: usize, reason: String },

    #[error("ring buffer could not be initialized: {0}")]
    RingInit(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read configuration file {path:?}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("calibration covariance was not positive definite, keeping previous transform")]
    NonPositiveDefinite,

    #[error("window file {path:?} missing or unreadable, falling back to Hamming")]
    WindowFileMissing { path: PathBuf },

    #[error("failed to open recorder output {path:?}: {source}")]
    RecorderOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RadarError {
    /// Whether this error should abort startup rather than be logged and
    /// recovered from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RadarError::Allocation { .. }
                | RadarError::FftPlan { .. }
                | RadarError::RingInit(_)
                | RadarError::Config(_)
                | RadarError::ConfigIo { .. }
                | RadarError::ConfigParse { .. }
        )
    }

    /// Process exit code for a fatal error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RadarError::Config(_) | RadarError::ConfigIo { .. } | RadarError::ConfigParse { .. } => 1,
            RadarError::FftPlan { .. } => 4,
            RadarError::Allocation { .. } => 5,
            RadarError::RingInit(_) => 6,
            _ => 1,
        }
    }
}
