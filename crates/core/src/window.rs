//! Sidelobe-control windows applied before the 2D FFT.
//!
//! Ground truth is `processWorkers.cpp`'s `hamming()` and `load_window()`:
//! a plain Hamming window is the default, and a window file (plain ASCII,
//! one float per line) can override it. A missing or unreadable file
//! is a recoverable condition — fall back to Hamming and log a warning,
//! never fail the pipeline over it.

use std::path::{Path, PathBuf};

use log::warn;

/// `a - b*cos(2*pi*i/(n-1))` with the coefficients from the originating
/// `hamming()` routine (not quite the textbook 0.54/0.46 split).
pub fn hamming(n: usize) -> Vec<f32> {
    const A: f32 = 0.53836;
    const B: f32 = 0.46164;
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| A - B * (2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos())
        .collect()
}

/// Filename convention: `win<N>s<sll>dB.txt`.
pub fn window_file_path(dir: &Path, n: usize, sidelobe_db: f64) -> PathBuf {
    dir.join(format!("win{n}s{sll}dB.txt", n = n, sll = sidelobe_db as i64))
}

/// Loads a window of length `n` from `dir` if present, otherwise falls back
/// to Hamming with a logged warning. `dir = None` always yields Hamming.
pub fn load_window(dir: Option<&Path>, n: usize, sidelobe_db: f64) -> Vec<f32> {
    let Some(dir) = dir else {
        return hamming(n);
    };
    let path = window_file_path(dir, n, sidelobe_db);
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            let values: Vec<f32> = text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| l.trim().parse::<f32>().ok())
                .collect();
            if values.len() == n {
                values
            } else {
                warn!(
                    "window file {path:?} had {} values, expected {n}; falling back to Hamming",
                    values.len()
                );
                hamming(n)
            }
        }
        Err(_) => {
            warn!("window file {path:?} missing or unreadable; falling back to Hamming");
            hamming(n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_endpoints_are_symmetric_and_low() {
        let w = hamming(8);
        assert_eq!(w.len(), 8);
        assert!((w[0] - w[7]).abs() < 1e-6);
        assert!(w[0] < w[4]);
    }

    #[test]
    fn missing_window_file_falls_back_to_hamming() {
        let dir = std::env::temp_dir().join("radar-core-test-nonexistent-window-dir");
        let w = load_window(Some(&dir), 16, 80.0);
        assert_eq!(w, hamming(16));
    }

    #[test]
    fn no_dir_is_hamming() {
        assert_eq!(load_window(None, 4, 80.0), hamming(4));
    }
}
