//! DisplayFormatter: scrolling DTI, paletted RDI, target-line extraction.
//!
//! Grounded in `ImageDisplay.cpp` for the scroll/fftshift/target-line
//! sequence and in `colormap.cpp` for the three required palettes. `Palette`
//! is shipped as a small trait with the three tables built in rather than an
//! external collaborator, since nothing outside this crate could plausibly
//! supply the exact HOT/JET/GRAY band math.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::command::{ColorMap, CommandState};
use crate::fft::fftshift_rows;
use crate::gather::DisplayQueue;
use crate::sinks::DbSink;
use crate::types::ProcessedCpi;

const INPUT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

pub trait Palette: Send + Sync {
    fn table(&self) -> &[[u8; 3]; 256];
}

/// Black -> red -> yellow -> white, three bands of 96/96/64 entries.
pub struct HotPalette([[u8; 3]; 256]);

impl HotPalette {
    pub fn new() -> HotPalette {
        let mut table = [[0u8; 3]; 256];
        let n1 = 256 * 3 / 8;
        let n2 = 256 * 3 / 4;
        for (i, entry) in table.iter_mut().enumerate() {
            *entry = if i < n1 {
                [(i * 255 / (n1 - 1)) as u8, 0, 0]
            } else if i < n2 {
                [255, ((i - n1) * 255 / (n2 - n1 - 1)) as u8, 0]
            } else {
                [255, 255, ((i - n2) * 255 / (255 - n2)) as u8]
            };
        }
        HotPalette(table)
    }
}

impl Palette for HotPalette {
    fn table(&self) -> &[[u8; 3]; 256] {
        &self.0
    }
}

/// Dark blue -> cyan -> yellow -> red, the standard piecewise-linear "jet"
/// construction: each channel is two clamped linear ramps, giving the five
/// visually distinct bands `colormap.cpp` builds explicitly with a
/// `LINTERP` macro.
pub struct JetPalette([[u8; 3]; 256]);

impl JetPalette {
    pub fn new() -> JetPalette {
        let mut table = [[0u8; 3]; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let x = i as f32 / 255.0;
            let r = (4.0 * x - 1.5).min(-4.0 * x + 4.5).clamp(0.0, 1.0);
            let g = (4.0 * x - 0.5).min(-4.0 * x + 3.5).clamp(0.0, 1.0);
            let b = (4.0 * x + 0.5).min(-4.0 * x + 2.5).clamp(0.0, 1.0);
            *entry = [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8];
        }
        JetPalette(table)
    }
}

impl Palette for JetPalette {
    fn table(&self) -> &[[u8; 3]; 256] {
        &self.0
    }
}

/// Linear ramp, monotonic in luminance.
pub struct GrayPalette([[u8; 3]; 256]);

impl GrayPalette {
    pub fn new() -> GrayPalette {
        let mut table = [[0u8; 3]; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let v = i as u8;
            *entry = [v, v, v];
        }
        GrayPalette(table)
    }
}

impl Palette for GrayPalette {
    fn table(&self) -> &[[u8; 3]; 256] {
        &self.0
    }
}

pub fn palette_for(kind: ColorMap) -> Box<dyn Palette> {
    match kind {
        ColorMap::Hot => Box::new(HotPalette::new()),
        ColorMap::Jet => Box::new(JetPalette::new()),
        ColorMap::Gray => Box::new(GrayPalette::new()),
    }
}

fn scale_to_byte(power_db: f32, scale_offset: f64, ref_db: f64, disp_range: f64) -> u8 {
    let v = (power_db as f64 + scale_offset - ref_db) / disp_range * 256.0;
    v.clamp(0.0, 255.0) as u8
}

/// Post-fftshift bin index for a pre-shift bin index, used to place the
/// peak-overlay marker on the already-shifted target line.
fn shifted_index(idx: usize, w: usize) -> usize {
    let half = w / 2;
    if idx < half {
        idx + half
    } else {
        idx - half
    }
}

#[derive(Clone)]
pub struct ChannelSurfaces {
    /// `dti_height x wris_per_cpi` BGRA pixels, row-major, oldest row first.
    pub dti: Vec<[u8; 4]>,
    /// `wris_per_cpi x samples_per_wri` BGRA pixels, row-major (Doppler x
    /// range), post-fftshift.
    pub rdi: Vec<[u8; 4]>,
}

pub struct DisplaySurfaces {
    pub channels: Vec<ChannelSurfaces>,
    pub colorbar: Vec<[u8; 4]>,
}

pub struct DisplayFormatter {
    samples_per_wri: usize,
    wris_per_cpi: usize,
    num_channels: usize,
    scale_data_db: f64,
    current_colormap: ColorMap,
    palette: Box<dyn Palette>,
    command_state: Arc<CommandState>,
    db_sink: Arc<dyn DbSink>,
    input: Arc<DisplayQueue>,
    stop_requested: Arc<AtomicBool>,
    shared: Arc<Mutex<DisplaySurfaces>>,
    cpis_processed: u64,
}

impl DisplayFormatter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        samples_per_wri: usize,
        wris_per_cpi: usize,
        dti_height: usize,
        num_channels: usize,
        scale_data_db: f64,
        command_state: Arc<CommandState>,
        db_sink: Arc<dyn DbSink>,
        input: Arc<DisplayQueue>,
        stop_requested: Arc<AtomicBool>,
    ) -> DisplayFormatter {
        let colormap = command_state.status().cmap;
        let palette = palette_for(colormap);
        let colorbar = build_colorbar(palette.as_ref());
        let channels = (0..num_channels)
            .map(|_| ChannelSurfaces {
                dti: vec![[0, 0, 0, 255]; dti_height * wris_per_cpi],
                rdi: vec![[0, 0, 0, 255]; wris_per_cpi * samples_per_wri],
            })
            .collect();
        DisplayFormatter {
            samples_per_wri,
            wris_per_cpi,
            num_channels,
            scale_data_db,
            current_colormap: colormap,
            palette,
            command_state,
            db_sink,
            input,
            stop_requested,
            shared: Arc::new(Mutex::new(DisplaySurfaces { channels, colorbar })),
            cpis_processed: 0,
        }
    }

    /// Snapshot handle the frontend reads from each render frame.
    pub fn shared_surfaces(&self) -> Arc<Mutex<DisplaySurfaces>> {
        Arc::clone(&self.shared)
    }

    pub fn run(&mut self) {
        while !self.stop_requested.load(Ordering::Relaxed) {
            let Some(cpi) = self.input.pop(INPUT_WAIT_TIMEOUT) else {
                continue;
            };
            self.process_one(&cpi);
            self.cpis_processed += 1;
        }
        log::info!("display formatter stopping after {} CPIs", self.cpis_processed);
    }

    fn process_one(&mut self, cpi: &ProcessedCpi) {
        let status = self.command_state.status();
        if status.cmap != self.current_colormap {
            self.current_colormap = status.cmap;
            self.palette = palette_for(status.cmap);
        }
        let s = self.samples_per_wri;
        let w = self.wris_per_cpi;
        let palette = self.palette.as_ref();

        let mut shared = self.shared.lock().unwrap();
        shared.colorbar = build_colorbar(palette);

        for (idx, channel) in cpi.channels.iter().enumerate().take(self.num_channels) {
            let mut shifted_power = channel.log_power.clone();
            fftshift_rows(&mut shifted_power, s, w);

            let surf = &mut shared.channels[idx];
            for (i, &power) in shifted_power.iter().enumerate() {
                let byte = scale_to_byte(power, self.scale_data_db, status.disp_ref_db, status.disp_range);
                let [r, g, b] = palette.table()[byte as usize];
                surf.rdi[i] = [b, g, r, 255];
            }

            let mut target_line: Vec<[u8; 4]> = (0..w)
                .map(|row| {
                    let power = shifted_power[row * s + channel.peak_range_idx];
                    let byte = scale_to_byte(power, self.scale_data_db, status.disp_ref_db, status.disp_range);
                    let [r, g, b] = palette.table()[byte as usize];
                    [b, g, r, 255]
                })
                .collect();

            if status.mark_peak {
                let shifted_peak = shifted_index(channel.peak_doppler_idx, w);
                if let Some(pixel) = target_line.get_mut(shifted_peak) {
                    pixel[0] = 255;
                }
            }

            surf.dti.copy_within(w.., 0);
            let tail_start = surf.dti.len() - w;
            surf.dti[tail_start..].copy_from_slice(&target_line);

            if self.db_sink.is_enabled() {
                let target_power: Vec<f32> = (0..w).map(|row| shifted_power[row * s + channel.peak_range_idx]).collect();
                self.db_sink.publish(idx, &target_power);
            }
        }
    }
}

fn build_colorbar(palette: &dyn Palette) -> Vec<[u8; 4]> {
    palette.table().iter().map(|&[r, g, b]| [b, g, r, 255]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_endpoints_are_black_and_white() {
        let p = HotPalette::new();
        assert_eq!(p.table()[0], [0, 0, 0]);
        assert_eq!(p.table()[255], [255, 255, 255]);
    }

    #[test]
    fn gray_is_monotonic() {
        let p = GrayPalette::new();
        for i in 1..256 {
            assert!(p.table()[i][0] >= p.table()[i - 1][0]);
        }
    }

    #[test]
    fn all_palettes_have_256_entries() {
        for kind in [ColorMap::Hot, ColorMap::Jet, ColorMap::Gray] {
            let p = palette_for(kind);
            assert_eq!(p.table().len(), 256);
        }
    }

    #[test]
    fn shifted_index_is_involutive() {
        let w = 128;
        for idx in 0..w {
            assert_eq!(shifted_index(shifted_index(idx, w), w), idx);
        }
    }

    #[test]
    fn scale_to_byte_clamps_at_both_ends() {
        assert_eq!(scale_to_byte(-1000.0, 0.0, -80.0, 40.0), 0);
        assert_eq!(scale_to_byte(1000.0, 0.0, -80.0, 40.0), 255);
    }
}
