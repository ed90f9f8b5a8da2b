//! `radar-rtp`: desktop frontend driving the radar-core pipeline.
//!
//! Loads a TOML config, starts the pipeline against a simulated ADC source
//! (a real digitizer binding is out of scope here), renders the
//! range-Doppler and Doppler-time surfaces for one channel at a time in a
//! `minifb` window, and accepts operator commands as newline-delimited text
//! on stdin. Keys cycle the displayed channel and colormap; stdin drives
//! every other knob `CommandState` exposes.

mod sim_source;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use minifb::{Key, Scale, ScaleMode, Window, WindowOptions};

use radar_core::command::{Command, ColorMap};
use radar_core::config::Config;
use radar_core::dispatcher::SimInjector;
use radar_core::sinks::{recorder_dir_or_default, DbSink, NoOpDbSink, TextProcessedRecorder, WavRawRecorder};
use radar_core::Pipeline;

use sim_source::{run_adc_feeder, ToneSimInjector};

#[derive(Parser, Debug)]
#[command(name = "radar-rtp", about = "Coherent radar receiver processing pipeline")]
struct Cli {
    /// Path to a TOML config file. Falls back to built-in defaults if absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run without a window, logging peak target lines instead.
    #[arg(long)]
    headless: bool,

    /// Directory for raw WAV capture files (recording starts via stdin command).
    #[arg(long)]
    raw_dir: Option<String>,

    /// Directory for processed-data log files (recording starts via stdin command).
    #[arg(long)]
    proc_dir: Option<String>,

    /// Initial window scale, 1-4.
    #[arg(long, default_value_t = 2)]
    scale: usize,

    /// Overrides `sample_rate` from the config file.
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Overrides `window_dir` from the config file.
    #[arg(long)]
    window_dir: Option<String>,

    /// Overrides `sim.enabled` from the config file.
    #[arg(long)]
    sim: Option<bool>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).unwrap_or_else(|e| {
            eprintln!("failed to load config {}: {e}", path.display());
            std::process::exit(1);
        }),
        None => Config::default(),
    };
    if let Some(sample_rate) = cli.sample_rate {
        config.sample_rate = sample_rate;
    }
    if let Some(window_dir) = cli.window_dir.clone() {
        config.window_dir = Some(window_dir);
    }
    if let Some(sim_enabled) = cli.sim {
        config.sim.enabled = sim_enabled;
    }
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration after applying CLI overrides: {e}");
        std::process::exit(1);
    }
    let config = Arc::new(config);

    let raw_recorder = Arc::new(WavRawRecorder::new(
        recorder_dir_or_default(cli.raw_dir.as_deref()),
        config.sample_rate as u32,
        config.num_channels() as u16,
        config.max_raw_file_sec,
    ));
    let processed_recorder = Arc::new(TextProcessedRecorder::new(recorder_dir_or_default(cli.proc_dir.as_deref()), config.max_proc_file_sec));
    let db_sink: Arc<dyn DbSink> = Arc::new(NoOpDbSink);

    let command_state = Arc::new(radar_core::command::CommandState::new(config.min_ref_db, 40.0));
    if config.sim.enabled {
        let _ = command_state.apply(Command::SetSimOn(true));
        let _ = command_state.apply(Command::SetSimAmp(config.sim.amp_db));
    }

    let sim: Option<Box<dyn SimInjector>> = Some(Box::new(ToneSimInjector::new(
        Arc::clone(&command_state),
        config.sim.tone_bin,
        config.sample_rate,
        config.wris_per_cpi,
        config.num_channels(),
    )));

    let pipeline = Pipeline::start(Arc::clone(&config), Arc::clone(&command_state), raw_recorder, processed_recorder, db_sink, sim).unwrap_or_else(|e| {
        eprintln!("failed to start pipeline: {e}");
        std::process::exit(1);
    });

    let feeder_stop = Arc::new(AtomicBool::new(false));
    let feeder_handle = {
        let ring = Arc::clone(pipeline.ring());
        let stop = Arc::clone(&feeder_stop);
        let sample_rate = config.sample_rate;
        let samples_per_wri = config.samples_per_wri;
        let wris_per_block = config.wris_per_block;
        let num_channels = config.num_channels();
        let noise_floor_amp = 10f32.powf((config.sim.noise_floor_db / 20.0) as f32);
        std::thread::Builder::new()
            .name("radar-adc-sim".into())
            .spawn(move || run_adc_feeder(ring, sample_rate, samples_per_wri, wris_per_block, num_channels, noise_floor_amp, stop))
            .expect("failed to spawn simulated ADC feeder thread")
    };

    let cmd_stop = Arc::new(AtomicBool::new(false));
    let cmd_handle = {
        let state = Arc::clone(&command_state);
        let stop = Arc::clone(&cmd_stop);
        std::thread::Builder::new()
            .name("radar-stdin-commands".into())
            .spawn(move || run_command_listener(state, stop))
            .expect("failed to spawn stdin command listener thread")
    };

    if cli.headless {
        run_headless(&cmd_stop);
    } else {
        run_window(&pipeline, &config, cli.scale.clamp(1, 4));
    }

    feeder_stop.store(true, Ordering::Relaxed);
    cmd_stop.store(true, Ordering::Relaxed);
    let _ = feeder_handle.join();
    // The stdin listener blocks on a synchronous read; it is left to exit
    // with the process rather than joined, since there is no portable way
    // to interrupt a blocked `stdin().lines()` call.
    drop(cmd_handle);

    pipeline.shutdown();
}

fn run_headless(stop: &Arc<AtomicBool>) {
    log::info!("running headless, Ctrl-C to stop");
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }
}

/// Renders channel `selected_channel`'s range-Doppler image, scrolling
/// Doppler-time image, and shared colorbar side by side, one RGBA pixel
/// converted to minifb's packed `0x00RRGGBB` per pixel.
fn run_window(pipeline: &Pipeline, config: &Config, initial_scale: usize) {
    let rdi_w = config.samples_per_wri;
    let rdi_h = config.wris_per_cpi;
    let dti_w = config.wris_per_cpi;
    let dti_h = config.dti_height;
    let colorbar_w = 24;

    let win_w = (rdi_w + dti_w + colorbar_w) * initial_scale;
    let win_h = rdi_h.max(dti_h) * initial_scale;

    let mut window = Window::new(
        "radar-rtp",
        win_w,
        win_h,
        WindowOptions {
            scale: Scale::X1,
            scale_mode: ScaleMode::AspectRatioStretch,
            resize: true,
            ..Default::default()
        },
    )
    .expect("failed to create display window");
    window.set_target_fps(30);

    let surfaces = pipeline.display_surfaces();
    let command_state = pipeline.command_state();
    let mut buf = vec![0u32; win_w * win_h];
    let mut selected_channel = 0usize;
    let mut prev_tab = false;
    let mut prev_c = false;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        let tab = window.is_key_down(Key::Tab);
        if tab && !prev_tab {
            let num_channels = surfaces.lock().unwrap().channels.len();
            if num_channels > 0 {
                selected_channel = (selected_channel + 1) % num_channels;
            }
        }
        prev_tab = tab;

        let c = window.is_key_down(Key::C);
        if c && !prev_c {
            let next = match command_state.status().cmap {
                ColorMap::Hot => ColorMap::Jet,
                ColorMap::Jet => ColorMap::Gray,
                ColorMap::Gray => ColorMap::Hot,
            };
            let _ = command_state.apply(Command::SetColormap(next));
        }
        prev_c = c;

        buf.fill(0);
        {
            let shared = surfaces.lock().unwrap();
            if let Some(channel) = shared.channels.get(selected_channel) {
                blit(&mut buf, win_w, 0, 0, &channel.rdi, rdi_w, rdi_h, initial_scale);
                blit(&mut buf, win_w, rdi_w * initial_scale, 0, &channel.dti, dti_w, dti_h, initial_scale);
            }
            blit_column(&mut buf, win_w, (rdi_w + dti_w) * initial_scale, &shared.colorbar, colorbar_w, initial_scale);
        }

        if window.update_with_buffer(&buf, win_w, win_h).is_err() {
            break;
        }
    }
}

/// Nearest-neighbor upscale of a BGRA source image into the shared window
/// buffer at `(dst_x, dst_y)`, converting to minifb's packed pixel format.
fn blit(dst: &mut [u32], dst_stride: usize, dst_x: usize, dst_y: usize, src: &[[u8; 4]], src_w: usize, src_h: usize, scale: usize) {
    for row in 0..src_h {
        for col in 0..src_w {
            let [b, g, r, _] = src[row * src_w + col];
            let packed = (r as u32) << 16 | (g as u32) << 8 | b as u32;
            for sy in 0..scale {
                for sx in 0..scale {
                    let y = dst_y + row * scale + sy;
                    let x = dst_x + col * scale + sx;
                    if let Some(cell) = dst.get_mut(y * dst_stride + x) {
                        *cell = packed;
                    }
                }
            }
        }
    }
}

/// Draws the 256-entry colorbar as a vertical strip, one palette entry per
/// output row band.
fn blit_column(dst: &mut [u32], dst_stride: usize, dst_x: usize, colorbar: &[[u8; 4]], width: usize, scale: usize) {
    let height = dst.len() / dst_stride;
    if colorbar.is_empty() || height == 0 {
        return;
    }
    for y in 0..height {
        let entry = colorbar.len() - 1 - (y * colorbar.len() / height).min(colorbar.len() - 1);
        let [b, g, r, _] = colorbar[entry];
        let packed = (r as u32) << 16 | (g as u32) << 8 | b as u32;
        for sx in 0..(width * scale) {
            let px = dst_x + sx;
            if let Some(cell) = dst.get_mut(y * dst_stride + px) {
                *cell = packed;
            }
        }
    }
}

/// Parses one operator command per stdin line. Grounded in `RadarGUI.cpp`'s
/// command dispatch, generalized off widget callbacks onto a small text
/// protocol: `scale <ref_db> <range_db>`, `colormap hot|jet|gray`,
/// `peak on|off`, `raw on|off`, `proc on|off`, `sim on|off`, `simamp <db>`.
fn run_command_listener(command_state: Arc<radar_core::command::CommandState>, stop: Arc<AtomicBool>) {
    use std::io::BufRead;
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let Ok(line) = line else { continue };
        let Some(command) = parse_command(line.trim()) else {
            if !line.trim().is_empty() {
                log::warn!("unrecognized command: {line}");
            }
            continue;
        };
        if let Err(e) = command_state.apply(command) {
            log::warn!("command rejected: {e}");
        }
    }
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "scale" => {
            let ref_db: f64 = parts.next()?.parse().ok()?;
            let range_db: f64 = parts.next()?.parse().ok()?;
            Some(Command::SetDisplayScale { ref_db, range_db })
        }
        "colormap" => match parts.next()? {
            "hot" => Some(Command::SetColormap(ColorMap::Hot)),
            "jet" => Some(Command::SetColormap(ColorMap::Jet)),
            "gray" => Some(Command::SetColormap(ColorMap::Gray)),
            _ => None,
        },
        "peak" => parse_bool(parts.next()?).map(Command::SetPeakOverlay),
        "raw" => parse_bool(parts.next()?).map(Command::SetRawRecording),
        "proc" => parse_bool(parts.next()?).map(Command::SetProcRecording),
        "sim" => parse_bool(parts.next()?).map(Command::SetSimOn),
        "simamp" => parts.next()?.parse().ok().map(Command::SetSimAmp),
        _ => None,
    }
}

fn parse_bool(token: &str) -> Option<bool> {
    match token {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scale_command() {
        match parse_command("scale -70 50").unwrap() {
            Command::SetDisplayScale { ref_db, range_db } => {
                assert_eq!(ref_db, -70.0);
                assert_eq!(range_db, 50.0);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn parses_colormap_command() {
        assert!(matches!(parse_command("colormap jet").unwrap(), Command::SetColormap(ColorMap::Jet)));
        assert!(parse_command("colormap purple").is_none());
    }

    #[test]
    fn parses_toggle_commands() {
        assert!(matches!(parse_command("raw on").unwrap(), Command::SetRawRecording(true)));
        assert!(matches!(parse_command("proc off").unwrap(), Command::SetProcRecording(false)));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(parse_command("frobnicate").is_none());
        assert!(parse_command("").is_none());
    }
}
