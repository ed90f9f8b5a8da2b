//! Simulated ADC source: a ring-buffer feeder thread plus a [`SimInjector`]
//! that adds a synthetic Doppler target on top of the noise floor. Stands in
//! for a real digitizer driver binding.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use radar_core::command::CommandState;
use radar_core::dispatcher::SimInjector;
use radar_core::ring::RingBuffer;
use radar_core::types::ComplexSample;

/// Feeds the ring buffer with interleaved IQ noise-floor samples, paced to
/// the configured sample rate, until `stop` is set.
pub fn run_adc_feeder(
    ring: Arc<RingBuffer>,
    sample_rate: f64,
    samples_per_wri: usize,
    wris_per_block: usize,
    num_channels: usize,
    noise_floor_amp: f32,
    stop: Arc<std::sync::atomic::AtomicBool>,
) {
    let block_samples = samples_per_wri * wris_per_block;
    let block_period = Duration::from_secs_f64(block_samples as f64 / sample_rate);
    let mut rng = rand::thread_rng();
    let mut frame_count = 0u64;

    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
        let idx = ring.next_free();
        ring.write_slot(idx, |buf| {
            for sample in buf.iter_mut() {
                *sample = rng.gen_range(-noise_floor_amp..noise_floor_amp);
            }
        });
        let _ = num_channels;
        if !ring.commit(idx, 0, frame_count) {
            log::warn!("adc feeder: ring overrun at frame {frame_count}");
        }
        frame_count += 1;
        std::thread::sleep(block_period);
    }
}

/// Injects a single synthetic target at a configurable Doppler bin and
/// amplitude, independently per channel, continuous in phase across calls.
pub struct ToneSimInjector {
    command_state: Arc<CommandState>,
    tone_bin: f64,
    sample_rate: f64,
    wris_per_cpi: usize,
    phase: Vec<f64>,
}

impl ToneSimInjector {
    pub fn new(command_state: Arc<CommandState>, tone_bin: f64, sample_rate: f64, wris_per_cpi: usize, num_channels: usize) -> ToneSimInjector {
        ToneSimInjector { command_state, tone_bin, sample_rate, wris_per_cpi, phase: vec![0.0; num_channels] }
    }
}

impl SimInjector for ToneSimInjector {
    fn generate(&mut self, channel: usize, _block_id: u64, len: usize) -> Vec<ComplexSample> {
        let status = self.command_state.status();
        if !status.sim_on {
            return vec![ComplexSample::new(0.0, 0.0); len];
        }
        let amp = 10f64.powf(status.sim_amp_db / 20.0);
        let step = 2.0 * PI * self.tone_bin / self.wris_per_cpi as f64;
        let mut phase = self.phase[channel];
        let samples = (0..len)
            .map(|_| {
                let value = ComplexSample::new((amp * phase.cos()) as f32, (amp * phase.sin()) as f32);
                phase += step;
                value
            })
            .collect();
        phase %= 2.0 * PI;
        self.phase[channel] = phase;
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_off_produces_zeros() {
        let state = Arc::new(CommandState::new(-80.0, 40.0));
        let mut sim = ToneSimInjector::new(state, 10.0, 48_000.0, 64, 2);
        let out = sim.generate(0, 0, 8);
        assert!(out.iter().all(|c| c.re == 0.0 && c.im == 0.0));
    }

    #[test]
    fn sim_on_produces_unit_amplitude_tone() {
        let state = Arc::new(CommandState::new(-80.0, 40.0));
        state.apply(radar_core::command::Command::SetSimOn(true)).unwrap();
        state.apply(radar_core::command::Command::SetSimAmp(0.0)).unwrap();
        let mut sim = ToneSimInjector::new(state, 0.0, 48_000.0, 64, 1);
        let out = sim.generate(0, 0, 4);
        for c in out {
            assert!((c.norm() - 1.0).abs() < 1e-3);
        }
    }
}
