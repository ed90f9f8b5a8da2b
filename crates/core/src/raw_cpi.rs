//! Per-channel complex sample matrix spanning one coherent processing
//! interval (CPI).
//!
//! Absorbs overlapping input blocks so Doppler processing stays phase
//! continuous across CPIs when `wris_per_cpi > wris_per_block`. Grounded in
//! `MyRawDataBuffer.h`'s `RawDataBuffer` (`MoveUp`, `LoadData`, `AddSimData`,
//! `CopyOut`).

use crate::types::{ComplexSample, DataKind};

pub struct RawCpiBuffer {
    samples_per_wri: usize,
    wris_per_cpi: usize,
    wris_per_block: usize,
    /// One `samples_per_wri * wris_per_cpi` matrix per channel, row-major:
    /// row = WRI index, column = sample-in-WRI.
    channels: Vec<Vec<ComplexSample>>,
}

impl RawCpiBuffer {
    pub fn new(samples_per_wri: usize, wris_per_cpi: usize, wris_per_block: usize, num_channels: usize) -> RawCpiBuffer {
        let len = samples_per_wri * wris_per_cpi;
        RawCpiBuffer {
            samples_per_wri,
            wris_per_cpi,
            wris_per_block,
            channels: (0..num_channels).map(|_| vec![ComplexSample::new(0.0, 0.0); len]).collect(),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Offset (in samples) of the tail region a `load`/`add_sim` writes into.
    fn tail_offset(&self) -> usize {
        self.samples_per_wri * (self.wris_per_cpi - self.wris_per_block)
    }

    /// Slides the older `S*(W-B)` samples toward the front, discarding the
    /// oldest `S*B` samples. A no-op when `wris_per_cpi == wris_per_block`
    /// (non-overlapping CPIs).
    pub fn shift_up(&mut self) {
        if self.wris_per_cpi == self.wris_per_block {
            return;
        }
        for chan in &mut self.channels {
            chan.copy_within(self.samples_per_wri * self.wris_per_block.., 0);
        }
    }

    /// Copies and deinterleaves one input block into the tail region.
    /// IQ interleave order is `(r0,i0)_ch0, (r0,i0)_ch1, ..., (r1,i0)_ch0, ...`
    /// i.e. channel is the fastest-varying index, sample-in-block the next,
    /// and real/imag (when present) innermost. Returns the sample offset the
    /// new data begins at (identical for every channel).
    pub fn load(&mut self, block: &[f32], data_kind: DataKind) -> usize {
        let offset = self.tail_offset();
        let block_samples = self.samples_per_wri * self.wris_per_block;
        let num_channels = self.channels.len();
        let floats_per_sample = match data_kind {
            DataKind::ComplexIq => 2,
            DataKind::RealOnly => 1,
        };
        let expected = block_samples * num_channels * floats_per_sample;
        assert_eq!(block.len(), expected, "input block length mismatch");

        for s in 0..block_samples {
            for c in 0..num_channels {
                let base = (s * num_channels + c) * floats_per_sample;
                let sample = match data_kind {
                    DataKind::ComplexIq => ComplexSample::new(block[base], block[base + 1]),
                    DataKind::RealOnly => ComplexSample::new(block[base], 0.0),
                };
                self.channels[c][offset + s] = sample;
            }
        }
        offset
    }

    /// Element-wise adds a simulated slice into channel `channel`'s tail
    /// region, for injecting a synthetic target alongside real ADC data.
    pub fn add_sim(&mut self, channel: usize, sim: &[ComplexSample], offset: usize) {
        let chan = &mut self.channels[channel];
        for (i, value) in sim.iter().enumerate() {
            chan[offset + i] += *value;
        }
    }

    /// Copies one channel's full `S*W` matrix out.
    pub fn copy_out(&self, channel: usize, dest: &mut [ComplexSample]) {
        dest.copy_from_slice(&self.channels[channel]);
    }

    pub fn channel_len(&self) -> usize {
        self.samples_per_wri * self.wris_per_cpi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_for(value_start: f32, samples: usize, channels: usize) -> Vec<f32> {
        let mut v = Vec::with_capacity(samples * channels * 2);
        let mut next = value_start;
        for _ in 0..samples {
            for _ in 0..channels {
                v.push(next);
                v.push(next + 0.5);
                next += 1.0;
            }
        }
        v
    }

    #[test]
    fn shift_then_load_concatenates_in_time_order() {
        let s = 2;
        let w = 4;
        let b = 2;
        let mut buf = RawCpiBuffer::new(s, w, b, 1);

        let block1 = block_for(0.0, s * b, 1);
        let off1 = buf.load(&block1, DataKind::ComplexIq);
        assert_eq!(off1, s * (w - b));

        let block2 = block_for(100.0, s * b, 1);
        buf.shift_up();
        let off2 = buf.load(&block2, DataKind::ComplexIq);
        assert_eq!(off2, s * (w - b));

        let mut out = vec![ComplexSample::new(0.0, 0.0); buf.channel_len()];
        buf.copy_out(0, &mut out);

        // First S*B rows should now hold what was loaded second call's
        // predecessor in shifted position; last S*B rows hold block2.
        let expected_tail: Vec<ComplexSample> = (0..s * b)
            .map(|i| ComplexSample::new(100.0 + i as f32, 100.5 + i as f32))
            .collect();
        assert_eq!(&out[s * (w - b)..], &expected_tail[..]);
    }

    #[test]
    fn real_only_sets_imag_to_zero() {
        let s = 2;
        let w = 2;
        let b = 2;
        let mut buf = RawCpiBuffer::new(s, w, b, 1);
        let block = vec![1.0, 2.0, 3.0, 4.0];
        buf.load(&block, DataKind::RealOnly);
        let mut out = vec![ComplexSample::new(0.0, 0.0); buf.channel_len()];
        buf.copy_out(0, &mut out);
        assert!(out.iter().all(|c| c.im == 0.0));
        assert_eq!(out[0].re, 1.0);
        assert_eq!(out[3].re, 4.0);
    }

    #[test]
    fn add_sim_is_additive_not_overwriting() {
        let s = 2;
        let w = 2;
        let b = 2;
        let mut buf = RawCpiBuffer::new(s, w, b, 1);
        let block = vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let offset = buf.load(&block, DataKind::ComplexIq);
        buf.add_sim(0, &[ComplexSample::new(1.0, 1.0), ComplexSample::new(1.0, 1.0)], offset);
        let mut out = vec![ComplexSample::new(0.0, 0.0); buf.channel_len()];
        buf.copy_out(0, &mut out);
        assert_eq!(out[offset], ComplexSample::new(2.0, 1.0));
    }
}
