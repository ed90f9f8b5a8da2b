//! Fixed-capacity single-producer/single-consumer ring buffer.
//!
//! Sits between the ADC callback and the dispatcher. Mirrors `buffers.cpp`'s
//! global circular buffer: one mutex over the cursor/count state, a condition
//! variable for the non-empty transition, and fail-soft behavior on overrun
//! (`buff_mark_used` logs a warning and refuses to advance the write cursor
//! rather than blocking the producer).

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use log::warn;

use crate::time::DataTics;

struct SlotData {
    samples: Vec<f32>,
    timestamp: DataTics,
    frame_count: u64,
}

struct CursorState {
    write_cursor: usize,
    read_cursor: usize,
    count: usize,
}

pub struct RingBuffer {
    capacity: usize,
    slots: Vec<Mutex<SlotData>>,
    state: Mutex<CursorState>,
    not_empty: Condvar,
}

impl RingBuffer {
    /// `capacity` slots (default 8), each sized for
    /// `block_len` f32 samples (`2 * S * B * C_adc` for interleaved IQ).
    pub fn new(capacity: usize, block_len: usize) -> RingBuffer {
        let slots = (0..capacity)
            .map(|_| {
                Mutex::new(SlotData {
                    samples: vec![0.0; block_len],
                    timestamp: 0,
                    frame_count: 0,
                })
            })
            .collect();
        RingBuffer {
            capacity,
            slots,
            state: Mutex::new(CursorState {
                write_cursor: 0,
                read_cursor: 0,
                count: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the producer's current write slot. Never blocks, never
    /// advances any cursor.
    pub fn next_free(&self) -> usize {
        self.state.lock().unwrap().write_cursor
    }

    /// Lets the producer fill the slot at `index` before committing it.
    pub fn write_slot<F: FnOnce(&mut [f32])>(&self, index: usize, f: F) {
        let mut slot = self.slots[index].lock().unwrap();
        f(&mut slot.samples);
    }

    /// Commits the slot written via [`RingBuffer::write_slot`]. Returns
    /// `false` if the ring was full: the write cursor is not advanced, so the
    /// same slot is overwritten on the next `commit` call (fail-soft overrun,
    /// flagged by a log warning rather than blocking the producer).
    pub fn commit(&self, index: usize, timestamp: DataTics, frame_count: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.count == self.capacity {
            warn!("ring buffer overrun, dropping block {frame_count} at slot {index}");
            return false;
        }
        {
            let mut slot = self.slots[index].lock().unwrap();
            slot.timestamp = timestamp;
            slot.frame_count = frame_count;
        }
        state.write_cursor = (state.write_cursor + 1) % self.capacity;
        state.count += 1;
        self.not_empty.notify_one();
        true
    }

    /// Blocks up to `timeout` for a readable slot, tolerating spurious
    /// wakeups. Returns `None` only once the deadline has genuinely passed
    /// with nothing to read.
    pub fn wait_block(&self, timeout: Duration) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.count > 0 {
                return Some(state.read_cursor);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, result) = self.not_empty.wait_timeout(state, remaining).unwrap();
            state = guard;
            if result.timed_out() && state.count == 0 {
                return None;
            }
        }
    }

    /// Reads the slot returned by [`RingBuffer::wait_block`]. Must be
    /// followed by [`RingBuffer::release`].
    pub fn read_slot<F: FnOnce(&[f32], DataTics, u64) -> R, R>(&self, index: usize, f: F) -> R {
        let slot = self.slots[index].lock().unwrap();
        f(&slot.samples, slot.timestamp, slot.frame_count)
    }

    /// Advances the read cursor, freeing the slot for the producer.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.read_cursor = (state.read_cursor + 1) % self.capacity;
        state.count -= 1;
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn count_tracks_commit_and_release() {
        let ring = RingBuffer::new(4, 8);
        assert_eq!(ring.len(), 0);
        for i in 0..4 {
            let idx = ring.next_free();
            ring.write_slot(idx, |s| s.fill(i as f32));
            assert!(ring.commit(idx, i as i64, i as u64));
        }
        assert_eq!(ring.len(), 4);
        // Full: next commit is a fail-soft overrun, count stays at capacity.
        let idx = ring.next_free();
        assert!(!ring.commit(idx, 99, 99));
        assert_eq!(ring.len(), 4);

        for _ in 0..4 {
            ring.release();
        }
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn wait_block_returns_index_written_by_matching_commit() {
        let ring = RingBuffer::new(4, 4);
        let idx = ring.next_free();
        ring.write_slot(idx, |s| s.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]));
        ring.commit(idx, 42, 7);

        let read_idx = ring.wait_block(Duration::from_millis(100)).unwrap();
        assert_eq!(read_idx, idx);
        ring.read_slot(read_idx, |samples, ts, fc| {
            assert_eq!(samples, &[1.0, 2.0, 3.0, 4.0]);
            assert_eq!(ts, 42);
            assert_eq!(fc, 7);
        });
        ring.release();
    }

    #[test]
    fn wait_block_times_out_when_empty() {
        let ring = RingBuffer::new(2, 4);
        assert!(ring.wait_block(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn producer_consumer_preserves_order() {
        let ring = Arc::new(RingBuffer::new(4, 1));
        let producer_ring = Arc::clone(&ring);
        let producer = thread::spawn(move || {
            for i in 0..50u64 {
                loop {
                    let idx = producer_ring.next_free();
                    producer_ring.write_slot(idx, |s| s[0] = i as f32);
                    if producer_ring.commit(idx, i as i64, i) {
                        break;
                    }
                }
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 50 {
            if let Some(idx) = ring.wait_block(Duration::from_millis(500)) {
                ring.read_slot(idx, |s, _, _| seen.push(s[0] as u64));
                ring.release();
            }
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }
}
