//! Lock-free hand-off of small float records between the audio thread and the
//! render thread.
//!
//! `FrameSlot` is a sequence lock over atomic cells: one writer, one reader,
//! neither side ever blocks. A reader that keeps seeing a write in progress
//! gives up and keeps whatever frame it already had.

use std::hint::spin_loop;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

const READ_RETRIES: usize = 8;

pub struct FrameSlot<const N: usize> {
    seq: AtomicU64,
    cells: [AtomicU32; N],
}

impl<const N: usize> Default for FrameSlot<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameSlot<N> {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            cells: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Publish a whole frame. Single writer only.
    pub fn write(&self, frame: &[f32; N]) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        for (cell, v) in self.cells.iter().zip(frame) {
            cell.store(v.to_bits(), Ordering::Relaxed);
        }
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Copy the latest complete frame into `out`.
    ///
    /// Returns false (and leaves `out` untouched) when no consistent snapshot
    /// could be taken within a few retries.
    pub fn read(&self, out: &mut [f32; N]) -> bool {
        let mut scratch = [0.0f32; N];
        for _ in 0..READ_RETRIES {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                spin_loop();
                continue;
            }
            for (dst, cell) in scratch.iter_mut().zip(&self.cells) {
                *dst = f32::from_bits(cell.load(Ordering::Relaxed));
            }
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                *out = scratch;
                return true;
            }
            spin_loop();
        }
        false
    }

    /// Number of completed writes.
    pub fn generation(&self) -> u64 {
        self.seq.load(Ordering::Acquire) / 2
    }
}

/// A single `f32` shared between threads.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn read_returns_last_written_frame() {
        let slot = FrameSlot::<3>::new();
        let mut out = [9.0; 3];
        assert!(slot.read(&mut out));
        assert_eq!(out, [0.0; 3]);

        slot.write(&[1.0, 2.0, 3.0]);
        slot.write(&[4.0, 5.0, 6.0]);
        assert!(slot.read(&mut out));
        assert_eq!(out, [4.0, 5.0, 6.0]);
        assert_eq!(slot.generation(), 2);
    }

    #[test]
    fn concurrent_reads_are_never_torn() {
        let slot = Arc::new(FrameSlot::<64>::new());
        let writer = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                for i in 0..20_000u32 {
                    slot.write(&[i as f32; 64]);
                }
            })
        };

        let mut out = [0.0f32; 64];
        for _ in 0..20_000 {
            if slot.read(&mut out) {
                assert!(out.iter().all(|v| *v == out[0]), "torn frame {out:?}");
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn atomic_f32_round_trips_bits() {
        let a = AtomicF32::new(-0.25);
        assert_eq!(a.load(), -0.25);
        a.store(f32::INFINITY);
        assert_eq!(a.load(), f32::INFINITY);
    }
}
