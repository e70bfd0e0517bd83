//! Fixed-capacity circular sample store shared between the capture thread
//! (single writer) and the control loop (readers).
//!
//! Samples live in `AtomicU32` slots holding `f32` bits, so readers never
//! lock and never observe torn values. The write cursor is a frame index in
//! `[0, capacity_frames)` and is published with release ordering after the
//! samples it covers have been stored.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

pub struct RingBuffer {
    slots: Box<[AtomicU32]>,
    cursor: AtomicUsize,
    capacity_frames: usize,
    channels: u16,
    sample_rate: u32,
}

impl RingBuffer {
    /// `capacity = seconds * sample_rate` frames of `channels` samples each.
    pub fn new(seconds: u32, sample_rate: u32, channels: u16) -> Self {
        let capacity_frames = (seconds as usize * sample_rate as usize).max(1);
        Self::with_capacity(capacity_frames, sample_rate, channels)
    }

    pub fn with_capacity(capacity_frames: usize, sample_rate: u32, channels: u16) -> Self {
        let capacity_frames = capacity_frames.max(1);
        let channels = channels.max(1);
        let slots = (0..capacity_frames * channels as usize)
            .map(|_| AtomicU32::new(0f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            cursor: AtomicUsize::new(0),
            capacity_frames,
            channels,
            sample_rate,
        }
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frame index the next write will land on.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Append interleaved samples, wrapping at the physical end.
    ///
    /// Must only be called from the capture thread. A trailing partial frame
    /// is dropped.
    pub fn push(&self, interleaved: &[f32]) {
        let channels = self.channels as usize;
        let mut cursor = self.cursor.load(Ordering::Relaxed);
        for frame in interleaved.chunks_exact(channels) {
            let base = cursor * channels;
            for (slot, sample) in self.slots[base..base + channels].iter().zip(frame) {
                slot.store(sample.to_bits(), Ordering::Relaxed);
            }
            cursor = (cursor + 1) % self.capacity_frames;
        }
        self.cursor.store(cursor, Ordering::Release);
    }

    /// Fill `out` with consecutive samples starting at frame `start_frame`,
    /// wrapping past the physical end.
    pub fn read_window(&self, out: &mut [f32], start_frame: usize) {
        let len = self.slots.len();
        let base = (start_frame % self.capacity_frames) * self.channels as usize;
        for (i, sample) in out.iter_mut().enumerate() {
            *sample = f32::from_bits(self.slots[(base + i) % len].load(Ordering::Relaxed));
        }
    }

    /// Append frames `[start, end)` to `out` without wrapping.
    pub(crate) fn copy_frames(&self, start: usize, end: usize, out: &mut Vec<f32>) {
        debug_assert!(start <= end && end <= self.capacity_frames);
        let channels = self.channels as usize;
        out.extend(
            self.slots[start * channels..end * channels]
                .iter()
                .map(|slot| f32::from_bits(slot.load(Ordering::Relaxed))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps_at_capacity() {
        let ring = RingBuffer::with_capacity(4, 8_000, 1);
        ring.push(&[0.1, 0.2, 0.3]);
        assert_eq!(ring.cursor(), 3);
        ring.push(&[0.4, 0.5]);
        assert_eq!(ring.cursor(), 1);

        let mut all = [0.0f32; 4];
        ring.read_window(&mut all, 0);
        assert_eq!(all, [0.5, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn read_window_wraps_past_the_end() {
        let ring = RingBuffer::with_capacity(4, 8_000, 1);
        ring.push(&[1.0, 2.0, 3.0, 4.0]);
        let mut window = [0.0f32; 3];
        ring.read_window(&mut window, 3);
        assert_eq!(window, [4.0, 1.0, 2.0]);
    }

    #[test]
    fn cursor_counts_frames_for_stereo() {
        let ring = RingBuffer::with_capacity(8, 8_000, 2);
        ring.push(&[0.1, -0.1, 0.2, -0.2, 0.3]);
        assert_eq!(ring.cursor(), 2);

        let mut out = Vec::new();
        ring.copy_frames(0, 2, &mut out);
        assert_eq!(out, vec![0.1, -0.1, 0.2, -0.2]);
    }
}
