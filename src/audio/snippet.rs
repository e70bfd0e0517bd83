//! Fixed-duration snippet extraction from the capture ring buffer.

use std::sync::Arc;

use super::ring_buffer::RingBuffer;
use super::sample_buffer::SampleBuffer;
use crate::error::{Error, Result};

pub struct SnippetExtractor {
    ring: Arc<RingBuffer>,
}

impl SnippetExtractor {
    pub fn new(ring: Arc<RingBuffer>) -> Self {
        Self { ring }
    }

    /// Copy the `seconds` of audio that end at frame `end_cursor`.
    ///
    /// When the window starts before frame 0 it is read as the tail of the
    /// buffer followed by its head, so the result is always in time order.
    pub fn extract(&self, end_cursor: usize, seconds: f32) -> Result<SampleBuffer> {
        let capacity = self.ring.capacity_frames();
        let frame_count = (seconds.max(0.0) * self.ring.sample_rate() as f32).round() as usize;
        if frame_count > capacity {
            return Err(Error::SnippetTooLong {
                requested: frame_count,
                capacity,
            });
        }

        let end = end_cursor % capacity;
        let channels = self.ring.channels();
        let mut samples = Vec::with_capacity(frame_count * channels as usize);

        let start = end as isize - frame_count as isize;
        if start >= 0 {
            self.ring.copy_frames(start as usize, end, &mut samples);
        } else {
            let remaining = (-start) as usize;
            self.ring.copy_frames(capacity - remaining, capacity, &mut samples);
            self.ring.copy_frames(0, end, &mut samples);
        }

        SampleBuffer::new(samples, channels, self.ring.sample_rate())
    }
}
