//! # Ring Sample Buffer
//!
//! Fixed-capacity circular store of the most recent mono samples. The audio
//! callback writes into it continuously; the analysis cycle and diagnostic
//! callers take chronological copies of it.
//!
//! The backing array is allocated once at construction and never resized,
//! so writes on the audio thread are plain copies with no allocation.

use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;

/// Ring buffer shared between the capture callback and its readers.
pub type SharedRing = Arc<Mutex<SampleRing>>;

/// Circular FIFO of samples with overwrite-oldest semantics.
#[derive(Debug, Clone)]
pub struct SampleRing {
    data: Vec<f32>,
    write_pos: usize,
    len: usize,
    sample_rate: u32,
}

impl SampleRing {
    /// Creates an empty ring holding up to `capacity` samples.
    pub fn new(capacity: usize, sample_rate: u32) -> Self {
        Self {
            data: vec![0.0; capacity],
            write_pos: 0,
            len: 0,
            sample_rate,
        }
    }

    /// Creates a ring sized for `window_seconds` of audio at `sample_rate`.
    pub fn for_duration(window_seconds: f32, sample_rate: u32) -> Self {
        Self::new(crate::config::window_len(window_seconds, sample_rate), sample_rate)
    }

    pub fn shared(self) -> SharedRing {
        Arc::new(Mutex::new(self))
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once the ring has received at least `capacity` samples.
    pub fn is_filled(&self) -> bool {
        self.len == self.data.len()
    }

    /// Appends a block of samples, discarding the oldest ones once full.
    ///
    /// A block longer than the capacity only contributes its tail.
    pub fn write(&mut self, block: &[f32]) {
        let capacity = self.data.len();
        if capacity == 0 || block.is_empty() {
            return;
        }
        let block = if block.len() > capacity {
            &block[block.len() - capacity..]
        } else {
            block
        };

        let first = (capacity - self.write_pos).min(block.len());
        self.data[self.write_pos..self.write_pos + first].copy_from_slice(&block[..first]);
        let rest = block.len() - first;
        self.data[..rest].copy_from_slice(&block[first..]);

        self.write_pos = (self.write_pos + block.len()) % capacity;
        self.len = (self.len + block.len()).min(capacity);
    }

    /// Appends a single sample.
    #[inline]
    pub fn push(&mut self, sample: f32) {
        let capacity = self.data.len();
        if capacity == 0 {
            return;
        }
        self.data[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % capacity;
        if self.len < capacity {
            self.len += 1;
        }
    }

    /// Appends interleaved frames, averaging each frame down to one sample.
    ///
    /// A trailing partial frame is ignored.
    pub fn write_frames<T: Copy>(&mut self, data: &[T], channels: usize, convert: impl Fn(T) -> f32) {
        if channels <= 1 {
            for &sample in data {
                self.push(convert(sample));
            }
            return;
        }
        let scale = 1.0 / channels as f32;
        for frame in data.chunks_exact(channels) {
            let sum: f32 = frame.iter().map(|&s| convert(s)).sum();
            self.push(sum * scale);
        }
    }

    /// Copies the contents in chronological order into `out`, replacing what
    /// it held. Reuses the allocation of `out`.
    pub fn snapshot_into(&self, out: &mut Vec<f32>) {
        out.clear();
        let (older, newer) = self.segments();
        out.extend_from_slice(older);
        out.extend_from_slice(newer);
    }

    /// Copies as many of the most recent samples as fit into `out`, oldest
    /// first, and returns how many were written.
    pub fn copy_latest(&self, out: &mut [f32]) -> usize {
        let count = out.len().min(self.len);
        let skip = self.len - count;
        let (older, newer) = self.segments();
        if skip < older.len() {
            let head = &older[skip..];
            out[..head.len()].copy_from_slice(head);
            out[head.len()..count].copy_from_slice(newer);
        } else {
            out[..count].copy_from_slice(&newer[skip - older.len()..]);
        }
        count
    }

    /// The stored samples as (older, newer) slices.
    fn segments(&self) -> (&[f32], &[f32]) {
        if self.is_filled() {
            (&self.data[self.write_pos..], &self.data[..self.write_pos])
        } else {
            (&self.data[..self.len], &self.data[..0])
        }
    }
}

/// Independent chronological copy of a shared ring.
///
/// The copy is allocated before the lock is taken, so the capture callback
/// only ever waits for the memcpy.
pub fn snapshot(ring: &SharedRing) -> SampleWindow {
    let mut samples = Vec::with_capacity(ring.lock().capacity());
    let ring = ring.lock();
    ring.snapshot_into(&mut samples);
    SampleWindow::new(samples, ring.sample_rate)
}

/// Read-only copy of an analysis window, oldest sample first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleWindow {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SampleWindow {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }
}

impl Deref for SampleWindow {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.samples
    }
}
