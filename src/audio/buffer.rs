//! Capture buffers for audio frames
//!
//! Two shapes of storage sit behind the capture callbacks:
//! - [`RingBuffer`]: fixed window of the most recent audio, preallocated so
//!   that pushes from the driver thread never allocate.
//! - [`SessionBuffer`]: unbounded accumulator for a whole recording, grown in
//!   fixed-size blocks so an append allocates at most one block.
//!
//! Both are plain single-owner structures; the engine wraps them in
//! `Arc<parking_lot::Mutex<_>>` and keeps every critical section to a copy.

use crate::audio::device::DeviceId;
use crate::error::AudioError;

/// One delivery from a capture callback
///
/// Borrowed view over the driver's buffer, so building it costs nothing.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Device the samples came from
    pub device: &'a DeviceId,
    /// Interleaved samples
    pub samples: &'a [f32],
    /// Number of interleaved channels
    pub channels: u16,
    /// Delivery counter, per stream
    pub sequence: u64,
}

impl<'a> Frame<'a> {
    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Audio copied out of a buffer, in arrival order
///
/// Stored as a list of interleaved chunks so that handing audio over does not
/// require concatenating it first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedAudio {
    channels: u16,
    chunks: Vec<Vec<f32>>,
}

impl CapturedAudio {
    pub fn new(channels: u16, chunks: Vec<Vec<f32>>) -> Self {
        Self { channels, chunks }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total interleaved sample count
    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.sample_count() / self.channels.max(1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Vec::is_empty)
    }

    /// Iterate over every sample in arrival order
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.iter().copied())
    }

    /// Concatenate into one linear interleaved sequence
    pub fn into_interleaved(self) -> Vec<f32> {
        if self.chunks.len() == 1 {
            return self.chunks.into_iter().next().unwrap_or_default();
        }
        let mut out = Vec::with_capacity(self.sample_count());
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Fixed-capacity sliding window over the most recent sample frames
///
/// Capacity is counted in sample frames (one sample per channel). Storage is
/// allocated once at construction; pushing evicts the oldest frames.
pub struct RingBuffer {
    storage: Vec<f32>,
    channels: u16,
    capacity_frames: usize,
    /// Next write position, in samples
    write_pos: usize,
    /// Frames currently held
    len_frames: usize,
    /// Set while a running stream writes into this buffer
    attached: bool,
    /// Frames dropped because the window was full
    evicted_frames: u64,
}

impl RingBuffer {
    /// Create a ring holding `capacity_frames` frames of `channels` samples
    pub fn new(capacity_frames: usize, channels: u16) -> Self {
        let channels = channels.max(1);
        Self {
            storage: vec![0.0; capacity_frames * channels as usize],
            channels,
            capacity_frames,
            write_pos: 0,
            len_frames: 0,
            attached: false,
            evicted_frames: 0,
        }
    }

    /// Create a ring sized for `minutes` of audio at `sample_rate`
    pub fn for_duration(sample_rate: u32, minutes: u32, channels: u16) -> Self {
        Self::new(sample_rate as usize * minutes as usize * 60, channels)
    }

    /// Append interleaved samples, evicting the oldest frames when full
    ///
    /// A trailing partial frame (fewer than `channels` samples) is ignored.
    pub fn push(&mut self, samples: &[f32]) {
        let channels = self.channels as usize;
        let capacity = self.storage.len();
        if capacity == 0 {
            return;
        }

        let whole = samples.len() - samples.len() % channels;
        let mut samples = &samples[..whole];
        let incoming_frames = whole / channels;

        // Only the tail of an oversized delivery can survive
        if samples.len() > capacity {
            samples = &samples[samples.len() - capacity..];
        }

        let first = samples.len().min(capacity - self.write_pos);
        self.storage[self.write_pos..self.write_pos + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.storage[..rest].copy_from_slice(&samples[first..]);
        self.write_pos = (self.write_pos + samples.len()) % capacity;

        let total = self.len_frames + incoming_frames;
        if total > self.capacity_frames {
            self.evicted_frames += (total - self.capacity_frames) as u64;
        }
        self.len_frames = total.min(self.capacity_frames);
    }

    /// Copy the current contents, oldest first
    pub fn snapshot(&self) -> CapturedAudio {
        let held = self.len_frames * self.channels as usize;
        if held == 0 {
            return CapturedAudio::new(self.channels, Vec::new());
        }

        let capacity = self.storage.len();
        let start = (self.write_pos + capacity - held) % capacity;
        let mut out = Vec::with_capacity(held);
        if start + held <= capacity {
            out.extend_from_slice(&self.storage[start..start + held]);
        } else {
            out.extend_from_slice(&self.storage[start..]);
            out.extend_from_slice(&self.storage[..held - (capacity - start)]);
        }
        CapturedAudio::new(self.channels, vec![out])
    }

    /// Change the window size, discarding current contents
    ///
    /// Fails with [`AudioError::BufferBusy`] while a stream is attached.
    pub fn resize(&mut self, capacity_frames: usize) -> Result<(), AudioError> {
        if self.attached {
            return Err(AudioError::BufferBusy);
        }
        self.storage = vec![0.0; capacity_frames * self.channels as usize];
        self.capacity_frames = capacity_frames;
        self.clear();
        Ok(())
    }

    /// Empty the window without releasing storage
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len_frames = 0;
        self.evicted_frames = 0;
    }

    pub(crate) fn set_attached(&mut self, attached: bool) {
        self.attached = attached;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Frames currently held
    pub fn len(&self) -> usize {
        self.len_frames
    }

    pub fn is_empty(&self) -> bool {
        self.len_frames == 0
    }

    /// Window size in frames
    pub fn capacity(&self) -> usize {
        self.capacity_frames
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Frames dropped off the front since the last clear
    pub fn evicted_frames(&self) -> u64 {
        self.evicted_frames
    }

    /// Get fill level as percentage
    pub fn fill_level(&self) -> f32 {
        if self.capacity_frames == 0 {
            return 0.0;
        }
        self.len_frames as f32 / self.capacity_frames as f32
    }
}

/// Unbounded per-device accumulator for one recording session
pub struct SessionBuffer {
    blocks: Vec<Vec<f32>>,
    channels: u16,
    /// Samples per block
    block_len: usize,
}

impl SessionBuffer {
    /// Create an empty buffer growing in blocks of `block_frames` frames
    pub fn new(channels: u16, block_frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            blocks: Vec::new(),
            channels,
            block_len: block_frames.max(1) * channels as usize,
        }
    }

    /// Append interleaved samples in arrival order
    pub fn append(&mut self, mut samples: &[f32]) {
        while !samples.is_empty() {
            let needs_block = self
                .blocks
                .last()
                .map_or(true, |block| block.len() == self.block_len);
            if needs_block {
                self.blocks.push(Vec::with_capacity(self.block_len));
            }
            let Some(block) = self.blocks.last_mut() else {
                return;
            };
            let take = samples.len().min(self.block_len - block.len());
            block.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
        }
    }

    /// Hand over everything collected and reset to empty
    pub fn drain(&mut self) -> CapturedAudio {
        CapturedAudio::new(self.channels, std::mem::take(&mut self.blocks))
    }

    /// Interleaved samples held
    pub fn sample_count(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    /// Sample frames held
    pub fn len(&self) -> usize {
        self.sample_count() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}
