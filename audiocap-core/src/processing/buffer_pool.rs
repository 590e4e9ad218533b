use std::collections::HashMap;

use parking_lot::Mutex;

use crate::models::audio_frame::AudioFrame;
use crate::models::error::CaptureError;

/// Upper bound on buffers kept alive per key.
pub const MAX_BUFFERS_PER_KEY: usize = 8;

/// Shape of the buffers a pool slot hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub sample_rate: u32,
    pub channels: u16,
    pub interleaved: bool,
    pub frame_capacity: usize,
}

impl PoolKey {
    pub fn for_frame(frame: &AudioFrame) -> Self {
        Self {
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            interleaved: frame.interleaved,
            frame_capacity: frame.frame_count(),
        }
    }
}

/// A frame whose storage may belong to a [`BufferPool`].
///
/// Transient frames were allocated outside the pool and are simply dropped by
/// [`BufferPool::give_back`].
#[derive(Debug)]
pub struct PooledFrame {
    key: PoolKey,
    pooled: bool,
    pub frame: AudioFrame,
}

impl PooledFrame {
    pub fn transient(frame: AudioFrame) -> Self {
        Self {
            key: PoolKey::for_frame(&frame),
            pooled: false,
            frame,
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    pub fn into_frame(self) -> AudioFrame {
        self.frame
    }
}

#[derive(Debug, Default)]
struct Slot {
    free: Vec<Vec<f32>>,
    outstanding: usize,
}

/// Keyed cache of reusable frame buffers, bounded per key.
#[derive(Debug)]
pub struct BufferPool {
    max_per_key: usize,
    slots: Mutex<HashMap<PoolKey, Slot>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_limit(MAX_BUFFERS_PER_KEY)
    }

    pub fn with_limit(max_per_key: usize) -> Self {
        Self {
            max_per_key,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Hand out a zeroed buffer for `key`, or None when the key is at its limit.
    pub fn rent(&self, key: PoolKey) -> Option<PooledFrame> {
        let len = key.frame_capacity * key.channels as usize;
        let mut slots = self.slots.lock();
        let slot = slots.entry(key).or_default();

        let samples = match slot.free.pop() {
            Some(mut buffer) => {
                buffer.clear();
                buffer.resize(len, 0.0);
                buffer
            }
            None if slot.outstanding < self.max_per_key => vec![0.0; len],
            None => return None,
        };
        slot.outstanding += 1;

        Some(PooledFrame {
            key,
            pooled: true,
            frame: AudioFrame::new(samples, key.sample_rate, key.channels, key.interleaved),
        })
    }

    /// Copy `frame` into a rented buffer.
    pub fn clone_frame(&self, frame: &AudioFrame) -> Result<PooledFrame, CaptureError> {
        let mut pooled = self.rent(PoolKey::for_frame(frame)).ok_or(CaptureError::BufferExhausted)?;
        let len = pooled.frame.samples.len();
        pooled.frame.samples.copy_from_slice(&frame.samples[..len]);
        Ok(pooled)
    }

    /// Return a buffer so later rents can reuse it.
    pub fn give_back(&self, pooled: PooledFrame) {
        if !pooled.pooled {
            return;
        }
        let mut slots = self.slots.lock();
        let slot = slots.entry(pooled.key).or_default();
        slot.outstanding = slot.outstanding.saturating_sub(1);
        if slot.free.len() + slot.outstanding < self.max_per_key {
            slot.free.push(pooled.frame.samples);
        }
    }

    /// Buffers currently rented out for `key`.
    pub fn outstanding(&self, key: &PoolKey) -> usize {
        self.slots.lock().get(key).map_or(0, |s| s.outstanding)
    }

    /// Idle buffers kept for `key`.
    pub fn free_count(&self, key: &PoolKey) -> usize {
        self.slots.lock().get(key).map_or(0, |s| s.free.len())
    }

    /// Drop every idle buffer. Outstanding buffers are still accepted back.
    pub fn clear(&self) {
        for slot in self.slots.lock().values_mut() {
            slot.free.clear();
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
