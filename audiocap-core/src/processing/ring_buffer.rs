use parking_lot::Mutex;

/// Fixed-capacity circular buffer of interleaved audio frames.
///
/// Safe for one producer and one consumer on different threads: the cursor,
/// counters and backing storage sit behind a single `parking_lot::Mutex`, so
/// share it as `Arc<RingBuffer>`.
///
/// Overflow behavior: incoming frames that do not fit are dropped; data already
/// queued is never overwritten. Short reads are padded with silence.
#[derive(Debug)]
pub struct RingBuffer {
    channels: usize,
    capacity: usize,
    state: Mutex<RingState>,
}

#[derive(Debug)]
struct RingState {
    buffer: Vec<f32>,
    write_frame: usize,
    read_frame: usize,
    available: usize,
    dropped: u64,
}

impl RingBuffer {
    /// `capacity` is in frames; each frame holds `channels` samples.
    pub fn new(capacity: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity,
            state: Mutex::new(RingState {
                buffer: vec![0.0; capacity * channels],
                write_frame: 0,
                read_frame: 0,
                available: 0,
                dropped: 0,
            }),
        }
    }

    /// Copy whole frames from `samples` into the buffer.
    ///
    /// Accepts at most `capacity - available_frames()` frames and drops the
    /// rest. A trailing partial frame is ignored. Returns the frames accepted.
    pub fn write(&self, samples: &[f32]) -> usize {
        let incoming = samples.len() / self.channels;
        if incoming == 0 {
            return 0;
        }

        let mut state = self.state.lock();
        let accepted = incoming.min(self.capacity - state.available);
        state.dropped += (incoming - accepted) as u64;
        if accepted == 0 {
            return 0;
        }

        let start = state.write_frame;
        let first = accepted.min(self.capacity - start);
        let ch = self.channels;
        state.buffer[start * ch..(start + first) * ch].copy_from_slice(&samples[..first * ch]);
        if first < accepted {
            let rest = accepted - first;
            state.buffer[..rest * ch].copy_from_slice(&samples[first * ch..accepted * ch]);
        }

        state.write_frame = (start + accepted) % self.capacity;
        state.available += accepted;
        accepted
    }

    /// Fill `out` with `out.len() / channels` frames.
    ///
    /// Copies up to `available_frames()` real frames and zero-fills the rest.
    /// Returns the number of real frames consumed.
    pub fn read_into(&self, out: &mut [f32]) -> usize {
        let ch = self.channels;
        let requested = out.len() / ch;
        let mut state = self.state.lock();
        let to_read = requested.min(state.available);

        if to_read > 0 {
            let start = state.read_frame;
            let first = to_read.min(self.capacity - start);
            out[..first * ch].copy_from_slice(&state.buffer[start * ch..(start + first) * ch]);
            if first < to_read {
                let rest = to_read - first;
                out[first * ch..to_read * ch].copy_from_slice(&state.buffer[..rest * ch]);
            }
            state.read_frame = (start + to_read) % self.capacity;
            state.available -= to_read;
        }
        drop(state);

        out[to_read * ch..].fill(0.0);
        to_read
    }

    /// Read exactly `frames` frames into a new buffer, zero-padded.
    pub fn read(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.channels];
        self.read_into(&mut out);
        out
    }

    pub fn available_frames(&self) -> usize {
        self.state.lock().available
    }

    pub fn is_empty(&self) -> bool {
        self.available_frames() == 0
    }

    /// Frames rejected because the buffer was full.
    pub fn dropped_frames(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Forget all queued frames and overflow counts.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.write_frame = 0;
        state.read_frame = 0;
        state.available = 0;
        state.dropped = 0;
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}
