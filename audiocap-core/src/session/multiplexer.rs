use std::sync::Arc;

use crate::models::audio_frame::AudioFrame;
use crate::models::config::RecorderConfiguration;
use crate::processing::ring_buffer::RingBuffer;

/// An auxiliary source: its 1-based output channel and mono ring buffer.
pub type AuxiliaryInput = (u16, Arc<RingBuffer>);

/// One multiplexed frame plus how much real primary audio went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiplexedFrame {
    pub frame: AudioFrame,
    pub primary_frames: usize,
}

/// Builds fixed-layout multichannel frames from per-source ring buffers.
///
/// ```text
/// [primary ring] ──► ch 1..=P
/// [aux ring k]   ──► ch k        (k from the assignment registry)
/// (nothing)      ──► silence
/// ```
#[derive(Debug, Clone)]
pub struct MultiplexWriter {
    sample_rate: u32,
    output_channels: usize,
    primary_channels: usize,
    frames_per_tick: usize,
    interleaved: bool,
    primary_scratch: Vec<f32>,
    aux_scratch: Vec<f32>,
}

impl MultiplexWriter {
    pub fn new(config: &RecorderConfiguration) -> Self {
        Self {
            sample_rate: config.sample_rate,
            output_channels: config.output_channels as usize,
            primary_channels: config.primary_channels as usize,
            frames_per_tick: config.frames_per_tick(),
            interleaved: config.interleaved,
            primary_scratch: Vec::new(),
            aux_scratch: Vec::new(),
        }
    }

    pub fn frames_per_tick(&self) -> usize {
        self.frames_per_tick
    }

    /// Drain one tick's worth of frames from every source.
    pub fn mix_tick(&mut self, primary: &RingBuffer, auxiliary: &[AuxiliaryInput]) -> MultiplexedFrame {
        self.mix_frames(self.frames_per_tick, primary, auxiliary)
    }

    /// Drain `frames` frames from every source into one output frame.
    ///
    /// Sources with less audio queued contribute silence for the remainder.
    /// Channels without a source are exactly zero.
    pub fn mix_frames(&mut self, frames: usize, primary: &RingBuffer, auxiliary: &[AuxiliaryInput]) -> MultiplexedFrame {
        let out_ch = self.output_channels;
        let mut out = vec![0.0f32; frames * out_ch];

        let primary_ch = primary.channels();
        self.primary_scratch.resize(frames * primary_ch, 0.0);
        let primary_frames = primary.read_into(&mut self.primary_scratch);
        let copied = primary_ch.min(self.primary_channels);
        for i in 0..frames {
            for c in 0..copied {
                let sample = self.primary_scratch[i * primary_ch + c];
                self.place(&mut out, frames, i, c, sample);
            }
        }

        for (channel, ring) in auxiliary {
            let index = *channel as usize;
            if index == 0 || index > out_ch || index <= self.primary_channels {
                continue;
            }
            let ring_ch = ring.channels();
            self.aux_scratch.resize(frames * ring_ch, 0.0);
            ring.read_into(&mut self.aux_scratch);
            for i in 0..frames {
                let sample = self.aux_scratch[i * ring_ch];
                self.place(&mut out, frames, i, index - 1, sample);
            }
        }

        MultiplexedFrame {
            frame: AudioFrame::new(out, self.sample_rate, out_ch as u16, self.interleaved),
            primary_frames,
        }
    }

    fn place(&self, out: &mut [f32], frames: usize, frame: usize, channel: usize, sample: f32) {
        let index = if self.interleaved {
            frame * self.output_channels + channel
        } else {
            channel * frames + frame
        };
        out[index] = sample;
    }
}
