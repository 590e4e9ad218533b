/// An owned block of `f32` samples with its layout.
///
/// Interleaved frames store `[c0 c1 .. cN, c0 c1 .. cN, ...]`; planar frames
/// store each channel contiguously, channel 0 first.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub interleaved: bool,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, interleaved: bool) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            interleaved,
        }
    }

    pub fn interleaved(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self::new(samples, sample_rate, channels, true)
    }

    /// A frame of `frames` silent frames.
    pub fn silent(frames: usize, sample_rate: u32, channels: u16, interleaved: bool) -> Self {
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels, interleaved)
    }

    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Size of this frame once converted to 16-bit PCM.
    pub fn pcm16_byte_len(&self) -> u64 {
        self.samples.len() as u64 * 2
    }

    /// Copy of a single channel, whatever the layout.
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        let channels = self.channels as usize;
        let frames = self.frame_count();
        if channel >= channels {
            return Vec::new();
        }
        if self.interleaved {
            self.samples.iter().skip(channel).step_by(channels).take(frames).copied().collect()
        } else {
            self.samples[channel * frames..(channel + 1) * frames].to_vec()
        }
    }

    /// One `Vec` per channel.
    pub fn to_planar(&self) -> Vec<Vec<f32>> {
        (0..self.channels as usize).map(|ch| self.channel(ch)).collect()
    }

    /// The same audio in interleaved layout.
    pub fn into_interleaved(self) -> Self {
        if self.interleaved || self.channels <= 1 {
            return Self {
                interleaved: true,
                ..self
            };
        }
        let channels = self.channels as usize;
        let frames = self.frame_count();
        let mut samples = vec![0.0f32; frames * channels];
        for ch in 0..channels {
            for i in 0..frames {
                samples[i * channels + ch] = self.samples[ch * frames + i];
            }
        }
        Self::new(samples, self.sample_rate, self.channels, true)
    }
}
