/// Pure-math channel layout helpers and resampler.
///
/// All operations work on `&[f32]` buffers. Multichannel audio is interleaved
/// `[c0, c1, .., cN, c0, c1, ..]` unless a function says otherwise.
#[derive(Debug, Clone)]
pub struct ChannelMixer {
    pub target_sample_rate: u32,
}

impl ChannelMixer {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    /// Interleave per-channel buffers. Shorter channels are padded with silence.
    pub fn interleave(channels: &[&[f32]]) -> Vec<f32> {
        let channel_count = channels.len();
        let frame_count = channels.iter().map(|c| c.len()).max().unwrap_or(0);
        if frame_count == 0 {
            return Vec::new();
        }

        let mut out = vec![0.0f32; frame_count * channel_count];
        for (ch, samples) in channels.iter().enumerate() {
            for (i, &s) in samples.iter().enumerate() {
                out[i * channel_count + ch] = s;
            }
        }
        out
    }

    /// Split interleaved audio into one buffer per channel.
    pub fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
        if channels == 0 {
            return Vec::new();
        }
        let frame_count = samples.len() / channels;
        let mut out: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frame_count)).collect();
        for frame in samples.chunks_exact(channels) {
            for (ch, &s) in frame.iter().enumerate() {
                out[ch].push(s);
            }
        }
        out
    }

    /// Change the channel count of interleaved audio.
    ///
    /// Downmixing folds source channel `c` into output channel `c % to` and
    /// averages each output by the number of contributors, so 8 → 2 sends odd
    /// channels left and even channels right. Upmixing repeats the source
    /// layout, so mono becomes dual mono.
    pub fn remix(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
        if from == to || from == 0 || to == 0 {
            return samples.to_vec();
        }
        let frame_count = samples.len() / from;
        let mut out = vec![0.0f32; frame_count * to];

        if to < from {
            let contributors: Vec<f32> = (0..to)
                .map(|o| (0..from).filter(|c| c % to == o).count() as f32)
                .collect();
            for (frame, dst) in samples.chunks_exact(from).zip(out.chunks_exact_mut(to)) {
                for (c, &s) in frame.iter().enumerate() {
                    dst[c % to] += s;
                }
                for (o, d) in dst.iter_mut().enumerate() {
                    *d /= contributors[o];
                }
            }
        } else {
            for (frame, dst) in samples.chunks_exact(from).zip(out.chunks_exact_mut(to)) {
                for (o, d) in dst.iter_mut().enumerate() {
                    *d = frame[o % from];
                }
            }
        }
        out
    }

    /// Average all channels of each frame.
    pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
        if channels <= 1 {
            return samples.to_vec();
        }
        let scale = 1.0 / channels as f32;
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect()
    }

    /// Convert f32 samples `[-1.0, 1.0]` to 16-bit PCM (little-endian bytes).
    ///
    /// Clamps out-of-range values. Output length = `samples.len() * 2` bytes.
    pub fn convert_to_int16_pcm(samples: &[f32]) -> Vec<u8> {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            let int16_value = (clamped * i16::MAX as f32) as i16;
            data.extend_from_slice(&int16_value.to_le_bytes());
        }
        data
    }

    /// Linear interpolation resampling for interleaved audio with any channel count.
    ///
    /// Resamples from `source_sample_rate` to `self.target_sample_rate`.
    /// Returns input unchanged if rates match.
    pub fn resample(&self, samples: &[f32], channels: usize, source_sample_rate: u32) -> Vec<f32> {
        if source_sample_rate == self.target_sample_rate || samples.is_empty() || channels == 0 {
            return samples.to_vec();
        }
        if source_sample_rate == 0 {
            return Vec::new();
        }

        let frame_count = samples.len() / channels;
        let ratio = self.target_sample_rate as f64 / source_sample_rate as f64;
        let output_frames = (frame_count as f64 * ratio) as usize;
        if output_frames == 0 {
            return Vec::new();
        }

        let mut output = vec![0.0f32; output_frames * channels];
        for i in 0..output_frames {
            let source_index = i as f64 / ratio;
            let index = source_index as usize;
            let fraction = (source_index - index as f64) as f32;

            for ch in 0..channels {
                if index + 1 < frame_count {
                    output[i * channels + ch] = samples[index * channels + ch] * (1.0 - fraction)
                        + samples[(index + 1) * channels + ch] * fraction;
                } else if index < frame_count {
                    output[i * channels + ch] = samples[index * channels + ch];
                }
            }
        }
        output
    }

    /// Compute RMS level of samples (0.0–1.0 range for normalized audio).
    pub fn rms_level(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    /// Compute peak absolute level of samples.
    pub fn peak_level(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_three_channels() {
        let result = ChannelMixer::interleave(&[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]);
        assert_eq!(result, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn interleave_unequal_lengths() {
        let result = ChannelMixer::interleave(&[&[1.0, 2.0], &[4.0, 5.0, 6.0]]);

        assert_eq!(result.len(), 6);
        assert_eq!(result[4], 0.0); // left zero-padded
        assert_eq!(result[5], 6.0);
    }

    #[test]
    fn deinterleave_reverses_interleave() {
        let planar = ChannelMixer::deinterleave(&[1.0, 3.0, 5.0, 2.0, 4.0, 6.0], 3);
        assert_eq!(planar, vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]);
    }

    #[test]
    fn remix_eight_to_stereo_alternates_sides() {
        let frame = [0.8, 0.4, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let stereo = ChannelMixer::remix(&frame, 8, 2);
        assert_eq!(stereo.len(), 2);
        assert!((stereo[0] - 0.2).abs() < 1e-6);
        assert!((stereo[1] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn remix_mono_to_stereo_duplicates() {
        assert_eq!(ChannelMixer::remix(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn downmix_stereo_to_mono() {
        let mono = ChannelMixer::downmix_to_mono(&[0.2, 0.8, 0.4, 0.6], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.5).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn convert_to_int16_pcm() {
        let pcm = ChannelMixer::convert_to_int16_pcm(&[0.0, 1.0, -1.0, 0.5]);

        assert_eq!(pcm.len(), 8);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[4], pcm[5]]), -i16::MAX);
    }

    #[test]
    fn convert_clamps_out_of_range() {
        let pcm = ChannelMixer::convert_to_int16_pcm(&[2.0, -3.0]);

        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), -i16::MAX);
    }

    #[test]
    fn resample_same_rate_is_passthrough() {
        let mixer = ChannelMixer::new(48_000);
        let samples = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(mixer.resample(&samples, 2, 48_000), samples);
    }

    #[test]
    fn resample_upsample_2x_mono() {
        let mixer = ChannelMixer::new(48_000);
        let result = mixer.resample(&[0.0, 1.0], 1, 24_000);

        assert_eq!(result.len(), 4);
        assert!((result[0] - 0.0).abs() < 0.01);
        assert!((result[1] - 0.5).abs() < 0.1);
    }

    #[test]
    fn resample_downsample_stereo_keeps_channels_apart() {
        let mixer = ChannelMixer::new(24_000);
        let samples: Vec<f32> = (0..100).flat_map(|_| [1.0, -1.0]).collect();

        let result = mixer.resample(&samples, 2, 48_000);

        assert_eq!(result.len(), 100);
        assert!(result.chunks_exact(2).all(|f| f[0] == 1.0 && f[1] == -1.0));
    }

    #[test]
    fn levels() {
        assert_eq!(ChannelMixer::rms_level(&[0.0, 0.0, 0.0]), 0.0);
        assert!((ChannelMixer::rms_level(&[1.0, 1.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((ChannelMixer::peak_level(&[0.1, -0.5, 0.3]) - 0.5).abs() < 1e-6);
    }
}
