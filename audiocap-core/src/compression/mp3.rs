use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm, Quality};

use crate::compression::encoder::AudioEncoder;
use crate::models::audio_frame::AudioFrame;
use crate::models::compression::{CompressionConfiguration, CompressionFormat, CompressionQuality};
use crate::models::error::CaptureError;
use crate::processing::channel_mixer::ChannelMixer;

/// LAME always runs in stereo; mono input is duplicated to both sides.
const LAME_CHANNELS: u8 = 2;

/// Constant bitrate MP3 via LAME.
pub struct Mp3Encoder {
    lame: mp3lame_encoder::Encoder,
    input_channels: u16,
}

impl Mp3Encoder {
    pub fn new(config: &CompressionConfiguration) -> Result<Self, CaptureError> {
        let mut builder =
            Builder::new().ok_or_else(|| CaptureError::EncodingFailed("failed to create LAME encoder".into()))?;
        builder
            .set_num_channels(LAME_CHANNELS)
            .map_err(|e| CaptureError::EncodingFailed(format!("failed to set channel count: {:?}", e)))?;
        builder
            .set_sample_rate(config.sample_rate)
            .map_err(|e| CaptureError::EncodingFailed(format!("failed to set sample rate: {:?}", e)))?;
        builder
            .set_brate(lame_bitrate(config.bitrate_kbps))
            .map_err(|e| CaptureError::EncodingFailed(format!("failed to set bitrate: {:?}", e)))?;
        builder
            .set_quality(lame_quality(config.effective_quality()))
            .map_err(|e| CaptureError::EncodingFailed(format!("failed to set quality: {:?}", e)))?;

        let lame = builder
            .build()
            .map_err(|e| CaptureError::EncodingFailed(format!("failed to build LAME encoder: {:?}", e)))?;

        Ok(Self {
            lame,
            input_channels: config.channels,
        })
    }
}

impl AudioEncoder for Mp3Encoder {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Mp3
    }

    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CaptureError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let stereo = if self.input_channels == 1 {
            ChannelMixer::remix(&frame.samples, 1, 2)
        } else {
            frame.samples.clone()
        };

        // LAME recommendation: 1.25 * num_samples + 7200 bytes.
        let num_frames = stereo.len() / 2;
        let estimated_size = ((num_frames as f64) * 1.25 + 7200.0) as usize;
        let mut mp3_buffer: Vec<u8> = Vec::with_capacity(estimated_size);

        let written = self
            .lame
            .encode(InterleavedPcm(&stereo), mp3_buffer.spare_capacity_mut())
            .map_err(|e| CaptureError::EncodingFailed(format!("LAME encoding error: {:?}", e)))?;
        // SAFETY: LAME initialized exactly `written` bytes of the spare capacity.
        unsafe {
            mp3_buffer.set_len(written);
        }
        Ok(mp3_buffer)
    }

    fn finish(&mut self) -> Result<Vec<u8>, CaptureError> {
        let mut mp3_buffer: Vec<u8> = Vec::with_capacity(7200);
        let written = self
            .lame
            .flush::<FlushNoGap>(mp3_buffer.spare_capacity_mut())
            .map_err(|e| CaptureError::EncodingFailed(format!("LAME flush error: {:?}", e)))?;
        // SAFETY: LAME initialized exactly `written` bytes of the spare capacity.
        unsafe {
            mp3_buffer.set_len(written);
        }
        Ok(mp3_buffer)
    }
}

/// Largest LAME bitrate not above `kbps`.
fn lame_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        0..=79 => Bitrate::Kbps64,
        80..=95 => Bitrate::Kbps80,
        96..=111 => Bitrate::Kbps96,
        112..=127 => Bitrate::Kbps112,
        128..=159 => Bitrate::Kbps128,
        160..=191 => Bitrate::Kbps160,
        192..=223 => Bitrate::Kbps192,
        224..=255 => Bitrate::Kbps224,
        256..=319 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

fn lame_quality(quality: CompressionQuality) -> Quality {
    match quality {
        CompressionQuality::Low => Quality::Ok,
        CompressionQuality::Medium => Quality::Good,
        CompressionQuality::High => Quality::NearBest,
        CompressionQuality::Maximum => Quality::Best,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_mapping_rounds_down() {
        assert!(matches!(lame_bitrate(64), Bitrate::Kbps64));
        assert!(matches!(lame_bitrate(150), Bitrate::Kbps128));
        assert!(matches!(lame_bitrate(320), Bitrate::Kbps320));
    }

    #[test]
    fn encodes_stereo_tone() {
        let config = CompressionConfiguration::new(CompressionFormat::Mp3, 128, 44_100, 2);
        let mut encoder = Mp3Encoder::new(&config).unwrap();

        let samples: Vec<f32> = (0..44_100)
            .flat_map(|i| {
                let s = (i as f32 * 0.05).sin() * 0.5;
                [s, s]
            })
            .collect();

        let mut bytes = encoder
            .encode(&AudioFrame::interleaved(samples, 44_100, 2))
            .unwrap();
        bytes.extend(encoder.finish().unwrap());

        // one second at 128 kbps is about 16 KB
        assert!(bytes.len() > 10_000 && bytes.len() < 24_000, "got {} bytes", bytes.len());
    }
}
