use crate::compression::encoder::AudioEncoder;
use crate::models::audio_frame::AudioFrame;
use crate::models::compression::CompressionFormat;
use crate::models::error::CaptureError;
use crate::processing::channel_mixer::ChannelMixer;

/// 16-bit little-endian PCM for the WAV path.
#[derive(Debug, Clone)]
pub struct PcmEncoder {
    channels: u16,
}

impl PcmEncoder {
    pub fn new(channels: u16) -> Self {
        Self { channels }
    }
}

impl AudioEncoder for PcmEncoder {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Uncompressed
    }

    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CaptureError> {
        if frame.channels != self.channels {
            return Err(CaptureError::EncodingFailed(format!(
                "expected {} channel(s), got {}",
                self.channels, frame.channels
            )));
        }
        Ok(ChannelMixer::convert_to_int16_pcm(&frame.samples))
    }

    fn finish(&mut self) -> Result<Vec<u8>, CaptureError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_two_bytes_per_sample() {
        let mut encoder = PcmEncoder::new(2);
        let bytes = encoder
            .encode(&AudioFrame::interleaved(vec![0.0, 1.0, -1.0, 0.5], 48_000, 2))
            .unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        assert!(encoder.finish().unwrap().is_empty());
    }

    #[test]
    fn rejects_wrong_layout() {
        let mut encoder = PcmEncoder::new(8);
        let result = encoder.encode(&AudioFrame::interleaved(vec![0.0; 4], 48_000, 2));
        assert!(matches!(result, Err(CaptureError::EncodingFailed(_))));
    }
}
