use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use flacenc::source::MemSource;

use crate::compression::encoder::AudioEncoder;
use crate::models::audio_frame::AudioFrame;
use crate::models::compression::{CompressionConfiguration, CompressionFormat};
use crate::models::error::CaptureError;

const FLAC_BITS_PER_SAMPLE: usize = 16;

/// Lossless FLAC, 16-bit, 1-8 channels.
///
/// flacenc writes the STREAMINFO block (total samples, MD5) up front, so the
/// stream is built in one pass once the session ends. Until then the encoder
/// keeps the quantized samples; `encode` never emits bytes.
pub struct FlacEncoder {
    channels: u16,
    sample_rate: u32,
    samples: Vec<i32>,
}

impl FlacEncoder {
    pub fn new(config: &CompressionConfiguration) -> Result<Self, CaptureError> {
        if config.channels == 0 || config.channels > CompressionFormat::Lossless.max_channels() {
            return Err(CaptureError::EncodingFailed(format!(
                "FLAC cannot encode {} channel(s)",
                config.channels
            )));
        }
        Ok(Self {
            channels: config.channels,
            sample_rate: config.sample_rate,
            samples: Vec::new(),
        })
    }
}

impl AudioEncoder for FlacEncoder {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Lossless
    }

    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CaptureError> {
        if frame.channels != self.channels {
            return Err(CaptureError::EncodingFailed(format!(
                "expected {} channel(s), got {}",
                self.channels, frame.channels
            )));
        }
        self.samples
            .extend(frame.samples.iter().map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i32));
        Ok(Vec::new())
    }

    fn finish(&mut self) -> Result<Vec<u8>, CaptureError> {
        if self.samples.is_empty() {
            return Ok(Vec::new());
        }
        let samples = std::mem::take(&mut self.samples);

        let config = flacenc::config::Encoder::default()
            .into_verified()
            .map_err(|(_, e)| CaptureError::EncodingFailed(format!("invalid FLAC settings: {:?}", e)))?;
        let source = MemSource::from_samples(
            &samples,
            self.channels as usize,
            FLAC_BITS_PER_SAMPLE,
            self.sample_rate as usize,
        );
        let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
            .map_err(|e| CaptureError::EncodingFailed(format!("FLAC encoding error: {:?}", e)))?;

        let mut sink = ByteSink::new();
        stream
            .write(&mut sink)
            .map_err(|_| CaptureError::EncodingFailed("failed to serialize FLAC stream".into()))?;
        Ok(sink.as_slice().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frames: usize, channels: u16) -> AudioFrame {
        let samples = (0..frames * channels as usize)
            .map(|i| ((i / channels as usize) as f32 * 0.02).sin() * 0.5)
            .collect();
        AudioFrame::interleaved(samples, 48_000, channels)
    }

    #[test]
    fn stream_is_emitted_on_finish() {
        let config = CompressionConfiguration::new(CompressionFormat::Lossless, 0, 48_000, 2);
        let mut encoder = FlacEncoder::new(&config).unwrap();

        for _ in 0..10 {
            assert!(encoder.encode(&tone(4_800, 2)).unwrap().is_empty());
        }
        let bytes = encoder.finish().unwrap();

        assert_eq!(&bytes[0..4], b"fLaC");
        let pcm_bytes = 10 * 4_800 * 2 * 2;
        assert!(bytes.len() < pcm_bytes, "{} bytes is not smaller than PCM", bytes.len());
    }

    #[test]
    fn eight_channels_are_accepted() {
        let config = CompressionConfiguration::new(CompressionFormat::Lossless, 0, 44_100, 8);
        let mut encoder = FlacEncoder::new(&config).unwrap();
        encoder.encode(&tone(2_048, 8)).unwrap();
        assert_eq!(&encoder.finish().unwrap()[0..4], b"fLaC");
    }

    #[test]
    fn nothing_recorded_means_no_stream() {
        let config = CompressionConfiguration::new(CompressionFormat::Lossless, 0, 48_000, 1);
        let mut encoder = FlacEncoder::new(&config).unwrap();
        assert!(encoder.finish().unwrap().is_empty());
    }

    #[test]
    fn rejects_wrong_layout() {
        let config = CompressionConfiguration::new(CompressionFormat::Lossless, 0, 48_000, 2);
        let mut encoder = FlacEncoder::new(&config).unwrap();
        assert!(matches!(
            encoder.encode(&tone(16, 8)),
            Err(CaptureError::EncodingFailed(_))
        ));
    }
}
