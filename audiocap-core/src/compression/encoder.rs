use crate::compression::flac::FlacEncoder;
use crate::compression::mp3::Mp3Encoder;
use crate::compression::pcm::PcmEncoder;
use crate::compression::vorbis::OggVorbisEncoder;
use crate::models::audio_frame::AudioFrame;
use crate::models::compression::{CompressionConfiguration, CompressionFormat};
use crate::models::error::CaptureError;
use crate::processing::channel_mixer::ChannelMixer;

/// One codec instance for one output stream.
///
/// Encoders are built and driven on the encode thread, so they need not be `Send`.
/// Every frame passed to [`AudioEncoder::encode`] is interleaved and already
/// matches the session's sample rate and channel count (see [`conform_frame`]).
pub trait AudioEncoder {
    fn format(&self) -> CompressionFormat;

    /// Encode one frame and return whatever bytes the codec emitted.
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CaptureError>;

    /// Flush buffered audio. Called once, after the last frame.
    fn finish(&mut self) -> Result<Vec<u8>, CaptureError>;
}

/// Builds encoders for a validated configuration.
pub trait EncoderFactory: Send + Sync {
    fn create(&self, config: &CompressionConfiguration) -> Result<Box<dyn AudioEncoder>, CaptureError>;

    /// Whether a backend exists for `format`.
    fn supports(&self, format: CompressionFormat) -> bool;
}

/// LAME for MP3, libvorbis for Ogg Vorbis, flacenc for FLAC, raw PCM for WAV.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecEncoderFactory;

impl EncoderFactory for CodecEncoderFactory {
    fn create(&self, config: &CompressionConfiguration) -> Result<Box<dyn AudioEncoder>, CaptureError> {
        match config.format {
            CompressionFormat::Mp3 => Ok(Box::new(Mp3Encoder::new(config)?)),
            CompressionFormat::Vorbis => Ok(Box::new(OggVorbisEncoder::new(config)?)),
            CompressionFormat::Uncompressed => Ok(Box::new(PcmEncoder::new(config.channels))),
            CompressionFormat::Lossless => Ok(Box::new(FlacEncoder::new(config)?)),
        }
    }

    fn supports(&self, _format: CompressionFormat) -> bool {
        true
    }
}

/// Bring a multiplexed frame to the encoder's layout: interleaved, remixed to
/// `config.channels` and resampled to `config.sample_rate`.
pub fn conform_frame(frame: &AudioFrame, config: &CompressionConfiguration) -> AudioFrame {
    let interleaved = if frame.interleaved {
        frame.clone()
    } else {
        frame.clone().into_interleaved()
    };

    let source_channels = interleaved.channels as usize;
    let target_channels = config.channels as usize;
    let samples = if source_channels == target_channels {
        interleaved.samples
    } else {
        ChannelMixer::remix(&interleaved.samples, source_channels, target_channels)
    };

    let samples = if interleaved.sample_rate == config.sample_rate {
        samples
    } else {
        ChannelMixer::new(config.sample_rate).resample(&samples, target_channels, interleaved.sample_rate)
    };

    AudioFrame::interleaved(samples, config.sample_rate, config.channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_has_a_backend() {
        for format in [
            CompressionFormat::Mp3,
            CompressionFormat::Vorbis,
            CompressionFormat::Lossless,
            CompressionFormat::Uncompressed,
        ] {
            assert!(CodecEncoderFactory.supports(format));
        }
        let config = CompressionConfiguration::new(CompressionFormat::Lossless, 0, 48_000, 2);
        let encoder = CodecEncoderFactory.create(&config).unwrap();
        assert_eq!(encoder.format(), CompressionFormat::Lossless);
    }

    #[test]
    fn conform_remixes_and_resamples() {
        let frame = AudioFrame::interleaved(vec![0.5; 8 * 480], 48_000, 8);
        let config = CompressionConfiguration::new(CompressionFormat::Mp3, 128, 24_000, 2);

        let conformed = conform_frame(&frame, &config);

        assert_eq!(conformed.channels, 2);
        assert_eq!(conformed.sample_rate, 24_000);
        assert_eq!(conformed.frame_count(), 240);
        assert!(conformed.samples.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn conform_interleaves_planar_frames() {
        let frame = AudioFrame::new(vec![1.0, 2.0, 3.0, 4.0], 48_000, 2, false);
        let config = CompressionConfiguration::uncompressed(48_000, 2);

        assert_eq!(conform_frame(&frame, &config).samples, vec![1.0, 3.0, 2.0, 4.0]);
    }
}
