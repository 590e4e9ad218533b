use std::io::{self, Write};
use std::num::{NonZeroU32, NonZeroU8};
use std::sync::Arc;

use parking_lot::Mutex;
use vorbis_rs::{VorbisBitrateManagementStrategy, VorbisEncoder, VorbisEncoderBuilder};

use crate::compression::encoder::AudioEncoder;
use crate::models::audio_frame::AudioFrame;
use crate::models::compression::{CompressionConfiguration, CompressionFormat};
use crate::models::error::CaptureError;
use crate::processing::channel_mixer::ChannelMixer;

/// Per-channel range of libvorbis' uncoupled bitrate modes.
const MIN_UNCOUPLED_CHANNEL_BPS: u32 = 34_000;
const MAX_UNCOUPLED_CHANNEL_BPS: u32 = 240_000;

/// Ogg pages written by libvorbis, collected until the caller takes them.
#[derive(Clone, Default)]
struct PageBuffer(Arc<Mutex<Vec<u8>>>);

impl PageBuffer {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl Write for PageBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Multichannel Ogg Vorbis, average or variable bitrate.
pub struct OggVorbisEncoder {
    encoder: Option<VorbisEncoder<PageBuffer>>,
    pages: PageBuffer,
    channels: usize,
}

impl OggVorbisEncoder {
    pub fn new(config: &CompressionConfiguration) -> Result<Self, CaptureError> {
        let sample_rate = NonZeroU32::new(config.sample_rate)
            .ok_or_else(|| CaptureError::EncodingFailed("sample rate must be positive".into()))?;
        let channels = u8::try_from(config.channels)
            .ok()
            .and_then(NonZeroU8::new)
            .ok_or_else(|| CaptureError::EncodingFailed(format!("unsupported channel count {}", config.channels)))?;
        let bitrate = NonZeroU32::new(stream_bitrate(config.bitrate_kbps, config.channels))
            .ok_or_else(|| CaptureError::EncodingFailed("bitrate must be positive".into()))?;

        let strategy = if config.vbr {
            VorbisBitrateManagementStrategy::Vbr { target_bitrate: bitrate }
        } else {
            VorbisBitrateManagementStrategy::Abr { average_bitrate: bitrate }
        };

        let pages = PageBuffer::default();
        let mut builder = VorbisEncoderBuilder::new(sample_rate, channels, pages.clone())
            .map_err(|e| CaptureError::EncodingFailed(format!("failed to create Vorbis encoder: {}", e)))?;
        builder.bitrate_management_strategy(strategy);
        let encoder = builder
            .build()
            .map_err(|e| CaptureError::EncodingFailed(format!("failed to build Vorbis encoder: {}", e)))?;

        Ok(Self {
            encoder: Some(encoder),
            pages,
            channels: config.channels as usize,
        })
    }
}

impl AudioEncoder for OggVorbisEncoder {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Vorbis
    }

    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CaptureError> {
        // an empty block would tell libvorbis the stream has ended
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let encoder = self.encoder.as_mut().ok_or(CaptureError::EngineNotInitialized)?;
        let planar = ChannelMixer::deinterleave(&frame.samples, self.channels);
        encoder
            .encode_audio_block(&planar)
            .map_err(|e| CaptureError::EncodingFailed(format!("Vorbis encoding error: {}", e)))?;
        Ok(self.pages.take())
    }

    fn finish(&mut self) -> Result<Vec<u8>, CaptureError> {
        if let Some(encoder) = self.encoder.take() {
            encoder
                .finish()
                .map_err(|e| CaptureError::EncodingFailed(format!("Vorbis finish error: {}", e)))?;
        }
        Ok(self.pages.take())
    }
}

/// Target bitrate in bits per second.
///
/// Layouts other than stereo are encoded uncoupled, which bounds the
/// per-channel rate; the requested bitrate is moved into that range.
fn stream_bitrate(kbps: u32, channels: u16) -> u32 {
    let requested = kbps.saturating_mul(1000);
    if channels == 2 || channels == 0 {
        return requested;
    }
    let floor = MIN_UNCOUPLED_CHANNEL_BPS * channels as u32;
    let ceiling = MAX_UNCOUPLED_CHANNEL_BPS * channels as u32;
    let bitrate = requested.clamp(floor, ceiling);
    if bitrate != requested {
        log::warn!(
            "adjusting Vorbis bitrate from {} to {} kbps for {} channel(s)",
            kbps,
            bitrate / 1000,
            channels
        );
    }
    bitrate
}
