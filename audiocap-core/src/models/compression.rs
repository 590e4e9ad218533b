use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;

/// Lowest bitrate accepted by the lossy encoders.
pub const MIN_BITRATE_KBPS: u32 = 64;
/// Highest bitrate accepted by the lossy encoders.
pub const MAX_BITRATE_KBPS: u32 = 320;
/// Sample rates accepted by the lossy encoders.
pub const SUPPORTED_SAMPLE_RATES: [u32; 3] = [22050, 44100, 48000];

const LOSSLESS_SAMPLE_RATES: std::ops::RangeInclusive<u32> = 8_000..=192_000;
const MAX_MULTICHANNEL: u16 = 8;

/// Container/codec family written by the compression pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    /// Constant bitrate MP3, stereo limited.
    Mp3,
    /// Ogg Vorbis, up to 8 channels, CBR-like ABR or VBR.
    Vorbis,
    /// Lossless FLAC.
    Lossless,
    /// 16-bit PCM WAV.
    Uncompressed,
}

impl CompressionFormat {
    pub fn is_lossy(self) -> bool {
        matches!(self, Self::Mp3 | Self::Vorbis)
    }

    pub fn supports_vbr(self) -> bool {
        matches!(self, Self::Vorbis)
    }

    pub fn max_channels(self) -> u16 {
        match self {
            Self::Mp3 => 2,
            Self::Vorbis | Self::Lossless | Self::Uncompressed => MAX_MULTICHANNEL,
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Vorbis => "ogg",
            Self::Lossless => "flac",
            Self::Uncompressed => "wav",
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mp3 => "MP3",
            Self::Vorbis => "Ogg Vorbis",
            Self::Lossless => "Lossless",
            Self::Uncompressed => "Uncompressed PCM",
        };
        f.write_str(name)
    }
}

/// Named quality presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionQuality {
    Low,
    Medium,
    High,
    Maximum,
}

impl CompressionQuality {
    pub fn bitrate_kbps(self) -> u32 {
        match self {
            Self::Low => 64,
            Self::Medium => 128,
            Self::High => 192,
            Self::Maximum => 256,
        }
    }

    /// Preset implied by a bitrate when none was chosen explicitly.
    pub fn from_bitrate(kbps: u32) -> Self {
        match kbps {
            0..=96 => Self::Medium,
            97..=160 => Self::High,
            _ => Self::Maximum,
        }
    }
}

/// Settings for one encoding session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfiguration {
    pub format: CompressionFormat,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub vbr: bool,
    pub quality: Option<CompressionQuality>,
}

impl CompressionConfiguration {
    pub fn new(format: CompressionFormat, bitrate_kbps: u32, sample_rate: u32, channels: u16) -> Self {
        Self {
            format,
            bitrate_kbps,
            sample_rate,
            channels,
            vbr: false,
            quality: None,
        }
    }

    /// Build a configuration from a quality preset; the preset fixes the bitrate.
    pub fn with_quality(format: CompressionFormat, quality: CompressionQuality, sample_rate: u32, channels: u16) -> Self {
        Self {
            quality: Some(quality),
            ..Self::new(format, quality.bitrate_kbps(), sample_rate, channels)
        }
    }

    pub fn uncompressed(sample_rate: u32, channels: u16) -> Self {
        Self::new(CompressionFormat::Uncompressed, 0, sample_rate, channels)
    }

    pub fn with_vbr(mut self, vbr: bool) -> Self {
        self.vbr = vbr;
        self
    }

    /// The explicit preset, or the one implied by the bitrate.
    pub fn effective_quality(&self) -> CompressionQuality {
        self.quality.unwrap_or_else(|| CompressionQuality::from_bitrate(self.bitrate_kbps))
    }

    /// Strict validation: every field must already be acceptable for the format.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.channels == 0 || self.channels > self.format.max_channels() {
            return Err(ConfigurationError::ChannelCountNotSupported {
                format: self.format,
                channels: self.channels,
            });
        }

        match self.format {
            CompressionFormat::Mp3 | CompressionFormat::Vorbis => {
                if !(MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&self.bitrate_kbps) {
                    return Err(ConfigurationError::InvalidBitrate(self.bitrate_kbps));
                }
                if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
                    return Err(ConfigurationError::InvalidSampleRate(self.sample_rate));
                }
                if self.vbr && !self.format.supports_vbr() {
                    return Err(ConfigurationError::VbrNotSupported(self.format));
                }
            }
            CompressionFormat::Lossless => {
                if !LOSSLESS_SAMPLE_RATES.contains(&self.sample_rate) {
                    return Err(ConfigurationError::InvalidSampleRate(self.sample_rate));
                }
            }
            CompressionFormat::Uncompressed => {
                if self.sample_rate == 0 {
                    return Err(ConfigurationError::InvalidSampleRate(self.sample_rate));
                }
            }
        }
        Ok(())
    }

    /// Nearest configuration the format accepts.
    ///
    /// Clamps the bitrate, snaps the sample rate to the closest supported one,
    /// clamps the channel count and clears VBR where the format lacks it.
    pub fn sanitized(&self) -> Self {
        let mut sanitized = self.clone();
        sanitized.channels = self.channels.clamp(1, self.format.max_channels());

        match self.format {
            CompressionFormat::Mp3 | CompressionFormat::Vorbis => {
                sanitized.bitrate_kbps = self.bitrate_kbps.clamp(MIN_BITRATE_KBPS, MAX_BITRATE_KBPS);
                sanitized.sample_rate = nearest_supported_rate(self.sample_rate);
            }
            CompressionFormat::Lossless => {
                sanitized.sample_rate = self
                    .sample_rate
                    .clamp(*LOSSLESS_SAMPLE_RATES.start(), *LOSSLESS_SAMPLE_RATES.end());
            }
            CompressionFormat::Uncompressed => {
                if sanitized.sample_rate == 0 {
                    sanitized.sample_rate = 48_000;
                }
            }
        }

        if !self.format.supports_vbr() {
            sanitized.vbr = false;
        }
        sanitized
    }
}

impl Default for CompressionConfiguration {
    fn default() -> Self {
        Self::with_quality(CompressionFormat::Vorbis, CompressionQuality::Medium, 48_000, 2)
    }
}

/// Closest entry of [`SUPPORTED_SAMPLE_RATES`]; ties go to the lower rate.
pub fn nearest_supported_rate(rate: u32) -> u32 {
    let mut best = SUPPORTED_SAMPLE_RATES[0];
    for candidate in SUPPORTED_SAMPLE_RATES {
        if candidate.abs_diff(rate) < best.abs_diff(rate) {
            best = candidate;
        }
    }
    best
}
