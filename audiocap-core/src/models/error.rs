use thiserror::Error;

use super::compression::CompressionFormat;

/// Reasons a compression or recorder configuration is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("bitrate {0} kbps is outside the supported 64-320 kbps range")]
    InvalidBitrate(u32),

    #[error("sample rate {0} Hz is not supported")]
    InvalidSampleRate(u32),

    #[error("{format} does not support {channels} channel(s)")]
    ChannelCountNotSupported { format: CompressionFormat, channels: u16 },

    #[error("{0} does not support variable bitrate encoding")]
    VbrNotSupported(CompressionFormat),

    #[error("invalid recorder configuration: {0}")]
    Recorder(String),
}

/// Errors raised by the capture, multiplexing and compression pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigurationError),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("buffer pool exhausted")]
    BufferExhausted,

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("format not supported: {0}")]
    FormatNotSupported(CompressionFormat),

    #[error("compression engine not initialized")]
    EngineNotInitialized,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

impl CaptureError {
    /// One-line guidance suitable for showing to a user.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(ConfigurationError::InvalidBitrate(_)) => {
                "Choose a bitrate between 64 and 320 kbps."
            }
            Self::InvalidConfiguration(ConfigurationError::InvalidSampleRate(_)) => {
                "Use a sample rate of 22050, 44100 or 48000 Hz."
            }
            Self::InvalidConfiguration(ConfigurationError::ChannelCountNotSupported { .. }) => {
                "Reduce the channel count or pick Ogg Vorbis for multichannel output."
            }
            Self::InvalidConfiguration(ConfigurationError::VbrNotSupported(_)) => {
                "Disable variable bitrate or switch to Ogg Vorbis."
            }
            Self::InvalidConfiguration(ConfigurationError::Recorder(_)) => {
                "Check the channel layout and timing settings of the recorder."
            }
            Self::EncodingFailed(_) => "Recording continues uncompressed; compress the file afterwards if needed.",
            Self::DeviceUnavailable(_) => "Reconnect the device or free a channel slot by disconnecting another one.",
            Self::BufferExhausted => "Close other applications to free memory or lower the channel count.",
            Self::WriteFailed(_) => "Check free disk space and write permissions for the output directory.",
            Self::FormatNotSupported(_) => "Pick MP3, Ogg Vorbis, FLAC or uncompressed output.",
            Self::EngineNotInitialized => "Initialize the compression engine before submitting audio.",
            Self::InvalidState(_) => "Stop the current recording before starting a new one.",
            Self::CaptureFailed(_) => "Restart the capture source and try again.",
        }
    }

    /// Whether the pipeline can keep recording after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EncodingFailed(_) | Self::DeviceUnavailable(_) | Self::BufferExhausted | Self::FormatNotSupported(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_convert_into_capture_errors() {
        let err: CaptureError = ConfigurationError::InvalidBitrate(32).into();
        assert_eq!(err, CaptureError::InvalidConfiguration(ConfigurationError::InvalidBitrate(32)));
        assert!(err.to_string().contains("32 kbps"));
    }

    #[test]
    fn every_kind_has_a_suggestion() {
        let errors = [
            CaptureError::EncodingFailed("x".into()),
            CaptureError::DeviceUnavailable("x".into()),
            CaptureError::BufferExhausted,
            CaptureError::WriteFailed("x".into()),
            CaptureError::FormatNotSupported(CompressionFormat::Lossless),
            CaptureError::EngineNotInitialized,
            CaptureError::InvalidState("x".into()),
            CaptureError::CaptureFailed("x".into()),
            ConfigurationError::VbrNotSupported(CompressionFormat::Mp3).into(),
        ];
        for err in errors {
            assert!(!err.recovery_suggestion().is_empty());
        }
    }

    #[test]
    fn recoverable_kinds() {
        assert!(CaptureError::EncodingFailed("x".into()).is_recoverable());
        assert!(CaptureError::FormatNotSupported(CompressionFormat::Lossless).is_recoverable());
        assert!(!CaptureError::WriteFailed("disk full".into()).is_recoverable());
    }
}
