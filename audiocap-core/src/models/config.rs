use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::compression::CompressionConfiguration;
use super::error::ConfigurationError;

/// Configuration for a multiplexed recording session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfiguration {
    /// Output sample rate in Hz (default: 48000).
    pub sample_rate: u32,

    /// Channels in every multiplexed frame (default: 8).
    pub output_channels: u16,

    /// Channels fed by the primary stream, starting at channel 1 (default: 2).
    pub primary_channels: u16,

    /// First 1-based channel available to auxiliary devices (default: 3).
    pub first_aux_channel: u16,

    /// Last 1-based channel available to auxiliary devices (default: 8).
    pub last_aux_channel: u16,

    /// Multiplex timer period in milliseconds (default: 5).
    pub tick_interval_ms: u64,

    /// Seconds of audio each ring buffer can hold (default: 5).
    pub ring_buffer_seconds: f64,

    /// Emit interleaved frames (default: true) or planar ones.
    pub interleaved: bool,

    /// Directory where recordings and sidecars are written.
    pub output_directory: PathBuf,

    /// File stem for the recording, or None for `recording_<uuid>`.
    pub file_stem: Option<String>,

    /// Compression settings, or None for uncompressed WAV.
    pub compression: Option<CompressionConfiguration>,

    /// Feed multiplexed frames to the adaptive bitrate controller.
    pub adaptive_bitrate: bool,
}

impl RecorderConfiguration {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sample_rate == 0 {
            return Err(ConfigurationError::InvalidSampleRate(0));
        }
        if self.output_channels == 0 || self.output_channels > 8 {
            return Err(ConfigurationError::Recorder(format!(
                "output channel count must be 1-8, got {}",
                self.output_channels
            )));
        }
        if self.primary_channels == 0 || self.primary_channels > 2 || self.primary_channels > self.output_channels {
            return Err(ConfigurationError::Recorder(format!(
                "unsupported primary channel count: {}",
                self.primary_channels
            )));
        }
        if self.first_aux_channel <= self.primary_channels
            || self.first_aux_channel > self.last_aux_channel
            || self.last_aux_channel > self.output_channels
        {
            return Err(ConfigurationError::Recorder(format!(
                "auxiliary channel range {}..={} does not fit after {} primary channel(s) in {} outputs",
                self.first_aux_channel, self.last_aux_channel, self.primary_channels, self.output_channels
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigurationError::Recorder("tick interval must be positive".into()));
        }
        if self.ring_buffer_seconds.is_nan() || self.ring_buffer_seconds <= 0.0 {
            return Err(ConfigurationError::Recorder("ring buffer duration must be positive".into()));
        }
        Ok(())
    }

    pub fn aux_channel_range(&self) -> RangeInclusive<u16> {
        self.first_aux_channel..=self.last_aux_channel
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// `tick_interval_seconds * sample_rate`, at least one frame.
    pub fn frames_per_tick(&self) -> usize {
        ((self.tick_interval_ms * self.sample_rate as u64) / 1000).max(1) as usize
    }

    pub fn ring_buffer_frames(&self) -> usize {
        ((self.ring_buffer_seconds * self.sample_rate as f64) as usize).max(self.frames_per_tick())
    }
}

impl Default for RecorderConfiguration {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            output_channels: 8,
            primary_channels: 2,
            first_aux_channel: 3,
            last_aux_channel: 8,
            tick_interval_ms: 5,
            ring_buffer_seconds: 5.0,
            interleaved: true,
            output_directory: PathBuf::from("."),
            file_stem: None,
            compression: None,
            adaptive_bitrate: false,
        }
    }
}
