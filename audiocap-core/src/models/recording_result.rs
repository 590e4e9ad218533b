use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::compression::CompressionFormat;
use super::error::CaptureError;
use super::statistics::CompressionStatistics;

/// Result returned when a recording stops.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub format: CompressionFormat,
    pub checksum: String,
    pub compression: Option<CompressionStatistics>,
    pub channel_map: ChannelMapLog,
    /// Set when compression failed and the session continued as WAV.
    pub fallback_cause: Option<CaptureError>,
}

/// What feeds an output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSource {
    Primary,
    Auxiliary,
    Unassigned,
}

/// One row of the channel map: output channel index → source label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapEntry {
    pub channel: u16,
    pub source: ChannelSource,
    pub label: String,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMapAction {
    Assigned,
    Released,
}

/// A timestamped assignment change made while recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapEvent {
    pub at: DateTime<Utc>,
    pub channel: u16,
    pub device_id: String,
    pub action: ChannelMapAction,
}

/// Structured channel-mapping log persisted next to the recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapLog {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub sample_rate: u32,
    pub output_channels: u16,
    pub channels: Vec<ChannelMapEntry>,
    pub events: Vec<ChannelMapEvent>,
}

impl ChannelMapLog {
    /// A log with the primary channels labelled and every other channel unassigned.
    pub fn new(sample_rate: u32, output_channels: u16, primary_channels: u16) -> Self {
        let channels = (1..=output_channels)
            .map(|channel| {
                if channel <= primary_channels {
                    ChannelMapEntry {
                        channel,
                        source: ChannelSource::Primary,
                        label: primary_label(channel, primary_channels),
                        device_id: None,
                    }
                } else {
                    unassigned(channel)
                }
            })
            .collect();

        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            sample_rate,
            output_channels,
            channels,
            events: Vec::new(),
        }
    }

    pub fn record_assigned(&mut self, channel: u16, device_id: &str, label: &str) {
        if let Some(entry) = self.entry_mut(channel) {
            *entry = ChannelMapEntry {
                channel,
                source: ChannelSource::Auxiliary,
                label: label.to_string(),
                device_id: Some(device_id.to_string()),
            };
        }
        self.push_event(channel, device_id, ChannelMapAction::Assigned);
    }

    pub fn record_released(&mut self, channel: u16, device_id: &str) {
        if let Some(entry) = self.entry_mut(channel) {
            *entry = unassigned(channel);
        }
        self.push_event(channel, device_id, ChannelMapAction::Released);
    }

    pub fn entry(&self, channel: u16) -> Option<&ChannelMapEntry> {
        self.channels.iter().find(|e| e.channel == channel)
    }

    fn entry_mut(&mut self, channel: u16) -> Option<&mut ChannelMapEntry> {
        self.channels.iter_mut().find(|e| e.channel == channel)
    }

    fn push_event(&mut self, channel: u16, device_id: &str, action: ChannelMapAction) {
        self.events.push(ChannelMapEvent {
            at: Utc::now(),
            channel,
            device_id: device_id.to_string(),
            action,
        });
    }
}

fn primary_label(channel: u16, primary_channels: u16) -> String {
    match (primary_channels, channel) {
        (1, _) => "primary".to_string(),
        (_, 1) => "primary L".to_string(),
        _ => "primary R".to_string(),
    }
}

fn unassigned(channel: u16) -> ChannelMapEntry {
    ChannelMapEntry {
        channel,
        source: ChannelSource::Unassigned,
        label: "silence".to_string(),
        device_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_log_labels_primary_channels() {
        let log = ChannelMapLog::new(48_000, 8, 2);
        assert_eq!(log.channels.len(), 8);
        assert_eq!(log.entry(1).map(|e| e.label.as_str()), Some("primary L"));
        assert_eq!(log.entry(2).map(|e| e.label.as_str()), Some("primary R"));
        assert_eq!(log.entry(3).map(|e| e.source), Some(ChannelSource::Unassigned));
    }

    #[test]
    fn assignment_and_release_are_logged() {
        let mut log = ChannelMapLog::new(48_000, 8, 2);
        log.record_assigned(4, "usb-1", "USB Mic");
        assert_eq!(log.entry(4).and_then(|e| e.device_id.clone()), Some("usb-1".to_string()));

        log.record_released(4, "usb-1");
        assert_eq!(log.entry(4).map(|e| e.source), Some(ChannelSource::Unassigned));
        assert_eq!(log.events.len(), 2);
        assert_eq!(log.events[1].action, ChannelMapAction::Released);
    }
}
