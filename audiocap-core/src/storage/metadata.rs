use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::error::CaptureError;
use crate::models::recording_result::ChannelMapLog;
use crate::models::statistics::CompressionStatistics;

/// `{stem}.channels.json` next to the recording.
pub fn channel_map_path(recording_path: &Path) -> PathBuf {
    recording_path.with_extension("channels.json")
}

/// `{stem}.compression.json` next to the recording.
pub fn compression_stats_path(recording_path: &Path) -> PathBuf {
    recording_path.with_extension("compression.json")
}

/// Write the channel-mapping log as a JSON sidecar.
pub fn write_channel_map(log: &ChannelMapLog, recording_path: &Path) -> Result<PathBuf, CaptureError> {
    let path = channel_map_path(recording_path);
    write_json(log, &path)?;
    Ok(path)
}

pub fn read_channel_map(recording_path: &Path) -> Result<ChannelMapLog, CaptureError> {
    read_json(&channel_map_path(recording_path))
}

/// Write final compression statistics as a JSON sidecar.
pub fn write_compression_statistics(
    stats: &CompressionStatistics,
    recording_path: &Path,
) -> Result<PathBuf, CaptureError> {
    let path = compression_stats_path(recording_path);
    write_json(stats, &path)?;
    Ok(path)
}

pub fn read_compression_statistics(recording_path: &Path) -> Result<CompressionStatistics, CaptureError> {
    read_json(&compression_stats_path(recording_path))
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), CaptureError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CaptureError::WriteFailed(format!("failed to serialize {}: {}", path.display(), e)))?;
    fs::write(path, json).map_err(|e| CaptureError::WriteFailed(format!("failed to write {}: {}", path.display(), e)))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CaptureError> {
    let json = fs::read_to_string(path)
        .map_err(|e| CaptureError::WriteFailed(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&json).map_err(|e| CaptureError::WriteFailed(format!("failed to parse {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::compression::{CompressionConfiguration, CompressionFormat};
    use chrono::Utc;

    #[test]
    fn sidecar_paths_share_the_stem() {
        let recording = Path::new("/tmp/session/take.ogg");
        assert_eq!(channel_map_path(recording), Path::new("/tmp/session/take.channels.json"));
        assert_eq!(compression_stats_path(recording), Path::new("/tmp/session/take.compression.json"));
    }

    #[test]
    fn channel_map_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let recording = dir.path().join("take.wav");
        let mut log = ChannelMapLog::new(48_000, 8, 2);
        log.record_assigned(3, "usb-1", "USB Mic");

        write_channel_map(&log, &recording).unwrap();
        assert_eq!(read_channel_map(&recording).unwrap(), log);
    }

    #[test]
    fn compression_statistics_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let recording = dir.path().join("take.ogg");
        let config = CompressionConfiguration::new(CompressionFormat::Vorbis, 128, 48_000, 8);
        let now = Utc::now();
        let stats = CompressionStatistics::new(&config, now, now, 1.0, 768_000, 16_000);

        let path = write_compression_statistics(&stats, &recording).unwrap();
        assert!(path.exists());

        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"format\": \"vorbis\""));
        let back = read_compression_statistics(&recording).unwrap();
        assert_eq!(back.session_id, stats.session_id);
        assert_eq!(back.compressed_bytes, 16_000);
        assert_eq!(back.started_at, stats.started_at);
        assert!((back.compression_ratio - 48.0).abs() < 1e-9);
    }

    #[test]
    fn missing_sidecar_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_channel_map(&dir.path().join("nothing.wav"));
        assert!(matches!(result, Err(CaptureError::WriteFailed(_))));
    }
}
