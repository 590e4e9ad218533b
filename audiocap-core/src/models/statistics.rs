use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::compression::{CompressionConfiguration, CompressionFormat};

/// Final figures for one encoding session, produced by `finalize_compression`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionStatistics {
    pub session_id: String,
    pub format: CompressionFormat,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub compression_ratio: f64,
    pub size_reduction_percent: f64,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub vbr: bool,
    pub average_bitrate_kbps: Option<f64>,
    pub peak_bitrate_kbps: Option<f64>,
    pub encoding_time_secs: f64,
    pub throughput_mb_per_sec: f64,
    pub frames_encoded: u64,
    pub frames_failed: u64,
    pub suggested_bitrate_kbps: Option<u32>,
    pub output_path: Option<PathBuf>,
    pub checksum: Option<String>,
}

impl CompressionStatistics {
    /// Statistics with the size-derived fields computed from the byte counts.
    pub fn new(
        config: &CompressionConfiguration,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        duration_secs: f64,
        original_bytes: u64,
        compressed_bytes: u64,
    ) -> Self {
        let (compression_ratio, size_reduction_percent) = size_figures(original_bytes, compressed_bytes);
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            format: config.format,
            started_at,
            finished_at,
            duration_secs,
            original_bytes,
            compressed_bytes,
            compression_ratio,
            size_reduction_percent,
            bitrate_kbps: config.bitrate_kbps,
            sample_rate: config.sample_rate,
            channels: config.channels,
            vbr: config.vbr,
            average_bitrate_kbps: None,
            peak_bitrate_kbps: None,
            encoding_time_secs: 0.0,
            throughput_mb_per_sec: 0.0,
            frames_encoded: 0,
            frames_failed: 0,
            suggested_bitrate_kbps: None,
            output_path: None,
            checksum: None,
        }
    }
}

/// Live snapshot of an encoding session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionProgress {
    pub bytes_processed: u64,
    pub compressed_bytes: u64,
    pub compression_ratio: f64,
    pub encoding_speed_mb_per_sec: f64,
    pub elapsed_secs: f64,
    pub frames_pending: u64,
    pub utilization_percent: f64,
    /// Utilization has stayed above the high-load threshold long enough to back off.
    pub load_pressure: bool,
    pub suggested_bitrate_kbps: Option<u32>,
}

/// `(original / compressed, percent saved)`; zero when nothing was written.
pub fn size_figures(original_bytes: u64, compressed_bytes: u64) -> (f64, f64) {
    if original_bytes == 0 || compressed_bytes == 0 {
        return (0.0, 0.0);
    }
    let ratio = original_bytes as f64 / compressed_bytes as f64;
    let reduction = (1.0 - compressed_bytes as f64 / original_bytes as f64) * 100.0;
    (ratio, reduction)
}
