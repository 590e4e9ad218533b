use serde::{Deserialize, Serialize};

use crate::models::compression::{CompressionConfiguration, CompressionFormat};

/// Added to every size estimate for container headers.
pub const CONTAINER_OVERHEAD_BYTES: u64 = 1024;

/// Recordings longer than this are treated as archival material.
const LONG_FORM_THRESHOLD_SECS: f64 = 3.0 * 3600.0;

/// What kind of material is being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Speech,
    Music,
    Mixed,
    LongForm,
}

/// A format suggestion and why it was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatAdvice {
    pub format: CompressionFormat,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub rationale: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub format: CompressionFormat,
    pub bitrate_kbps: u32,
    pub estimated_bytes: u64,
}

/// Estimated sizes for several bitrates over one duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatComparison {
    pub duration_secs: f64,
    pub entries: Vec<ComparisonEntry>,
}

/// Size estimates and format recommendations.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionAdvisor;

impl CompressionAdvisor {
    /// Bytes needed for `duration_secs` at `bitrate_kbps`, plus container overhead.
    pub fn estimate_size_bytes(&self, bitrate_kbps: u32, duration_secs: f64) -> u64 {
        let bytes_per_sec = bitrate_kbps as f64 * 1000.0 / 8.0;
        (bytes_per_sec * duration_secs.max(0.0)) as u64 + CONTAINER_OVERHEAD_BYTES
    }

    /// One Vorbis entry per bitrate, ascending, each followed by MP3 when requested.
    pub fn compare(&self, duration_secs: f64, bitrates_kbps: &[u32], include_mp3: bool) -> FormatComparison {
        let mut sorted = bitrates_kbps.to_vec();
        sorted.sort_unstable();

        let mut entries = Vec::with_capacity(sorted.len() * 2);
        for bitrate_kbps in sorted {
            let estimated_bytes = self.estimate_size_bytes(bitrate_kbps, duration_secs);
            entries.push(ComparisonEntry {
                format: CompressionFormat::Vorbis,
                bitrate_kbps,
                estimated_bytes,
            });
            if include_mp3 {
                entries.push(ComparisonEntry {
                    format: CompressionFormat::Mp3,
                    bitrate_kbps,
                    estimated_bytes,
                });
            }
        }
        FormatComparison { duration_secs, entries }
    }

    pub fn recommend(
        &self,
        content: ContentType,
        duration_secs: f64,
        channels: u16,
        need_max_compatibility: bool,
    ) -> FormatAdvice {
        let mut warnings = Vec::new();
        let mut rationale = Vec::new();
        let mut format = CompressionFormat::Vorbis;

        if need_max_compatibility {
            if channels > CompressionFormat::Mp3.max_channels() {
                warnings.push("MP3 is limited to mono and stereo; using Ogg Vorbis for multichannel output".to_string());
            } else {
                format = CompressionFormat::Mp3;
                rationale.push("MP3 chosen for playback compatibility");
            }
        }

        let (bitrate_kbps, sample_rate) = match content {
            ContentType::Speech => {
                rationale.push("speech compresses well between 64 and 128 kbps; 96 kbps selected");
                (96, 44_100)
            }
            ContentType::Music => {
                rationale.push("music benefits from higher bitrates; 192 kbps selected");
                (192, 48_000)
            }
            ContentType::Mixed => {
                rationale.push("mixed content balances quality and size at 128 kbps");
                (128, 44_100)
            }
            ContentType::LongForm if duration_secs > LONG_FORM_THRESHOLD_SECS => {
                rationale.push("long recording; 96 kbps keeps storage down");
                (96, 44_100)
            }
            ContentType::LongForm => {
                rationale.push("moderate length; 128 kbps for balance");
                (128, 44_100)
            }
        };

        if format == CompressionFormat::Mp3 {
            rationale.push("MP3 files are usually larger than Vorbis at equal quality");
        } else {
            rationale.push("Ogg Vorbis gives better quality per bit and supports up to 8 channels");
        }

        FormatAdvice {
            format,
            bitrate_kbps,
            sample_rate,
            rationale: rationale.join("; "),
            warnings,
        }
    }

    /// Turn a recommendation into a configuration. Vorbis output uses VBR.
    pub fn select_configuration(
        &self,
        content: ContentType,
        duration_secs: f64,
        channels: u16,
        need_max_compatibility: bool,
    ) -> CompressionConfiguration {
        let advice = self.recommend(content, duration_secs, channels, need_max_compatibility);
        CompressionConfiguration::new(advice.format, advice.bitrate_kbps, advice.sample_rate, channels)
            .with_vbr(advice.format == CompressionFormat::Vorbis)
    }
}
