use serde::{Deserialize, Serialize};

use crate::compression::advisor::CONTAINER_OVERHEAD_BYTES;
use crate::models::statistics::CompressionStatistics;

/// Allowed relative deviation of the output size from `bitrate × duration`.
pub const SIZE_TOLERANCE: f64 = 0.35;

/// Allowed distance of a VBR stream's average from its target.
pub const VBR_AVERAGE_TOLERANCE_KBPS: f64 = 64.0;

/// Result of one or more consistency checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, issue: String) {
        self.issues.push(issue);
    }

    fn merge(mut self, other: ValidationReport) -> Self {
        self.issues.extend(other.issues);
        self
    }
}

/// Sanity checks for finished [`CompressionStatistics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticsValidator {
    pub size_tolerance: f64,
    pub vbr_tolerance_kbps: f64,
}

impl Default for StatisticsValidator {
    fn default() -> Self {
        Self {
            size_tolerance: SIZE_TOLERANCE,
            vbr_tolerance_kbps: VBR_AVERAGE_TOLERANCE_KBPS,
        }
    }
}

impl StatisticsValidator {
    /// Every check, issues concatenated.
    pub fn validate(&self, stats: &CompressionStatistics) -> ValidationReport {
        self.validate_metadata(stats)
            .merge(self.validate_size_efficiency(stats))
            .merge(self.validate_vbr_bitrate(stats))
    }

    pub fn validate_metadata(&self, stats: &CompressionStatistics) -> ValidationReport {
        let mut report = ValidationReport::default();
        if stats.finished_at < stats.started_at {
            report.push("session finished before it started".into());
        }
        if stats.duration_secs.is_nan() || stats.duration_secs < 0.0 {
            report.push(format!("invalid duration {}", stats.duration_secs));
        }
        if stats.format.is_lossy() && stats.bitrate_kbps == 0 {
            report.push(format!("{} statistics without a bitrate", stats.format));
        }
        if stats.sample_rate == 0 || stats.channels == 0 {
            report.push("missing audio layout".into());
        }
        if stats.compressed_bytes > 0 && stats.original_bytes == 0 {
            report.push("compressed output without any input".into());
        }
        report
    }

    /// Constant-bitrate output should be close to `bitrate × duration`.
    pub fn validate_size_efficiency(&self, stats: &CompressionStatistics) -> ValidationReport {
        let mut report = ValidationReport::default();
        if !stats.format.is_lossy() || stats.vbr || stats.duration_secs <= 0.0 {
            return report;
        }
        let expected = stats.bitrate_kbps as f64 * 1000.0 / 8.0 * stats.duration_secs;
        let allowed = expected * self.size_tolerance + CONTAINER_OVERHEAD_BYTES as f64;
        let actual = stats.compressed_bytes as f64;
        if (actual - expected).abs() > allowed {
            report.push(format!(
                "output is {} bytes, expected about {:.0} for {} kbps over {:.1}s",
                stats.compressed_bytes, expected, stats.bitrate_kbps, stats.duration_secs
            ));
        }
        report
    }

    /// A VBR stream's observed average should stay near its target.
    pub fn validate_vbr_bitrate(&self, stats: &CompressionStatistics) -> ValidationReport {
        let mut report = ValidationReport::default();
        if !stats.vbr {
            return report;
        }
        match stats.average_bitrate_kbps {
            Some(average) => {
                let target = stats.bitrate_kbps as f64;
                if (average - target).abs() > self.vbr_tolerance_kbps {
                    report.push(format!("VBR average {:.0} kbps is far from target {} kbps", average, target));
                }
                if let Some(peak) = stats.peak_bitrate_kbps {
                    if peak + f64::EPSILON < average {
                        report.push(format!("peak {:.0} kbps below average {:.0} kbps", peak, average));
                    }
                }
            }
            None if stats.duration_secs > 0.0 => report.push("VBR statistics without an average bitrate".into()),
            None => {}
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::compression::{CompressionConfiguration, CompressionFormat};
    use chrono::{Duration, Utc};

    fn stats(config: &CompressionConfiguration, secs: f64, compressed: u64) -> CompressionStatistics {
        let start = Utc::now();
        let end = start + Duration::milliseconds((secs * 1000.0) as i64);
        CompressionStatistics::new(config, start, end, secs, (secs * 192_000.0) as u64, compressed)
    }

    #[test]
    fn cbr_output_matching_bitrate_is_valid() {
        let config = CompressionConfiguration::new(CompressionFormat::Mp3, 128, 48_000, 2);
        // 10 s at 128 kbps = 160 000 bytes
        let report = StatisticsValidator::default().validate(&stats(&config, 10.0, 158_000));
        assert!(report.is_valid(), "{:?}", report.issues);
    }

    #[test]
    fn oversized_cbr_output_is_flagged() {
        let config = CompressionConfiguration::new(CompressionFormat::Mp3, 128, 48_000, 2);
        let report = StatisticsValidator::default().validate_size_efficiency(&stats(&config, 10.0, 400_000));
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn vbr_average_must_be_plausible() {
        let config = CompressionConfiguration::new(CompressionFormat::Vorbis, 128, 48_000, 2).with_vbr(true);
        let mut s = stats(&config, 10.0, 150_000);
        s.average_bitrate_kbps = Some(120.0);
        s.peak_bitrate_kbps = Some(170.0);
        assert!(StatisticsValidator::default().validate(&s).is_valid());

        s.average_bitrate_kbps = Some(250.0);
        assert!(!StatisticsValidator::default().validate_vbr_bitrate(&s).is_valid());
    }

    #[test]
    fn reversed_timestamps_are_flagged() {
        let config = CompressionConfiguration::default();
        let mut s = stats(&config, 1.0, 16_000);
        std::mem::swap(&mut s.started_at, &mut s.finished_at);
        let report = StatisticsValidator::default().validate_metadata(&s);
        assert_eq!(report.issues, vec!["session finished before it started".to_string()]);
    }
}
