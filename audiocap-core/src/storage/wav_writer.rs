use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::models::error::CaptureError;
use crate::processing::wav_format;
use crate::storage::sink::{create_file, sha256_file, OutputSink, SinkSummary};

/// Streaming 16-bit PCM WAV writer.
///
/// ## File Format
///
/// ```text
/// [44-byte WAV header, sizes patched on finish]
/// [raw 16-bit PCM data, interleaved...]
/// ```
pub struct WavFileWriter {
    file_path: PathBuf,
    file: BufWriter<File>,
    sample_rate: u32,
    channels: u16,
    data_bytes: u64,
}

impl WavFileWriter {
    /// Create the file and write a placeholder header.
    pub fn create(file_path: PathBuf, sample_rate: u32, channels: u16) -> Result<Self, CaptureError> {
        let file = create_file(&file_path)?;
        let mut writer = Self {
            file_path,
            file: BufWriter::new(file),
            sample_rate,
            channels,
            data_bytes: 0,
        };

        let header = wav_format::generate_wav_header(sample_rate, wav_format::PCM_BIT_DEPTH, channels, 0);
        writer
            .file
            .write_all(&header)
            .map_err(|e| CaptureError::WriteFailed(format!("failed to write WAV header: {}", e)))?;
        Ok(writer)
    }
}

impl OutputSink for WavFileWriter {
    fn path(&self) -> &Path {
        &self.file_path
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CaptureError> {
        self.file
            .write_all(bytes)
            .map_err(|e| CaptureError::WriteFailed(format!("write failed: {}", e)))?;
        self.data_bytes += bytes.len() as u64;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.data_bytes
    }

    /// Rewrite the header with final sizes, then checksum the file.
    fn finish(self: Box<Self>) -> Result<SinkSummary, CaptureError> {
        let Self {
            file_path,
            file,
            sample_rate,
            channels,
            data_bytes,
        } = *self;

        let mut file = file
            .into_inner()
            .map_err(|e| CaptureError::WriteFailed(format!("failed to flush WAV data: {}", e.error())))?;

        let header = wav_format::generate_wav_header(
            sample_rate,
            wav_format::PCM_BIT_DEPTH,
            channels,
            wav_format::header_data_size(data_bytes),
        );
        file.seek(SeekFrom::Start(0))
            .map_err(|e| CaptureError::WriteFailed(e.to_string()))?;
        file.write_all(&header)
            .map_err(|e| CaptureError::WriteFailed(e.to_string()))?;
        file.flush().map_err(|e| CaptureError::WriteFailed(e.to_string()))?;
        drop(file);

        let checksum = sha256_file(&file_path)?;
        Ok(SinkSummary {
            path: file_path,
            bytes_written: data_bytes,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn write_eight_channel_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let mut writer: Box<dyn OutputSink> = Box::new(WavFileWriter::create(path.clone(), 48_000, 8).unwrap());
        // 2 frames * 8 channels * 2 bytes
        writer.write(&[0u8; 32]).unwrap();
        let summary = writer.finish().unwrap();

        assert_eq!(summary.bytes_written, 32);
        assert_eq!(summary.checksum.len(), 64);

        let file_data = fs::read(&path).unwrap();
        assert_eq!(file_data.len(), 44 + 32);

        let info = wav_format::parse_wav_header(&file_data).unwrap();
        assert_eq!(info.channels, 8);
        assert_eq!(info.sample_rate, 48_000);
        assert_eq!(info.data_size, 32);

        let chunk_size = u32::from_le_bytes([file_data[4], file_data[5], file_data[6], file_data[7]]);
        assert_eq!(chunk_size, 36 + 32);
    }

    #[test]
    fn empty_recording_has_valid_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");

        let writer: Box<dyn OutputSink> = Box::new(WavFileWriter::create(path.clone(), 44_100, 2).unwrap());
        writer.finish().unwrap();

        let info = wav_format::parse_wav_header(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(info.data_size, 0);
    }
}
