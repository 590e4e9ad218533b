use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::compression::{CompressionConfiguration, CompressionFormat};
use crate::models::error::CaptureError;
use crate::storage::wav_writer::WavFileWriter;

/// What a finished sink left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSummary {
    pub path: PathBuf,
    pub bytes_written: u64,
    /// SHA-256 of the complete file, hex encoded.
    pub checksum: String,
}

/// Destination for one recording's bytes.
///
/// The uncompressed path writes 16-bit PCM, the compression path writes
/// encoded segments. Sinks are moved onto the encode thread, hence `Send`.
pub trait OutputSink: Send {
    fn path(&self) -> &Path;

    fn write(&mut self, bytes: &[u8]) -> Result<(), CaptureError>;

    /// Payload bytes accepted so far, excluding container headers.
    fn bytes_written(&self) -> u64;

    /// Flush, patch any header and checksum the file.
    fn finish(self: Box<Self>) -> Result<SinkSummary, CaptureError>;
}

/// Opens sinks for a given path and encoding.
pub trait SinkFactory: Send + Sync {
    fn create_output_file(
        &self,
        path: &Path,
        config: &CompressionConfiguration,
    ) -> Result<Box<dyn OutputSink>, CaptureError>;
}

/// Creates real files: WAV for uncompressed output, raw streams otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSinkFactory;

impl SinkFactory for FileSinkFactory {
    fn create_output_file(
        &self,
        path: &Path,
        config: &CompressionConfiguration,
    ) -> Result<Box<dyn OutputSink>, CaptureError> {
        match config.format {
            CompressionFormat::Uncompressed => {
                let writer = WavFileWriter::create(path.to_path_buf(), config.sample_rate, config.channels)?;
                Ok(Box::new(writer))
            }
            _ => Ok(Box::new(EncodedFileSink::create(path.to_path_buf())?)),
        }
    }
}

/// Plain byte stream for self-framing formats such as MP3 and Ogg.
pub struct EncodedFileSink {
    path: PathBuf,
    file: BufWriter<File>,
    bytes_written: u64,
}

impl EncodedFileSink {
    pub fn create(path: PathBuf) -> Result<Self, CaptureError> {
        let file = create_file(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
            bytes_written: 0,
        })
    }
}

impl OutputSink for EncodedFileSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CaptureError> {
        self.file
            .write_all(bytes)
            .map_err(|e| CaptureError::WriteFailed(format!("write failed: {}", e)))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn finish(self: Box<Self>) -> Result<SinkSummary, CaptureError> {
        let Self {
            path,
            mut file,
            bytes_written,
        } = *self;
        file.flush().map_err(|e| CaptureError::WriteFailed(e.to_string()))?;
        drop(file);

        let checksum = sha256_file(&path)?;
        Ok(SinkSummary {
            path,
            bytes_written,
            checksum,
        })
    }
}

/// Create `path`, making its parent directory first.
pub(crate) fn create_file(path: &Path) -> Result<File, CaptureError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CaptureError::WriteFailed(format!("failed to create directory: {}", e)))?;
    }
    File::create(path).map_err(|e| CaptureError::WriteFailed(format!("failed to create file: {}", e)))
}

/// Compute SHA-256 hex digest of a file.
pub(crate) fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let data =
        fs::read(path).map_err(|e| CaptureError::WriteFailed(format!("failed to read file for checksum: {}", e)))?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_sink_writes_bytes_and_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("take.mp3");

        let mut sink: Box<dyn OutputSink> = Box::new(EncodedFileSink::create(path.clone()).unwrap());
        sink.write(b"abc").unwrap();
        assert_eq!(sink.bytes_written(), 3);

        let summary = sink.finish().unwrap();
        assert_eq!(summary.path, path);
        assert_eq!(fs::read(&path).unwrap(), b"abc");
        // sha256("abc")
        assert_eq!(
            summary.checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn factory_picks_wav_for_uncompressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let config = CompressionConfiguration::uncompressed(48_000, 8);

        let sink = FileSinkFactory.create_output_file(&path, &config).unwrap();
        let summary = sink.finish().unwrap();

        let bytes = fs::read(&summary.path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
    }

    #[test]
    fn create_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();

        let result = EncodedFileSink::create(blocker.join("take.ogg"));
        assert!(matches!(result, Err(CaptureError::WriteFailed(_))));
    }
}
