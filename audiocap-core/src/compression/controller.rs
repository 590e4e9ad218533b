use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::compression::encoder::{CodecEncoderFactory, EncoderFactory};
use crate::compression::fallback::resolve_configuration;
use crate::compression::worker::{EncodeWorker, ErrorCallback};
use crate::models::audio_frame::AudioFrame;
use crate::models::compression::CompressionConfiguration;
use crate::models::error::CaptureError;
use crate::models::statistics::{size_figures, CompressionProgress, CompressionStatistics};
use crate::processing::buffer_pool::{BufferPool, PooledFrame};
use crate::storage::sink::{FileSinkFactory, SinkFactory};

/// Utilization above which the encoder counts as loaded.
pub const HIGH_LOAD_PERCENT: f64 = 85.0;

/// How long utilization must stay high before load pressure is reported.
pub const LOAD_PRESSURE_AFTER: Duration = Duration::from_secs(2);

struct ActiveSession {
    worker: EncodeWorker,
    output_path: PathBuf,
    started_at: DateTime<Utc>,
    started: Instant,
    last_sample: (Instant, u64),
    high_load_since: Option<Instant>,
}

/// Drives one encoding session: configuration, the async encode queue and
/// final statistics.
///
/// Lifecycle: `initialize` (or `initialize_with_compatibility`), then
/// `create_output_file`, any number of `process_frame` calls and finally
/// `finalize_compression`. The controller can be initialized again afterwards.
pub struct CompressionController {
    encoders: Arc<dyn EncoderFactory>,
    sinks: Arc<dyn SinkFactory>,
    pool: Arc<BufferPool>,
    config: Option<CompressionConfiguration>,
    session: Option<ActiveSession>,
    on_error: Option<ErrorCallback>,
    suggested_bitrate: Option<u32>,
    transient_allocations: u64,
    unencoded: Vec<AudioFrame>,
    last_failure: Option<CaptureError>,
}

impl CompressionController {
    pub fn new(encoders: Arc<dyn EncoderFactory>, sinks: Arc<dyn SinkFactory>, pool: Arc<BufferPool>) -> Self {
        Self {
            encoders,
            sinks,
            pool,
            config: None,
            session: None,
            on_error: None,
            suggested_bitrate: None,
            transient_allocations: 0,
            unencoded: Vec::new(),
            last_failure: None,
        }
    }

    /// LAME, libvorbis and PCM encoders writing real files.
    pub fn with_codecs() -> Self {
        Self::new(
            Arc::new(CodecEncoderFactory),
            Arc::new(FileSinkFactory),
            Arc::new(BufferPool::new()),
        )
    }

    /// Called on the encode thread whenever encoding or writing fails.
    pub fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.on_error = Some(callback);
    }

    /// Strict initialization: every field must already be valid.
    pub fn initialize(&mut self, config: CompressionConfiguration) -> Result<(), CaptureError> {
        self.ensure_idle()?;
        config.validate()?;
        if !self.encoders.supports(config.format) {
            return Err(CaptureError::FormatNotSupported(config.format));
        }
        log::debug!(
            "compression initialized: {} {} kbps {} Hz {}ch vbr={}",
            config.format,
            config.bitrate_kbps,
            config.sample_rate,
            config.channels,
            config.vbr
        );
        self.config = Some(config);
        Ok(())
    }

    /// Lenient initialization: invalid fields are sanitized and checked again.
    ///
    /// Returns the configuration actually in effect.
    pub fn initialize_with_compatibility(
        &mut self,
        config: CompressionConfiguration,
    ) -> Result<CompressionConfiguration, CaptureError> {
        self.ensure_idle()?;
        let resolved = resolve_configuration(&config).into_result()?;
        self.initialize(resolved.clone())?;
        Ok(resolved)
    }

    pub fn configuration(&self) -> Option<&CompressionConfiguration> {
        self.config.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Open the output through the sink factory and start the encode thread.
    pub fn create_output_file(&mut self, path: &Path) -> Result<PathBuf, CaptureError> {
        self.ensure_idle()?;
        let config = self.config.clone().ok_or(CaptureError::EngineNotInitialized)?;

        let sink = self.sinks.create_output_file(path, &config)?;
        let worker = EncodeWorker::spawn(
            config,
            Arc::clone(&self.encoders),
            sink,
            Arc::clone(&self.pool),
            self.on_error.clone(),
        )?;

        let now = Instant::now();
        self.unencoded.clear();
        self.last_failure = None;
        self.transient_allocations = 0;
        self.session = Some(ActiveSession {
            worker,
            output_path: path.to_path_buf(),
            started_at: Utc::now(),
            started: now,
            last_sample: (now, 0),
            high_load_since: None,
        });
        Ok(path.to_path_buf())
    }

    /// Copy `frame` through the buffer pool and queue it for encoding.
    ///
    /// Fails with the encoder's error once the encode thread has failed.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Result<(), CaptureError> {
        let session = self.session.as_ref().ok_or(CaptureError::EngineNotInitialized)?;
        if let Some(failure) = session.worker.failure() {
            return Err(failure);
        }

        let pooled = match self.pool.clone_frame(frame) {
            Ok(pooled) => pooled,
            Err(CaptureError::BufferExhausted) => {
                if self.transient_allocations == 0 {
                    log::warn!("buffer pool exhausted; allocating frames outside the pool");
                }
                self.transient_allocations += 1;
                PooledFrame::transient(frame.clone())
            }
            Err(e) => return Err(e),
        };
        session.worker.submit(pooled)
    }

    /// The first error raised on the encode thread of the current or last
    /// finalized session.
    pub fn failure(&self) -> Option<CaptureError> {
        match self.session {
            Some(ref session) => session.worker.failure(),
            None => self.last_failure.clone(),
        }
    }

    pub fn has_failed(&self) -> bool {
        match self.session {
            Some(ref session) => session.worker.has_failed(),
            None => self.last_failure.is_some(),
        }
    }

    pub fn transient_allocations(&self) -> u64 {
        self.transient_allocations
    }

    /// Record the latest adaptive bitrate suggestion.
    ///
    /// The running encoder keeps its configured bitrate; the hint is reported
    /// in progress and statistics and can seed the next session.
    pub fn apply_bitrate_hint(&mut self, kbps: u32) {
        if self.suggested_bitrate != Some(kbps) {
            log::debug!("adaptive bitrate suggestion: {} kbps", kbps);
        }
        self.suggested_bitrate = Some(kbps);
    }

    pub fn suggested_bitrate(&self) -> Option<u32> {
        self.suggested_bitrate
    }

    /// Live figures for the running session.
    pub fn progress(&mut self) -> CompressionProgress {
        let suggested = self.suggested_bitrate;
        let Some(session) = self.session.as_mut() else {
            return CompressionProgress {
                suggested_bitrate_kbps: suggested,
                ..CompressionProgress::default()
            };
        };

        let counters = session.worker.counters();
        let bytes_in = counters.bytes_in.load(Ordering::Relaxed);
        let bytes_out = counters.bytes_out.load(Ordering::Relaxed);
        let busy_nanos = counters.busy_nanos.load(Ordering::Relaxed);

        let now = Instant::now();
        let elapsed = now.duration_since(session.started).as_secs_f64();
        let (last_at, last_busy) = session.last_sample;
        let window = now.duration_since(last_at).as_nanos() as f64;
        let utilization = if window > 0.0 {
            (busy_nanos.saturating_sub(last_busy) as f64 / window * 100.0).min(100.0)
        } else {
            0.0
        };
        session.last_sample = (now, busy_nanos);

        let load_pressure = if utilization > HIGH_LOAD_PERCENT {
            let since = *session.high_load_since.get_or_insert(now);
            now.duration_since(since) > LOAD_PRESSURE_AFTER
        } else {
            session.high_load_since = None;
            false
        };

        let (ratio, _) = size_figures(bytes_in, bytes_out);
        CompressionProgress {
            bytes_processed: bytes_in,
            compressed_bytes: bytes_out,
            compression_ratio: ratio,
            encoding_speed_mb_per_sec: if elapsed > 0.0 { bytes_in as f64 / 1_000_000.0 / elapsed } else { 0.0 },
            elapsed_secs: elapsed,
            frames_pending: counters.frames_pending(),
            utilization_percent: utilization,
            load_pressure,
            suggested_bitrate_kbps: suggested,
        }
    }

    /// Wait for every queued frame, close the output and compute statistics.
    ///
    /// Frames the encoder could not handle are kept for [`Self::take_unencoded`].
    pub fn finalize_compression(&mut self) -> Result<CompressionStatistics, CaptureError> {
        let session = self.session.take().ok_or(CaptureError::EngineNotInitialized)?;
        let config = self.config.clone().ok_or(CaptureError::EngineNotInitialized)?;

        let (outcome, spilled) = session.worker.finish()?;
        let finished_at = Utc::now();

        let original_bytes = outcome.bytes_in;
        let compressed_bytes = outcome.summary.bytes_written;
        let mut stats = CompressionStatistics::new(
            &config,
            session.started_at,
            finished_at,
            outcome.audio_secs,
            original_bytes,
            compressed_bytes,
        );

        let busy_secs = outcome.busy.as_secs_f64();
        stats.encoding_time_secs = busy_secs;
        stats.throughput_mb_per_sec = if busy_secs > 0.0 { original_bytes as f64 / 1_000_000.0 / busy_secs } else { 0.0 };
        stats.frames_encoded = outcome.frames_encoded;
        stats.frames_failed = spilled.len() as u64;
        stats.suggested_bitrate_kbps = self.suggested_bitrate;
        stats.output_path = Some(outcome.summary.path.clone());
        stats.checksum = Some(outcome.summary.checksum.clone());
        if config.vbr && outcome.audio_secs > 0.0 {
            stats.average_bitrate_kbps = Some(compressed_bytes as f64 * 8.0 / outcome.audio_secs / 1000.0);
            stats.peak_bitrate_kbps = outcome.peak_bitrate_kbps;
        }

        log::info!(
            "compression finished: {} -> {} bytes ({:.1}% smaller) in {}",
            original_bytes,
            compressed_bytes,
            stats.size_reduction_percent,
            session.output_path.display()
        );
        if !spilled.is_empty() {
            log::warn!("{} frame(s) were not encoded", spilled.len());
        }

        self.unencoded = spilled;
        self.last_failure = outcome.failure;
        Ok(stats)
    }

    /// Frames handed back by a failed encoder, oldest first.
    pub fn take_unencoded(&mut self) -> Vec<AudioFrame> {
        std::mem::take(&mut self.unencoded)
    }

    fn ensure_idle(&self) -> Result<(), CaptureError> {
        if self.session.is_some() {
            return Err(CaptureError::InvalidState("a compression session is already running".into()));
        }
        Ok(())
    }
}
