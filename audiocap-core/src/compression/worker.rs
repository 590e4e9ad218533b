use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::compression::encoder::{conform_frame, AudioEncoder, EncoderFactory};
use crate::models::audio_frame::AudioFrame;
use crate::models::compression::CompressionConfiguration;
use crate::models::error::CaptureError;
use crate::processing::buffer_pool::{BufferPool, PooledFrame};
use crate::storage::sink::{OutputSink, SinkSummary};

/// Callback for errors raised on the encode thread.
pub type ErrorCallback = Arc<dyn Fn(&CaptureError) + Send + Sync + 'static>;

enum EncodeJob {
    Frame(PooledFrame),
    Finish,
}

/// Counters shared between the encode thread and progress readers.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    pub frames_submitted: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub frames_failed: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub busy_nanos: AtomicU64,
}

impl WorkerCounters {
    pub fn frames_pending(&self) -> u64 {
        let done = self.frames_encoded.load(Ordering::Relaxed) + self.frames_failed.load(Ordering::Relaxed);
        self.frames_submitted.load(Ordering::Relaxed).saturating_sub(done)
    }
}

/// What the encode thread reports once drained.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub summary: SinkSummary,
    pub frames_encoded: u64,
    /// 16-bit PCM size of the frames that were encoded.
    pub bytes_in: u64,
    pub audio_secs: f64,
    pub busy: Duration,
    pub peak_bitrate_kbps: Option<f64>,
    pub failure: Option<CaptureError>,
}

/// Encodes frames on a dedicated thread and writes them to a sink.
///
/// After the first failure every further frame, including the failing one, is
/// handed back unencoded through [`EncodeWorker::finish`].
pub struct EncodeWorker {
    jobs: Sender<EncodeJob>,
    spilled: Receiver<AudioFrame>,
    counters: Arc<WorkerCounters>,
    failed: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<CaptureError>>>,
    handle: Option<thread::JoinHandle<Result<WorkerOutcome, CaptureError>>>,
}

impl EncodeWorker {
    /// Start the encode thread. Returns once the encoder is built, or with the
    /// error that prevented it.
    pub fn spawn(
        config: CompressionConfiguration,
        factory: Arc<dyn EncoderFactory>,
        sink: Box<dyn OutputSink>,
        pool: Arc<BufferPool>,
        on_error: Option<ErrorCallback>,
    ) -> Result<Self, CaptureError> {
        let (jobs_tx, jobs_rx) = unbounded::<EncodeJob>();
        let (spill_tx, spill_rx) = unbounded::<AudioFrame>();
        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);

        let counters = Arc::new(WorkerCounters::default());
        let failed = Arc::new(AtomicBool::new(false));
        let failure = Arc::new(Mutex::new(None));

        let state = ThreadState {
            config,
            counters: Arc::clone(&counters),
            failed: Arc::clone(&failed),
            failure: Arc::clone(&failure),
            pool,
            spill: spill_tx,
            on_error,
        };

        let handle = thread::Builder::new()
            .name("audio-encode".into())
            .spawn(move || {
                let encoder = match factory.create(&state.config) {
                    Ok(encoder) => {
                        let _ = ready_tx.send(Ok(()));
                        encoder
                    }
                    Err(e) => {
                        discard_sink(sink);
                        let _ = ready_tx.send(Err(e.clone()));
                        return Err(e);
                    }
                };
                state.run(encoder, sink, jobs_rx)
            })
            .map_err(|e| CaptureError::EncodingFailed(format!("failed to spawn encode thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(CaptureError::EncodingFailed("encode thread exited during setup".into()));
            }
        }

        Ok(Self {
            jobs: jobs_tx,
            spilled: spill_rx,
            counters,
            failed,
            failure,
            handle: Some(handle),
        })
    }

    /// Queue a frame. Never blocks.
    pub fn submit(&self, frame: PooledFrame) -> Result<(), CaptureError> {
        self.counters.frames_submitted.fetch_add(1, Ordering::Relaxed);
        self.jobs
            .send(EncodeJob::Frame(frame))
            .map_err(|_| CaptureError::EncodingFailed("encode thread is gone".into()))
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn failure(&self) -> Option<CaptureError> {
        self.failure.lock().clone()
    }

    pub fn counters(&self) -> &WorkerCounters {
        &self.counters
    }

    /// Drain the queue, flush the encoder and close the sink.
    ///
    /// Blocks until every submitted frame is either encoded or handed back.
    pub fn finish(mut self) -> Result<(WorkerOutcome, Vec<AudioFrame>), CaptureError> {
        let outcome = self.join()?;
        let spilled: Vec<AudioFrame> = self.spilled.try_iter().collect();
        Ok((outcome, spilled))
    }

    fn join(&mut self) -> Result<WorkerOutcome, CaptureError> {
        let _ = self.jobs.send(EncodeJob::Finish);
        let handle = self
            .handle
            .take()
            .ok_or_else(|| CaptureError::InvalidState("encode worker already finished".into()))?;
        handle
            .join()
            .map_err(|_| CaptureError::EncodingFailed("encode thread panicked".into()))?
    }
}

impl Drop for EncodeWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.join() {
                log::warn!("encode worker dropped with error: {}", e);
            }
        }
    }
}

struct ThreadState {
    config: CompressionConfiguration,
    counters: Arc<WorkerCounters>,
    failed: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<CaptureError>>>,
    pool: Arc<BufferPool>,
    spill: Sender<AudioFrame>,
    on_error: Option<ErrorCallback>,
}

impl ThreadState {
    fn run(
        self,
        mut encoder: Box<dyn AudioEncoder>,
        mut sink: Box<dyn OutputSink>,
        jobs: Receiver<EncodeJob>,
    ) -> Result<WorkerOutcome, CaptureError> {
        log::debug!("{} encoder started for {}", self.config.format, sink.path().display());
        let mut peak = PeakTracker::default();
        let mut audio_secs = 0.0;
        let mut busy = Duration::ZERO;

        for job in jobs.iter() {
            let pooled = match job {
                EncodeJob::Frame(pooled) => pooled,
                EncodeJob::Finish => break,
            };

            if self.failed.load(Ordering::Acquire) {
                self.hand_back(pooled);
                continue;
            }

            let started = Instant::now();
            let duration = pooled.frame.duration_secs();
            let original_bytes = pooled.frame.pcm16_byte_len();
            let result = encoder
                .encode(&conform_frame(&pooled.frame, &self.config))
                .and_then(|bytes| sink.write(&bytes).map(|_| bytes.len() as u64));
            let elapsed = started.elapsed();
            busy += elapsed;
            self.counters.busy_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);

            match result {
                Ok(written) => {
                    audio_secs += duration;
                    peak.record(written, duration);
                    self.counters.bytes_in.fetch_add(original_bytes, Ordering::Relaxed);
                    self.counters.bytes_out.fetch_add(written, Ordering::Relaxed);
                    self.counters.frames_encoded.fetch_add(1, Ordering::Relaxed);
                    self.pool.give_back(pooled);
                }
                Err(e) => {
                    self.fail(e);
                    self.hand_back(pooled);
                }
            }
        }

        if !self.failed.load(Ordering::Acquire) {
            match encoder.finish().and_then(|tail| sink.write(&tail).map(|_| tail.len() as u64)) {
                Ok(written) => {
                    self.counters.bytes_out.fetch_add(written, Ordering::Relaxed);
                }
                Err(e) => self.fail(e),
            }
        }

        let summary = sink.finish()?;
        log::debug!(
            "{} encoder finished: {} bytes in {}",
            self.config.format,
            summary.bytes_written,
            summary.path.display()
        );

        Ok(WorkerOutcome {
            summary,
            frames_encoded: self.counters.frames_encoded.load(Ordering::Relaxed),
            bytes_in: self.counters.bytes_in.load(Ordering::Relaxed),
            audio_secs,
            busy,
            peak_bitrate_kbps: peak.finish(),
            failure: self.failure.lock().clone(),
        })
    }

    fn fail(&self, error: CaptureError) {
        log::error!("{} encoding failed: {}", self.config.format, error);
        self.failed.store(true, Ordering::Release);
        *self.failure.lock() = Some(error.clone());
        if let Some(ref callback) = self.on_error {
            callback(&error);
        }
    }

    fn hand_back(&self, pooled: PooledFrame) {
        self.counters.frames_failed.fetch_add(1, Ordering::Relaxed);
        let _ = self.spill.send(pooled.frame.clone());
        self.pool.give_back(pooled);
    }
}

fn discard_sink(sink: Box<dyn OutputSink>) {
    let path = sink.path().to_path_buf();
    drop(sink);
    if let Err(e) = fs::remove_file(&path) {
        log::debug!("could not remove {}: {}", path.display(), e);
    }
}

/// Highest bitrate over consecutive one-second windows of audio.
#[derive(Debug, Default)]
struct PeakTracker {
    window_bytes: u64,
    window_secs: f64,
    peak_kbps: Option<f64>,
}

impl PeakTracker {
    fn record(&mut self, bytes: u64, secs: f64) {
        self.window_bytes += bytes;
        self.window_secs += secs;
        if self.window_secs >= 1.0 {
            self.close_window();
        }
    }

    fn finish(mut self) -> Option<f64> {
        if self.window_secs > 0.0 {
            self.close_window();
        }
        self.peak_kbps
    }

    fn close_window(&mut self) {
        let kbps = self.window_bytes as f64 * 8.0 / self.window_secs / 1000.0;
        self.peak_kbps = Some(self.peak_kbps.map_or(kbps, |p| p.max(kbps)));
        self.window_bytes = 0;
        self.window_secs = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::pcm::PcmEncoder;
    use crate::models::compression::CompressionFormat;
    use crate::storage::sink::{EncodedFileSink, FileSinkFactory, SinkFactory};

    struct FailingAfter {
        remaining: usize,
    }

    impl AudioEncoder for FailingAfter {
        fn format(&self) -> CompressionFormat {
            CompressionFormat::Vorbis
        }

        fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CaptureError> {
            if self.remaining == 0 {
                return Err(CaptureError::EncodingFailed("codec fault".into()));
            }
            self.remaining -= 1;
            Ok(vec![0u8; frame.samples.len() / 10])
        }

        fn finish(&mut self) -> Result<Vec<u8>, CaptureError> {
            Ok(Vec::new())
        }
    }

    struct TestFactory {
        fail_after: Option<usize>,
    }

    impl EncoderFactory for TestFactory {
        fn create(&self, config: &CompressionConfiguration) -> Result<Box<dyn AudioEncoder>, CaptureError> {
            match self.fail_after {
                Some(remaining) => Ok(Box::new(FailingAfter { remaining })),
                None => Ok(Box::new(PcmEncoder::new(config.channels))),
            }
        }

        fn supports(&self, _format: CompressionFormat) -> bool {
            true
        }
    }

    fn frame() -> AudioFrame {
        AudioFrame::interleaved(vec![0.25; 480 * 2], 48_000, 2)
    }

    #[test]
    fn encodes_everything_before_finish_returns() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompressionConfiguration::uncompressed(48_000, 2);
        let sink = FileSinkFactory
            .create_output_file(&dir.path().join("take.wav"), &config)
            .unwrap();
        let pool = Arc::new(BufferPool::new());

        let worker =
            EncodeWorker::spawn(config, Arc::new(TestFactory { fail_after: None }), sink, Arc::clone(&pool), None)
                .unwrap();
        for _ in 0..50 {
            worker.submit(pool.clone_frame(&frame()).unwrap_or_else(|_| PooledFrame::transient(frame()))).unwrap();
        }

        let (outcome, spilled) = worker.finish().unwrap();
        assert!(spilled.is_empty());
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.summary.bytes_written, 50 * 480 * 2 * 2);
        assert!((outcome.audio_secs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn failure_hands_back_remaining_frames() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompressionConfiguration::new(CompressionFormat::Vorbis, 128, 48_000, 2);
        let sink = Box::new(EncodedFileSink::create(dir.path().join("take.ogg")).unwrap());
        let errors = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&errors);
        let on_error: ErrorCallback = Arc::new(move |_e: &CaptureError| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let worker = EncodeWorker::spawn(
            config,
            Arc::new(TestFactory { fail_after: Some(3) }),
            sink,
            Arc::new(BufferPool::new()),
            Some(on_error),
        )
        .unwrap();
        for _ in 0..10 {
            worker.submit(PooledFrame::transient(frame())).unwrap();
        }

        let (outcome, spilled) = worker.finish().unwrap();
        assert_eq!(spilled.len(), 7);
        assert!(matches!(outcome.failure, Some(CaptureError::EncodingFailed(_))));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn setup_failure_is_reported_and_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.flac");
        let config = CompressionConfiguration::new(CompressionFormat::Lossless, 0, 48_000, 9);
        let sink = Box::new(EncodedFileSink::create(path.clone()).unwrap());

        let result = EncodeWorker::spawn(
            config,
            Arc::new(crate::compression::encoder::CodecEncoderFactory),
            sink,
            Arc::new(BufferPool::new()),
            None,
        );

        assert!(matches!(result, Err(CaptureError::EncodingFailed(_))));
        assert!(!path.exists());
    }

    #[test]
    fn peak_tracks_busiest_second() {
        let mut peak = PeakTracker::default();
        peak.record(16_000, 1.0); // 128 kbps
        peak.record(24_000, 1.0); // 192 kbps
        peak.record(1_000, 0.5); // 16 kbps partial
        assert_eq!(peak.finish(), Some(192.0));
    }
}
