use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;

use crate::compression::controller::CompressionController;
use crate::compression::encoder::EncoderFactory;
use crate::compression::fallback::{attempt_then_recover, Recovery};
use crate::compression::worker::ErrorCallback;
use crate::models::audio_frame::AudioFrame;
use crate::models::compression::{CompressionConfiguration, CompressionFormat};
use crate::models::error::CaptureError;
use crate::models::statistics::{CompressionProgress, CompressionStatistics};
use crate::processing::buffer_pool::BufferPool;
use crate::storage::sink::SinkFactory;

/// Where and how a recording is written.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSettings {
    /// Output path without extension; the format adds it.
    pub base_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    /// Resolved compression settings, or None for WAV.
    pub compression: Option<CompressionConfiguration>,
}

impl RouteSettings {
    fn path_for(&self, format: CompressionFormat) -> PathBuf {
        self.base_path.with_extension(format.file_extension())
    }
}

/// The encoders, sinks and pool a route opens its controllers with.
#[derive(Clone)]
pub struct RouteBackends {
    pub encoders: Arc<dyn EncoderFactory>,
    pub sinks: Arc<dyn SinkFactory>,
    pub pool: Arc<BufferPool>,
    pub on_error: Option<ErrorCallback>,
}

/// What the route left on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSummary {
    pub path: PathBuf,
    pub format: CompressionFormat,
    pub checksum: String,
    pub duration_secs: f64,
    /// Statistics for the file at `path`.
    pub statistics: CompressionStatistics,
    /// The compressed attempt that was given up, if any.
    pub abandoned: Option<CompressionStatistics>,
    pub fallback_cause: Option<CaptureError>,
    pub transient_allocations: u64,
}

/// Output stage of the recorder: compressed when possible, WAV otherwise.
///
/// Any failure of the compressed path moves the session to a WAV file next to
/// it, starting with the frames the encoder could not take. Closing the
/// compressed file (draining the encode thread, hashing the file) runs on a
/// separate thread; frames written in the meantime are held and replayed into
/// the WAV once it is open. A failure of the WAV path is returned to the
/// caller.
pub struct OutputRoute {
    settings: RouteSettings,
    backends: RouteBackends,
    stage: Stage,
    compressed: bool,
    fallback_cause: Option<CaptureError>,
    abandoned: Option<CompressionStatistics>,
    transient_allocations: u64,
}

enum Stage {
    Writing(CompressionController),
    Retiring(Retirement),
    Closed,
}

/// A compressed controller being closed in the background.
struct Retirement {
    handle: thread::JoinHandle<Result<Retired, CaptureError>>,
    pending: Vec<AudioFrame>,
}

struct Retired {
    abandoned: Option<CompressionStatistics>,
    transient_allocations: u64,
    wav: CompressionController,
}

impl OutputRoute {
    pub fn open(settings: RouteSettings, backends: RouteBackends) -> Result<Self, CaptureError> {
        let requested = settings
            .compression
            .clone()
            .filter(|c| c.format != CompressionFormat::Uncompressed);

        let (active, compressed, fallback_cause) = match requested {
            None => (open_uncompressed(&settings, &backends)?, false, None),
            Some(config) => {
                let opened = attempt_then_recover(
                    || open_controller(&settings, &backends, config.clone()).map(|c| (c, true)),
                    |cause| {
                        log::warn!("{} output unavailable ({}); recording uncompressed", config.format, cause);
                        open_uncompressed(&settings, &backends).map(|c| (c, false))
                    },
                );
                match opened {
                    Recovery::Succeeded((controller, compressed)) => (controller, compressed, None),
                    Recovery::Recovered {
                        value: (controller, compressed),
                        cause,
                    } => (controller, compressed, Some(cause)),
                    Recovery::Failed(e) => return Err(e),
                }
            }
        };

        Ok(Self {
            settings,
            backends,
            stage: Stage::Writing(active),
            compressed,
            fallback_cause,
            abandoned: None,
            transient_allocations: 0,
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn format(&self) -> CompressionFormat {
        match self.stage {
            Stage::Writing(ref active) => active
                .configuration()
                .map_or(CompressionFormat::Uncompressed, |c| c.format),
            Stage::Retiring(_) | Stage::Closed => CompressionFormat::Uncompressed,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.settings.path_for(self.format())
    }

    /// Why the route is writing WAV although compression was requested.
    pub fn fallback_cause(&self) -> Option<&CaptureError> {
        self.fallback_cause.as_ref()
    }

    /// Whether the abandoned compressed file is still being closed.
    pub fn is_retiring(&self) -> bool {
        matches!(self.stage, Stage::Retiring(_))
    }

    pub fn transient_allocations(&self) -> u64 {
        let active = match self.stage {
            Stage::Writing(ref active) => active.transient_allocations(),
            Stage::Retiring(_) | Stage::Closed => 0,
        };
        self.transient_allocations + active
    }

    /// Hand one multiplexed frame to the active output. Never blocks on the
    /// retired compressed file.
    pub fn write(&mut self, frame: &AudioFrame) -> Result<(), CaptureError> {
        self.poll_retirement()?;

        let cause = match self.stage {
            Stage::Retiring(ref mut retirement) => {
                retirement.pending.push(frame.clone());
                return Ok(());
            }
            Stage::Closed => return Err(CaptureError::EngineNotInitialized),
            Stage::Writing(ref mut active) => {
                let failed = if self.compressed { active.failure() } else { None };
                match failed {
                    Some(cause) => cause,
                    None => match active.process_frame(frame) {
                        Ok(()) => return Ok(()),
                        Err(cause) if self.compressed => cause,
                        Err(e) => return Err(e),
                    },
                }
            }
        };
        self.begin_fallback(cause, frame)
    }

    pub fn progress(&mut self) -> CompressionProgress {
        match self.stage {
            Stage::Writing(ref mut active) => active.progress(),
            Stage::Retiring(_) | Stage::Closed => CompressionProgress::default(),
        }
    }

    pub fn apply_bitrate_hint(&mut self, kbps: u32) {
        if let Stage::Writing(ref mut active) = self.stage {
            active.apply_bitrate_hint(kbps);
        }
    }

    /// Drain and close the output, waiting for a pending fallback first.
    pub fn finish(mut self) -> Result<RouteSummary, CaptureError> {
        self.complete_retirement()?;
        let mut active = match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Writing(active) => active,
            Stage::Retiring(_) | Stage::Closed => return Err(CaptureError::EngineNotInitialized),
        };

        if self.compressed {
            let finalized = active.finalize_compression();
            let failure = match finalized {
                Ok(ref _stats) => active.failure(),
                Err(ref e) => Some(e.clone()),
            };
            match (finalized, failure) {
                (Ok(stats), None) => {
                    self.transient_allocations += active.transient_allocations();
                    return Ok(self.summary(stats));
                }
                (finalized, Some(cause)) => {
                    self.mark_fallback(cause);
                    let retired = Retired {
                        abandoned: finalized.ok(),
                        transient_allocations: active.transient_allocations(),
                        wav: spill_into_wav(&self.settings, &self.backends, active.take_unencoded())?,
                    };
                    active = self.adopt(retired, Vec::new())?;
                }
                (Err(e), None) => return Err(e),
            }
        }

        let stats = active.finalize_compression()?;
        self.transient_allocations += active.transient_allocations();
        Ok(self.summary(stats))
    }

    // --- Internal helpers ---

    fn mark_fallback(&mut self, cause: CaptureError) {
        log::warn!(
            "compression failed ({}); continuing with {} as WAV",
            cause,
            self.settings.path_for(CompressionFormat::Uncompressed).display()
        );
        self.compressed = false;
        self.fallback_cause = Some(cause);
    }

    /// Switch to WAV now and close the compressed controller on its own
    /// thread. `frame` is the first frame the WAV receives after the spill.
    fn begin_fallback(&mut self, cause: CaptureError, frame: &AudioFrame) -> Result<(), CaptureError> {
        let controller = match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Writing(controller) => controller,
            other => {
                self.stage = other;
                return Ok(());
            }
        };
        self.mark_fallback(cause);
        let pending = vec![frame.clone()];

        let (handoff_tx, handoff_rx) = bounded::<CompressionController>(1);
        let settings = self.settings.clone();
        let backends = self.backends.clone();
        let spawned = thread::Builder::new().name("output-fallback".into()).spawn(move || {
            let controller = handoff_rx
                .recv()
                .map_err(|_| CaptureError::InvalidState("fallback handoff dropped".into()))?;
            retire(controller, &settings, &backends)
        });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("failed to spawn fallback thread ({}); closing inline", e);
                let retired = retire(controller, &self.settings, &self.backends)?;
                let wav = self.adopt(retired, pending)?;
                self.stage = Stage::Writing(wav);
                return Ok(());
            }
        };
        if let Err(returned) = handoff_tx.send(controller) {
            let _ = handle.join();
            let retired = retire(returned.into_inner(), &self.settings, &self.backends)?;
            let wav = self.adopt(retired, pending)?;
            self.stage = Stage::Writing(wav);
            return Ok(());
        }

        self.stage = Stage::Retiring(Retirement { handle, pending });
        Ok(())
    }

    fn poll_retirement(&mut self) -> Result<(), CaptureError> {
        let finished = matches!(self.stage, Stage::Retiring(ref r) if r.handle.is_finished());
        if finished {
            self.complete_retirement()?;
        }
        Ok(())
    }

    /// Join the fallback thread, if any, and continue on its WAV.
    fn complete_retirement(&mut self) -> Result<(), CaptureError> {
        let Retirement { handle, pending } = match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Retiring(retirement) => retirement,
            other => {
                self.stage = other;
                return Ok(());
            }
        };
        let retired = handle
            .join()
            .map_err(|_| CaptureError::WriteFailed("fallback thread panicked".into()))??;
        let wav = self.adopt(retired, pending)?;
        self.stage = Stage::Writing(wav);
        Ok(())
    }

    /// Take over a retired controller's WAV and replay the held frames.
    fn adopt(&mut self, retired: Retired, pending: Vec<AudioFrame>) -> Result<CompressionController, CaptureError> {
        let mut wav = retired.wav;
        for frame in &pending {
            wav.process_frame(frame)?;
        }
        if !pending.is_empty() {
            log::debug!("replayed {} frame(s) held during fallback", pending.len());
        }
        self.transient_allocations += retired.transient_allocations;
        self.abandoned = retired.abandoned;
        Ok(wav)
    }

    fn summary(&self, statistics: CompressionStatistics) -> RouteSummary {
        let path = statistics
            .output_path
            .clone()
            .unwrap_or_else(|| self.settings.path_for(statistics.format));
        let duration_secs =
            statistics.duration_secs + self.abandoned.as_ref().map_or(0.0, |a| a.duration_secs);
        RouteSummary {
            path,
            format: statistics.format,
            checksum: statistics.checksum.clone().unwrap_or_default(),
            duration_secs,
            abandoned: self.abandoned.clone(),
            fallback_cause: self.fallback_cause.clone(),
            transient_allocations: self.transient_allocations(),
            statistics,
        }
    }
}

/// Close a failed compressed controller and open the WAV that continues it,
/// seeded with the frames the encoder never took.
fn retire(
    mut controller: CompressionController,
    settings: &RouteSettings,
    backends: &RouteBackends,
) -> Result<Retired, CaptureError> {
    let abandoned = match controller.finalize_compression() {
        Ok(stats) => Some(stats),
        Err(e) => {
            log::warn!("could not close the compressed output: {}", e);
            None
        }
    };
    let wav = spill_into_wav(settings, backends, controller.take_unencoded())?;
    Ok(Retired {
        abandoned,
        transient_allocations: controller.transient_allocations(),
        wav,
    })
}

fn spill_into_wav(
    settings: &RouteSettings,
    backends: &RouteBackends,
    spilled: Vec<AudioFrame>,
) -> Result<CompressionController, CaptureError> {
    let mut wav = open_uncompressed(settings, backends)?;
    for frame in &spilled {
        wav.process_frame(frame)?;
    }
    Ok(wav)
}

fn open_controller(
    settings: &RouteSettings,
    backends: &RouteBackends,
    config: CompressionConfiguration,
) -> Result<CompressionController, CaptureError> {
    let path = settings.path_for(config.format);
    let mut controller = CompressionController::new(
        Arc::clone(&backends.encoders),
        Arc::clone(&backends.sinks),
        Arc::clone(&backends.pool),
    );
    if let Some(ref callback) = backends.on_error {
        controller.set_error_callback(Arc::clone(callback));
    }
    controller.initialize(config)?;
    controller.create_output_file(&path)?;
    log::info!("recording to {}", path.display());
    Ok(controller)
}

fn open_uncompressed(settings: &RouteSettings, backends: &RouteBackends) -> Result<CompressionController, CaptureError> {
    let config = CompressionConfiguration::uncompressed(settings.sample_rate, settings.channels);
    open_controller(settings, backends, config)
}

/// `<directory>/<stem>` for a recording.
pub fn base_path(directory: &Path, stem: &str) -> PathBuf {
    directory.join(stem)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crossbeam_channel::Receiver;
    use parking_lot::Mutex;

    use super::*;
    use crate::compression::encoder::{AudioEncoder, CodecEncoderFactory};
    use crate::compression::pcm::PcmEncoder;
    use crate::storage::sink::{EncodedFileSink, FileSinkFactory, OutputSink, SinkSummary};

    /// Vorbis encoder that breaks after a few frames; everything else is real.
    struct BreakingVorbis {
        encoded: usize,
        fail_after: usize,
    }

    impl AudioEncoder for BreakingVorbis {
        fn format(&self) -> CompressionFormat {
            CompressionFormat::Vorbis
        }

        fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, CaptureError> {
            if self.encoded == self.fail_after {
                return Err(CaptureError::EncodingFailed("codec fault".into()));
            }
            self.encoded += 1;
            Ok(vec![1u8; frame.frame_count() / 8])
        }

        fn finish(&mut self) -> Result<Vec<u8>, CaptureError> {
            Ok(Vec::new())
        }
    }

    struct BreakingFactory {
        fail_after: usize,
    }

    impl EncoderFactory for BreakingFactory {
        fn create(&self, config: &CompressionConfiguration) -> Result<Box<dyn AudioEncoder>, CaptureError> {
            match config.format {
                CompressionFormat::Uncompressed => Ok(Box::new(PcmEncoder::new(config.channels))),
                _ => Ok(Box::new(BreakingVorbis {
                    encoded: 0,
                    fail_after: self.fail_after,
                })),
            }
        }

        fn supports(&self, _format: CompressionFormat) -> bool {
            true
        }
    }

    struct WavOnly;

    impl EncoderFactory for WavOnly {
        fn create(&self, config: &CompressionConfiguration) -> Result<Box<dyn AudioEncoder>, CaptureError> {
            CodecEncoderFactory.create(config)
        }

        fn supports(&self, format: CompressionFormat) -> bool {
            format == CompressionFormat::Uncompressed
        }
    }

    /// Compressed files stay open until the test releases them.
    struct GatedSinks {
        release: Receiver<()>,
    }

    struct GatedSink {
        inner: EncodedFileSink,
        release: Receiver<()>,
    }

    impl OutputSink for GatedSink {
        fn path(&self) -> &Path {
            self.inner.path()
        }

        fn write(&mut self, bytes: &[u8]) -> Result<(), CaptureError> {
            self.inner.write(bytes)
        }

        fn bytes_written(&self) -> u64 {
            self.inner.bytes_written()
        }

        fn finish(self: Box<Self>) -> Result<SinkSummary, CaptureError> {
            let this = *self;
            let _ = this.release.recv_timeout(Duration::from_secs(5));
            OutputSink::finish(Box::new(this.inner))
        }
    }

    impl SinkFactory for GatedSinks {
        fn create_output_file(
            &self,
            path: &Path,
            config: &CompressionConfiguration,
        ) -> Result<Box<dyn OutputSink>, CaptureError> {
            match config.format {
                CompressionFormat::Uncompressed => FileSinkFactory.create_output_file(path, config),
                _ => Ok(Box::new(GatedSink {
                    inner: EncodedFileSink::create(path.to_path_buf())?,
                    release: self.release.clone(),
                })),
            }
        }
    }

    fn backends(encoders: Arc<dyn EncoderFactory>) -> RouteBackends {
        RouteBackends {
            encoders,
            sinks: Arc::new(FileSinkFactory),
            pool: Arc::new(BufferPool::new()),
            on_error: None,
        }
    }

    fn settings(dir: &Path, compression: Option<CompressionConfiguration>) -> RouteSettings {
        RouteSettings {
            base_path: base_path(dir, "take"),
            sample_rate: 48_000,
            channels: 8,
            compression,
        }
    }

    fn frame() -> AudioFrame {
        AudioFrame::interleaved(vec![0.1; 240 * 8], 48_000, 8)
    }

    #[test]
    fn uncompressed_route_writes_wav() {
        let dir = tempfile::tempdir().unwrap();
        let mut route = OutputRoute::open(settings(dir.path(), None), backends(Arc::new(CodecEncoderFactory))).unwrap();
        assert!(!route.is_compressed());

        for _ in 0..10 {
            route.write(&frame()).unwrap();
        }
        let summary = route.finish().unwrap();

        assert_eq!(summary.path, dir.path().join("take.wav"));
        assert_eq!(summary.format, CompressionFormat::Uncompressed);
        assert_eq!(summary.statistics.compressed_bytes, 10 * 240 * 8 * 2);
        assert!(summary.fallback_cause.is_none());
    }

    #[test]
    fn unsupported_format_falls_back_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let vorbis = CompressionConfiguration::new(CompressionFormat::Vorbis, 128, 48_000, 8);
        let route = OutputRoute::open(settings(dir.path(), Some(vorbis)), backends(Arc::new(WavOnly))).unwrap();

        assert!(!route.is_compressed());
        assert_eq!(
            route.fallback_cause(),
            Some(&CaptureError::FormatNotSupported(CompressionFormat::Vorbis))
        );
        assert_eq!(route.output_path(), dir.path().join("take.wav"));
    }

    #[test]
    fn lossless_route_writes_flac() {
        let dir = tempfile::tempdir().unwrap();
        let lossless = CompressionConfiguration::new(CompressionFormat::Lossless, 0, 48_000, 8);
        let mut route =
            OutputRoute::open(settings(dir.path(), Some(lossless)), backends(Arc::new(CodecEncoderFactory))).unwrap();
        assert!(route.is_compressed());

        for _ in 0..10 {
            route.write(&frame()).unwrap();
        }
        let summary = route.finish().unwrap();

        assert_eq!(summary.format, CompressionFormat::Lossless);
        assert_eq!(summary.path, dir.path().join("take.flac"));
        assert_eq!(summary.statistics.frames_encoded, 10);
        assert!(summary.fallback_cause.is_none());
    }

    #[test]
    fn encoder_failure_continues_as_wav_without_losing_frames() {
        let dir = tempfile::tempdir().unwrap();
        let vorbis = CompressionConfiguration::new(CompressionFormat::Vorbis, 128, 48_000, 8);
        let mut route = OutputRoute::open(
            settings(dir.path(), Some(vorbis)),
            backends(Arc::new(BreakingFactory { fail_after: 4 })),
        )
        .unwrap();
        assert!(route.is_compressed());

        for _ in 0..20 {
            route.write(&frame()).unwrap();
        }
        let summary = route.finish().unwrap();

        assert_eq!(summary.format, CompressionFormat::Uncompressed);
        assert_eq!(summary.path, dir.path().join("take.wav"));
        assert!(matches!(summary.fallback_cause, Some(CaptureError::EncodingFailed(_))));
        let abandoned = summary.abandoned.expect("compressed attempt statistics");
        assert_eq!(abandoned.frames_encoded, 4);
        // every frame ends up in exactly one of the two files
        assert_eq!(abandoned.frames_encoded + summary.statistics.frames_encoded, 20);
        assert!(dir.path().join("take.ogg").exists());
    }

    #[test]
    fn fallback_keeps_writing_while_the_compressed_file_closes() {
        let dir = tempfile::tempdir().unwrap();
        let (release_tx, release_rx) = bounded::<()>(1);
        let (failed_tx, failed_rx) = bounded::<()>(1);
        let vorbis = CompressionConfiguration::new(CompressionFormat::Vorbis, 128, 48_000, 8);
        let backends = RouteBackends {
            encoders: Arc::new(BreakingFactory { fail_after: 4 }),
            sinks: Arc::new(GatedSinks { release: release_rx }),
            pool: Arc::new(BufferPool::new()),
            on_error: Some(Arc::new(move |_e: &CaptureError| {
                let _ = failed_tx.try_send(());
            })),
        };
        let mut route = OutputRoute::open(settings(dir.path(), Some(vorbis)), backends).unwrap();

        for _ in 0..5 {
            route.write(&frame()).unwrap();
        }
        failed_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // the .ogg cannot close until released; writes must not wait for it
        let started = Instant::now();
        for _ in 0..15 {
            route.write(&frame()).unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(1), "writes took {:?}", started.elapsed());
        assert!(route.is_retiring());
        assert!(!route.is_compressed());
        assert_eq!(route.format(), CompressionFormat::Uncompressed);

        release_tx.send(()).unwrap();
        let summary = route.finish().unwrap();

        assert_eq!(summary.format, CompressionFormat::Uncompressed);
        let abandoned = summary.abandoned.expect("compressed attempt statistics");
        assert_eq!(abandoned.frames_encoded, 4);
        assert_eq!(abandoned.frames_encoded + summary.statistics.frames_encoded, 20);
    }

    #[test]
    fn error_callback_can_lock_the_route_owner() {
        let dir = tempfile::tempdir().unwrap();
        let owner: Arc<Mutex<Option<OutputRoute>>> = Arc::new(Mutex::new(None));
        let (entered_tx, entered_rx) = bounded::<()>(1);
        let (locked_tx, locked_rx) = bounded::<bool>(1);
        let on_error: ErrorCallback = {
            let owner = Arc::clone(&owner);
            Arc::new(move |_e: &CaptureError| {
                let _ = entered_tx.try_send(());
                let locked = owner.try_lock_for(Duration::from_secs(2)).is_some();
                let _ = locked_tx.try_send(locked);
            })
        };
        let vorbis = CompressionConfiguration::new(CompressionFormat::Vorbis, 128, 48_000, 8);
        let mut route_backends = backends(Arc::new(BreakingFactory { fail_after: 4 }));
        route_backends.on_error = Some(on_error);
        *owner.lock() = Some(OutputRoute::open(settings(dir.path(), Some(vorbis)), route_backends).unwrap());

        for _ in 0..5 {
            owner.lock().as_mut().unwrap().write(&frame()).unwrap();
        }
        {
            // the callback is now waiting for this lock while the write
            // discovers the failure
            let mut guard = owner.lock();
            entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            guard.as_mut().unwrap().write(&frame()).unwrap();
        }
        assert!(locked_rx.recv_timeout(Duration::from_secs(5)).unwrap());

        let mut route = owner.lock().take().unwrap();
        for _ in 0..14 {
            route.write(&frame()).unwrap();
        }
        let summary = route.finish().unwrap();
        let abandoned = summary.abandoned.expect("compressed attempt statistics");
        assert_eq!(abandoned.frames_encoded + summary.statistics.frames_encoded, 20);
    }
}
