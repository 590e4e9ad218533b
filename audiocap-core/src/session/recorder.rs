use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::compression::encoder::{CodecEncoderFactory, EncoderFactory};
use crate::compression::fallback::resolve_configuration;
use crate::compression::worker::ErrorCallback;
use crate::devices::registry::{AssignmentDelta, ChannelAssignmentRegistry};
use crate::models::compression::CompressionConfiguration;
use crate::models::config::RecorderConfiguration;
use crate::models::device::{AssignedDevice, DeviceDescriptor, DeviceEvent};
use crate::models::diagnostics::RecorderDiagnostics;
use crate::models::error::CaptureError;
use crate::models::recording_result::{ChannelMapLog, RecordingResult};
use crate::models::state::RecorderState;
use crate::models::statistics::CompressionProgress;
use crate::processing::adaptive_bitrate::AdaptiveBitrateController;
use crate::processing::buffer_pool::BufferPool;
use crate::processing::channel_mixer::ChannelMixer;
use crate::processing::ring_buffer::RingBuffer;
use crate::session::multiplexer::{AuxiliaryInput, MultiplexWriter};
use crate::session::output_route::{base_path, OutputRoute, RouteBackends, RouteSettings};
use crate::storage::metadata;
use crate::storage::sink::{FileSinkFactory, SinkFactory};
use crate::traits::capture_provider::{AudioBufferCallback, CaptureProvider};
use crate::traits::device_provider::DeviceProvider;
use crate::traits::recorder_delegate::RecorderDelegate;

/// How often the timer feeds encoder load back into the adaptive controller.
const LOAD_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Ticks the timer may fall behind before it drains the queued audio at once.
const MAX_LAG_TICKS: u32 = 20;

type DelegateSlot = Arc<RwLock<Option<Weak<dyn RecorderDelegate>>>>;

fn notify(slot: &DelegateSlot, f: impl FnOnce(&dyn RecorderDelegate)) {
    let delegate = slot.read().as_ref().and_then(Weak::upgrade);
    if let Some(delegate) = delegate {
        f(delegate.as_ref());
    }
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    frames_multiplexed: AtomicU64,
    primary_callbacks: AtomicU64,
    aux_callbacks: AtomicU64,
    dropped_frames: AtomicU64,
    transient_allocations: AtomicU64,
    fallback_active: AtomicBool,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.ticks,
            &self.frames_multiplexed,
            &self.primary_callbacks,
            &self.aux_callbacks,
            &self.dropped_frames,
            &self.transient_allocations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.fallback_active.store(false, Ordering::Relaxed);
    }
}

struct AuxSource {
    device_id: String,
    ring: Arc<RingBuffer>,
}

/// State shared between the recorder, the capture callbacks and the timer thread.
struct Shared {
    state: Mutex<RecorderState>,
    primary: RwLock<Option<Arc<RingBuffer>>>,
    auxiliary: RwLock<BTreeMap<u16, AuxSource>>,
    writer: Mutex<MultiplexWriter>,
    adaptive: Mutex<Option<AdaptiveBitrateController>>,
    route: Mutex<Option<OutputRoute>>,
    channel_map: Mutex<Option<ChannelMapLog>>,
    sink_failure: Mutex<Option<CaptureError>>,
    load_check_ticks: AtomicU64,
    counters: Counters,
    delegate: DelegateSlot,
}

impl Shared {
    fn new(config: &RecorderConfiguration) -> Self {
        Self {
            state: Mutex::new(RecorderState::Idle),
            primary: RwLock::new(None),
            auxiliary: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(MultiplexWriter::new(config)),
            adaptive: Mutex::new(None),
            route: Mutex::new(None),
            channel_map: Mutex::new(None),
            sink_failure: Mutex::new(None),
            load_check_ticks: AtomicU64::new(1),
            counters: Counters::default(),
            delegate: Arc::new(RwLock::new(None)),
        }
    }

    /// Multiplex one tick and hand it to the output. Returns the real primary
    /// frames consumed.
    fn run_tick(&self) -> Result<usize, CaptureError> {
        let Some(primary) = self.primary.read().clone() else {
            return Ok(0);
        };
        let auxiliary: Vec<AuxiliaryInput> = self
            .auxiliary
            .read()
            .iter()
            .map(|(channel, source)| (*channel, Arc::clone(&source.ring)))
            .collect();

        let mixed = self.writer.lock().mix_tick(&primary, &auxiliary);
        let tick = self.counters.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters
            .frames_multiplexed
            .fetch_add(mixed.frame.frame_count() as u64, Ordering::Relaxed);

        let hint = self.adaptive.lock().as_mut().map(|a| a.observe(&mixed.frame));

        let load_pressure = {
            let mut guard = self.route.lock();
            let Some(route) = guard.as_mut() else {
                return Ok(mixed.primary_frames);
            };
            if let Some(kbps) = hint {
                route.apply_bitrate_hint(kbps);
            }
            route.write(&mixed.frame)?;
            self.counters.fallback_active.store(route.fallback_cause().is_some(), Ordering::Relaxed);

            let every = self.load_check_ticks.load(Ordering::Relaxed).max(1);
            (hint.is_some() && tick % every == 0).then(|| route.progress().load_pressure)
        };

        if let Some(pressure) = load_pressure {
            if let Some(adaptive) = self.adaptive.lock().as_mut() {
                adaptive.set_load_pressure(pressure);
            }
        }
        Ok(mixed.primary_frames)
    }

    /// Run extra ticks while a whole tick of primary audio is queued, at most
    /// `limit` of them. Returns how many ran.
    fn drain_backlog(&self, frames_per_tick: usize, limit: usize) -> Result<usize, CaptureError> {
        let mut ran = 0;
        while ran < limit {
            let queued = self.primary.read().as_ref().map_or(0, |p| p.available_frames());
            if queued < frames_per_tick {
                break;
            }
            self.run_tick()?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Stop multiplexing after the output failed.
    fn halt(&self, error: CaptureError) {
        log::error!("primary output failed, recording halted: {}", error);
        *self.sink_failure.lock() = Some(error.clone());
        self.set_state(RecorderState::Failed(error.clone()));
        notify(&self.delegate, |d| d.did_encounter_error(&error));
    }

    fn set_state(&self, state: RecorderState) {
        *self.state.lock() = state;
    }
}

/// Records a primary stream plus auxiliary devices into one multichannel file.
///
/// ```text
/// [primary provider] ──► [ring] ──┐
/// [device k]         ──► [ring] ──┼─► MultiplexWriter (timer) ─► OutputRoute ─► file
/// [device m]         ──► [ring] ──┘
/// ```
///
/// Channels 1..=P carry the primary stream; auxiliary devices get channels
/// from the [`ChannelAssignmentRegistry`], which remembers them across
/// reconnects. Unassigned channels are silent.
pub struct Recorder<P: CaptureProvider, D: DeviceProvider> {
    primary: P,
    devices: D,
    config: RecorderConfiguration,
    encoders: Arc<dyn EncoderFactory>,
    sinks: Arc<dyn SinkFactory>,
    pool: Arc<BufferPool>,
    registry: Arc<ChannelAssignmentRegistry>,
    shared: Arc<Shared>,
    active_inputs: BTreeMap<String, u16>,
    compression_requested: bool,
    timer_running: Arc<AtomicBool>,
    timer_handle: Option<thread::JoinHandle<()>>,
}

impl<P: CaptureProvider, D: DeviceProvider> Recorder<P, D> {
    /// A recorder writing real files with the LAME, libvorbis and PCM encoders.
    pub fn new(primary: P, devices: D, config: RecorderConfiguration) -> Self {
        Self::with_backends(
            primary,
            devices,
            config,
            Arc::new(CodecEncoderFactory),
            Arc::new(FileSinkFactory),
        )
    }

    pub fn with_backends(
        primary: P,
        devices: D,
        config: RecorderConfiguration,
        encoders: Arc<dyn EncoderFactory>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        let shared = Arc::new(Shared::new(&config));
        Self {
            primary,
            devices,
            registry: Arc::new(ChannelAssignmentRegistry::new(config.aux_channel_range())),
            config,
            encoders,
            sinks,
            pool: Arc::new(BufferPool::new()),
            shared,
            active_inputs: BTreeMap::new(),
            compression_requested: false,
            timer_running: Arc::new(AtomicBool::new(false)),
            timer_handle: None,
        }
    }

    /// The delegate is held weakly; drop the last `Arc` to stop notifications.
    pub fn set_delegate(&mut self, delegate: Weak<dyn RecorderDelegate>) {
        *self.shared.delegate.write() = Some(delegate);
    }

    pub fn configuration(&self) -> &RecorderConfiguration {
        &self.config
    }

    pub fn state(&self) -> RecorderState {
        self.shared.state.lock().clone()
    }

    pub fn registry(&self) -> &ChannelAssignmentRegistry {
        &self.registry
    }

    /// Assign channels for `devices` without starting their inputs.
    pub fn assign_channels(&self, devices: &[DeviceDescriptor]) -> Vec<AssignedDevice> {
        self.registry.assign_channels(devices)
    }

    pub fn current_mapping(&self) -> Vec<AssignedDevice> {
        self.registry.current_mapping()
    }

    pub fn diagnostics(&self) -> RecorderDiagnostics {
        let counters = &self.shared.counters;
        let transient = match *self.shared.route.lock() {
            Some(ref route) => route.transient_allocations(),
            None => counters.transient_allocations.load(Ordering::Relaxed),
        };
        RecorderDiagnostics {
            ticks: counters.ticks.load(Ordering::Relaxed),
            frames_multiplexed: counters.frames_multiplexed.load(Ordering::Relaxed),
            primary_callback_count: counters.primary_callbacks.load(Ordering::Relaxed),
            aux_callback_count: counters.aux_callbacks.load(Ordering::Relaxed),
            dropped_frames: counters.dropped_frames.load(Ordering::Relaxed),
            transient_allocations: transient,
            assigned_devices: self.active_inputs.len() as u64,
            fallback_active: counters.fallback_active.load(Ordering::Relaxed),
        }
    }

    /// Live encoder figures while recording.
    pub fn progress(&self) -> Option<CompressionProgress> {
        self.shared.route.lock().as_mut().map(|route| route.progress())
    }

    /// Enumerate devices through the device provider, then [`Self::start`].
    pub fn start_with_enumeration(&mut self) -> Result<PathBuf, CaptureError> {
        let devices = self.devices.enumerate()?;
        self.start(&devices)
    }

    /// Start recording. Returns the path being written.
    ///
    /// Auxiliary devices that cannot be given a channel, or fail to start, are
    /// left out without failing the recording.
    pub fn start(&mut self, aux_devices: &[DeviceDescriptor]) -> Result<PathBuf, CaptureError> {
        if self.timer_handle.is_some() || !self.shared.state.lock().can_start() {
            return Err(CaptureError::InvalidState("a recording is already in progress".into()));
        }
        self.config.validate()?;
        if !self.primary.is_available() {
            return Err(CaptureError::CaptureFailed(format!(
                "{} is not available",
                self.primary.source_name()
            )));
        }

        let compression = self.session_compression()?;
        self.compression_requested = compression.is_some();
        let stem = self
            .config
            .file_stem
            .clone()
            .unwrap_or_else(|| format!("recording_{}", uuid::Uuid::new_v4()));

        self.reset_session();

        let on_error: ErrorCallback = {
            let delegate = Arc::clone(&self.shared.delegate);
            Arc::new(move |error: &CaptureError| notify(&delegate, |d| d.did_encounter_error(error)))
        };
        let route = OutputRoute::open(
            RouteSettings {
                base_path: base_path(&self.config.output_directory, &stem),
                sample_rate: self.config.sample_rate,
                channels: self.config.output_channels,
                compression,
            },
            RouteBackends {
                encoders: Arc::clone(&self.encoders),
                sinks: Arc::clone(&self.sinks),
                pool: Arc::clone(&self.pool),
                on_error: Some(on_error),
            },
        )?;
        if let Some(cause) = route.fallback_cause() {
            notify(&self.shared.delegate, |d| d.did_encounter_error(cause));
        }
        let output_path = route.output_path();
        *self.shared.route.lock() = Some(route);

        // devices mapped before this session (previous take, events while
        // idle) are not in the reconcile delta but still need starting
        let mut delta = self.registry.reconcile(aux_devices);
        delta.assigned = self
            .registry
            .current_mapping()
            .into_iter()
            .filter(|assigned| !self.active_inputs.contains_key(&assigned.device.id))
            .collect();
        self.apply_delta(delta);

        if let Err(e) = self.start_primary() {
            self.abort_session();
            let error = match e {
                CaptureError::CaptureFailed(_) => e,
                other => CaptureError::CaptureFailed(format!("{}: {}", self.primary.source_name(), other)),
            };
            self.shared.set_state(RecorderState::Failed(error.clone()));
            return Err(error);
        }

        if let Err(e) = self.start_timer() {
            let _ = self.primary.stop();
            self.abort_session();
            self.shared.set_state(RecorderState::Failed(e.clone()));
            return Err(e);
        }

        self.shared.set_state(RecorderState::Recording);
        log::info!(
            "recording started: {} channel(s) at {} Hz, {} auxiliary device(s)",
            self.config.output_channels,
            self.config.sample_rate,
            self.active_inputs.len()
        );
        notify(&self.shared.delegate, |d| d.did_start_recording());
        Ok(output_path)
    }

    /// Stop recording, finish the output and write the sidecars.
    ///
    /// Order: capture providers, multiplex timer, final flush, encoder drain,
    /// ring buffers and pooled memory.
    pub fn stop(&mut self) -> Result<RecordingResult, CaptureError> {
        let Some(timer) = self.timer_handle.take() else {
            return Err(CaptureError::InvalidState("not recording".into()));
        };
        self.shared.set_state(RecorderState::Stopping);

        if let Err(e) = self.primary.stop() {
            log::warn!("failed to stop {}: {}", self.primary.source_name(), e);
        }
        for (device_id, _) in std::mem::take(&mut self.active_inputs) {
            if let Err(e) = self.devices.stop_input(&device_id) {
                log::warn!("failed to stop device {}: {}", device_id, e);
            }
        }

        self.timer_running.store(false, Ordering::SeqCst);
        if timer.join().is_err() {
            log::error!("multiplex timer thread panicked");
        }

        let mut failure = self.shared.sink_failure.lock().clone();
        if failure.is_none() {
            if let Err(e) = self.flush_remaining() {
                failure = Some(e);
            }
        }

        let route = self.shared.route.lock().take();
        let finished = match (route, failure) {
            (Some(route), None) => route.finish(),
            (Some(route), Some(e)) => {
                if let Err(close) = route.finish() {
                    log::warn!("output could not be closed after failure: {}", close);
                }
                Err(e)
            }
            (None, _) => Err(CaptureError::InvalidState("no output is open".into())),
        };

        self.release_buffers();

        let summary = match finished {
            Ok(summary) => summary,
            Err(e) => {
                log::error!("recording failed: {}", e);
                self.shared.set_state(RecorderState::Failed(e.clone()));
                notify(&self.shared.delegate, |d| d.did_encounter_error(&e));
                return Err(e);
            }
        };
        self.shared
            .counters
            .transient_allocations
            .store(summary.transient_allocations, Ordering::Relaxed);
        self.shared
            .counters
            .fallback_active
            .store(summary.fallback_cause.is_some(), Ordering::Relaxed);

        let channel_map = self.shared.channel_map.lock().take().unwrap_or_else(|| {
            ChannelMapLog::new(
                self.config.sample_rate,
                self.config.output_channels,
                self.config.primary_channels,
            )
        });
        if let Err(e) = metadata::write_channel_map(&channel_map, &summary.path) {
            log::error!("failed to write channel map: {}", e);
            notify(&self.shared.delegate, |d| d.did_encounter_error(&e));
        }
        let compression = if self.compression_requested {
            if let Err(e) = metadata::write_compression_statistics(&summary.statistics, &summary.path) {
                log::error!("failed to write compression statistics: {}", e);
                notify(&self.shared.delegate, |d| d.did_encounter_error(&e));
            }
            Some(summary.statistics.clone())
        } else {
            None
        };

        let result = RecordingResult {
            file_path: summary.path,
            duration_secs: summary.duration_secs,
            format: summary.format,
            checksum: summary.checksum,
            compression,
            channel_map,
            fallback_cause: summary.fallback_cause,
        };

        log::info!(
            "recording stopped: {:.2}s of {} in {}",
            result.duration_secs,
            result.format,
            result.file_path.display()
        );
        self.shared.set_state(RecorderState::Completed(Box::new(result.clone())));
        notify(&self.shared.delegate, |d| d.did_stop_recording(&result.file_path));
        Ok(result)
    }

    /// Apply a device connect or disconnect and return the resulting mapping.
    ///
    /// While recording, inputs are started and stopped to match.
    pub fn handle_device_event(&mut self, event: DeviceEvent) -> Vec<AssignedDevice> {
        let delta = match event {
            DeviceEvent::Connected(device) => {
                log::debug!("device connected: {} ({})", device.name, device.id);
                self.registry.connect(device)
            }
            DeviceEvent::Disconnected(device_id) => {
                log::debug!("device disconnected: {}", device_id);
                self.registry.release(&device_id)
            }
        };
        if self.timer_handle.is_some() {
            self.apply_delta(delta);
        }
        self.registry.current_mapping()
    }

    // --- Internal helpers ---

    /// Compression settings for this session's layout, sanitized if needed.
    fn session_compression(&self) -> Result<Option<CompressionConfiguration>, CaptureError> {
        let Some(ref requested) = self.config.compression else {
            return Ok(None);
        };
        let mut config = requested.clone();
        config.channels = self.config.output_channels.min(config.format.max_channels());
        resolve_configuration(&config).into_result().map(Some)
    }

    fn reset_session(&mut self) {
        let shared = &self.shared;
        shared.counters.reset();
        *shared.sink_failure.lock() = None;
        *shared.primary.write() = Some(Arc::new(RingBuffer::new(
            self.config.ring_buffer_frames(),
            self.config.primary_channels as usize,
        )));
        shared.auxiliary.write().clear();
        *shared.writer.lock() = MultiplexWriter::new(&self.config);
        *shared.adaptive.lock() = self.config.adaptive_bitrate.then(AdaptiveBitrateController::default);
        *shared.channel_map.lock() = Some(ChannelMapLog::new(
            self.config.sample_rate,
            self.config.output_channels,
            self.config.primary_channels,
        ));
        let ticks = LOAD_CHECK_INTERVAL.as_millis() as u64 / self.config.tick_interval_ms.max(1);
        shared.load_check_ticks.store(ticks.max(1), Ordering::Relaxed);
    }

    fn start_primary(&mut self) -> Result<(), CaptureError> {
        let ring = self
            .shared
            .primary
            .read()
            .clone()
            .ok_or_else(|| CaptureError::InvalidState("primary buffer missing".into()))?;
        let callback = ring_callback(
            ring,
            Arc::clone(&self.shared),
            self.config.sample_rate,
            self.primary.source_name(),
            true,
        );
        self.primary.start(callback)
    }

    fn start_timer(&mut self) -> Result<(), CaptureError> {
        self.timer_running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.timer_running);
        let shared = Arc::clone(&self.shared);
        let interval = self.config.tick_interval();
        let frames_per_tick = self.config.frames_per_tick();
        let backlog_limit = self.config.ring_buffer_frames() / frames_per_tick + 1;

        let handle = thread::Builder::new()
            .name("multiplex-timer".into())
            .spawn(move || {
                let mut next = Instant::now() + interval;
                while running.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    }

                    if let Err(e) = shared.run_tick() {
                        shared.halt(e);
                        break;
                    }

                    next += interval;
                    if Instant::now() > next + interval * MAX_LAG_TICKS {
                        match shared.drain_backlog(frames_per_tick, backlog_limit) {
                            Ok(ran) => log::warn!("multiplex timer fell behind; caught up {} tick(s)", ran),
                            Err(e) => {
                                shared.halt(e);
                                break;
                            }
                        }
                        next = Instant::now() + interval;
                    }
                }
            })
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to spawn multiplex timer: {}", e)))?;

        self.timer_handle = Some(handle);
        Ok(())
    }

    /// Multiplex whatever primary audio is still queued.
    fn flush_remaining(&self) -> Result<(), CaptureError> {
        let Some(primary) = self.shared.primary.read().clone() else {
            return Ok(());
        };
        let max_ticks = primary.capacity() / self.config.frames_per_tick() + 1;
        for _ in 0..max_ticks {
            if primary.is_empty() {
                break;
            }
            self.shared.run_tick()?;
        }
        Ok(())
    }

    /// Start and stop device inputs to match a registry delta.
    fn apply_delta(&mut self, delta: AssignmentDelta) {
        let mut pending = VecDeque::from([delta]);
        while let Some(delta) = pending.pop_front() {
            for (device_id, channel) in delta.released {
                if self.active_inputs.remove(&device_id).is_none() {
                    continue;
                }
                if let Err(e) = self.devices.stop_input(&device_id) {
                    log::warn!("failed to stop device {}: {}", device_id, e);
                }
                {
                    let mut auxiliary = self.shared.auxiliary.write();
                    if auxiliary.get(&channel).is_some_and(|s| s.device_id == device_id) {
                        auxiliary.remove(&channel);
                    }
                }
                if let Some(ref mut map) = *self.shared.channel_map.lock() {
                    map.record_released(channel, &device_id);
                }
                log::info!("device {} released channel {}", device_id, channel);
                notify(&self.shared.delegate, |d| d.device_disconnected(&device_id, channel));
            }

            for assigned in delta.assigned {
                match self.start_auxiliary(&assigned) {
                    Ok(()) => {
                        if let Some(ref mut map) = *self.shared.channel_map.lock() {
                            map.record_assigned(assigned.channel, &assigned.device.id, &assigned.device.name);
                        }
                        log::info!(
                            "device {} ({}) assigned to channel {}",
                            assigned.device.name,
                            assigned.device.id,
                            assigned.channel
                        );
                        notify(&self.shared.delegate, |d| d.device_connected(&assigned));
                    }
                    Err(e) => {
                        let error = CaptureError::DeviceUnavailable(format!("{}: {}", assigned.device.name, e));
                        log::warn!("{}", error);
                        notify(&self.shared.delegate, |d| d.did_encounter_error(&error));
                        pending.push_back(self.registry.release(&assigned.device.id));
                    }
                }
            }

            for device_id in delta.unassigned {
                log::debug!("no free channel for device {}", device_id);
            }
        }
    }

    fn start_auxiliary(&mut self, assigned: &AssignedDevice) -> Result<(), CaptureError> {
        let ring = Arc::new(RingBuffer::new(self.config.ring_buffer_frames(), 1));
        let callback = ring_callback(
            Arc::clone(&ring),
            Arc::clone(&self.shared),
            self.config.sample_rate,
            assigned.device.name.clone(),
            false,
        );
        self.devices.start_input(&assigned.device, callback)?;

        self.shared.auxiliary.write().insert(
            assigned.channel,
            AuxSource {
                device_id: assigned.device.id.clone(),
                ring,
            },
        );
        self.active_inputs.insert(assigned.device.id.clone(), assigned.channel);
        Ok(())
    }

    /// Undo a partially started session.
    fn abort_session(&mut self) {
        for (device_id, _) in std::mem::take(&mut self.active_inputs) {
            let _ = self.devices.stop_input(&device_id);
        }
        let route = self.shared.route.lock().take();
        if let Some(route) = route {
            if let Err(e) = route.finish() {
                log::warn!("failed to close output of aborted session: {}", e);
            }
        }
        self.release_buffers();
    }

    fn release_buffers(&self) {
        if let Some(primary) = self.shared.primary.write().take() {
            primary.reset();
        }
        for (_, source) in std::mem::take(&mut *self.shared.auxiliary.write()) {
            source.ring.reset();
        }
        self.pool.clear();
    }
}

impl<P: CaptureProvider, D: DeviceProvider> Drop for Recorder<P, D> {
    fn drop(&mut self) {
        if self.timer_handle.is_some() {
            if let Err(e) = self.stop() {
                log::warn!("recorder dropped while recording: {}", e);
            }
        }
    }
}

/// Callback that conforms incoming audio to the ring's layout and queues it.
fn ring_callback(
    ring: Arc<RingBuffer>,
    shared: Arc<Shared>,
    output_rate: u32,
    source: String,
    primary: bool,
) -> AudioBufferCallback {
    let overflow_logged = AtomicBool::new(false);
    Arc::new(move |samples: &[f32], sample_rate: u32, channels: u16| {
        let counters = &shared.counters;
        if primary {
            counters.primary_callbacks.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.aux_callbacks.fetch_add(1, Ordering::Relaxed);
        }

        let conformed = conform_input(samples, sample_rate, channels, output_rate, ring.channels());
        let offered = conformed.len() / ring.channels();
        let accepted = ring.write(&conformed);
        if accepted < offered {
            counters
                .dropped_frames
                .fetch_add((offered - accepted) as u64, Ordering::Relaxed);
            if !overflow_logged.swap(true, Ordering::Relaxed) {
                log::warn!("ring buffer for {} is full; dropping incoming audio", source);
            }
        }
    })
}

/// Remix to `channels` and resample to `output_rate`, interleaved.
fn conform_input(samples: &[f32], sample_rate: u32, channels: u16, output_rate: u32, target_channels: usize) -> Vec<f32> {
    let source_channels = (channels as usize).max(1);
    let remixed = if source_channels == target_channels {
        samples.to_vec()
    } else {
        ChannelMixer::remix(samples, source_channels, target_channels)
    };
    if sample_rate == 0 || sample_rate == output_rate {
        remixed
    } else {
        ChannelMixer::new(output_rate).resample(&remixed, target_channels, sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conform_input_downmixes_and_resamples() {
        let stereo: Vec<f32> = (0..480).flat_map(|_| [0.2, 0.4]).collect();
        let mono = conform_input(&stereo, 24_000, 2, 48_000, 1);
        assert_eq!(mono.len(), 960);
        assert!(mono.iter().all(|s| (s - 0.3).abs() < 1e-5));
    }

    fn shared_with_primary(config: &RecorderConfiguration, queued_ticks: usize) -> Shared {
        let shared = Shared::new(config);
        let ring = RingBuffer::new(config.ring_buffer_frames(), config.primary_channels as usize);
        let frames = queued_ticks * config.frames_per_tick();
        ring.write(&vec![0.1; frames * config.primary_channels as usize]);
        *shared.primary.write() = Some(Arc::new(ring));
        shared
    }

    #[test]
    fn backlog_is_drained_tick_by_tick() {
        let config = RecorderConfiguration::default();
        let shared = shared_with_primary(&config, 5);

        let ran = shared.drain_backlog(config.frames_per_tick(), 100).unwrap();

        assert_eq!(ran, 5);
        assert_eq!(shared.counters.ticks.load(Ordering::Relaxed), 5);
        assert!(shared.primary.read().as_ref().unwrap().is_empty());
    }

    #[test]
    fn backlog_drain_stops_at_the_limit() {
        let config = RecorderConfiguration::default();
        let shared = shared_with_primary(&config, 5);

        assert_eq!(shared.drain_backlog(config.frames_per_tick(), 3).unwrap(), 3);
        let left = shared.primary.read().as_ref().unwrap().available_frames();
        assert_eq!(left, 2 * config.frames_per_tick());
    }

    #[test]
    fn conform_input_passes_matching_audio_through() {
        let samples = vec![0.1, -0.1, 0.2, -0.2];
        assert_eq!(conform_input(&samples, 48_000, 2, 48_000, 2), samples);
    }
}
