//! # audiocap-core
//!
//! Multichannel recording core: one primary stream plus hot-pluggable
//! auxiliary devices, multiplexed on a fixed clock into a single file.
//!
//! Capture backends implement [`CaptureProvider`] and [`DeviceProvider`] and
//! plug into the generic [`Recorder`]. Output goes through a
//! [`CompressionController`] (MP3, Ogg Vorbis or WAV) and falls back to WAV
//! whenever compression fails.
//!
//! ## Architecture
//!
//! ```text
//! audiocap-core (this crate)
//! ├── traits/       ← CaptureProvider, DeviceProvider, RecorderDelegate
//! ├── models/       ← CaptureError, RecorderState, configurations, statistics
//! ├── processing/   ← RingBuffer, ChannelMixer, BufferPool, AdaptiveBitrateController
//! ├── devices/      ← ChannelAssignmentRegistry
//! ├── compression/  ← CompressionController, encoders, fallback, advisor
//! ├── session/      ← Recorder, MultiplexWriter, OutputRoute
//! └── storage/      ← sinks, WAV writer, JSON sidecars
//! ```

pub mod compression;
pub mod devices;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use compression::advisor::{CompressionAdvisor, ContentType, FormatAdvice};
pub use compression::controller::CompressionController;
pub use compression::encoder::{AudioEncoder, CodecEncoderFactory, EncoderFactory};
pub use compression::fallback::{attempt_then_recover, Recovery};
pub use compression::validation::{StatisticsValidator, ValidationReport};
pub use devices::registry::ChannelAssignmentRegistry;
pub use models::audio_frame::AudioFrame;
pub use models::compression::{CompressionConfiguration, CompressionFormat, CompressionQuality};
pub use models::config::RecorderConfiguration;
pub use models::device::{AssignedDevice, DeviceDescriptor, DeviceEvent, DeviceKind};
pub use models::diagnostics::RecorderDiagnostics;
pub use models::error::{CaptureError, ConfigurationError};
pub use models::recording_result::{ChannelMapLog, RecordingResult};
pub use models::state::RecorderState;
pub use models::statistics::{CompressionProgress, CompressionStatistics};
pub use processing::adaptive_bitrate::{AdaptiveBitrateController, ComplexityMetrics};
pub use processing::buffer_pool::BufferPool;
pub use processing::channel_mixer::ChannelMixer;
pub use processing::ring_buffer::RingBuffer;
pub use session::multiplexer::MultiplexWriter;
pub use session::recorder::Recorder;
pub use storage::sink::{FileSinkFactory, OutputSink, SinkFactory};
pub use traits::capture_provider::{AudioBufferCallback, CaptureProvider};
pub use traits::device_provider::DeviceProvider;
pub use traits::recorder_delegate::RecorderDelegate;
