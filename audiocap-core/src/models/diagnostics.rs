use serde::{Deserialize, Serialize};

/// Counters for debugging a recording session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderDiagnostics {
    pub ticks: u64,
    pub frames_multiplexed: u64,
    pub primary_callback_count: u64,
    pub aux_callback_count: u64,
    /// Frames rejected by full ring buffers, all sources.
    pub dropped_frames: u64,
    /// Frames copied outside the buffer pool because it was exhausted.
    pub transient_allocations: u64,
    pub assigned_devices: u64,
    pub fallback_active: bool,
}
