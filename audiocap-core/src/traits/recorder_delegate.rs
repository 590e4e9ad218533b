use std::path::Path;

use crate::models::device::AssignedDevice;
use crate::models::error::CaptureError;

/// Event delegate for recorder notifications.
///
/// Held through a `Weak` reference, so dropping the host also silences it.
/// Errors from the encode path arrive on the encoder thread and output
/// failures on the multiplex timer thread; everything else on the thread that
/// called the recorder.
///
/// No recorder lock is held while a callback runs, so reading progress or
/// diagnostics from one is fine. Stopping the recorder from inside a callback
/// is not: `stop` joins the very thread the callback runs on. Hand that off to
/// another thread.
pub trait RecorderDelegate: Send + Sync {
    fn did_start_recording(&self);

    /// Called once the output file and its sidecars are complete.
    fn did_stop_recording(&self, output_location: &Path);

    fn did_encounter_error(&self, error: &CaptureError);

    fn device_connected(&self, _device: &AssignedDevice) {}

    fn device_disconnected(&self, _device_id: &str, _channel: u16) {}
}
