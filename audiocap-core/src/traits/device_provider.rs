use crate::models::device::DeviceDescriptor;
use crate::models::error::CaptureError;
use crate::traits::capture_provider::AudioBufferCallback;

/// Enumerates auxiliary input devices and runs their audio streams.
pub trait DeviceProvider: Send {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, CaptureError>;

    /// Begin delivering audio from `device` to `callback`.
    fn start_input(&mut self, device: &DeviceDescriptor, callback: AudioBufferCallback) -> Result<(), CaptureError>;

    fn stop_input(&mut self, device_id: &str) -> Result<(), CaptureError>;
}
