pub mod capture_provider;
pub mod device_provider;
pub mod recorder_delegate;
