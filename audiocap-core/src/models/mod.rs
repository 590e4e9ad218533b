pub mod audio_frame;
pub mod compression;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod recording_result;
pub mod state;
pub mod statistics;
