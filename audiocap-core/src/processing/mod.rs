pub mod adaptive_bitrate;
pub mod buffer_pool;
pub mod channel_mixer;
pub mod ring_buffer;
pub mod wav_format;
