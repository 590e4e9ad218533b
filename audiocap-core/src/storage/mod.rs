pub mod metadata;
pub mod sink;
pub mod wav_writer;
