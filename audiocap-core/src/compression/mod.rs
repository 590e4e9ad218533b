pub mod advisor;
pub mod controller;
pub mod encoder;
pub mod fallback;
pub mod flac;
pub mod mp3;
pub mod pcm;
pub mod validation;
pub mod vorbis;
pub mod worker;
