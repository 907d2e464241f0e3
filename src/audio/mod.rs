//! PCM helpers shared by the ingestor and the recognition backends.

pub mod pcm;

pub use pcm::{calculate_rms, decode_pcm16le, duration_ms, encode_pcm16le, tail, wrap_wav};
