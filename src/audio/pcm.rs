//! 16-bit little-endian mono PCM conversion and WAV wrapping.

use crate::error::{Result, TalkbackError};
use std::io::Cursor;

/// Decode little-endian 16-bit PCM bytes into samples.
///
/// A trailing odd byte cannot form a sample and is rejected.
pub fn decode_pcm16le(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(TalkbackError::Audio {
            message: format!("PCM payload has odd length {}", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode samples as little-endian 16-bit PCM bytes.
pub fn encode_pcm16le(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Wrap samples in a minimal mono 16-bit WAV container.
pub fn wrap_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        let mut i16_writer = writer.get_i16_writer(samples.len() as u32);
        for &sample in samples {
            i16_writer.write_sample(sample);
        }
        i16_writer.flush()?;
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Playback duration of a sample buffer in milliseconds.
pub fn duration_ms(sample_count: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (sample_count as u64 * 1000) / sample_rate as u64
}

/// The trailing `secs` seconds of a buffer, or all of it when shorter.
pub fn tail(samples: &[i16], sample_rate: u32, secs: u32) -> &[i16] {
    let keep = sample_rate as usize * secs as usize;
    if samples.len() > keep {
        &samples[samples.len() - keep..]
    } else {
        samples
    }
}

/// Calculate RMS (Root Mean Square) energy of audio samples.
///
/// Returns a value between 0.0 (silence) and 1.0 (maximum amplitude).
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}
