use base64::{engine::general_purpose, Engine as _};
use std::io::Cursor;

use crate::AudioSamples;

const I16_MAX_F32: f32 = i16::MAX as f32;

/// Convert a float sample in [-1.0, 1.0] to i16. Values outside the range
/// saturate at the i16 bounds.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    // `as` saturates for floats and maps NaN to 0.
    (sample.clamp(-1.0, 1.0) * I16_MAX_F32) as i16
}

/// Encode samples as a mono 16-bit PCM WAV (RIFF) byte stream.
///
/// Float samples are normalized to i16; i16 samples are written unchanged.
/// The output depends only on the inputs.
pub fn encode_wav(samples: &AudioSamples, sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    // 44 byte header + 2 bytes per sample
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;

        match samples {
            AudioSamples::F32(buf) => {
                for &s in buf {
                    writer
                        .write_sample(f32_to_i16(s))
                        .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
                }
            }
            AudioSamples::I16(buf) => {
                for &s in buf {
                    writer
                        .write_sample(s)
                        .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
                }
            }
        }

        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    }

    Ok(cursor.into_inner())
}

/// Base64 form of a WAV payload, as carried in JSON messages.
pub fn wav_to_base64(wav: &[u8]) -> String {
    general_purpose::STANDARD.encode(wav)
}
