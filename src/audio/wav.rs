//! WAV container codec for 16-bit PCM.
//!
//! Encoding always produces the canonical 44-byte header. Decoding walks the
//! RIFF chunk list, so files carrying `LIST`, `fact` or other metadata chunks
//! ahead of `data` still load. Streaming writers that never patch the `data`
//! size (left as `0` or `0xFFFFFFFF`) are read up to the end of the buffer.

use crate::audio::PcmAudio;
use crate::error::{AvatarError, Result};

/// Length of the canonical header written by [`encode`].
pub const HEADER_LEN: usize = 44;

const PREAMBLE_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const FMT_MIN_LEN: usize = 16;
const FMT_EXTENSIBLE_LEN: usize = 40;

const FORMAT_PCM: u16 = 1;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;
const BITS_PER_SAMPLE: u16 = 16;

/// Declared `data` size meaning "unknown, read to the end".
const UNKNOWN_DATA_SIZE: u32 = 0xFFFF_FFFF;

/// Fields of a `fmt ` chunk that matter for PCM16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WavFormat {
    channels: u16,
    sample_rate: u32,
}

/// Encode normalized samples as a PCM16 WAV byte stream.
///
/// `samples` are interleaved. A trailing partial frame is dropped so the
/// output always decodes to a whole number of frames.
pub fn encode(samples: &[f32], channels: u16, sample_rate: u32) -> Vec<u8> {
    let usable = if channels == 0 {
        0
    } else {
        samples.len() - samples.len() % channels as usize
    };
    let data_len = usable * 2;
    let data_len_u32 = u32::try_from(data_len).unwrap_or(u32::MAX);
    let block_align = channels.saturating_mul(2);
    let byte_rate = sample_rate.saturating_mul(u32::from(block_align));

    let mut wav = Vec::with_capacity(HEADER_LEN + data_len);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&data_len_u32.saturating_add(36).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len_u32.to_le_bytes());

    for &sample in &samples[..usable] {
        wav.extend_from_slice(&to_pcm16(sample).to_le_bytes());
    }
    wav
}

/// Encode a [`PcmAudio`] buffer.
pub fn encode_audio(audio: &PcmAudio) -> Vec<u8> {
    encode(&audio.samples, audio.channels, audio.sample_rate)
}

/// Decode a PCM16 WAV byte stream.
///
/// # Errors
/// - `MalformedContainer` if the preamble is missing or truncated, no `fmt `
///   chunk precedes `data`, no `data` chunk exists, the data overruns the
///   buffer, or the data is not a whole number of frames.
/// - `UnsupportedFormat` for anything other than 16-bit integer PCM.
pub fn decode(bytes: &[u8]) -> Result<PcmAudio> {
    if bytes.len() < PREAMBLE_LEN {
        return Err(malformed(format!(
            "{} bytes is shorter than the {PREAMBLE_LEN}-byte RIFF preamble",
            bytes.len()
        )));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(malformed("missing RIFF/WAVE preamble"));
    }

    let mut format: Option<WavFormat> = None;
    let mut offset = PREAMBLE_LEN;

    while offset + CHUNK_HEADER_LEN <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4);
        let body = offset + CHUNK_HEADER_LEN;

        if id.eq_ignore_ascii_case(b"data") {
            let format = format.ok_or_else(|| malformed("data chunk precedes fmt chunk"))?;
            let remaining = bytes.len() - body;
            let data_len = if size == 0 || size == UNKNOWN_DATA_SIZE {
                remaining
            } else {
                size as usize
            };
            if data_len > remaining {
                return Err(malformed(format!(
                    "data chunk declares {data_len} bytes but only {remaining} remain"
                )));
            }
            return samples_from_pcm16(&bytes[body..body + data_len], format);
        }

        if id == b"fmt " {
            format = Some(parse_fmt(bytes, body, size as usize)?);
        }

        let Some(mut next) = body.checked_add(size as usize) else {
            break;
        };
        // Writers that word-align odd chunks leave a NUL pad byte; chunk ids
        // never start with one.
        if size & 1 == 1 && bytes.get(next) == Some(&0) {
            next += 1;
        }
        offset = next;
    }

    Err(malformed("no data chunk found"))
}

fn parse_fmt(bytes: &[u8], body: usize, size: usize) -> Result<WavFormat> {
    if size < FMT_MIN_LEN || body + FMT_MIN_LEN > bytes.len() {
        return Err(malformed(format!("fmt chunk of {size} bytes is too short")));
    }

    let mut format_tag = read_u16(bytes, body);
    let channels = read_u16(bytes, body + 2);
    let sample_rate = read_u32(bytes, body + 4);
    let bits_per_sample = read_u16(bytes, body + 14);

    // WAVE_FORMAT_EXTENSIBLE keeps the real format code at the start of the
    // SubFormat GUID.
    if format_tag == FORMAT_EXTENSIBLE
        && size >= FMT_EXTENSIBLE_LEN
        && body + FMT_EXTENSIBLE_LEN <= bytes.len()
    {
        format_tag = read_u16(bytes, body + 24);
    }

    if format_tag != FORMAT_PCM {
        return Err(AvatarError::UnsupportedFormat {
            message: format!("format tag {format_tag:#06x}, only integer PCM is supported"),
        });
    }
    if bits_per_sample != BITS_PER_SAMPLE {
        return Err(AvatarError::UnsupportedFormat {
            message: format!("{bits_per_sample} bits per sample, only 16-bit PCM is supported"),
        });
    }
    if channels == 0 {
        return Err(AvatarError::UnsupportedFormat {
            message: "zero channels".to_string(),
        });
    }

    Ok(WavFormat {
        channels,
        sample_rate,
    })
}

fn samples_from_pcm16(data: &[u8], format: WavFormat) -> Result<PcmAudio> {
    let frame_bytes = 2 * format.channels as usize;
    if data.len() % frame_bytes != 0 {
        return Err(malformed(format!(
            "{} data bytes is not a whole number of {}-channel frames",
            data.len(),
            format.channels
        )));
    }

    let samples = data
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    Ok(PcmAudio::new(samples, format.channels, format.sample_rate))
}

/// Scale a normalized sample to i16, clamping before the cast so
/// out-of-range input saturates instead of wrapping.
fn to_pcm16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn malformed(message: impl Into<String>) -> AvatarError {
    AvatarError::MalformedContainer {
        message: message.into(),
    }
}
