use crate::core::io::Storage;
use crate::core::state::{AudioClip, Thumbnail};
use anyhow::{anyhow, Context, Result};
use std::io::Write;

pub const AUDIO_FILENAME: &str = "generated_audio.wav";
pub const THUMBNAIL_STEM: &str = "thumbnail";

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Wraps raw 16-bit little-endian mono PCM in a WAV container.
/// A trailing odd byte is dropped.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let data = &pcm[..pcm.len() - pcm.len() % 2];
    let data_size = u32::try_from(data.len()).context("PCM data too large for a WAV file")?;
    let block_align = CHANNELS * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate
        .checked_mul(u32::from(block_align))
        .ok_or_else(|| anyhow!("Sample rate {} Hz is too high for a WAV header", sample_rate))?;
    let riff_size = data_size
        .checked_add(36)
        .context("PCM data too large for a WAV file")?;

    let mut out = Vec::with_capacity(44 + data.len());
    // RIFF [4] + Size [4] + WAVE [4]
    out.write_all(b"RIFF")?;
    out.write_all(&riff_size.to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?; // PCM
    out.write_all(&CHANNELS.to_le_bytes())?;
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;

    out.write_all(b"data")?;
    out.write_all(&data_size.to_le_bytes())?;
    out.write_all(data)?;
    Ok(out)
}

fn thumbnail_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

/// Writes the clip as a WAV file and returns the key it was stored under.
pub async fn export_audio(storage: &dyn Storage, clip: &AudioClip) -> Result<String> {
    let wav = pcm_to_wav(&clip.pcm, clip.sample_rate_hz)?;
    storage
        .write(AUDIO_FILENAME, &wav)
        .await
        .with_context(|| format!("Failed to write {}", AUDIO_FILENAME))?;
    log::info!("Exported {} ({:.1}s)", AUDIO_FILENAME, clip.duration_secs());
    Ok(AUDIO_FILENAME.to_string())
}

pub async fn export_thumbnail(storage: &dyn Storage, thumbnail: &Thumbnail) -> Result<String> {
    let key = format!("{}.{}", THUMBNAIL_STEM, thumbnail_extension(&thumbnail.mime_type));
    storage
        .write(&key, &thumbnail.bytes)
        .await
        .with_context(|| format!("Failed to write {}", key))?;
    log::info!("Exported {}", key);
    Ok(key)
}
