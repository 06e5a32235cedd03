//! Turns loosely structured model output into typed values or a
//! [`GenerationError::MalformedResponse`].

use crate::core::error::{GenerationError, GenerationResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 24_000;
pub const MAX_SAMPLE_RATE_HZ: u32 = 384_000;
const DEFAULT_IMAGE_MIME: &str = "image/png";
const FENCE: &str = "```";

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    data: Option<String>,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
struct Prediction {
    #[serde(rename = "bytesBase64Encoded")]
    bytes_base64: Option<String>,
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

/// Decoded speech payload: raw PCM plus the rate declared by the MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechPayload {
    pub pcm: Vec<u8>,
    pub sample_rate_hz: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

fn first_part(value: &Value, what: &str) -> GenerationResult<Part> {
    let response: GenerateContentResponse = serde_json::from_value(value.clone())
        .map_err(|e| GenerationError::malformed(format!("{} response has unexpected shape: {}", what, e)))?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::malformed(format!("{} response has no candidates", what)))?;

    let reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
    candidate
        .content
        .and_then(|c| c.parts.into_iter().next())
        .ok_or_else(|| {
            GenerationError::malformed(format!("{} response is empty. Finish reason: {}", what, reason))
        })
}

/// Text of the first part of the first candidate.
pub fn extract_text(value: &Value) -> GenerationResult<String> {
    let part = first_part(value, "text generation")?;
    match part.text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(GenerationError::malformed("text generation response has no text part")),
    }
}

fn strip_once(s: &str) -> &str {
    let s = s.trim();
    let Some(rest) = s.strip_prefix(FENCE) else {
        return s.strip_suffix(FENCE).unwrap_or(s).trim();
    };

    // Optional language tag directly after the opening fence.
    let tag_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')))
        .unwrap_or(rest.len());
    let tag = &rest[..tag_len];
    let after_tag = &rest[tag_len..];
    let rest = if tag_len > 0
        && (tag.eq_ignore_ascii_case("json") || after_tag.starts_with(['\n', '\r']))
    {
        after_tag
    } else {
        rest
    };

    rest.strip_suffix(FENCE).unwrap_or(rest).trim()
}

/// Removes a surrounding fenced code block (with or without a language tag)
/// and trims whitespace. Idempotent: repeats until nothing changes.
pub fn strip_code_blocks(s: &str) -> String {
    let mut current = s;
    loop {
        let next = strip_once(current);
        if next.len() == current.len() {
            return next.to_string();
        }
        current = next;
    }
}

/// Parses model text as JSON after stripping code fences.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> GenerationResult<T> {
    let clean = strip_code_blocks(text);
    serde_json::from_str(&clean).map_err(|e| {
        log::debug!("Unparseable model output: {}", clean);
        GenerationError::malformed(format!("model output is not the expected JSON: {}", e))
    })
}

fn decode_base64(data: &str, what: &str) -> GenerationResult<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| GenerationError::malformed(format!("{} payload is not valid base64: {}", what, e)))
}

/// Reads `rate=<digits>` from a MIME type such as `audio/L16;codec=pcm;rate=24000`.
/// Missing, zero or implausibly high rates fall back to 24 kHz.
pub fn parse_sample_rate(mime_type: &str) -> u32 {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|digits| digits.trim().parse::<u32>().ok())
        .filter(|rate| (1..=MAX_SAMPLE_RATE_HZ).contains(rate))
        .unwrap_or(DEFAULT_SAMPLE_RATE_HZ)
}

pub fn extract_speech(value: &Value) -> GenerationResult<SpeechPayload> {
    let part = first_part(value, "speech")?;
    let inline = part
        .inline_data
        .ok_or_else(|| GenerationError::malformed("speech response has no inline audio"))?;

    let mime_type = inline
        .mime_type
        .ok_or_else(|| GenerationError::malformed("speech response has no MIME type"))?;
    if !mime_type.starts_with("audio/") {
        return Err(GenerationError::malformed(format!(
            "speech response declares non-audio MIME type '{}'",
            mime_type
        )));
    }

    let data = inline
        .data
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| GenerationError::malformed("speech response has no audio data"))?;

    Ok(SpeechPayload {
        pcm: decode_base64(&data, "speech")?,
        sample_rate_hz: parse_sample_rate(&mime_type),
    })
}

pub fn extract_image(value: &Value) -> GenerationResult<ImagePayload> {
    let response: PredictResponse = serde_json::from_value(value.clone())
        .map_err(|e| GenerationError::malformed(format!("image response has unexpected shape: {}", e)))?;

    let prediction = response
        .predictions
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::malformed("image response has no predictions"))?;

    let data = prediction
        .bytes_base64
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| GenerationError::malformed("image response has no image data"))?;

    Ok(ImagePayload {
        bytes: decode_base64(&data, "image")?,
        mime_type: prediction
            .mime_type
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string()),
    })
}
