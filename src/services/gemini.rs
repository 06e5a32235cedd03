use crate::core::config::{Config, GeminiConfig};
use crate::core::error::{GenerationError, GenerationResult};
use crate::core::state::{AudioClip, ResearchedTopic, Thumbnail, VideoMetadata};
use crate::services::gateway::{GenerationGateway, VoiceProfile};
use crate::services::http::{ReqwestTransport, RequestClient, RetryPolicy, Transport};
use crate::services::normalize::{decode_json, extract_image, extract_speech, extract_text};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

/// Spoken before every generated script.
pub const CHANNEL_INTRO: &str = "Welcome Back to Edu Star Youtube channel and If you are first time to our channel Dont forgot to subscribe to our chanel done misss updates and lets start todays video...now today we are talking aboutt... ";

pub const WATERMARK: &str = "EDUSTAR";
pub const MAX_TOPICS: usize = 10;
pub const METADATA_EXCERPT_CHARS: usize = 800;

const SUGGEST_SYSTEM: &str = "You are a YouTube viral topic expert. Suggest the top 10 most viral-potential YouTube video topics *right now*. Respond with ONLY a valid JSON array of strings. Do not include any other text.";
const SUGGEST_USER: &str = "Suggest top 10 viral topics.";
const RESEARCH_SYSTEM: &str = "You are a real-time news aggregation bot. The user has provided a topic. Perform a deep Google Search of official portals and news sites to find the TOP 10 *most recent* and *verifiable* breaking news articles. Respond with ONLY a valid JSON array of objects. Each object must have three keys: 'title' (the exact news headline), 'snippet' (a short, 1-2 sentence summary), and 'source_url' (the direct URL to the article for proof). Example: [{\"title\": \"...\", \"snippet\": \"...\", \"source_url\": \"...\"}]";
const SCRIPT_SYSTEM: &str = "You are a professional YouTube scriptwriter. You write clean, engaging, and concise scripts. The output must be *only* the script text itself, with no timings, 'intro:', 'outro:', speaker names, or any other metadata. Just the spoken words for the voiceover.";
const METADATA_SYSTEM: &str = "You are a YouTube SEO expert, specialized in creating viral titles, descriptions, and hashtags. Respond *only* with a valid JSON object with keys: 'title' (string), 'description' (string), 'hashtags' (string). The 'hashtags' value should be a single string of 10+ space-separated hashtags (e.g., '#topic #viral #youtube').";

// --- Request shapes ---

#[derive(Serialize)]
struct TextPart {
    text: String,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

impl Content {
    fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TextPart { text: text.into() }],
        }
    }
}

#[derive(Serialize)]
struct GoogleSearch {}

#[derive(Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct PredictInstance {
    prompt: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
}

#[derive(Serialize)]
struct PredictRequest {
    instances: Vec<PredictInstance>,
    parameters: PredictParameters,
}

// --- Loose model output shapes ---

#[derive(Deserialize)]
#[serde(untagged)]
enum SuggestionItem {
    Text(String),
    Titled { title: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Hashtags {
    Joined(String),
    List(Vec<String>),
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    hashtags: Option<Hashtags>,
}

/// First `max_chars` characters of `script`, never splitting a character.
pub fn script_excerpt(script: &str, max_chars: usize) -> &str {
    match script.char_indices().nth(max_chars) {
        Some((idx, _)) => &script[..idx],
        None => script,
    }
}

pub fn thumbnail_prompt(topic: &str) -> String {
    format!(
        "Create a realistic, 4K HD, professional YouTube thumbnail for the selected topic (\"{topic}\").\n\
         The final dimension must be exactly 1280x720 pixels (16:9 aspect ratio).\n\
         It MUST include the text \"{wm}\" as a small, clean logo or watermark.\n\
         It must feature compelling, high-quality, realistic, viral-themed imagery related to the topic.\n\
         It is forbidden to add any other text besides \"{wm}\".",
        topic = topic,
        wm = WATERMARK
    )
}

fn endpoint(base: &Url, model: &str, method: &str, api_key: &str) -> Result<String> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("Base URL {} cannot carry a path", base))?
        .pop_if_empty()
        .push("models")
        .push(&format!("{}:{}", model, method));
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url.into())
}

/// Gemini-backed gateway: text and speech via `generateContent`, images via
/// Imagen `predict`.
pub struct GeminiGateway<T: Transport> {
    client: RequestClient<T>,
    text_url: String,
    tts_url: String,
    image_url: String,
}

impl GeminiGateway<ReqwestTransport> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?;
        let transport = ReqwestTransport::new(config.retry.request_timeout())
            .context("Failed to build HTTP client")?;
        Self::new(&config.gemini, api_key, transport, RetryPolicy::from(&config.retry))
    }
}

impl<T: Transport> GeminiGateway<T> {
    pub fn new(config: &GeminiConfig, api_key: &str, transport: T, policy: RetryPolicy) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid Gemini base URL: {}", config.base_url))?;
        Ok(Self {
            client: RequestClient::new(transport, policy),
            text_url: endpoint(&base, &config.text_model, "generateContent", api_key)?,
            tts_url: endpoint(&base, &config.tts_model, "generateContent", api_key)?,
            image_url: endpoint(&base, &config.image_model, "predict", api_key)?,
        })
    }

    async fn generate_text(&self, user: &str, system: &str, grounded: bool) -> GenerationResult<String> {
        let request = GenerateContentRequest {
            contents: vec![Content::text(user)],
            system_instruction: Some(Content::text(system)),
            tools: if grounded {
                vec![Tool {
                    google_search: GoogleSearch {},
                }]
            } else {
                Vec::new()
            },
            generation_config: None,
        };
        let response = self.client.send(&self.text_url, &json!(request)).await?;
        extract_text(&response)
    }
}

#[async_trait]
impl<T: Transport> GenerationGateway for GeminiGateway<T> {
    async fn research_topics(&self, query: &str) -> GenerationResult<Vec<ResearchedTopic>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(GenerationError::precondition("Please enter a topic to research."));
        }
        let user = format!(
            "Research \"{}\" and find 10 real-time news headlines with source URLs.",
            query
        );
        let text = self.generate_text(&user, RESEARCH_SYSTEM, true).await?;

        let topics: Vec<ResearchedTopic> = decode_json::<Vec<ResearchedTopic>>(&text)?
            .into_iter()
            .filter(|t| !t.title.trim().is_empty())
            .take(MAX_TOPICS)
            .collect();
        if topics.is_empty() {
            return Err(GenerationError::malformed("research returned no topics"));
        }
        log::info!("Research for '{}' returned {} topic(s)", query, topics.len());
        Ok(topics)
    }

    async fn suggest_topics(&self) -> GenerationResult<Vec<String>> {
        let text = self.generate_text(SUGGEST_USER, SUGGEST_SYSTEM, true).await?;

        let topics: Vec<String> = decode_json::<Vec<SuggestionItem>>(&text)?
            .into_iter()
            .map(|item| match item {
                SuggestionItem::Text(text) => text,
                SuggestionItem::Titled { title } => title,
            })
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .take(MAX_TOPICS)
            .collect();
        if topics.is_empty() {
            return Err(GenerationError::malformed("suggestions list is empty"));
        }
        Ok(topics)
    }

    async fn generate_script(&self, topic: &str, minutes: u32) -> GenerationResult<String> {
        let user = format!(
            "Write a {}-minute YouTube video script about \"{}\". Start the script *immediately* with the main content. Do not add any intro, greeting, or channel plugs. Just the main script body.",
            minutes, topic
        );
        let body = self.generate_text(&user, SCRIPT_SYSTEM, false).await?;
        Ok(format!("{}{}", CHANNEL_INTRO, body))
    }

    async fn synthesize_voice(&self, script: &str, voice: VoiceProfile) -> GenerationResult<AudioClip> {
        if script.trim().is_empty() {
            return Err(GenerationError::precondition("There is no script to read."));
        }
        let request = GenerateContentRequest {
            contents: vec![Content::text(script)],
            system_instruction: None,
            tools: Vec::new(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.preset_name().to_string(),
                        },
                    },
                },
            }),
        };
        let response = self.client.send(&self.tts_url, &json!(request)).await?;
        let speech = extract_speech(&response)?;
        Ok(AudioClip {
            pcm: speech.pcm,
            sample_rate_hz: speech.sample_rate_hz,
        })
    }

    async fn generate_metadata(&self, topic: &str, script: &str) -> GenerationResult<VideoMetadata> {
        let user = format!(
            "Generate a viral YouTube title, a compelling description, and 10+ high-traffic hashtags for a video about \"{}\". Use this script summary: \"{}...\"",
            topic,
            script_excerpt(script, METADATA_EXCERPT_CHARS)
        );
        let text = self.generate_text(&user, METADATA_SYSTEM, true).await?;

        let value: Value = decode_json(&text)?;
        if !value.is_object() {
            return Err(GenerationError::malformed("metadata is not a JSON object"));
        }
        let raw: RawMetadata = serde_json::from_value(value)
            .map_err(|e| GenerationError::malformed(format!("metadata fields have unexpected types: {}", e)))?;
        Ok(VideoMetadata {
            title: raw.title.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            hashtags: match raw.hashtags {
                Some(Hashtags::Joined(tags)) => tags,
                Some(Hashtags::List(tags)) => tags.join(" "),
                None => String::new(),
            },
        })
    }

    async fn generate_thumbnail(&self, topic: &str) -> GenerationResult<Thumbnail> {
        let request = PredictRequest {
            instances: vec![PredictInstance {
                prompt: thumbnail_prompt(topic),
            }],
            parameters: PredictParameters { sample_count: 1 },
        };
        let response = self.client.send(&self.image_url, &json!(request)).await?;
        let image = extract_image(&response)?;
        Ok(Thumbnail {
            bytes: image.bytes,
            mime_type: image.mime_type,
        })
    }
}
