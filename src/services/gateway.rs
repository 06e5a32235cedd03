use crate::core::error::GenerationResult;
use crate::core::state::{AudioClip, ResearchedTopic, Thumbnail, VideoMetadata};
use async_trait::async_trait;
use std::fmt;

/// Preset synthesis voices exposed by the speech service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceProfile {
    /// Lower, firmer voice.
    Firm,
    /// Higher, upbeat voice.
    Upbeat,
}

impl VoiceProfile {
    pub const ALL: [VoiceProfile; 2] = [VoiceProfile::Firm, VoiceProfile::Upbeat];

    pub fn preset_name(self) -> &'static str {
        match self {
            VoiceProfile::Firm => "Kore",
            VoiceProfile::Upbeat => "Puck",
        }
    }
}

impl fmt::Display for VoiceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceProfile::Firm => write!(f, "Firm ({})", self.preset_name()),
            VoiceProfile::Upbeat => write!(f, "Upbeat ({})", self.preset_name()),
        }
    }
}

/// Typed operations against the remote generative service.
///
/// Every method fails with `TransientServiceFailure`, `RejectedRequest` or
/// `MalformedResponse`; callers handle all three the same way.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Up to 10 recent headlines for `query`, web-grounded.
    async fn research_topics(&self, query: &str) -> GenerationResult<Vec<ResearchedTopic>>;

    /// Up to 10 topic ideas, web-grounded.
    async fn suggest_topics(&self) -> GenerationResult<Vec<String>>;

    /// Narration text with the channel intro already prepended.
    async fn generate_script(&self, topic: &str, minutes: u32) -> GenerationResult<String>;

    async fn synthesize_voice(&self, script: &str, voice: VoiceProfile) -> GenerationResult<AudioClip>;

    async fn generate_metadata(&self, topic: &str, script: &str) -> GenerationResult<VideoMetadata>;

    async fn generate_thumbnail(&self, topic: &str) -> GenerationResult<Thumbnail>;
}

/// A gateway call described as data, so it can be issued without holding a
/// borrow of whoever asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationRequest {
    ResearchTopics { query: String },
    SuggestTopics,
    Script { topic: String, minutes: u32 },
    Voice { script: String, voice: VoiceProfile },
    Metadata { topic: String, script: String },
    Thumbnail { topic: String },
}

impl GenerationRequest {
    pub fn progress_label(&self) -> &'static str {
        match self {
            GenerationRequest::ResearchTopics { .. } => "Deep researching real-time news...",
            GenerationRequest::SuggestTopics => "Generating viral topics...",
            GenerationRequest::Script { .. } => "Generating your script...",
            GenerationRequest::Voice { .. } => "Generating AI voice...",
            GenerationRequest::Metadata { .. } => "Generating viral metadata...",
            GenerationRequest::Thumbnail { .. } => "Generating 1280x720 thumbnail...",
        }
    }

    /// Prefix for the error message when this call fails.
    pub fn failure_context(&self) -> &'static str {
        match self {
            GenerationRequest::ResearchTopics { .. } | GenerationRequest::SuggestTopics => {
                "Failed to fetch topics."
            }
            GenerationRequest::Script { .. } => "Failed to generate script.",
            GenerationRequest::Voice { .. } => "Failed to generate audio.",
            GenerationRequest::Metadata { .. } => "Failed to generate metadata.",
            GenerationRequest::Thumbnail { .. } => "Failed to generate thumbnail.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutput {
    Researched(Vec<ResearchedTopic>),
    Suggested(Vec<String>),
    Script(String),
    Voice(AudioClip),
    Metadata(VideoMetadata),
    Thumbnail(Thumbnail),
}

pub async fn dispatch(
    gateway: &dyn GenerationGateway,
    request: &GenerationRequest,
) -> GenerationResult<GenerationOutput> {
    let output = match request {
        GenerationRequest::ResearchTopics { query } => {
            GenerationOutput::Researched(gateway.research_topics(query).await?)
        }
        GenerationRequest::SuggestTopics => GenerationOutput::Suggested(gateway.suggest_topics().await?),
        GenerationRequest::Script { topic, minutes } => {
            GenerationOutput::Script(gateway.generate_script(topic, *minutes).await?)
        }
        GenerationRequest::Voice { script, voice } => {
            GenerationOutput::Voice(gateway.synthesize_voice(script, *voice).await?)
        }
        GenerationRequest::Metadata { topic, script } => {
            GenerationOutput::Metadata(gateway.generate_metadata(topic, script).await?)
        }
        GenerationRequest::Thumbnail { topic } => {
            GenerationOutput::Thumbnail(gateway.generate_thumbnail(topic).await?)
        }
    };
    Ok(output)
}
