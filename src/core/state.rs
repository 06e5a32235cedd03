use crate::core::error::{GenerationError, GenerationResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length presets offered on the script-length step, in minutes.
pub const PRESET_LENGTHS: [u32; 4] = [5, 10, 15, 20];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Step {
    #[default]
    Topic,
    TopicSelect,
    ScriptLength,
    ScriptReview,
    MetadataReview,
    Thumbnail,
}

impl Step {
    /// Target of the `back` edge, `None` on the first step.
    pub fn previous(self) -> Option<Step> {
        match self {
            Step::Topic => None,
            Step::TopicSelect => Some(Step::Topic),
            Step::ScriptLength => Some(Step::TopicSelect),
            Step::ScriptReview => Some(Step::ScriptLength),
            Step::MetadataReview => Some(Step::ScriptReview),
            Step::Thumbnail => Some(Step::MetadataReview),
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Step::Topic => "1. Find a Topic",
            Step::TopicSelect => "2. Select a Topic",
            Step::ScriptLength => "3. Set Script Length",
            Step::ScriptReview => "4. Review Script & Voice",
            Step::MetadataReview => "5. Review Metadata",
            Step::Thumbnail => "6. Thumbnail",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchedTopic {
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicCandidate {
    Suggested { text: String },
    Researched(ResearchedTopic),
}

impl TopicCandidate {
    pub fn title(&self) -> &str {
        match self {
            TopicCandidate::Suggested { text } => text,
            TopicCandidate::Researched(topic) => &topic.title,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLength {
    Minutes(u32),
    /// Length comes from the free-text custom field.
    Custom,
}

impl Default for ScriptLength {
    fn default() -> Self {
        ScriptLength::Minutes(PRESET_LENGTHS[0])
    }
}

/// Raw 16-bit little-endian mono PCM as returned by speech synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub pcm: Vec<u8>,
    pub sample_rate_hz: u32,
}

impl AudioClip {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        (self.pcm.len() / 2) as f64 / self.sample_rate_hz as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Space-separated, e.g. `#topic #viral #youtube`.
    #[serde(default)]
    pub hashtags: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// The single mutable session record owned by the workflow controller.
#[derive(Debug, Clone, Default)]
pub struct WorkflowState {
    pub step: Step,
    pub topic_query: String,
    pub candidates: Vec<TopicCandidate>,
    pub selected_topic: Option<String>,
    pub script_length: ScriptLength,
    pub custom_length: String,
    pub script: String,
    pub audio: Option<AudioClip>,
    pub metadata: Option<VideoMetadata>,
    pub thumbnail: Option<Thumbnail>,
    pub error_message: Option<String>,
    /// Progress label while a gateway call is outstanding.
    pub busy: Option<String>,
}

impl WorkflowState {
    pub fn is_busy(&self) -> bool {
        self.busy.is_some()
    }

    pub fn busy_label(&self) -> Option<&str> {
        self.busy.as_deref()
    }

    /// Resolves the chosen length to a positive number of minutes.
    pub fn resolve_length(&self) -> GenerationResult<u32> {
        match self.script_length {
            ScriptLength::Minutes(0) => Err(GenerationError::precondition(
                "Script length must be at least one minute.",
            )),
            ScriptLength::Minutes(n) => Ok(n),
            ScriptLength::Custom => {
                let raw = self.custom_length.trim();
                if raw.is_empty() {
                    return Err(GenerationError::precondition(
                        "Please enter a custom script length in minutes.",
                    ));
                }
                match raw.parse::<u32>() {
                    Ok(n) if n > 0 => Ok(n),
                    _ => Err(GenerationError::precondition(format!(
                        "'{}' is not a valid number of minutes.",
                        raw
                    ))),
                }
            }
        }
    }
}
