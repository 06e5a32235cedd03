use crate::core::error::{GenerationError, GenerationResult};
use crate::core::project::{Project, ProjectDraft, ProjectStore};
use crate::core::state::{ScriptLength, Step, TopicCandidate, WorkflowState};
use crate::services::gateway::{dispatch, GenerationGateway, GenerationOutput, GenerationRequest, VoiceProfile};
use log::{debug, info, warn};
use std::sync::Arc;

/// Identifies an outstanding gateway call by the step it was issued on and a
/// sequence number that never repeats within a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTag {
    pub step: Step,
    pub seq: u64,
}

/// A validated remote action waiting to be dispatched.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub tag: RequestTag,
    pub request: GenerationRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Result stored in the workflow state.
    Applied,
    /// Call failed; `error_message` describes why.
    Failed,
    /// The workflow moved on before the response arrived.
    Discarded,
}

/// Sequences the creation steps and owns the session's [`WorkflowState`].
///
/// Remote actions come in two phases: a `begin_*` method validates and marks
/// the state busy, returning a [`Ticket`]; the ticket is run with [`dispatch`]
/// and its outcome handed back to [`WorkflowController::settle`]. The async
/// convenience methods do all of that in one call.
pub struct WorkflowController {
    gateway: Arc<dyn GenerationGateway>,
    projects: Arc<ProjectStore>,
    state: WorkflowState,
    seq: u64,
    outstanding: Option<RequestTag>,
    metadata_requested: bool,
}

impl WorkflowController {
    pub fn new(gateway: Arc<dyn GenerationGateway>, projects: Arc<ProjectStore>) -> Self {
        Self {
            gateway,
            projects,
            state: WorkflowState::default(),
            seq: 0,
            outstanding: None,
            metadata_requested: false,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    fn fail<T>(&mut self, err: GenerationError) -> GenerationResult<T> {
        self.state.error_message = Some(err.user_message());
        Err(err)
    }

    fn require_step(&mut self, expected: Step, action: &str) -> GenerationResult<()> {
        if self.state.step == expected {
            Ok(())
        } else {
            let current = self.state.step;
            self.fail(GenerationError::precondition(format!(
                "'{}' is only available on step {}, not on {}.",
                action, expected, current
            )))
        }
    }

    fn require_idle(&mut self) -> GenerationResult<()> {
        if self.state.is_busy() {
            self.fail(GenerationError::precondition(
                "Please wait for the current request to finish.",
            ))
        } else {
            Ok(())
        }
    }

    fn transition(&mut self, to: Step) {
        info!("Workflow step: {} -> {}", self.state.step, to);
        self.state.step = to;
        self.state.error_message = None;
    }

    fn issue(&mut self, request: GenerationRequest) -> Ticket {
        self.seq += 1;
        let tag = RequestTag {
            step: self.state.step,
            seq: self.seq,
        };
        self.state.busy = Some(request.progress_label().to_string());
        self.state.error_message = None;
        self.outstanding = Some(tag);
        debug!("Issued request #{} on {}: {}", tag.seq, tag.step, request.progress_label());
        Ticket { tag, request }
    }

    fn begin(&mut self, step: Step, action: &str, request: GenerationRequest) -> GenerationResult<Ticket> {
        self.require_idle()?;
        self.require_step(step, action)?;
        Ok(self.issue(request))
    }

    fn selected_topic(&mut self) -> GenerationResult<String> {
        match self.state.selected_topic.clone() {
            Some(topic) if !topic.trim().is_empty() => Ok(topic),
            _ => self.fail(GenerationError::precondition("Please select a topic first.")),
        }
    }

    // --- Topic ---

    pub fn set_topic_query(&mut self, query: &str) -> GenerationResult<()> {
        self.require_step(Step::Topic, "Edit topic")?;
        self.state.topic_query = query.to_string();
        self.state.error_message = None;
        Ok(())
    }

    pub fn begin_research(&mut self) -> GenerationResult<Ticket> {
        self.require_idle()?;
        self.require_step(Step::Topic, "Research")?;
        let query = self.state.topic_query.trim().to_string();
        if query.is_empty() {
            return self.fail(GenerationError::precondition("Please enter a topic to research."));
        }
        Ok(self.issue(GenerationRequest::ResearchTopics { query }))
    }

    pub fn begin_suggest(&mut self) -> GenerationResult<Ticket> {
        self.begin(Step::Topic, "Suggest topics", GenerationRequest::SuggestTopics)
    }

    // --- TopicSelect ---

    pub fn select(&mut self, index: usize) -> GenerationResult<()> {
        self.require_step(Step::TopicSelect, "Select topic")?;
        let title = match self.state.candidates.get(index) {
            Some(candidate) => candidate.title().trim().to_string(),
            None => {
                let count = self.state.candidates.len();
                return self.fail(GenerationError::precondition(format!(
                    "There is no topic #{} (only {} available).",
                    index + 1,
                    count
                )));
            }
        };
        if title.is_empty() {
            return self.fail(GenerationError::precondition("That topic has no title."));
        }
        info!("Selected topic: {}", title);
        self.state.selected_topic = Some(title);
        self.transition(Step::ScriptLength);
        Ok(())
    }

    // --- ScriptLength ---

    pub fn set_length(&mut self, length: ScriptLength) -> GenerationResult<()> {
        self.require_step(Step::ScriptLength, "Set length")?;
        self.state.script_length = length;
        self.state.error_message = None;
        Ok(())
    }

    /// Switches to a custom length and stores the raw text; it is validated
    /// when the script is requested.
    pub fn set_custom_length(&mut self, text: &str) -> GenerationResult<()> {
        self.require_step(Step::ScriptLength, "Set length")?;
        self.state.script_length = ScriptLength::Custom;
        self.state.custom_length = text.to_string();
        self.state.error_message = None;
        Ok(())
    }

    pub fn begin_generate_script(&mut self) -> GenerationResult<Ticket> {
        self.require_idle()?;
        self.require_step(Step::ScriptLength, "Generate script")?;
        let topic = self.selected_topic()?;
        let minutes = match self.state.resolve_length() {
            Ok(minutes) => minutes,
            Err(e) => return self.fail(e),
        };
        Ok(self.issue(GenerationRequest::Script { topic, minutes }))
    }

    // --- ScriptReview ---

    /// Replaces the script with the user's edit. Allowed while busy.
    pub fn edit_script(&mut self, text: &str) -> GenerationResult<()> {
        self.require_step(Step::ScriptReview, "Edit script")?;
        self.state.script = text.to_string();
        self.state.error_message = None;
        Ok(())
    }

    pub fn begin_synthesize_voice(&mut self, voice: VoiceProfile) -> GenerationResult<Ticket> {
        self.require_idle()?;
        self.require_step(Step::ScriptReview, "Generate voice")?;
        if self.state.script.trim().is_empty() {
            return self.fail(GenerationError::precondition("There is no script to read."));
        }
        let script = self.state.script.clone();
        Ok(self.issue(GenerationRequest::Voice { script, voice }))
    }

    /// Moves on to metadata keeping any generated audio. Returns the automatic
    /// metadata request when this is the first entry of the workflow pass.
    pub fn begin_proceed(&mut self) -> GenerationResult<Option<Ticket>> {
        self.require_idle()?;
        self.require_step(Step::ScriptReview, "Proceed")?;
        self.transition(Step::MetadataReview);
        Ok(self.on_enter())
    }

    /// Like [`Self::begin_proceed`] but drops the audio first.
    pub fn begin_skip_voice(&mut self) -> GenerationResult<Option<Ticket>> {
        self.require_idle()?;
        self.require_step(Step::ScriptReview, "Skip voice")?;
        self.state.audio = None;
        self.transition(Step::MetadataReview);
        Ok(self.on_enter())
    }

    // --- MetadataReview ---

    fn metadata_request(&mut self) -> GenerationResult<GenerationRequest> {
        let topic = self.selected_topic()?;
        Ok(GenerationRequest::Metadata {
            topic,
            script: self.state.script.clone(),
        })
    }

    /// Step-entry hook. Issues the automatic metadata request at most once per
    /// workflow pass.
    fn on_enter(&mut self) -> Option<Ticket> {
        if self.state.step != Step::MetadataReview || self.metadata_requested || self.state.is_busy() {
            return None;
        }
        self.metadata_requested = true;
        match self.metadata_request() {
            Ok(request) => Some(self.issue(request)),
            Err(e) => {
                warn!("Automatic metadata generation skipped: {}", e);
                None
            }
        }
    }

    /// Re-runs the step-entry hook for a freshly built view. Never issues the
    /// automatic request a second time.
    pub fn begin_refresh(&mut self) -> Option<Ticket> {
        self.on_enter()
    }

    pub fn begin_regenerate_metadata(&mut self) -> GenerationResult<Ticket> {
        self.require_idle()?;
        self.require_step(Step::MetadataReview, "Regenerate metadata")?;
        let request = self.metadata_request()?;
        Ok(self.issue(request))
    }

    pub fn begin_generate_thumbnail(&mut self) -> GenerationResult<Ticket> {
        self.require_idle()?;
        self.require_step(Step::MetadataReview, "Generate thumbnail")?;
        if self.state.metadata.is_none() {
            return self.fail(GenerationError::precondition(
                "Generate the title and description before the thumbnail.",
            ));
        }
        let topic = self.selected_topic()?;
        Ok(self.issue(GenerationRequest::Thumbnail { topic }))
    }

    // --- Thumbnail ---

    pub fn begin_regenerate_thumbnail(&mut self) -> GenerationResult<Ticket> {
        self.require_idle()?;
        self.require_step(Step::Thumbnail, "Regenerate thumbnail")?;
        let topic = self.selected_topic()?;
        Ok(self.issue(GenerationRequest::Thumbnail { topic }))
    }

    /// Appends the finished project and starts a fresh workflow pass.
    pub async fn save(&mut self) -> GenerationResult<Project> {
        self.require_idle()?;
        self.require_step(Step::Thumbnail, "Save")?;
        let topic = self.selected_topic()?;
        let Some(metadata) = self.state.metadata.clone() else {
            return self.fail(GenerationError::precondition("There is no metadata to save."));
        };

        let draft = ProjectDraft {
            topic,
            title: metadata.title,
            description: metadata.description,
            hashtags: metadata.hashtags,
            script: self.state.script.clone(),
        };
        match self.projects.record(draft).await {
            Ok(project) => {
                self.reset();
                Ok(project)
            }
            Err(e) => self.fail(GenerationError::storage(e)),
        }
    }

    // --- Navigation ---

    fn abandon_outstanding(&mut self) {
        if let Some(tag) = self.outstanding.take() {
            info!("Abandoning request #{} issued on {}", tag.seq, tag.step);
        }
        self.state.busy = None;
    }

    /// Follows the `back` edge of the current step. An outstanding request is
    /// abandoned and its late response discarded.
    pub fn back(&mut self) -> GenerationResult<()> {
        let Some(previous) = self.state.step.previous() else {
            return self.fail(GenerationError::precondition("Already at the first step."));
        };
        self.abandon_outstanding();
        match previous {
            Step::Topic => self.state.candidates.clear(),
            Step::TopicSelect => self.state.selected_topic = None,
            _ => {}
        }
        self.transition(previous);
        Ok(())
    }

    /// Discards the whole session, including any outstanding request.
    pub fn abandon(&mut self) {
        self.abandon_outstanding();
        self.reset();
    }

    fn reset(&mut self) {
        info!("Workflow reset");
        self.state = WorkflowState::default();
        self.outstanding = None;
        self.metadata_requested = false;
    }

    // --- Settlement ---

    /// Applies the outcome of `ticket` if it is still the outstanding request
    /// for the current step.
    pub fn settle(&mut self, ticket: Ticket, outcome: GenerationResult<GenerationOutput>) -> Settlement {
        if self.outstanding != Some(ticket.tag) || self.state.step != ticket.tag.step {
            debug!(
                "Discarding stale response #{} issued on {} (now on {})",
                ticket.tag.seq, ticket.tag.step, self.state.step
            );
            return Settlement::Discarded;
        }
        self.outstanding = None;
        self.state.busy = None;

        match outcome.and_then(|output| self.apply(output)) {
            Ok(()) => {
                self.state.error_message = None;
                Settlement::Applied
            }
            Err(e) => {
                warn!("{} {}", ticket.request.failure_context(), e);
                self.state.error_message =
                    Some(format!("{} {}", ticket.request.failure_context(), e.user_message()));
                Settlement::Failed
            }
        }
    }

    fn apply(&mut self, output: GenerationOutput) -> GenerationResult<()> {
        match (self.state.step, output) {
            (Step::Topic, GenerationOutput::Researched(topics)) => {
                let candidates: Vec<TopicCandidate> =
                    topics.into_iter().map(TopicCandidate::Researched).collect();
                self.show_candidates(candidates)
            }
            (Step::Topic, GenerationOutput::Suggested(topics)) => {
                let candidates: Vec<TopicCandidate> = topics
                    .into_iter()
                    .map(|text| TopicCandidate::Suggested { text })
                    .collect();
                self.show_candidates(candidates)
            }
            (Step::ScriptLength, GenerationOutput::Script(script)) => {
                self.state.script = script;
                self.state.audio = None;
                self.transition(Step::ScriptReview);
                Ok(())
            }
            (Step::ScriptReview, GenerationOutput::Voice(clip)) => {
                info!("Voice ready: {:.1}s at {} Hz", clip.duration_secs(), clip.sample_rate_hz);
                self.state.audio = Some(clip);
                Ok(())
            }
            (Step::MetadataReview, GenerationOutput::Metadata(metadata)) => {
                self.state.metadata = Some(metadata);
                Ok(())
            }
            (Step::MetadataReview, GenerationOutput::Thumbnail(thumbnail)) => {
                self.state.thumbnail = Some(thumbnail);
                self.transition(Step::Thumbnail);
                Ok(())
            }
            (Step::Thumbnail, GenerationOutput::Thumbnail(thumbnail)) => {
                self.state.thumbnail = Some(thumbnail);
                Ok(())
            }
            (step, output) => Err(GenerationError::malformed(format!(
                "unexpected {:?} result on step {}",
                std::mem::discriminant(&output),
                step
            ))),
        }
    }

    fn show_candidates(&mut self, candidates: Vec<TopicCandidate>) -> GenerationResult<()> {
        if candidates.is_empty() {
            return Err(GenerationError::malformed("no topics returned"));
        }
        self.state.candidates = candidates;
        self.state.selected_topic = None;
        self.transition(Step::TopicSelect);
        Ok(())
    }

    // --- One-call variants ---

    /// Dispatches `ticket` and settles it.
    pub async fn run(&mut self, ticket: Ticket) -> Settlement {
        let gateway = self.gateway.clone();
        let outcome = dispatch(gateway.as_ref(), &ticket.request).await;
        self.settle(ticket, outcome)
    }

    async fn run_optional(&mut self, ticket: Option<Ticket>) -> Settlement {
        match ticket {
            Some(ticket) => self.run(ticket).await,
            None => Settlement::Applied,
        }
    }

    pub async fn research(&mut self) -> GenerationResult<Settlement> {
        let ticket = self.begin_research()?;
        Ok(self.run(ticket).await)
    }

    pub async fn suggest(&mut self) -> GenerationResult<Settlement> {
        let ticket = self.begin_suggest()?;
        Ok(self.run(ticket).await)
    }

    pub async fn generate_script(&mut self) -> GenerationResult<Settlement> {
        let ticket = self.begin_generate_script()?;
        Ok(self.run(ticket).await)
    }

    pub async fn synthesize_voice(&mut self, voice: VoiceProfile) -> GenerationResult<Settlement> {
        let ticket = self.begin_synthesize_voice(voice)?;
        Ok(self.run(ticket).await)
    }

    pub async fn proceed(&mut self) -> GenerationResult<Settlement> {
        let ticket = self.begin_proceed()?;
        Ok(self.run_optional(ticket).await)
    }

    pub async fn skip_voice(&mut self) -> GenerationResult<Settlement> {
        let ticket = self.begin_skip_voice()?;
        Ok(self.run_optional(ticket).await)
    }

    pub async fn refresh(&mut self) -> Settlement {
        let ticket = self.begin_refresh();
        self.run_optional(ticket).await
    }

    pub async fn regenerate_metadata(&mut self) -> GenerationResult<Settlement> {
        let ticket = self.begin_regenerate_metadata()?;
        Ok(self.run(ticket).await)
    }

    pub async fn generate_thumbnail(&mut self) -> GenerationResult<Settlement> {
        let ticket = self.begin_generate_thumbnail()?;
        Ok(self.run(ticket).await)
    }

    pub async fn regenerate_thumbnail(&mut self) -> GenerationResult<Settlement> {
        let ticket = self.begin_regenerate_thumbnail()?;
        Ok(self.run(ticket).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GeminiConfig;
    use crate::core::io::{NativeStorage, Storage};
    use crate::core::state::ResearchedTopic;
    use crate::services::gateway::tests::MockGateway;
    use crate::services::gemini::{GeminiGateway, CHANNEL_INTRO};
    use crate::services::http::tests::{status, ScriptedTransport};
    use crate::services::http::RetryPolicy;
    use anyhow::Result;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;

    fn store(dir: &Path) -> Arc<ProjectStore> {
        Arc::new(ProjectStore::new(Arc::new(NativeStorage::new(dir))))
    }

    fn controller(mock: &MockGateway, dir: &Path) -> WorkflowController {
        WorkflowController::new(Arc::new(mock.clone()), store(dir))
    }

    fn headlines(n: usize) -> Vec<ResearchedTopic> {
        (1..=n)
            .map(|i| ResearchedTopic {
                title: format!("Headline {}", i),
                snippet: format!("Snippet {}", i),
                source_url: format!("https://news.test/{}", i),
            })
            .collect()
    }

    /// Drives a fresh workflow all the way to the Thumbnail step.
    async fn walk_to_thumbnail(wf: &mut WorkflowController) {
        wf.suggest().await.unwrap();
        wf.select(0).unwrap();
        wf.set_length(ScriptLength::Minutes(10)).unwrap();
        assert_eq!(wf.generate_script().await.unwrap(), Settlement::Applied);
        assert_eq!(wf.proceed().await.unwrap(), Settlement::Applied);
        assert_eq!(wf.generate_thumbnail().await.unwrap(), Settlement::Applied);
        assert_eq!(wf.state().step, Step::Thumbnail);
    }

    #[tokio::test]
    async fn test_suggest_lands_in_topic_select() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());

        assert_eq!(wf.suggest().await?, Settlement::Applied);
        assert_eq!(wf.state().step, Step::TopicSelect);
        assert!(!wf.state().candidates.is_empty());
        assert!(!wf.state().is_busy());
        assert_eq!(wf.state().selected_topic, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_research_requires_query() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());

        wf.set_topic_query("   ")?;
        assert_matches!(wf.research().await, Err(GenerationError::PreconditionViolation(_)));
        assert_eq!(mock.count("research_topics"), 0);
        assert_eq!(
            wf.state().error_message.as_deref(),
            Some("Please enter a topic to research.")
        );
        assert_eq!(wf.state().step, Step::Topic);
        Ok(())
    }

    #[tokio::test]
    async fn test_research_then_select_third_item() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        *mock.researched.lock().unwrap() = headlines(10);
        let mut wf = controller(&mock, temp_dir.path());

        wf.set_topic_query("Karnataka election results")?;
        assert_eq!(wf.research().await?, Settlement::Applied);
        assert_eq!(wf.state().candidates.len(), 10);
        assert!(mock
            .last_args
            .lock()
            .unwrap()
            .contains(&"Karnataka election results".to_string()));

        wf.select(2)?;
        assert_eq!(wf.state().selected_topic.as_deref(), Some("Headline 3"));
        assert_eq!(wf.state().step, Step::ScriptLength);
        Ok(())
    }

    #[tokio::test]
    async fn test_select_out_of_range_is_rejected() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;

        assert_matches!(wf.select(99), Err(GenerationError::PreconditionViolation(_)));
        assert_eq!(wf.state().step, Step::TopicSelect);
        assert!(wf.state().error_message.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_custom_length_never_reaches_gateway() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;
        wf.select(0)?;

        wf.set_custom_length("")?;
        assert_matches!(
            wf.generate_script().await,
            Err(GenerationError::PreconditionViolation(_))
        );
        assert_eq!(mock.count("generate_script"), 0);
        assert_eq!(wf.state().step, Step::ScriptLength);
        assert!(!wf.state().is_busy());

        wf.set_custom_length("7")?;
        assert_eq!(wf.generate_script().await?, Settlement::Applied);
        assert!(mock.last_args.lock().unwrap().contains(&"7".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_successful_local_edit_clears_error() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;
        wf.select(0)?;

        wf.set_custom_length("abc")?;
        assert_matches!(
            wf.generate_script().await,
            Err(GenerationError::PreconditionViolation(_))
        );
        assert!(wf.state().error_message.is_some());

        wf.set_custom_length("7")?;
        assert_eq!(wf.state().error_message, None);

        wf.abandon();
        wf.set_topic_query("")?;
        assert_matches!(wf.research().await, Err(GenerationError::PreconditionViolation(_)));
        wf.set_topic_query("Monsoon")?;
        assert_eq!(wf.state().error_message, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_script_is_stored_with_channel_intro() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let reply = |text: &str| {
            let body = json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] });
            status(200, &body.to_string())
        };
        let transport = ScriptedTransport::new(vec![reply("[\"Tides\"]"), reply("Today we explore...")]);
        let gateway = GeminiGateway::new(&GeminiConfig::default(), "k", transport, RetryPolicy::immediate(1))?;
        let mut wf = WorkflowController::new(Arc::new(gateway), store(temp_dir.path()));

        wf.suggest().await?;
        wf.select(0)?;
        wf.set_length(ScriptLength::Minutes(5))?;
        assert_eq!(wf.generate_script().await?, Settlement::Applied);

        assert_eq!(wf.state().step, Step::ScriptReview);
        assert_eq!(wf.state().script, format!("{}Today we explore...", CHANNEL_INTRO));
        Ok(())
    }

    #[tokio::test]
    async fn test_metadata_auto_generation_fires_once() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;
        wf.select(1)?;
        wf.generate_script().await?;

        assert_eq!(wf.proceed().await?, Settlement::Applied);
        assert_eq!(wf.state().step, Step::MetadataReview);
        assert_eq!(mock.count("generate_metadata"), 1);
        assert!(wf.state().metadata.is_some());

        // The view is rebuilt twice while staying on the step.
        assert_eq!(wf.refresh().await, Settlement::Applied);
        assert_eq!(wf.refresh().await, Settlement::Applied);
        assert_eq!(mock.count("generate_metadata"), 1);

        // Leaving and re-entering within the same pass does not fire again.
        wf.back()?;
        wf.proceed().await?;
        assert_eq!(mock.count("generate_metadata"), 1);

        // Manual regeneration is explicit.
        wf.regenerate_metadata().await?;
        assert_eq!(mock.count("generate_metadata"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_guard_resets_after_abandon() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;
        wf.select(0)?;
        wf.generate_script().await?;
        wf.proceed().await?;

        wf.abandon();
        assert_eq!(wf.state().step, Step::Topic);
        assert!(wf.state().script.is_empty());

        wf.suggest().await?;
        wf.select(0)?;
        wf.generate_script().await?;
        wf.skip_voice().await?;
        assert_eq!(mock.count("generate_metadata"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_skip_clears_audio_and_proceed_keeps_it() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;
        wf.select(0)?;
        wf.generate_script().await?;

        wf.synthesize_voice(VoiceProfile::Upbeat).await?;
        assert!(wf.state().audio.is_some());
        assert_eq!(wf.state().step, Step::ScriptReview);

        wf.proceed().await?;
        assert!(wf.state().audio.is_some());

        wf.back()?;
        wf.skip_voice().await?;
        assert!(wf.state().audio.is_none());
        assert_eq!(wf.state().step, Step::MetadataReview);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_twice_creates_distinct_projects() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());

        walk_to_thumbnail(&mut wf).await;
        let first = wf.save().await?;
        assert_eq!(wf.state().step, Step::Topic);
        assert!(wf.state().metadata.is_none());
        assert!(wf.state().thumbnail.is_none());

        walk_to_thumbnail(&mut wf).await;
        let second = wf.save().await?;

        assert_ne!(first.id, second.id);
        assert!(second.created_at > first.created_at);
        assert_eq!(first.title, "AI in classrooms explained");

        let all = store(temp_dir.path()).list_all().await?;
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|p| p.id == first.id));
        assert!(all.iter().any(|p| p.id == second.id));
        Ok(())
    }

    /// Reads from disk but refuses every write.
    struct ReadOnlyStorage(NativeStorage);

    #[async_trait]
    impl Storage for ReadOnlyStorage {
        async fn read(&self, key: &str) -> Result<Vec<u8>> {
            self.0.read(key).await
        }

        async fn write(&self, key: &str, _content: &[u8]) -> Result<()> {
            Err(anyhow::anyhow!("{} is read-only", key))
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.0.exists(key).await
        }
    }

    #[tokio::test]
    async fn test_failed_save_keeps_workflow_state() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let projects = Arc::new(ProjectStore::new(Arc::new(ReadOnlyStorage(NativeStorage::new(
            temp_dir.path(),
        )))));
        let mut wf = WorkflowController::new(Arc::new(mock.clone()), projects.clone());

        walk_to_thumbnail(&mut wf).await;
        assert_matches!(wf.save().await, Err(GenerationError::Storage(_)));

        assert_eq!(wf.state().step, Step::Thumbnail);
        assert!(wf.state().error_message.is_some());
        assert!(!wf.state().is_busy());
        assert_eq!(wf.state().selected_topic.as_deref(), Some("AI in classrooms"));
        assert!(wf.state().metadata.is_some());
        assert!(wf.state().thumbnail.is_some());
        assert!(!wf.state().script.is_empty());
        assert!(projects.list_all().await?.is_empty());
        assert!(!temp_dir.path().join("projects.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_only_from_thumbnail_step() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;

        assert_matches!(wf.save().await, Err(GenerationError::PreconditionViolation(_)));
        assert!(store(temp_dir.path()).list_all().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_keeps_step_and_sets_error() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;
        wf.select(0)?;

        mock.fail_next_calls(|| GenerationError::TransientServiceFailure {
            attempts: 5,
            reason: "HTTP 503".to_string(),
        });
        assert_eq!(wf.generate_script().await?, Settlement::Failed);
        assert_eq!(wf.state().step, Step::ScriptLength);
        assert!(wf.state().script.is_empty());
        assert!(!wf.state().is_busy());
        let message = wf.state().error_message.clone().unwrap_or_default();
        assert!(message.starts_with("Failed to generate script."));

        mock.recover();
        assert_eq!(wf.generate_script().await?, Settlement::Applied);
        assert_eq!(wf.state().error_message, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_candidate_list_is_a_failure() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());

        wf.set_topic_query("Nothing happens")?;
        assert_eq!(wf.research().await?, Settlement::Failed);
        assert_eq!(wf.state().step, Step::Topic);
        assert!(wf.state().candidates.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_auto_metadata_blocks_thumbnail_until_regenerated() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;
        wf.select(0)?;
        wf.generate_script().await?;

        mock.fail_next_calls(|| GenerationError::malformed("not json"));
        assert_eq!(wf.proceed().await?, Settlement::Failed);
        assert_eq!(wf.state().step, Step::MetadataReview);
        assert!(wf.state().metadata.is_none());
        assert!(wf
            .state()
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("unexpected format"));

        mock.recover();
        assert_matches!(
            wf.generate_thumbnail().await,
            Err(GenerationError::PreconditionViolation(_))
        );
        wf.regenerate_metadata().await?;
        assert_eq!(wf.generate_thumbnail().await?, Settlement::Applied);
        Ok(())
    }

    #[tokio::test]
    async fn test_busy_rejects_second_remote_action() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());

        let ticket = wf.begin_suggest()?;
        assert_eq!(wf.state().busy_label(), Some("Generating viral topics..."));

        wf.set_topic_query("Second request")?;
        assert_matches!(wf.begin_research(), Err(GenerationError::PreconditionViolation(_)));
        assert!(wf.state().is_busy());
        assert!(wf.state().error_message.is_some());

        let outcome = dispatch(&mock, &ticket.request).await;
        assert_eq!(wf.settle(ticket, outcome), Settlement::Applied);
        assert_eq!(wf.state().step, Step::TopicSelect);
        assert_eq!(wf.state().error_message, None);
        assert_eq!(mock.count("research_topics"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_local_edits_allowed_while_busy() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;
        wf.select(0)?;
        wf.generate_script().await?;

        let ticket = wf.begin_synthesize_voice(VoiceProfile::Firm)?;
        wf.edit_script("My own words")?;
        assert_eq!(wf.state().script, "My own words");
        assert_matches!(wf.begin_proceed(), Err(GenerationError::PreconditionViolation(_)));

        let outcome = dispatch(&mock, &ticket.request).await;
        assert_eq!(wf.settle(ticket, outcome), Settlement::Applied);
        assert!(wf.state().audio.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_response_after_back_is_discarded() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;
        wf.select(0)?;

        let ticket = wf.begin_generate_script()?;
        wf.back()?;
        assert_eq!(wf.state().step, Step::TopicSelect);
        assert!(!wf.state().is_busy());

        let outcome = dispatch(&mock, &ticket.request).await;
        assert_eq!(wf.settle(ticket, outcome), Settlement::Discarded);
        assert!(wf.state().script.is_empty());
        assert_eq!(wf.state().step, Step::TopicSelect);
        Ok(())
    }

    #[tokio::test]
    async fn test_superseded_ticket_is_discarded() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        wf.suggest().await?;
        wf.select(0)?;

        // Same step, new sequence number.
        let stale = wf.begin_generate_script()?;
        wf.back()?;
        wf.select(0)?;
        let fresh = wf.begin_generate_script()?;
        assert_eq!(stale.tag.step, fresh.tag.step);
        assert!(fresh.tag.seq > stale.tag.seq);

        let outcome = dispatch(&mock, &stale.request).await;
        assert_eq!(wf.settle(stale, outcome), Settlement::Discarded);
        assert!(wf.state().is_busy());

        let outcome = dispatch(&mock, &fresh.request).await;
        assert_eq!(wf.settle(fresh, outcome), Settlement::Applied);
        assert_eq!(wf.state().step, Step::ScriptReview);
        Ok(())
    }

    #[tokio::test]
    async fn test_back_edges_clear_step_data() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());

        assert_matches!(wf.back(), Err(GenerationError::PreconditionViolation(_)));

        wf.suggest().await?;
        wf.select(0)?;
        wf.back()?;
        assert_eq!(wf.state().step, Step::TopicSelect);
        assert_eq!(wf.state().selected_topic, None);
        assert!(!wf.state().candidates.is_empty());

        wf.back()?;
        assert_eq!(wf.state().step, Step::Topic);
        assert!(wf.state().candidates.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_actions_on_wrong_step_are_rejected() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());

        assert_matches!(wf.select(0), Err(GenerationError::PreconditionViolation(_)));
        assert_matches!(wf.edit_script("x"), Err(GenerationError::PreconditionViolation(_)));
        assert_matches!(
            wf.regenerate_thumbnail().await,
            Err(GenerationError::PreconditionViolation(_))
        );
        assert_eq!(wf.state().step, Step::Topic);
        assert!(!wf.state().is_busy());
        Ok(())
    }

    #[tokio::test]
    async fn test_thumbnail_regeneration_replaces_image() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mock = MockGateway::new();
        let mut wf = controller(&mock, temp_dir.path());
        walk_to_thumbnail(&mut wf).await;

        assert_eq!(wf.regenerate_thumbnail().await?, Settlement::Applied);
        assert_eq!(wf.regenerate_thumbnail().await?, Settlement::Applied);
        assert_eq!(mock.count("generate_thumbnail"), 3);
        assert_eq!(wf.state().step, Step::Thumbnail);
        assert!(wf.state().thumbnail.is_some());
        Ok(())
    }
}
