use anyhow::Result;
use cscreate::core::config::Config;
use cscreate::core::error::GenerationResult;
use cscreate::core::io::{NativeStorage, Storage};
use cscreate::core::project::ProjectStore;
use cscreate::core::state::{ScriptLength, Step, TopicCandidate, PRESET_LENGTHS};
use cscreate::core::theme::{Theme, ThemeSetting};
use cscreate::services::gateway::VoiceProfile;
use cscreate::services::gemini::GeminiGateway;
use cscreate::services::workflow::{Ticket, WorkflowController};
use cscreate::utils::audio::{export_audio, export_thumbnail};
use inquire::ui::RenderConfig;
use inquire::{Password, Select, Text};
use std::sync::Arc;

const BACK: &str = "<- Back";
const ABANDON: &str = "Abandon project";

fn apply_theme(theme: Theme) {
    let render = match theme {
        Theme::Light => RenderConfig::default(),
        Theme::Dark => RenderConfig::default_colored(),
    };
    inquire::set_global_render_config(render);
}

async fn run_ticket(wf: &mut WorkflowController, begun: GenerationResult<Ticket>) {
    if let Ok(ticket) = begun {
        if let Some(label) = wf.state().busy_label() {
            println!("... {}", label);
        }
        wf.run(ticket).await;
    }
}

async fn run_optional(wf: &mut WorkflowController, begun: GenerationResult<Option<Ticket>>) {
    if let Ok(Some(ticket)) = begun {
        run_ticket(wf, Ok(ticket)).await;
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

fn candidate_label(candidate: &TopicCandidate) -> String {
    match candidate {
        TopicCandidate::Suggested { text } => text.clone(),
        TopicCandidate::Researched(topic) if topic.source_url.is_empty() => topic.title.clone(),
        TopicCandidate::Researched(topic) => format!("{}  [{}]", topic.title, topic.source_url),
    }
}

/// One pass through the creation steps. Returns when the project is saved or
/// abandoned.
async fn run_creation(wf: &mut WorkflowController, output: &NativeStorage) -> Result<()> {
    loop {
        let state = wf.state();
        println!("\n== {} ==", state.step);
        if let Some(err) = &state.error_message {
            eprintln!("! {}", err);
        }

        match state.step {
            Step::Topic => {
                let choice = Select::new(
                    "How do you want to find a topic?",
                    vec!["Research a topic", "Suggest viral topics", ABANDON],
                )
                .prompt()?;
                match choice {
                    "Research a topic" => {
                        let query = Text::new("Topic to research:")
                            .with_initial_value(&wf.state().topic_query)
                            .prompt()?;
                        if wf.set_topic_query(&query).is_ok() {
                            let begun = wf.begin_research();
                            run_ticket(wf, begun).await;
                        }
                    }
                    "Suggest viral topics" => {
                        let begun = wf.begin_suggest();
                        run_ticket(wf, begun).await;
                    }
                    _ => {
                        wf.abandon();
                        return Ok(());
                    }
                }
            }
            Step::TopicSelect => {
                let mut options: Vec<String> = state.candidates.iter().map(candidate_label).collect();
                let topic_count = options.len();
                options.push(BACK.to_string());
                let picked = Select::new("Pick a topic:", options).raw_prompt()?;
                if picked.index < topic_count {
                    let _ = wf.select(picked.index);
                } else {
                    let _ = wf.back();
                }
            }
            Step::ScriptLength => {
                let current = match state.script_length {
                    ScriptLength::Minutes(n) => format!("{} minutes", n),
                    ScriptLength::Custom => format!("custom: '{}'", state.custom_length),
                };
                println!("Topic: {}", state.selected_topic.as_deref().unwrap_or_default());
                println!("Length: {}", current);

                let mut options: Vec<String> = PRESET_LENGTHS.iter().map(|n| format!("{} minutes", n)).collect();
                options.extend(
                    ["Custom length", "Generate script", BACK, ABANDON]
                        .iter()
                        .map(|s| s.to_string()),
                );
                let picked = Select::new("Script length:", options).raw_prompt()?;
                match picked.value.as_str() {
                    "Custom length" => {
                        let text = Text::new("Length in minutes:").prompt()?;
                        let _ = wf.set_custom_length(&text);
                    }
                    "Generate script" => {
                        let begun = wf.begin_generate_script();
                        run_ticket(wf, begun).await;
                    }
                    BACK => {
                        let _ = wf.back();
                    }
                    ABANDON => {
                        wf.abandon();
                        return Ok(());
                    }
                    _ => {
                        if let Some(&minutes) = PRESET_LENGTHS.get(picked.index) {
                            let _ = wf.set_length(ScriptLength::Minutes(minutes));
                        }
                    }
                }
            }
            Step::ScriptReview => {
                println!("{}", preview(&state.script, 600));
                if let Some(audio) = &state.audio {
                    println!("Voice ready ({:.1}s)", audio.duration_secs());
                }
                let has_audio = state.audio.is_some();

                let mut options = vec!["Edit script".to_string()];
                options.extend(VoiceProfile::ALL.iter().map(|v| format!("Generate voice: {}", v)));
                if has_audio {
                    options.push("Export audio".to_string());
                    options.push("Proceed to metadata".to_string());
                }
                options.extend(
                    ["Skip voice & generate metadata", BACK, ABANDON]
                        .iter()
                        .map(|s| s.to_string()),
                );
                let picked = Select::new("Script:", options).raw_prompt()?;
                match picked.value.as_str() {
                    "Edit script" => {
                        let text = Text::new("Script:")
                            .with_initial_value(&wf.state().script)
                            .prompt()?;
                        let _ = wf.edit_script(&text);
                    }
                    "Export audio" => {
                        if let Some(audio) = &wf.state().audio {
                            match export_audio(output, audio).await {
                                Ok(key) => println!("Saved {}", output.root().join(key).display()),
                                Err(e) => eprintln!("! {:#}", e),
                            }
                        }
                    }
                    "Proceed to metadata" => {
                        let begun = wf.begin_proceed();
                        run_optional(wf, begun).await;
                    }
                    "Skip voice & generate metadata" => {
                        let begun = wf.begin_skip_voice();
                        run_optional(wf, begun).await;
                    }
                    BACK => {
                        let _ = wf.back();
                    }
                    ABANDON => {
                        wf.abandon();
                        return Ok(());
                    }
                    _ => {
                        // Voice options follow "Edit script".
                        if let Some(&voice) = VoiceProfile::ALL.get(picked.index.wrapping_sub(1)) {
                            let begun = wf.begin_synthesize_voice(voice);
                            run_ticket(wf, begun).await;
                        }
                    }
                }
            }
            Step::MetadataReview => {
                // The view was just (re)built.
                if let Some(ticket) = wf.begin_refresh() {
                    run_ticket(wf, Ok(ticket)).await;
                    if let Some(err) = &wf.state().error_message {
                        eprintln!("! {}", err);
                    }
                }

                let state = wf.state();
                if let Some(metadata) = &state.metadata {
                    println!("Title:       {}", metadata.title);
                    println!("Description: {}", preview(&metadata.description, 400));
                    println!("Hashtags:    {}", metadata.hashtags);
                }
                let choice = Select::new(
                    "Metadata:",
                    vec!["Regenerate metadata", "Generate thumbnail", BACK, ABANDON],
                )
                .prompt()?;
                match choice {
                    "Regenerate metadata" => {
                        let begun = wf.begin_regenerate_metadata();
                        run_ticket(wf, begun).await;
                    }
                    "Generate thumbnail" => {
                        let begun = wf.begin_generate_thumbnail();
                        run_ticket(wf, begun).await;
                    }
                    BACK => {
                        let _ = wf.back();
                    }
                    _ => {
                        wf.abandon();
                        return Ok(());
                    }
                }
            }
            Step::Thumbnail => {
                if let Some(thumbnail) = &state.thumbnail {
                    println!("Thumbnail ready ({} bytes, {})", thumbnail.bytes.len(), thumbnail.mime_type);
                }
                let choice = Select::new(
                    "Thumbnail:",
                    vec!["Save project", "Export thumbnail", "Regenerate thumbnail", BACK, ABANDON],
                )
                .prompt()?;
                match choice {
                    "Save project" => match wf.save().await {
                        Ok(project) => {
                            println!("Project '{}' saved.", project.display_title());
                            return Ok(());
                        }
                        Err(e) => log::warn!("Save failed: {}", e),
                    },
                    "Export thumbnail" => {
                        if let Some(thumbnail) = &wf.state().thumbnail {
                            match export_thumbnail(output, thumbnail).await {
                                Ok(key) => println!("Saved {}", output.root().join(key).display()),
                                Err(e) => eprintln!("! {:#}", e),
                            }
                        }
                    }
                    "Regenerate thumbnail" => {
                        let begun = wf.begin_regenerate_thumbnail();
                        run_ticket(wf, begun).await;
                    }
                    BACK => {
                        let _ = wf.back();
                    }
                    _ => {
                        wf.abandon();
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn show_projects(projects: &ProjectStore) -> Result<()> {
    let list = projects.list_recent().await?;
    if list.is_empty() {
        println!("You haven't saved any projects yet.");
        return Ok(());
    }

    let mut options: Vec<String> = list
        .iter()
        .map(|p| format!("{}  ({})", p.display_title(), p.created_at.format("%Y-%m-%d %H:%M")))
        .collect();
    options.push(BACK.to_string());
    let picked = Select::new("My Projects:", options).raw_prompt()?;
    if let Some(project) = list.get(picked.index) {
        println!("\nTopic:       {}", project.topic);
        println!("Title:       {}", project.display_title());
        println!("Description: {}", project.description);
        println!("Hashtags:    {}", project.hashtags);
        println!("Script:\n{}", project.script);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please fix 'config.yml' or delete it to use the defaults.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    if config.require_api_key().is_err() {
        let key = Password::new("Gemini API key:")
            .without_confirmation()
            .prompt()?;
        config.gemini.api_key = key.trim().to_string();
        config.save()?;
    }

    let data: Arc<dyn Storage> = Arc::new(NativeStorage::new(&config.data_folder));
    let output = NativeStorage::new(&config.output_folder);
    let theme = ThemeSetting::load(data.clone()).await;
    apply_theme(theme.current());

    let projects = Arc::new(ProjectStore::new(data));
    let gateway = Arc::new(GeminiGateway::from_config(&config)?);
    let mut workflow = WorkflowController::new(gateway, projects.clone());

    loop {
        let toggle_label = format!("Toggle theme (current: {})", theme.current());
        let options = vec![
            "Create New Project".to_string(),
            "My Projects".to_string(),
            toggle_label,
            "Quit".to_string(),
        ];
        let picked = Select::new("Content Studio", options).raw_prompt()?;
        match picked.index {
            0 => run_creation(&mut workflow, &output).await?,
            1 => show_projects(&projects).await?,
            2 => match theme.toggle().await {
                Ok(next) => apply_theme(next),
                Err(e) => eprintln!("! Could not save theme: {:#}", e),
            },
            _ => break,
        }
    }
    Ok(())
}
