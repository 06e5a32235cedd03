use crate::core::io::Storage;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const PROJECTS_KEY: &str = "projects.json";

/// A finished, saved project. Only text fields are kept; audio and thumbnail
/// never reach the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub topic: String,
    pub title: String,
    pub description: String,
    pub hashtags: String,
    pub script: String,
}

impl Project {
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Untitled Project"
        } else {
            &self.title
        }
    }
}

/// The fields the workflow supplies; id and timestamp are stamped on record.
#[derive(Debug, Clone, Default)]
pub struct ProjectDraft {
    pub topic: String,
    pub title: String,
    pub description: String,
    pub hashtags: String,
    pub script: String,
}

/// Append-only list of saved projects persisted as one JSON document.
pub struct ProjectStore {
    storage: Arc<dyn Storage>,
    // Serialises read-modify-write of the JSON document.
    write_lock: Mutex<()>,
}

impl ProjectStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn list_all(&self) -> Result<Vec<Project>> {
        match self.storage.read_string(PROJECTS_KEY).await? {
            Some(content) if !content.trim().is_empty() => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", PROJECTS_KEY)),
            _ => Ok(Vec::new()),
        }
    }

    /// All projects, newest first.
    pub async fn list_recent(&self) -> Result<Vec<Project>> {
        let mut projects = self.list_all().await?;
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    pub async fn append(&self, project: Project) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.append_locked(project).await
    }

    async fn append_locked(&self, project: Project) -> Result<()> {
        let mut projects = self.list_all().await?;
        if projects.iter().any(|p| p.id == project.id) {
            anyhow::bail!("Project {} already exists", project.id);
        }
        projects.push(project);
        let content = serde_json::to_string_pretty(&projects)?;
        self.storage
            .write(PROJECTS_KEY, content.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", PROJECTS_KEY))?;
        Ok(())
    }

    /// Stamps a fresh id and a creation time strictly after every stored
    /// project, then appends.
    pub async fn record(&self, draft: ProjectDraft) -> Result<Project> {
        let _guard = self.write_lock.lock().await;
        let latest = self
            .list_all()
            .await?
            .into_iter()
            .map(|p| p.created_at)
            .max();
        let now = Utc::now();
        let created_at = match latest {
            Some(last) if last >= now => last + Duration::milliseconds(1),
            _ => now,
        };

        let project = Project {
            id: Uuid::new_v4(),
            created_at,
            topic: draft.topic,
            title: draft.title,
            description: draft.description,
            hashtags: draft.hashtags,
            script: draft.script,
        };
        self.append_locked(project.clone()).await?;
        log::info!("Saved project {} ({})", project.id, project.display_title());
        Ok(project)
    }
}
