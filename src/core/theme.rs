use crate::core::io::Storage;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

const THEME_KEY: &str = "theme.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Theme {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => f.write_str("light"),
            Theme::Dark => f.write_str("dark"),
        }
    }
}

/// Process-wide theme preference. Created once with [`ThemeSetting::load`]
/// and handed to whoever renders; `toggle` is the only mutation.
#[derive(Clone)]
pub struct ThemeSetting {
    storage: Arc<dyn Storage>,
    current: Arc<RwLock<Theme>>,
}

impl ThemeSetting {
    pub async fn load(storage: Arc<dyn Storage>) -> Self {
        let theme = match storage.read_string(THEME_KEY).await {
            Ok(Some(content)) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable theme preference: {}", e);
                Theme::default()
            }),
            Ok(None) => Theme::default(),
            Err(e) => {
                log::warn!("Could not read theme preference: {:#}", e);
                Theme::default()
            }
        };
        Self {
            storage,
            current: Arc::new(RwLock::new(theme)),
        }
    }

    pub fn current(&self) -> Theme {
        match self.current.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Flips the theme and persists it. The in-memory value changes even if
    /// persisting fails.
    pub async fn toggle(&self) -> Result<Theme> {
        let next = {
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = guard.toggled();
            *guard
        };
        let content = serde_json::to_string(&next)?;
        self.storage.write(THEME_KEY, content.as_bytes()).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    #[tokio::test]
    async fn test_defaults_to_light() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let setting = ThemeSetting::load(Arc::new(NativeStorage::new(temp_dir.path()))).await;
        assert_eq!(setting.current(), Theme::Light);
        Ok(())
    }

    #[tokio::test]
    async fn test_toggle_persists_across_loads() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new(temp_dir.path()));

        let setting = ThemeSetting::load(storage.clone()).await;
        assert_eq!(setting.toggle().await?, Theme::Dark);

        let reloaded = ThemeSetting::load(storage).await;
        assert_eq!(reloaded.current(), Theme::Dark);
        Ok(())
    }

    #[tokio::test]
    async fn test_clones_share_the_setting() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let setting = ThemeSetting::load(Arc::new(NativeStorage::new(temp_dir.path()))).await;
        let view_copy = setting.clone();

        setting.toggle().await?;
        assert_eq!(view_copy.current(), Theme::Dark);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_preference_falls_back() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new(temp_dir.path()));
        storage.write(THEME_KEY, b"purple").await?;

        let setting = ThemeSetting::load(storage).await;
        assert_eq!(setting.current(), Theme::Light);
        Ok(())
    }
}
