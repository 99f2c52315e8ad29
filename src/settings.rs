use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::bridge::BridgeConfig;
use crate::hub::DispatchConfig;
use crate::navigation::StabilityConfig;
use crate::sensing::ClassifierConfig;
use crate::session::SessionConfig;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub api_key: Option<String>,
    pub stability: StabilityConfig,
    pub classifier: ClassifierConfig,
    pub dispatch: DispatchConfig,
    pub session: SessionConfig,
    pub bridge: BridgeConfig,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
}

impl SettingsStore {
    /// Load settings from `path`. A missing file yields defaults; an
    /// unreadable one is an error; a malformed one falls back to defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            AppSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// `<data dir>/cyberpet`, created on demand.
    pub fn default_dir() -> Result<PathBuf> {
        let dir = dirs::data_dir()
            .context("no platform data directory")?
            .join("cyberpet");
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> AppSettings {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The environment variable wins over the stored key. Blank values
    /// count as unset.
    pub fn api_key(&self) -> Option<String> {
        let stored = self
            .data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .api_key
            .clone();
        resolve_api_key(std::env::var(API_KEY_ENV).ok(), stored)
    }

    pub fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        apply(&mut guard);
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: AppSettings = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &AppSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

fn resolve_api_key(env: Option<String>, stored: Option<String>) -> Option<String> {
    [env, stored]
        .into_iter()
        .flatten()
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}
