use crate::theme::PALETTES;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "llama2:7b";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub theme: usize,
    pub ai_model: String,
    pub ollama_url: String,
    pub request_timeout_secs: u64,
    pub log_panel_enabled: bool,
    pub log_level: String,
    pub projects_dir: Option<PathBuf>,
    pub exports_dir: Option<PathBuf>,
    /// Program invoked with the text as its last argument, e.g. `espeak-ng`.
    pub tts_command: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            theme: 0,
            ai_model: DEFAULT_MODEL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            request_timeout_secs: 120,
            log_panel_enabled: true,
            log_level: crate::logging::default_log_level().to_string(),
            projects_dir: None,
            exports_dir: None,
            tts_command: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppDirs {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppDirs {
    pub fn locate() -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "cogniflow").context("locating data directory")?;
        Ok(AppDirs {
            config_dir: dirs.config_dir().to_path_buf(),
            data_dir: dirs.data_dir().to_path_buf(),
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join("settings.yml")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl Settings {
    pub fn projects_dir(&self, dirs: &AppDirs) -> PathBuf {
        self.projects_dir
            .clone()
            .unwrap_or_else(|| dirs.data_dir.join("projects"))
    }

    pub fn exports_dir(&self, dirs: &AppDirs) -> PathBuf {
        self.exports_dir
            .clone()
            .unwrap_or_else(|| dirs.data_dir.join("exports"))
    }

    fn normalized(mut self) -> Self {
        if self.theme >= PALETTES.len() {
            warn!("event=settings_theme_reset theme={}", self.theme);
            self.theme = 0;
        }
        if self.ai_model.trim().is_empty() {
            self.ai_model = DEFAULT_MODEL.to_string();
        }
        self
    }
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let data = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let settings: Settings = serde_yaml::from_str(&data).context("parsing settings file")?;
    Ok(settings.normalized())
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let serialized = serde_yaml::to_string(settings).context("serializing settings")?;
    fs::write(path, serialized).with_context(|| format!("writing {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = load_settings(&dir.path().join("settings.yml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_fills_defaults_and_resets_bad_theme() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yml");
        fs::write(&path, "theme: 42\nai_model: gemma:2b\n").unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.theme, 0);
        assert_eq!(settings.ai_model, "gemma:2b");
        assert_eq!(settings.ollama_url, DEFAULT_OLLAMA_URL);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.yml");
        let settings = Settings {
            theme: 4,
            log_panel_enabled: false,
            tts_command: Some("espeak-ng".into()),
            ..Settings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
    }

    #[test]
    fn directories_default_under_data_dir() {
        let dirs = AppDirs {
            config_dir: PathBuf::from("/cfg"),
            data_dir: PathBuf::from("/data"),
        };
        let settings = Settings::default();
        assert_eq!(settings.projects_dir(&dirs), PathBuf::from("/data/projects"));
        assert_eq!(settings.exports_dir(&dirs), PathBuf::from("/data/exports"));
        assert_eq!(dirs.settings_path(), PathBuf::from("/cfg/settings.yml"));
    }
}
