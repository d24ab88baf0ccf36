//! 应用设置持久化
//!
//! `~/.autopilot/settings.toml` holds the registered repository paths and user preferences.
//! Loading never fails: a missing or corrupt file yields defaults.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{autopilot_dir, load_toml, save_toml};
use crate::error::{Result, SyncError};

/// Default PR status poll interval.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

/// What the diff view compares against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffMode {
    /// Changes relative to the merge base with the default branch
    #[default]
    Branch,
    /// Working tree changes not yet committed
    Uncommitted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub repository_paths: Vec<String>,
    #[serde(default)]
    pub theme_mode: ThemeMode,
    /// agent 启动命令（如 "claude", "claude --yolo"）
    #[serde(default)]
    pub default_ai_agent: Option<String>,
    #[serde(default)]
    pub diff_mode: DiffMode,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repository_paths: Vec::new(),
            theme_mode: ThemeMode::default(),
            default_ai_agent: None,
            diff_mode: DiffMode::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

/// 获取设置文件路径
pub fn settings_path() -> PathBuf {
    autopilot_dir().join("settings.toml")
}

/// 加载设置（不存在或损坏则返回默认值）
pub fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }
    match load_toml(path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(path = %path.display(), "unreadable settings, using defaults: {}", e);
            Settings::default()
        }
    }
}

/// 保存设置
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    save_toml(path, settings).map_err(|e| SyncError::persistence(e.to_string()))
}

/// Where settings are read from and written to.
pub trait SettingsStore {
    fn load(&self) -> Settings;

    fn save(&self, settings: &Settings) -> Result<()>;
}

/// TOML file on disk.
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.autopilot/settings.toml`
    pub fn default_location() -> Self {
        Self::new(settings_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Settings {
        load_settings(&self.path)
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        save_settings(&self.path, settings)
    }
}

/// In-memory settings, for headless runs and tests.
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: RefCell<Settings>,
    saves: Cell<usize>,
    fail_saves: Cell<bool>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RefCell::new(settings),
            ..Self::default()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.get()
    }

    /// Make every following `save` fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.set(fail);
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Settings {
        self.settings.borrow().clone()
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        if self.fail_saves.get() {
            return Err(SyncError::persistence("settings store is read-only"));
        }
        *self.settings.borrow_mut() = settings.clone();
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("settings.toml"));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.poll_interval_secs, 30);
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "repository_paths = [[[").unwrap();
        assert_eq!(load_settings(&path), Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("nested").join("settings.toml"));
        let settings = Settings {
            repository_paths: vec!["/src/app".to_string()],
            theme_mode: ThemeMode::Dark,
            default_ai_agent: Some("claude".to_string()),
            diff_mode: DiffMode::Uncommitted,
            poll_interval_secs: 10,
        };
        store.save(&settings).unwrap();
        assert_eq!(store.load(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "theme_mode = \"light\"\ndiff_mode = \"uncommitted\"\n").unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.theme_mode, ThemeMode::Light);
        assert_eq!(settings.diff_mode, DiffMode::Uncommitted);
        assert!(settings.repository_paths.is_empty());
        assert_eq!(settings.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn test_memory_store_failure() {
        let store = MemorySettingsStore::default();
        store.set_fail_saves(true);
        let err = store.save(&Settings::default()).unwrap_err();
        assert!(matches!(err, SyncError::Persistence(_)));
        assert_eq!(store.saves(), 0);
    }
}
