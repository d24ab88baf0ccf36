pub mod settings;

use std::path::{Path, PathBuf};

use crate::error::Result;

pub use settings::{
    DiffMode, FileSettingsStore, MemorySettingsStore, Settings, SettingsStore, ThemeMode,
    DEFAULT_POLL_INTERVAL_SECS,
};

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "AUTOPILOT_HOME";

/// 获取 ~/.autopilot/ 目录路径
///
/// `AUTOPILOT_HOME` wins when set. Without a home directory the current directory is used.
pub fn autopilot_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".autopilot")
}

/// 从 TOML 文件加载反序列化数据
pub fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// 将数据序列化后保存到 TOML 文件，父目录不存在时创建
pub fn save_toml<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(data)?;
    std::fs::write(path, content)?;
    Ok(())
}
