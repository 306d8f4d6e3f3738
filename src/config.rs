//! Application configuration module / 应用配置模块
//!
//! Manages application configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件
//!
//! Components never read configuration globally; the binary loads an
//! `AppConfig` and hands each component the pieces it needs (the search
//! and sync knobs travel as an explicit [`SyncTuning`]).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration / 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Database configuration / 数据库配置
    pub database: DatabaseConfig,
    /// Remote catalog API configuration / 远端目录接口配置
    pub remote: RemoteConfig,
    /// Sync and search tuning / 同步与搜索参数
    pub tuning: SyncTuning,
}

/// Database configuration / 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Data directory path / 数据目录路径
    pub data_dir: String,
    /// Hymn database file path (relative to data_dir) / 诗歌数据库文件路径
    pub db_file: String,
}

/// Remote catalog API configuration / 远端目录接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API base URL / 接口基础地址
    pub base_url: String,
    /// Request timeout in seconds / 请求超时（秒）
    pub timeout_secs: u64,
}

/// Sync and search tuning knobs / 同步与搜索参数
///
/// The debounce interval and load-more window are deliberately
/// configuration rather than constants; nothing in the engine depends on
/// their exact values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTuning {
    /// Quiet interval before a changed query is acted on / 查询防抖间隔（毫秒）
    pub debounce_ms: u64,
    /// "load more" honored only within this many trailing rows / 触发加载更多的尾部行数
    pub load_more_window: usize,
    /// Local ranked batch is truncated to this many rows / 本地排序结果截断行数
    pub local_rank_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            db_file: "hymns.db".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://hymnalnetapi.herokuapp.com".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            load_more_window: 5,
            local_rank_limit: 50,
        }
    }
}

impl SyncTuning {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl AppConfig {
    /// Get the full database file path / 获取完整的数据库文件路径
    pub fn get_database_path(&self) -> PathBuf {
        Path::new(&self.database.data_dir).join(&self.database.db_file)
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig, String> {
    let config_path = get_config_path();

    if config_path.exists() {
        // Load existing config / 加载现有配置
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        // Create default config / 创建默认配置
        let config = AppConfig::default();
        save_config(&config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig) -> Result<(), String> {
    let config_path = get_config_path();

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(&config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tuning_values() {
        let tuning = SyncTuning::default();
        assert_eq!(tuning.debounce_ms, 300);
        assert_eq!(tuning.load_more_window, 5);
        assert_eq!(tuning.local_rank_limit, 50);
    }

    #[test]
    fn test_config_round_trip() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.database.db_file, "hymns.db");
        assert_eq!(back.tuning.debounce_ms, config.tuning.debounce_ms);
    }
}
