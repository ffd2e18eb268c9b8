use crate::error::{AppError, AppResult, FileError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 后端 REST 接口地址
    pub api_base_url: String,
    /// 进度推送通道地址（可直连后端，绕过代理）
    pub stream_base_url: String,
    /// 多久没有收到消息视为通道失效
    pub stale_timeout_secs: u64,
    /// 失效检查的间隔
    pub stale_check_interval_secs: u64,
    /// index >= total 后自动完成的等待时间
    pub auto_complete_delay_ms: u64,
    /// 通道断开后重新连接的等待时间
    pub reconnect_delay_ms: u64,
    /// 单个 REST 请求的超时
    pub request_timeout_secs: u64,
    /// 本地草稿目录
    pub draft_dir: String,
    /// 考试草稿 TOML 文件
    pub exam_draft_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080/api".to_string(),
            stream_base_url: "http://127.0.0.1:8080/api".to_string(),
            stale_timeout_secs: 300,
            stale_check_interval_secs: 10,
            auto_complete_delay_ms: 1000,
            reconnect_delay_ms: 3000,
            request_timeout_secs: 30,
            draft_dir: ".gradi_drafts".to_string(),
            exam_draft_file: "exam.toml".to_string(),
            verbose_logging: false,
            output_log_file: "gradi_run.log".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            api_base_url: std::env::var("GRADI_API_BASE_URL").unwrap_or(default.api_base_url),
            stream_base_url: std::env::var("GRADI_STREAM_BASE_URL").unwrap_or(default.stream_base_url),
            stale_timeout_secs: std::env::var("GRADI_STALE_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.stale_timeout_secs),
            stale_check_interval_secs: std::env::var("GRADI_STALE_CHECK_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.stale_check_interval_secs),
            auto_complete_delay_ms: std::env::var("GRADI_AUTO_COMPLETE_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.auto_complete_delay_ms),
            reconnect_delay_ms: std::env::var("GRADI_RECONNECT_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.reconnect_delay_ms),
            request_timeout_secs: std::env::var("GRADI_REQUEST_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.request_timeout_secs),
            draft_dir: std::env::var("GRADI_DRAFT_DIR").unwrap_or(default.draft_dir),
            exam_draft_file: std::env::var("GRADI_EXAM_DRAFT_FILE").unwrap_or(default.exam_draft_file),
            verbose_logging: std::env::var("GRADI_VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("GRADI_OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
        }
    }

    /// 从 TOML 文件读取配置，缺省字段使用默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        let config: Config = toml::from_str(&content).map_err(|e| FileError::TomlParseFailed {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(config)
    }

    /// 进度通道使用的计时参数
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            stale_timeout: Duration::from_secs(self.stale_timeout_secs),
            stale_check_interval: Duration::from_secs(self.stale_check_interval_secs.max(1)),
            auto_complete_delay: Duration::from_millis(self.auto_complete_delay_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

/// 进度通道的计时参数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    pub stale_timeout: Duration,
    pub stale_check_interval: Duration,
    pub auto_complete_delay: Duration,
    pub reconnect_delay: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Config::default().stream_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_channel_policy() {
        let settings = StreamSettings::default();
        assert_eq!(settings.stale_timeout, Duration::from_secs(300));
        assert_eq!(settings.stale_check_interval, Duration::from_secs(10));
        assert_eq!(settings.auto_complete_delay, Duration::from_secs(1));
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let config: Config = toml::from_str(
            r#"
            api_base_url = "https://gradi.example/api"
            stale_timeout_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.api_base_url, "https://gradi.example/api");
        assert_eq!(config.stale_timeout_secs, 60);
        assert_eq!(config.stale_check_interval_secs, 10);
        assert_eq!(config.output_log_file, "gradi_run.log");
    }
}
