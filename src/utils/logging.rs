use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs::{self, File, OpenOptions};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::workflow::{format_elapsed, Stage};

/// 初始化日志：终端输出 + 日志文件
///
/// `RUST_LOG` 优先；未设置时 `verbose` 决定 debug 还是 info。
pub fn init(verbose: bool, log_file_path: &str) -> Result<()> {
    let default_level = if verbose { "gradi_flow=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let file = init_log_file(log_file_path)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .try_init()?;
    Ok(())
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
///
/// # 返回
/// 写入文件头后以追加模式打开的文件
pub fn init_log_file(log_file_path: &str) -> Result<File> {
    let log_header = format!(
        "{}\n评分流程日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(OpenOptions::new().append(true).open(log_file_path)?)
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 考试评分流程");
    info!("🌐 后端地址: {}", config.api_base_url);
    info!("📡 进度通道: {}", config.stream_base_url);
    info!(
        "⏱️  超时 {} 秒 / 重连间隔 {} 毫秒",
        config.stale_timeout_secs, config.reconnect_delay_ms
    );
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始
///
/// # 参数
/// - `stage`: 新阶段
/// - `exam_code`: 考试代码
pub fn log_stage_start(stage: &Stage, exam_code: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📦 [{}] 进入阶段: {}", exam_code, stage);
    info!("{}", "=".repeat(60));
}

/// 记录阶段结束
pub fn log_stage_complete(stage: &Stage, elapsed_secs: u64) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 阶段 {} 结束，用时 {}", stage, format_elapsed(elapsed_secs));
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `exam_code`: 考试代码（提交前失败时为空）
/// - `stage`: 最终阶段
/// - `elapsed`: 总用时
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(
    exam_code: Option<&str>,
    stage: &Stage,
    elapsed: Duration,
    log_file_path: &str,
) {
    info!("\n{}", "=".repeat(60));
    info!("📊 评分流程结束");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📝 考试代码: {}", exam_code.unwrap_or("-"));
    match stage {
        Stage::Done => info!("✅ 最终阶段: {}", stage),
        _ => info!("❌ 最终阶段: {}", stage),
    }
    info!("⏱️  总用时: {}", format_elapsed(elapsed.as_secs()));
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn truncates_by_chars() {
        assert_eq!(truncate_text("중간고사 결과", 4), "중간고사...");
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn log_file_starts_with_header_and_appends() {
        let path = std::env::temp_dir().join(format!("gradi_log_{}.log", uuid::Uuid::new_v4()));
        let path_str = path.to_string_lossy().into_owned();

        let mut file = init_log_file(&path_str).unwrap();
        writeln!(file, "line").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(&"=".repeat(60)));
        assert!(content.contains("评分流程日志"));
        assert!(content.ends_with("line\n"));
        fs::remove_file(&path).unwrap();
    }
}
