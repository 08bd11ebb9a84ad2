use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LoggingConfig;

/// 安装全局 tracing 订阅者。
///
/// 配置了 `file_path` 时额外按天滚动写文件，返回的 guard 需由调用方持有到进程退出，
/// 否则缓冲中的日志会丢失。
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(&config.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (stdout_json, stdout_plain) = if config.json_format {
        (Some(fmt::layer().json().with_span_events(FmtSpan::CLOSE)), None)
    } else {
        (None, Some(fmt::layer().with_span_events(FmtSpan::CLOSE)))
    };

    let mut guard = None;
    let mut file_json = None;
    let mut file_plain = None;

    if let Some(file_path) = &config.file_path {
        let path = Path::new(file_path);
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .with_context(|| format!("Invalid log file path: {}", file_path))?;

        let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, file_name);
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        if config.json_format {
            file_json = Some(fmt::layer().with_ansi(false).with_writer(non_blocking).json());
        } else {
            file_plain = Some(fmt::layer().with_ansi(false).with_writer(non_blocking));
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_json)
        .with(stdout_plain)
        .with(file_json)
        .with(file_plain)
        .try_init()
        .context("Global tracing subscriber already installed")?;

    tracing::info!("Logging initialized with level: {}", config.level);

    Ok(guard)
}
