//! 日志初始化

use crate::config::{LogFormat, LoggingConfig};
use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

/// 安装全局 tracing subscriber
///
/// 级别优先级：命令行参数 → `RUST_LOG` → 配置文件。
pub fn init_logging(config: &LoggingConfig, cli_level: Option<&str>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::try_new(level),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level)),
    }
    .context("Invalid log level")?;

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init(),
    };

    installed.map_err(|e| anyhow!("Failed to install logger: {}", e))
}
