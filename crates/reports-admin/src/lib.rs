//! # Reports Admin
//!
//! 启动期的配置加载、校验与日志初始化。

pub mod config;
pub mod logging;

pub use config::*;
pub use logging::init_logging;
