//! 配置管理
//!
//! 加载顺序：内置默认值 → 可选的 TOML 文件 → `REPORTS__` 前缀的环境变量。

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

/// 系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 认证配置
    pub auth: AuthConfig,
    /// 存储配置
    pub storage: StorageConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 单次上传请求体上限（字节）
    pub max_upload_bytes: usize,
}

/// 认证配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// 医生密码的加盐哈希 `<salt-hex>$<hmac-hex>`
    pub password_hash: Option<String>,
    /// 明文密码，仅在启动时被哈希，不会直接比较
    pub password: Option<String>,
    /// 会话 cookie 签名密钥
    pub session_secret: Option<String>,
    /// 会话有效期（分钟）
    pub session_ttl_minutes: i64,
    /// 会话 cookie 名称
    pub cookie_name: String,
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Local,
    Hosted,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 使用的存储后端
    pub backend: StorageBackendKind,
    /// 是否允许上传视频
    pub allow_video: bool,
    /// 导出时单个文件的读取超时（秒）
    pub fetch_timeout_secs: u64,
    /// 本地存储配置
    pub local: LocalStorageConfig,
    /// 托管存储配置
    pub hosted: Option<HostedStorageConfig>,
}

/// 本地存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStorageConfig {
    /// 根目录
    pub root: String,
}

/// 托管存储配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostedStorageConfig {
    /// 桶名
    pub bucket: String,
    /// 区域
    pub region: String,
    /// 端点URL
    pub endpoint: Option<String>,
    /// 访问密钥
    pub access_key_id: String,
    /// 密钥
    pub secret_access_key: String,
    /// 文件公开访问地址前缀
    pub public_base_url: String,
    /// 缩略图变换服务地址
    pub transform_base_url: Option<String>,
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或 EnvFilter 指令
    pub level: String,
    /// 输出格式
    pub format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password_hash: None,
            password: None,
            session_secret: None,
            session_ttl_minutes: 12 * 60,
            cookie_name: "reports_session".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Local,
            allow_video: true,
            fetch_timeout_secs: 20,
            local: LocalStorageConfig::default(),
            hosted: None,
        }
    }
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root: "uploads".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

impl AppConfig {
    /// 加载配置
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("REPORTS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(config)
    }

    /// 启动期校验，任何错误都应终止启动
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port cannot be 0");
        }
        if self.server.max_upload_bytes == 0 {
            bail!("server.max_upload_bytes cannot be 0");
        }
        if is_blank(&self.auth.password_hash) && is_blank(&self.auth.password) {
            bail!("auth.password_hash (or auth.password) must be configured");
        }
        if self.auth.session_ttl_minutes <= 0 {
            bail!("auth.session_ttl_minutes must be positive");
        }
        if self.auth.cookie_name.trim().is_empty() {
            bail!("auth.cookie_name cannot be empty");
        }
        if self.storage.fetch_timeout_secs == 0 {
            bail!("storage.fetch_timeout_secs must be positive");
        }

        match self.storage.backend {
            StorageBackendKind::Local => {
                if self.storage.local.root.trim().is_empty() {
                    bail!("storage.local.root cannot be empty");
                }
            }
            StorageBackendKind::Hosted => {
                let Some(hosted) = &self.storage.hosted else {
                    bail!("storage.hosted must be configured for the hosted backend");
                };
                let required = [
                    ("bucket", &hosted.bucket),
                    ("region", &hosted.region),
                    ("access_key_id", &hosted.access_key_id),
                    ("secret_access_key", &hosted.secret_access_key),
                    ("public_base_url", &hosted.public_base_url),
                ];
                for (name, value) in required {
                    if value.trim().is_empty() {
                        bail!("storage.hosted.{} is required", name);
                    }
                }
            }
        }

        info!("Configuration validation passed");
        Ok(())
    }
}
