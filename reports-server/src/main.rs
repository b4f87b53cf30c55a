//! 门诊报告服务器主程序

use anyhow::{Context, Result};
use clap::Parser;
use reports_admin::{init_logging, AppConfig, StorageBackendKind};
use reports_core::FileTypeFilter;
use reports_storage::{
    ArchiveExporter, HostedStorage, LocalStorage, ReportStorage, S3Options, UploadService,
};
use reports_web::{AppState, AuthService, PasswordHash, WebServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "reports-server")]
#[command(about = "Clinic patient report upload and review server")]
struct Args {
    /// 监听主机
    #[arg(long)]
    host: Option<String>,

    /// 服务器端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 本地报告存储目录
    #[arg(short, long)]
    storage_dir: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long)]
    log_level: Option<String>,

    /// 输出密码的加盐哈希后退出，用于填写 auth.password_hash
    #[arg(long, value_name = "PASSWORD")]
    hash_password: Option<String>,
}

async fn build_storage(config: &AppConfig) -> Result<Arc<dyn ReportStorage>> {
    let storage: Arc<dyn ReportStorage> = match config.storage.backend {
        StorageBackendKind::Local => {
            Arc::new(LocalStorage::new(&config.storage.local.root).await?)
        }
        StorageBackendKind::Hosted => {
            let hosted = config
                .storage
                .hosted
                .as_ref()
                .context("storage.hosted is not configured")?;
            let options = S3Options {
                bucket: hosted.bucket.clone(),
                region: hosted.region.clone(),
                endpoint: hosted.endpoint.clone(),
                access_key_id: hosted.access_key_id.clone(),
                secret_access_key: hosted.secret_access_key.clone(),
            };
            Arc::new(HostedStorage::s3(
                &options,
                hosted.public_base_url.clone(),
                hosted.transform_base_url.clone(),
            )?)
        }
    };
    Ok(storage)
}

fn build_auth(config: &AppConfig) -> Result<AuthService> {
    let auth = &config.auth;
    let credential = match (&auth.password_hash, &auth.password) {
        (Some(hash), _) if !hash.trim().is_empty() => PasswordHash::parse(hash)?,
        (_, Some(password)) => {
            warn!("auth.password is set in plain text; prefer auth.password_hash");
            PasswordHash::generate(password)?
        }
        _ => anyhow::bail!("no doctor credential configured"),
    };

    let secret = auth
        .session_secret
        .as_ref()
        .filter(|secret| !secret.is_empty())
        .map(|secret| secret.as_bytes().to_vec());

    Ok(AuthService::new(
        credential,
        secret,
        auth.session_ttl_minutes,
        auth.cookie_name.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(password) = &args.hash_password {
        println!("{}", PasswordHash::generate(password)?.encode());
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.storage_dir {
        config.storage.local.root = dir;
    }

    // 初始化日志
    init_logging(&config.logging, args.log_level.as_deref())?;
    info!("启动门诊报告服务器...");

    config.validate().context("Invalid configuration")?;

    let storage = build_storage(&config).await?;
    let auth = Arc::new(build_auth(&config)?);
    let filter = FileTypeFilter::new(config.storage.allow_video);
    let exporter = ArchiveExporter::new(storage.clone())
        .with_fetch_timeout(Duration::from_secs(config.storage.fetch_timeout_secs));

    let state = AppState {
        uploads: UploadService::new(storage.clone(), filter),
        exporter,
        auth,
        storage,
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;

    info!("服务器配置:");
    info!("  监听地址: {}", addr);
    info!("  存储后端: {}", state.storage.backend_name());
    info!("  允许视频: {}", config.storage.allow_video);

    WebServer::new(addr, state, config.server.max_upload_bytes)
        .run()
        .await?;

    Ok(())
}
