//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 报告媒体类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Pdf,
    Image,
    Video,
}

impl MediaKind {
    /// 按小写扩展名判断类型，不在白名单内返回 None
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "pdf" => Some(MediaKind::Pdf),
            "png" | "jpg" | "jpeg" | "gif" => Some(MediaKind::Image),
            "mp4" | "mov" | "webm" => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// 按扩展名推断 Content-Type
    pub fn content_type(ext: &str) -> &'static str {
        match ext {
            "pdf" => "application/pdf",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "mp4" => "video/mp4",
            "mov" => "video/quicktime",
            "webm" => "video/webm",
            _ => "application/octet-stream",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Pdf => write!(f, "pdf"),
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// 已存储的报告文件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredReport {
    pub patient: String,
    pub file_name: String,
    /// 本地路径或对象存储 key
    pub storage_id: String,
    pub kind: MediaKind,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    /// 托管存储的公开访问地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// PDF 首页或视频封面缩略图
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// 一个患者及其全部报告
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientReports {
    pub patient: String,
    pub files: Vec<StoredReport>,
}

/// 批处理中单个文件的失败记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileFailure {
    pub file_name: String,
    pub reason: String,
}
