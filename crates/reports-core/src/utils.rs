//! 患者名清洗与文件类型过滤

use crate::error::{ReportsError, Result};
use crate::models::MediaKind;
use serde::{Deserialize, Serialize};

/// 清洗后的患者标识，同时作为存储目录名
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientKey(String);

impl PatientKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for PatientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PatientKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// 把用户输入的患者名转换为安全的存储 key
///
/// 白名单外的字符替换为 `_`，结果统一大写。
/// 结果中没有任何字母或数字时视为无效（例如 `..`）。
pub fn sanitize_patient_name(raw: &str) -> Result<PatientKey> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if is_allowed_char(c) { c.to_ascii_uppercase() } else { '_' })
        .collect();

    if !cleaned.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(ReportsError::validation("Invalid patient name."));
    }

    Ok(PatientKey(cleaned))
}

/// 路径参数中的患者 key 必须已经是规范形式
pub fn parse_patient_key(value: &str) -> Result<PatientKey> {
    let key = sanitize_patient_name(value)
        .map_err(|_| ReportsError::not_found(format!("patient {value}")))?;
    if key.as_str() != value {
        return Err(ReportsError::not_found(format!("patient {value}")));
    }
    Ok(key)
}

/// 文件名的小写扩展名
pub fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.contains(['/', '\\']) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// 只允许单一、普通的文件名，拒绝路径穿越
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// 上传文件类型白名单
#[derive(Debug, Clone, Copy)]
pub struct FileTypeFilter {
    allow_video: bool,
}

impl FileTypeFilter {
    pub fn new(allow_video: bool) -> Self {
        Self { allow_video }
    }

    /// 返回文件的媒体类型和规范化扩展名，不允许的文件返回 None
    pub fn classify(&self, file_name: &str) -> Option<(MediaKind, String)> {
        let ext = extension_of(file_name)?;
        let kind = MediaKind::from_extension(&ext)?;
        if kind == MediaKind::Video && !self.allow_video {
            return None;
        }
        Some((kind, ext))
    }

    pub fn is_allowed(&self, file_name: &str) -> bool {
        self.classify(file_name).is_some()
    }
}

impl Default for FileTypeFilter {
    fn default() -> Self {
        Self::new(true)
    }
}
