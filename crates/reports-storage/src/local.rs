//! 本地目录存储
//!
//! 目录布局为 `<root>/<PATIENT>/<PATIENT>_<index>.<ext>`，index 按患者从 1 开始递增。

use crate::storage::ReportStorage;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reports_core::{
    extension_of, is_plain_file_name, parse_patient_key, MediaKind, PatientKey, PatientReports,
    ReportsError, Result, StoredReport,
};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// 根据已有文件名计算下一个序号
///
/// 只识别 `<patient>_<digits>.<ext>` 形式的文件名，其余文件忽略。
/// 没有匹配的文件时返回 1；序号已用尽时返回 `None`。
pub fn next_index<'a>(existing: impl IntoIterator<Item = &'a str>, patient: &str) -> Option<u64> {
    match existing
        .into_iter()
        .filter_map(|name| parse_index(name, patient))
        .max()
    {
        Some(max) => max.checked_add(1),
        None => Some(1),
    }
}

fn parse_index(name: &str, patient: &str) -> Option<u64> {
    let rest = name.strip_prefix(patient)?.strip_prefix('_')?;
    let (digits, ext) = rest.split_once('.')?;
    if digits.is_empty() || ext.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // 全是数字时解析只会因溢出失败，按已用尽处理
    Some(digits.parse().unwrap_or(u64::MAX))
}

fn index_exhausted(patient: &PatientKey) -> ReportsError {
    ReportsError::Internal(format!("no file index left for patient {}", patient))
}

/// 本地文件系统存储
pub struct LocalStorage {
    root: PathBuf,
    /// 按患者串行化序号分配与删除
    patient_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalStorage {
    /// 创建本地存储，根目录不存在时自动创建
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        info!("Local report storage at {}", root.display());

        Ok(Self {
            root,
            patient_locks: Mutex::new(HashMap::new()),
        })
    }

    fn patient_dir(&self, patient: &PatientKey) -> PathBuf {
        self.root.join(patient.as_str())
    }

    fn patient_lock(&self, patient: &PatientKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .patient_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(patient.as_str().to_string())
            .or_default()
            .clone()
    }

    /// 没有其他任务持有时释放患者锁
    fn release_patient_lock(&self, patient: &PatientKey) {
        let mut locks = self
            .patient_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(patient.as_str())
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(patient.as_str());
        }
    }

    /// 目录中的普通文件名；目录不存在时返回空列表
    async fn file_names(dir: &Path) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    async fn describe(&self, patient: &PatientKey, dir: &Path) -> Result<Vec<StoredReport>> {
        let mut reports = Vec::new();
        for name in Self::file_names(dir).await? {
            let Some(kind) = extension_of(&name).and_then(|ext| MediaKind::from_extension(&ext))
            else {
                debug!("Skipping non-report file {}/{}", patient, name);
                continue;
            };

            let path = dir.join(&name);
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                // 并发删除
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let uploaded_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            reports.push(StoredReport {
                patient: patient.to_string(),
                file_name: name,
                storage_id: path.to_string_lossy().into_owned(),
                kind,
                size: metadata.len(),
                uploaded_at,
                url: None,
                thumbnail_url: None,
            });
        }
        Ok(reports)
    }

    /// 目录为空时删除，返回是否已删除
    async fn remove_dir_if_empty(dir: &Path) -> Result<bool> {
        if !Self::is_dir_empty(dir).await? {
            return Ok(false);
        }
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => {
                info!("Removed empty patient folder {}", dir.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_dir_empty(dir: &Path) -> Result<bool> {
        match tokio::fs::read_dir(dir).await {
            Ok(mut entries) => Ok(entries.next_entry().await?.is_none()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ReportStorage for LocalStorage {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn write(
        &self,
        patient: &PatientKey,
        extension: &str,
        kind: MediaKind,
        data: Bytes,
    ) -> Result<StoredReport> {
        let lock = self.patient_lock(patient);
        let _guard = lock.lock().await;

        let dir = self.patient_dir(patient);
        tokio::fs::create_dir_all(&dir).await?;

        let existing = Self::file_names(&dir).await?;
        let mut index = next_index(existing.iter().map(String::as_str), patient.as_str())
            .ok_or_else(|| index_exhausted(patient))?;

        loop {
            let file_name = format!("{}_{}.{}", patient, index, extension);
            let path = dir.join(&file_name);

            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} already exists, trying next index", file_name);
                    index = index.checked_add(1).ok_or_else(|| index_exhausted(patient))?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let written = async {
                file.write_all(&data).await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove partial file {}: {}", path.display(), cleanup);
                }
                return Err(e.into());
            }

            debug!("Stored {} ({} bytes)", path.display(), data.len());
            return Ok(StoredReport {
                patient: patient.to_string(),
                file_name,
                storage_id: path.to_string_lossy().into_owned(),
                kind,
                size: data.len() as u64,
                uploaded_at: Utc::now(),
                url: None,
                thumbnail_url: None,
            });
        }
    }

    async fn list(&self, patient: &PatientKey) -> Result<Vec<StoredReport>> {
        self.describe(patient, &self.patient_dir(patient)).await
    }

    async fn list_all(&self) -> Result<Vec<PatientReports>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut patients = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match parse_patient_key(&name) {
                Ok(key) => patients.push(key),
                Err(_) => debug!("Skipping foreign folder {}", name),
            }
        }
        patients.sort();

        let mut listing = Vec::with_capacity(patients.len());
        for patient in patients {
            let files = self.describe(&patient, &self.patient_dir(&patient)).await?;
            if files.is_empty() {
                continue;
            }
            listing.push(PatientReports {
                patient: patient.into_string(),
                files,
            });
        }
        Ok(listing)
    }

    async fn read(&self, patient: &PatientKey, file_name: &str) -> Result<Bytes> {
        if !is_plain_file_name(file_name) {
            return Err(ReportsError::not_found(file_name));
        }

        let path = self.patient_dir(patient).join(file_name);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ReportsError::not_found(format!(
                "{}/{}",
                patient, file_name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, patient: &PatientKey, file_name: &str) -> Result<bool> {
        if !is_plain_file_name(file_name) {
            return Ok(false);
        }

        let lock = self.patient_lock(patient);
        let guard = lock.lock().await;

        let dir = self.patient_dir(patient);
        let path = dir.join(file_name);
        match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => {
                debug!("Refusing to delete non-file entry {}/{}", patient, file_name);
                return Ok(false);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        info!("Deleted report {}/{}", patient, file_name);
        let removed = Self::remove_dir_if_empty(&dir).await?;
        drop(guard);
        drop(lock);
        if removed {
            self.release_patient_lock(patient);
        }
        Ok(true)
    }
}
