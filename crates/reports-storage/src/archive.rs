//! 按患者打包导出

use crate::storage::ReportStorage;
use bytes::Bytes;
use reports_core::{FileFailure, PatientKey, ReportsError, Result};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// 单个文件读取的默认超时
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// 导出结果
#[derive(Debug, Clone)]
pub struct ArchiveExport {
    /// 下载文件名 `<PATIENT>_reports.zip`
    pub file_name: String,
    pub data: Vec<u8>,
    pub included: usize,
    pub skipped: Vec<FileFailure>,
}

/// 患者报告打包器
#[derive(Clone)]
pub struct ArchiveExporter {
    storage: Arc<dyn ReportStorage>,
    fetch_timeout: Duration,
}

impl ArchiveExporter {
    pub fn new(storage: Arc<dyn ReportStorage>) -> Self {
        Self {
            storage,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// 把患者的全部报告打成一个 zip
    ///
    /// 单个文件读取失败或超时时跳过该文件；没有任何可导出的文件时返回
    /// `NothingToExport`，不会生成空压缩包。
    pub async fn export_patient(&self, patient: &PatientKey) -> Result<ArchiveExport> {
        let reports = self.storage.list(patient).await?;
        if reports.is_empty() {
            return Err(ReportsError::NothingToExport(patient.to_string()));
        }

        let mut entries: Vec<(String, Bytes)> = Vec::with_capacity(reports.len());
        let mut skipped = Vec::new();
        for report in reports {
            let fetch = self.storage.read(patient, &report.file_name);
            let reason = match tokio::time::timeout(self.fetch_timeout, fetch).await {
                Ok(Ok(data)) => {
                    entries.push((report.file_name, data));
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.fetch_timeout),
            };

            warn!("Skipping {}/{} in export: {}", patient, report.file_name, reason);
            skipped.push(FileFailure {
                file_name: report.file_name,
                reason,
            });
        }

        if entries.is_empty() {
            return Err(ReportsError::NothingToExport(patient.to_string()));
        }

        let included = entries.len();
        let data = tokio::task::spawn_blocking(move || build_zip(entries))
            .await
            .map_err(|e| ReportsError::Internal(format!("archive task failed: {e}")))??;

        info!(
            "Exported {} file(s) for {} ({} bytes, {} skipped)",
            included,
            patient,
            data.len(),
            skipped.len()
        );
        Ok(ArchiveExport {
            file_name: format!("{}_reports.zip", patient),
            data,
            included,
            skipped,
        })
    }
}

fn build_zip(entries: Vec<(String, Bytes)>) -> Result<Vec<u8>> {
    let archive_error = |e: zip::result::ZipError| ReportsError::Archive(e.to_string());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        zip.start_file(name, options).map_err(archive_error)?;
        zip.write_all(&data)?;
    }

    let cursor = zip.finish().map_err(archive_error)?;
    Ok(cursor.into_inner())
}
