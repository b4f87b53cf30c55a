//! 批量上传

use crate::storage::ReportStorage;
use bytes::Bytes;
use reports_core::{
    sanitize_patient_name, FileFailure, FileTypeFilter, PatientKey, ReportsError, Result,
    StoredReport,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// 表单中提交的一个文件
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Bytes,
}

/// 批量上传结果，允许部分成功
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub patient: PatientKey,
    pub uploaded: Vec<StoredReport>,
    pub failures: Vec<FileFailure>,
}

impl UploadOutcome {
    pub fn uploaded_count(&self) -> usize {
        self.uploaded.len()
    }

    pub fn success_message(&self) -> String {
        format!(
            "{} file(s) uploaded successfully for {}.",
            self.uploaded_count(),
            self.patient
        )
    }
}

pub const REJECTED_FILE_REASON: &str = "File type not allowed or invalid file.";

/// 上传服务：患者名清洗 → 类型过滤 → 写入存储
#[derive(Clone)]
pub struct UploadService {
    storage: Arc<dyn ReportStorage>,
    filter: FileTypeFilter,
}

impl UploadService {
    pub fn new(storage: Arc<dyn ReportStorage>, filter: FileTypeFilter) -> Self {
        Self { storage, filter }
    }

    /// 上传一批文件
    ///
    /// 患者名无效或没有选择文件时整体失败；单个文件的失败只记录在结果中，
    /// 不影响同批次的其他文件。
    pub async fn upload_batch(
        &self,
        raw_patient: &str,
        files: Vec<UploadedFile>,
    ) -> Result<UploadOutcome> {
        let patient = sanitize_patient_name(raw_patient)?;

        // 浏览器在未选择文件时也会提交一个空文件名的字段
        let files: Vec<UploadedFile> = files
            .into_iter()
            .filter(|file| !file.file_name.is_empty())
            .collect();
        if files.is_empty() {
            return Err(ReportsError::validation("No files selected."));
        }

        let mut outcome = UploadOutcome {
            patient: patient.clone(),
            uploaded: Vec::new(),
            failures: Vec::new(),
        };

        for file in files {
            let Some((kind, ext)) = self.filter.classify(&file.file_name) else {
                warn!("Rejected upload {} for {}", file.file_name, patient);
                outcome.failures.push(FileFailure {
                    file_name: file.file_name,
                    reason: REJECTED_FILE_REASON.to_string(),
                });
                continue;
            };

            match self.storage.write(&patient, &ext, kind, file.data).await {
                Ok(stored) => outcome.uploaded.push(stored),
                Err(e) => {
                    warn!(
                        "Failed to store {} for {} on {}: {}",
                        file.file_name,
                        patient,
                        self.storage.backend_name(),
                        e
                    );
                    outcome.failures.push(FileFailure {
                        file_name: file.file_name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Upload for {}: {} stored, {} failed",
            patient,
            outcome.uploaded_count(),
            outcome.failures.len()
        );
        Ok(outcome)
    }
}
