//! 患者报告目录

use crate::storage::ReportStorage;
use reports_core::{PatientReports, Result};
use serde::Serialize;

/// 按患者分组的报告目录
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Catalog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    pub patients: Vec<PatientReports>,
    pub total_patients: usize,
    pub total_files: usize,
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    pub fn patient(&self, key: &str) -> Option<&PatientReports> {
        self.patients.iter().find(|group| group.patient == key)
    }
}

/// 对存储列表分组并按搜索词过滤
///
/// 患者 key 命中搜索词时保留该患者全部文件，否则只保留文件名命中的文件。
/// 患者顺序与存储返回的顺序一致，组内按上传时间倒序。
pub fn build_catalog(listing: Vec<PatientReports>, search: Option<&str>) -> Catalog {
    let term = search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut patients = Vec::with_capacity(listing.len());
    for mut group in listing {
        if let Some(term) = &term {
            if !group.patient.to_lowercase().contains(term.as_str()) {
                group
                    .files
                    .retain(|file| file.file_name.to_lowercase().contains(term.as_str()));
            }
        }
        if group.files.is_empty() {
            continue;
        }

        group.files.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        patients.push(group);
    }

    let total_files = patients.iter().map(|group| group.files.len()).sum();
    Catalog {
        search: term,
        total_patients: patients.len(),
        total_files,
        patients,
    }
}

/// 从存储加载完整目录
pub async fn load_catalog(storage: &dyn ReportStorage, search: Option<&str>) -> Result<Catalog> {
    let listing = storage.list_all().await?;
    Ok(build_catalog(listing, search))
}
