//! 托管对象存储
//!
//! 报告存放在 `<PATIENT>/<PATIENT>_<时间戳>_<随机后缀>.<ext>`，
//! 生产环境使用 S3 兼容服务，测试使用内存实现。

use crate::storage::ReportStorage;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectMeta, ObjectStore};
use reports_core::{
    extension_of, is_plain_file_name, parse_patient_key, MediaKind, PatientKey, PatientReports,
    ReportsError, Result, StoredReport,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// S3 兼容存储的连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Options {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// 托管存储
pub struct HostedStorage {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
    transform_base_url: Option<String>,
}

fn map_store_error(err: object_store::Error) -> ReportsError {
    match err {
        object_store::Error::NotFound { path, .. } => ReportsError::not_found(path),
        other => {
            error!("Hosted storage failure: {}", other);
            ReportsError::storage(other)
        }
    }
}

impl HostedStorage {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        public_base_url: impl Into<String>,
        transform_base_url: Option<String>,
    ) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            transform_base_url: transform_base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    /// 连接 S3 兼容服务，凭据缺失时立即失败
    pub fn s3(
        options: &S3Options,
        public_base_url: impl Into<String>,
        transform_base_url: Option<String>,
    ) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&options.bucket)
            .with_region(&options.region)
            .with_access_key_id(&options.access_key_id)
            .with_secret_access_key(&options.secret_access_key);
        if let Some(endpoint) = &options.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| ReportsError::Config(format!("hosted storage: {e}")))?;
        info!("Hosted report storage bucket {}", options.bucket);

        Ok(Self::new(Arc::new(store), public_base_url, transform_base_url))
    }

    fn object_path(patient: &PatientKey, file_name: &str) -> Path {
        Path::from(format!("{}/{}", patient, file_name))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    /// PDF 取首页、视频取首帧作为缩略图，图片本身即可预览
    fn thumbnail_url(&self, kind: MediaKind, key: &str) -> Option<String> {
        let base = self.transform_base_url.as_deref()?;
        let stem = key.rsplit_once('.').map_or(key, |(stem, _)| stem);
        match kind {
            MediaKind::Pdf => Some(format!("{base}/image/upload/pg_1,w_300,c_limit/{stem}.jpg")),
            MediaKind::Video => Some(format!("{base}/video/upload/so_0,w_300,c_limit/{stem}.jpg")),
            MediaKind::Image => None,
        }
    }

    fn describe(&self, meta: &ObjectMeta) -> Option<StoredReport> {
        let key = meta.location.as_ref();
        let (patient, file_name) = key.split_once('/')?;
        if file_name.contains('/') || parse_patient_key(patient).is_err() {
            debug!("Skipping foreign object {}", key);
            return None;
        }
        let kind = extension_of(file_name).and_then(|ext| MediaKind::from_extension(&ext))?;

        Some(StoredReport {
            patient: patient.to_string(),
            file_name: file_name.to_string(),
            storage_id: key.to_string(),
            kind,
            size: meta.size as u64,
            uploaded_at: meta.last_modified,
            url: Some(self.public_url(key)),
            thumbnail_url: self.thumbnail_url(kind, key),
        })
    }

    async fn list_objects(&self, prefix: Option<&Path>) -> Result<Vec<ObjectMeta>> {
        self.store
            .list(prefix)
            .try_collect::<Vec<_>>()
            .await
            .map_err(map_store_error)
    }
}

#[async_trait]
impl ReportStorage for HostedStorage {
    fn backend_name(&self) -> &'static str {
        "hosted"
    }

    async fn write(
        &self,
        patient: &PatientKey,
        extension: &str,
        kind: MediaKind,
        data: Bytes,
    ) -> Result<StoredReport> {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "{}_{}_{}.{}",
            patient,
            now.format("%Y%m%d%H%M%S"),
            &suffix[..8],
            extension
        );
        let location = Self::object_path(patient, &file_name);
        let size = data.len() as u64;

        self.store
            .put(&location, data)
            .await
            .map_err(map_store_error)?;
        debug!("Uploaded {} ({} bytes)", location, size);

        let key = location.as_ref();
        Ok(StoredReport {
            patient: patient.to_string(),
            file_name,
            storage_id: key.to_string(),
            kind,
            size,
            uploaded_at: now,
            url: Some(self.public_url(key)),
            thumbnail_url: self.thumbnail_url(kind, key),
        })
    }

    async fn list(&self, patient: &PatientKey) -> Result<Vec<StoredReport>> {
        let prefix = Path::from(patient.as_str());
        let objects = self.list_objects(Some(&prefix)).await?;
        Ok(objects
            .iter()
            .filter_map(|meta| self.describe(meta))
            .filter(|report| report.patient == patient.as_str())
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<PatientReports>> {
        let objects = self.list_objects(None).await?;

        let mut listing: Vec<PatientReports> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for report in objects.iter().filter_map(|meta| self.describe(meta)) {
            match positions.get(&report.patient) {
                Some(&pos) => listing[pos].files.push(report),
                None => {
                    positions.insert(report.patient.clone(), listing.len());
                    listing.push(PatientReports {
                        patient: report.patient.clone(),
                        files: vec![report],
                    });
                }
            }
        }
        Ok(listing)
    }

    async fn read(&self, patient: &PatientKey, file_name: &str) -> Result<Bytes> {
        if !is_plain_file_name(file_name) {
            return Err(ReportsError::not_found(file_name));
        }

        let location = Self::object_path(patient, file_name);
        let object = self.store.get(&location).await.map_err(map_store_error)?;
        object.bytes().await.map_err(map_store_error)
    }

    async fn delete(&self, patient: &PatientKey, file_name: &str) -> Result<bool> {
        if !is_plain_file_name(file_name) {
            return Ok(false);
        }

        let location = Self::object_path(patient, file_name);
        match self.store.head(&location).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(map_store_error(e)),
        }

        self.store
            .delete(&location)
            .await
            .map_err(map_store_error)?;
        info!("Deleted hosted report {}", location);
        Ok(true)
    }
}
