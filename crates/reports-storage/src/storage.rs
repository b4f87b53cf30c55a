//! 存储后端抽象

use async_trait::async_trait;
use bytes::Bytes;
use reports_core::{MediaKind, PatientKey, PatientReports, Result, StoredReport};

/// 报告存储后端
///
/// 只有存储后端会写入或删除报告文件；文件名由后端根据患者 key 派生。
#[async_trait]
pub trait ReportStorage: Send + Sync {
    /// 后端名称，用于日志
    fn backend_name(&self) -> &'static str;

    /// 写入一个报告文件，`extension` 为已校验的小写扩展名
    async fn write(
        &self,
        patient: &PatientKey,
        extension: &str,
        kind: MediaKind,
        data: Bytes,
    ) -> Result<StoredReport>;

    /// 列出某个患者的全部报告
    async fn list(&self, patient: &PatientKey) -> Result<Vec<StoredReport>>;

    /// 列出全部患者及其报告，顺序与后端一致
    async fn list_all(&self) -> Result<Vec<PatientReports>>;

    /// 读取报告内容
    async fn read(&self, patient: &PatientKey, file_name: &str) -> Result<Bytes>;

    /// 删除报告，文件不存在时返回 `false`
    async fn delete(&self, patient: &PatientKey, file_name: &str) -> Result<bool>;
}
