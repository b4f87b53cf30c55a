//! # Reports Core
//!
//! 门诊报告系统的核心模块，提供基础数据结构、错误定义和患者名/文件类型校验。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{ReportsError, Result};
pub use models::*;
pub use utils::{
    extension_of, is_plain_file_name, parse_patient_key, sanitize_patient_name, FileTypeFilter,
    PatientKey,
};
