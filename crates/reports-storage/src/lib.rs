//! # Reports Storage
//!
//! 报告文件的存储后端（本地目录 / 托管对象存储）、批量上传、目录构建与按患者打包导出。

pub mod archive;
pub mod catalog;
pub mod hosted;
pub mod local;
pub mod storage;
pub mod upload;

pub use archive::*;
pub use catalog::*;
pub use hosted::*;
pub use local::*;
pub use storage::*;
pub use upload::*;
