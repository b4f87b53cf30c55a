//! # Reports Web
//!
//! HTTP 接口：上传表单、医生登录会话、报告目录、预览、删除与打包下载。

pub mod auth;
pub mod handlers;
pub mod server;

pub use auth::{AuthService, PasswordHash};
pub use server::{create_app, AppState, WebServer};
