//! HTTP处理器

use crate::server::AppState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    Form,
};
use reports_core::{extension_of, parse_patient_key, MediaKind, ReportsError};
use reports_storage::{load_catalog, UploadedFile, REJECTED_FILE_REASON};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

/// 把核心错误映射为 HTTP 响应
#[derive(Debug)]
pub struct ApiError(pub ReportsError);

impl From<ReportsError> for ApiError {
    fn from(err: ReportsError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ReportsError::Validation(_) => StatusCode::BAD_REQUEST,
            ReportsError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ReportsError::NotFound(_) | ReportsError::NothingToExport(_) => StatusCode::NOT_FOUND,
            ReportsError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const UPLOAD_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Upload Reports</title></head>
<body>
  <h1>Upload Patient Reports</h1>
  <form action="/" method="post" enctype="multipart/form-data">
    <input type="text" name="patient" placeholder="Patient name" required>
    <input type="file" name="report" multiple required>
    <button type="submit">Upload</button>
  </form>
  <p><a href="/login">Doctor login</a></p>
</body>
</html>
"#;

fn login_page(error: Option<&str>, message: Option<&str>) -> Html<String> {
    let mut notice = String::new();
    if let Some(message) = message {
        notice.push_str(&format!("<p class=\"success\">{}</p>", escape_html(message)));
    }
    if let Some(error) = error {
        notice.push_str(&format!("<p class=\"error\">{}</p>", escape_html(error)));
    }

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Doctor Login</title></head>
<body>
  <h1>Doctor Login</h1>
  {notice}
  <form action="/login" method="post">
    <input type="password" name="password" placeholder="Password" required>
    <button type="submit">Login</button>
  </form>
</body>
</html>
"#
    ))
}

/// 健康检查处理器
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "storage": state.storage.backend_name(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// 上传表单
pub async fn upload_form() -> Html<&'static str> {
    Html(UPLOAD_PAGE)
}

fn malformed(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError(ReportsError::validation(format!("Malformed upload: {err}")))
}

/// 接收 multipart 上传：`patient` 字段加一个或多个 `report` 文件
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut patient = String::new();
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("patient") => patient = field.text().await.map_err(malformed)?,
            Some("report") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(malformed)?;
                files.push(UploadedFile { file_name, data });
            }
            _ => {}
        }
    }

    let outcome = state.uploads.upload_batch(&patient, files).await?;
    if outcome.uploaded_count() == 0 {
        let rejected_only = outcome
            .failures
            .iter()
            .all(|failure| failure.reason == REJECTED_FILE_REASON);
        let (status, message) = if rejected_only {
            (StatusCode::BAD_REQUEST, REJECTED_FILE_REASON)
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "No files could be stored.")
        };
        return Ok((
            status,
            Json(json!({ "error": message, "failures": outcome.failures })),
        )
            .into_response());
    }

    Ok(Json(json!({
        "success": outcome.success_message(),
        "uploaded": outcome.uploaded,
        "failures": outcome.failures,
    }))
    .into_response())
}

/// 登录表单
pub async fn login_form(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    let message = state.auth.take_flash(&headers).await;
    login_page(None, message.as_deref())
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub password: String,
}

/// 登录处理器
pub async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> ApiResult<Response> {
    if !state.auth.verify_password(&form.password) {
        warn!("Rejected doctor login");
        return Ok((
            StatusCode::UNAUTHORIZED,
            login_page(Some("Invalid password."), None),
        )
            .into_response());
    }

    // 登录后总是换发新的会话
    state.auth.end_session(&headers).await;
    let cookie = state.auth.start_session(true, None).await?;
    info!("Doctor logged in");

    Ok(([(header::SET_COOKIE, cookie)], Redirect::to("/reports")).into_response())
}

/// 注销
pub async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    // 没有会话可注销时不创建新的服务端状态
    if !state.auth.end_session(&headers).await {
        return Ok(Redirect::to("/login").into_response());
    }
    let cookie = state
        .auth
        .start_session(false, Some("You have been logged out successfully.".to_string()))
        .await?;

    Ok(([(header::SET_COOKIE, cookie)], Redirect::to("/login")).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ReportsQuery {
    pub search: Option<String>,
}

/// 报告目录
pub async fn reports_handler(
    State(state): State<AppState>,
    Query(query): Query<ReportsQuery>,
) -> ApiResult<Response> {
    let catalog = load_catalog(state.storage.as_ref(), query.search.as_deref()).await?;
    Ok(Json(catalog).into_response())
}

/// 预览单个报告
pub async fn preview_handler(
    State(state): State<AppState>,
    Path((patient, file_name)): Path<(String, String)>,
) -> ApiResult<Response> {
    let patient = parse_patient_key(&patient)?;
    let data = state.storage.read(&patient, &file_name).await?;

    let content_type = extension_of(&file_name)
        .map_or("application/octet-stream", |ext| MediaKind::content_type(&ext));
    let disposition = format!("inline; filename=\"{}\"", file_name);

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

async fn delete_report(state: &AppState, patient: &str, file_name: &str) -> ApiResult<Redirect> {
    // 不存在的患者或文件按无操作处理
    if let Ok(patient) = parse_patient_key(patient) {
        if !state.storage.delete(&patient, file_name).await? {
            info!("Delete of missing report {}/{} ignored", patient, file_name);
        }
    }
    Ok(Redirect::to("/reports"))
}

/// 删除报告（路径参数）
pub async fn delete_handler(
    State(state): State<AppState>,
    Path((patient, file_name)): Path<(String, String)>,
) -> ApiResult<Redirect> {
    delete_report(&state, &patient, &file_name).await
}

#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    pub patient: String,
    pub filename: String,
}

/// 删除报告（表单）
pub async fn delete_form_handler(
    State(state): State<AppState>,
    Form(form): Form<DeleteForm>,
) -> ApiResult<Redirect> {
    delete_report(&state, &form.patient, &form.filename).await
}

/// 下载患者全部报告的压缩包
pub async fn download_patient_handler(
    State(state): State<AppState>,
    Path(patient): Path<String>,
) -> ApiResult<Response> {
    let patient = parse_patient_key(&patient)?;
    let export = state.exporter.export_patient(&patient).await?;

    let disposition = format!("attachment; filename=\"{}\"", export.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.data,
    )
        .into_response())
}
