//! Web服务器

use crate::auth::{require_session, AuthService};
use crate::handlers::{
    delete_form_handler, delete_handler, download_patient_handler, health, login_form,
    login_handler, logout_handler, preview_handler, reports_handler, upload_form, upload_handler,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use reports_core::Result;
use reports_storage::{ArchiveExporter, ReportStorage, UploadService};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// 请求处理共享状态，启动时构建一次
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn ReportStorage>,
    pub uploads: UploadService,
    pub exporter: ArchiveExporter,
    pub auth: Arc<AuthService>,
}

pub fn create_app(state: AppState, max_upload_bytes: usize) -> Router {
    // 需要登录的路由
    let protected = Router::new()
        .route("/reports", get(reports_handler))
        .route("/uploads/:patient/:filename", get(preview_handler))
        .route("/delete", post(delete_form_handler))
        .route(
            "/delete/:patient/:filename",
            get(delete_handler).post(delete_handler),
        )
        .route("/download-patient/:patient", get(download_patient_handler))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_session,
        ));

    Router::new()
        .route("/", get(upload_form).post(upload_handler))
        .route("/login", get(login_form).post(login_handler))
        .route("/logout", get(logout_handler))
        .route("/health", get(health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState, max_upload_bytes: usize) -> Self {
        Self {
            addr,
            app: create_app(state, max_upload_bytes),
        }
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("Starting web server on {}", self.addr);

        axum::serve(listener, self.app).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PasswordHash;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use reports_core::FileTypeFilter;
    use object_store::local::LocalFileSystem;
    use reports_storage::{HostedStorage, LocalStorage};
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "----reports-test-boundary";

    fn app_with_storage(storage: Arc<dyn ReportStorage>) -> (Router, Arc<AuthService>) {
        let auth = Arc::new(AuthService::new(
            PasswordHash::generate("doctor").unwrap(),
            None,
            60,
            "reports_session",
        ));
        let state = AppState {
            uploads: UploadService::new(storage.clone(), FileTypeFilter::default()),
            exporter: ArchiveExporter::new(storage.clone()),
            auth: auth.clone(),
            storage,
        };
        (create_app(state, 1024 * 1024), auth)
    }

    async fn test_app() -> (Router, TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(tmp.path().join("uploads")).await.unwrap());
        let (app, _auth) = app_with_storage(storage);
        (app, tmp)
    }

    fn multipart_body(patient: &str, files: &[(&str, &[u8])]) -> Body {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"patient\"\r\n\r\n{patient}\r\n"
            )
            .as_bytes(),
        );
        for (name, data) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"report\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    async fn upload(app: &Router, patient: &str, files: &[(&str, &[u8])]) -> Response {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(multipart_body(patient, files))
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn login(app: &Router, password: &str) -> Response {
        let request = Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("password={password}")))
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    fn session_cookie(response: &Response) -> String {
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    async fn get(app: &Router, uri: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        app.clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn test_reports_requires_login() {
        let (app, _tmp) = test_app().await;

        let response = get(&app, "/reports", None).await;
        assert!(response.status().is_redirection());
        assert_eq!(location(&response), "/login");

        let response = get(&app, "/download-patient/DOE", Some("reports_session=bogus.00")).await;
        assert!(response.status().is_redirection());
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let (app, _tmp) = test_app().await;

        let response = login(&app, "nurse").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_upload_list_delete_flow() {
        let (app, tmp) = test_app().await;

        let response = upload(
            &app,
            "Smith John",
            &[
                ("scan.pdf", b"%PDF-1.4"),
                ("payload.exe", b"MZ"),
                ("xray.jpg", b"jpeg"),
            ],
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(
            body["success"],
            "2 file(s) uploaded successfully for SMITH_JOHN."
        );
        assert_eq!(body["failures"].as_array().unwrap().len(), 1);

        let response = login(&app, "doctor").await;
        assert!(response.status().is_redirection());
        assert_eq!(location(&response), "/reports");
        let cookie = session_cookie(&response);

        let response = get(&app, "/reports?search=smith", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let catalog = json_body(response).await;
        assert_eq!(catalog["total_patients"], 1);
        assert_eq!(catalog["total_files"], 2);

        let response = get(&app, "/uploads/SMITH_JOHN/SMITH_JOHN_1.pdf", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/pdf"
        );

        let response = get(&app, "/download-patient/SMITH_JOHN", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(archive.len(), 2);

        for name in ["SMITH_JOHN_1.pdf", "SMITH_JOHN_2.jpg"] {
            let response = get(&app, &format!("/delete/SMITH_JOHN/{name}"), Some(&cookie)).await;
            assert_eq!(location(&response), "/reports");
        }
        assert!(!tmp.path().join("uploads").join("SMITH_JOHN").exists());

        let catalog = json_body(get(&app, "/reports", Some(&cookie)).await).await;
        assert_eq!(catalog["total_patients"], 0);

        let response = get(&app, "/download-patient/SMITH_JOHN", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_validation_errors() {
        let (app, _tmp) = test_app().await;

        let response = upload(&app, "!!!", &[("scan.pdf", b"pdf")]).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Invalid patient name.");

        let response = upload(&app, "doe", &[("notes.txt", b"txt")]).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "File type not allowed or invalid file."
        );

        let response = upload(&app, "doe", &[]).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No files selected.");
    }

    #[tokio::test]
    async fn test_logout_clears_session_and_sets_flash() {
        let (app, _tmp) = test_app().await;
        let cookie = session_cookie(&login(&app, "doctor").await);

        let response = get(&app, "/logout", Some(&cookie)).await;
        assert_eq!(location(&response), "/login");
        let flash_cookie = session_cookie(&response);

        let response = get(&app, "/reports", Some(&cookie)).await;
        assert!(response.status().is_redirection());

        let response = get(&app, "/login", Some(&flash_cookie)).await;
        let page = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8(page.to_vec()).unwrap();
        assert!(page.contains("You have been logged out successfully."));
    }

    #[tokio::test]
    async fn test_anonymous_logout_keeps_no_state() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(tmp.path()).await.unwrap());
        let (app, auth) = app_with_storage(storage);

        for _ in 0..50 {
            let response = get(&app, "/logout", None).await;
            assert_eq!(location(&response), "/login");
            assert!(response.headers().get(header::SET_COOKIE).is_none());
        }
        let response = get(&app, "/logout", Some("reports_session=forged.00")).await;
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(auth.session_count().await, 0);

        // 注销只把登录会话换成一个提示会话，读取提示后即清除
        let cookie = session_cookie(&login(&app, "doctor").await);
        let flash_cookie = session_cookie(&get(&app, "/logout", Some(&cookie)).await);
        assert_eq!(auth.session_count().await, 1);
        get(&app, "/login", Some(&flash_cookie)).await;
        assert_eq!(auth.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_hosted_failures_map_to_status_codes() {
        let tmp = tempfile::tempdir().unwrap();
        // 患者前缀被普通文件占用，托管存储写入必然失败
        std::fs::write(tmp.path().join("ROE"), b"blocker").unwrap();
        let store = LocalFileSystem::new_with_prefix(tmp.path()).unwrap();
        let storage = Arc::new(HostedStorage::new(
            Arc::new(store),
            "https://media.example.com",
            None,
        ));
        let (app, _auth) = app_with_storage(storage);

        let response = upload(&app, "roe", &[("scan.pdf", b"%PDF"), ("xray.png", b"png")]).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["error"], "No files could be stored.");
        assert_eq!(body["failures"].as_array().unwrap().len(), 2);

        let cookie = session_cookie(&login(&app, "doctor").await);
        let response = get(&app, "/uploads/DOE/DOE_1.pdf", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preview_rejects_traversal() {
        let (app, _tmp) = test_app().await;
        let cookie = session_cookie(&login(&app, "doctor").await);

        let response = get(&app, "/uploads/..%2F/secret.pdf", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get(&app, "/uploads/DOE/missing.pdf", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
