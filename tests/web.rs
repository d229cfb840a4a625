#![cfg(feature = "web")]

mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use axum::Router;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use finance_dashboard::app::{self, AppState};
use finance_dashboard::config::Settings;

const BOUNDARY: &str = "finance-dashboard-test-boundary";

fn test_app(auth_required: bool) -> (Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.auth.required = auth_required;
    settings.auth.users_file = temp_dir.path().join("users.json");

    let state = AppState::new(settings).unwrap();
    (app::router(Arc::new(state)), temp_dir)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_upload(uri: &str, file_name: &str, bytes: &[u8], cookie: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        b"Content-Type: application/vnd.openxmlformats-officedocument.spreadsheetml.sheet\r\n\r\n",
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    let mut builder = Request::builder().method("POST").uri(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={}", BOUNDARY),
    );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

/// `name=value` part of the response's session cookie
fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("finance_session="))
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let (app, _dir) = test_app(true);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_requires_a_session_when_auth_is_on() {
    let (app, _dir) = test_app(true);

    let response = app.oneshot(get("/api/dashboard")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn dashboard_redirects_anonymous_visitors_to_login() {
    let (app, _dir) = test_app(true);

    let response = app.oneshot(get("/dashboard")).await.unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn register_then_login_opens_the_dashboard() {
    let (app, _dir) = test_app(true);

    let response = app
        .clone()
        .oneshot(form(
            "/register",
            "username=anna&name=%D0%90%D0%BD%D0%BD%D0%B0&email=anna%40example.com\
             &password=secret1&password_repeat=secret1",
        ))
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/login?registered=true");

    let response = app
        .clone()
        .oneshot(form("/login", "username=anna&password=wrong"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(form("/login", "username=anna&password=secret1"))
        .await
        .unwrap();
    assert_eq!(location(&response), "/dashboard");
    let cookie = session_cookie(&response).expect("session cookie");

    let request = Request::builder()
        .uri("/dashboard")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn mismatched_passwords_are_rejected() {
    let (app, _dir) = test_app(true);

    let response = app
        .oneshot(form(
            "/register",
            "username=anna&name=Anna&email=anna%40example.com&password=one&password_repeat=two",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_without_auth_stores_the_dataset_for_the_session() {
    let (app, _dir) = test_app(false);

    let response = app
        .clone()
        .oneshot(multipart_upload("/api/upload", "finance.xlsx", &common::sample_workbook(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("anonymous session cookie");
    let report = json_body(response).await;
    assert_eq!(report["file_name"], "finance.xlsx");
    assert_eq!(report["row_errors"].as_array().map(Vec::len), Some(0));

    let request = Request::builder()
        .uri("/api/dashboard?range=MAX")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let dashboard = json_body(response).await;
    assert_eq!(dashboard["file_name"], "finance.xlsx");
}

#[tokio::test]
async fn rejected_upload_lists_schema_errors() {
    let (app, _dir) = test_app(false);
    let bytes = common::xlsx(vec![common::sheet("Sheet1", &["A"], vec![])]);

    let response = app
        .oneshot(multipart_upload("/api/upload", "wrong.xlsx", &bytes, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["schema_errors"].as_array().map(Vec::len), Some(4));
}

#[tokio::test]
async fn dashboard_api_without_upload_is_not_found() {
    let (app, _dir) = test_app(false);

    let response = app.oneshot(get("/api/dashboard")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn template_download_is_an_xlsx_file() {
    let (app, _dir) = test_app(true);

    let response = app.oneshot(get("/template.xlsx")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    // xlsx is a zip archive
    assert_eq!(&bytes[..2], b"PK");
}
