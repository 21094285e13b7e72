use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use vanish_api::auth::AppStateInner;
use vanish_core::{ContentService, DeletePolicy, ServiceConfig, Storage};
use vanish_db::Database;

const SECRET: &str = "integration-test-secret";
const BOUNDARY: &str = "vanishtestboundary";

struct TestApp {
    router: Router,
    _dir: tempfile::TempDir,
}

async fn app_with(delete_policy: DeletePolicy) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("vanish.db")).unwrap());
    let storage = Arc::new(Storage::new(dir.path().join("uploads")).await.unwrap());
    let service = ContentService::new(
        db.clone(),
        storage,
        ServiceConfig {
            share_base: "http://share.test/".to_string(),
            delete_policy,
        },
    );
    let state = Arc::new(AppStateInner {
        service,
        db,
        jwt_secret: SECRET.to_string(),
    });
    TestApp {
        router: vanish_api::router(state, 1024 * 1024),
        _dir: dir,
    }
}

async fn app() -> TestApp {
    app_with(DeletePolicy::OwnerOnly).await
}

enum Part<'a> {
    Field(&'a str, &'a str),
    File { name: &'a str, mime: &'a str, bytes: &'a [u8] },
}

fn multipart(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Field(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File { name, mime, bytes } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                         Content-Type: {}\r\n\r\n",
                        name, mime
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

impl TestApp {
    async fn send(&self, req: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec(), headers)
    }

    async fn json(&self, req: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes, _) = self.send(req).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn upload(&self, parts: &[Part<'_>], token: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.json(req.body(Body::from(multipart(parts))).unwrap()).await
    }

    async fn peek(&self, id: &str, password: Option<&str>) -> (StatusCode, Value) {
        let body = match password {
            Some(pw) => json!({ "password": pw }).to_string(),
            None => String::new(),
        };
        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/content/{}", id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        self.json(req).await
    }

    async fn download(&self, path: &str) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
        let req = Request::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap();
        self.send(req).await
    }

    async fn authed(&self, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.json(req.body(Body::empty()).unwrap()).await
    }

    async fn register(&self, name: &str, email: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri("/api/auth/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "name": name, "email": email, "password": "hunter22" }).to_string(),
            ))
            .unwrap();
        self.json(req).await
    }

    async fn token(&self, name: &str, email: &str) -> String {
        let (status, body) = self.register(name, email).await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["token"].as_str().unwrap().to_string()
    }
}

fn unique_id(body: &Value) -> String {
    body["data"]["uniqueId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_ok() {
    let app = app().await;
    let (status, body) = app.authed("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn text_upload_and_view() {
    let app = app().await;
    let (status, body) = app.upload(&[Part::Field("text", "hello there")], None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["type"], "text");
    let id = unique_id(&body);
    assert_eq!(id.len(), 10);
    assert_eq!(
        body["data"]["shareLink"],
        format!("http://share.test/view/{}", id)
    );

    let (status, body) = app.peek(&id, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["textContent"], "hello there");
    assert_eq!(body["data"]["viewCount"], 1);
    assert!(body["data"].get("passwordHash").is_none());
}

#[tokio::test]
async fn upload_needs_exactly_one_body() {
    let app = app().await;
    let (status, body) = app.upload(&[Part::Field("expiryMinutes", "5")], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "InvalidInput");

    let (status, _) = app
        .upload(
            &[
                Part::Field("text", "both"),
                Part::File { name: "a.txt", mime: "text/plain", bytes: b"and a file" },
            ],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .upload(&[Part::Field("text", "x"), Part::Field("maxViews", "0")], None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInput");
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let app = app().await;
    let (status, body) = app.peek("doesnotexs", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn password_gate() {
    let app = app().await;
    let (_, body) = app
        .upload(
            &[Part::Field("text", "secret note"), Part::Field("password", "secret123")],
            None,
        )
        .await;
    let id = unique_id(&body);

    let (status, body) = app.peek(&id, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "NeedsPassword");
    assert_eq!(body["requiresPassword"], true);

    let (status, body) = app.peek(&id, Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "BadPassword");
    assert!(body.get("requiresPassword").is_none());

    let (status, body) = app.peek(&id, Some("secret123")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["textContent"], "secret note");
    assert_eq!(body["data"]["viewCount"], 1);
}

#[tokio::test]
async fn max_views_then_forbidden() {
    let app = app().await;
    let (_, body) = app
        .upload(&[Part::Field("text", "limited"), Part::Field("maxViews", "2")], None)
        .await;
    let id = unique_id(&body);

    assert_eq!(app.peek(&id, None).await.0, StatusCode::OK);
    assert_eq!(app.peek(&id, None).await.0, StatusCode::OK);
    let (status, body) = app.peek(&id, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Exhausted");
}

#[tokio::test]
async fn one_time_text_then_gone() {
    let app = app().await;
    let (_, body) = app
        .upload(&[Part::Field("text", "once"), Part::Field("oneTimeView", "true")], None)
        .await;
    let id = unique_id(&body);

    let (status, body) = app.peek(&id, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["textContent"], "once");
    assert_eq!(app.peek(&id, None).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn one_time_file_metadata_then_single_download() {
    let app = app().await;
    let (status, body) = app
        .upload(
            &[
                Part::File { name: "report.pdf", mime: "application/pdf", bytes: b"%PDF-1.7 data" },
                Part::Field("oneTimeView", "true"),
            ],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["type"], "file");
    let id = unique_id(&body);

    let (status, body) = app.peek(&id, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fileName"], "report.pdf");
    assert_eq!(body["data"]["fileType"], "application/pdf");
    assert_eq!(body["data"]["fileSize"], 13);
    assert_eq!(body["data"]["textContent"], Value::Null);

    let (status, bytes, headers) = app.download(&format!("/api/download/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"%PDF-1.7 data");
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert!(
        headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment; filename=\"report.pdf\"")
    );

    let (status, _, _) = app.download(&format!("/api/download/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.peek(&id, None).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_of_text_is_bad_request() {
    let app = app().await;
    let (_, body) = app.upload(&[Part::Field("text", "words")], None).await;
    let (status, bytes, _) = app
        .download(&format!("/api/download/{}", unique_id(&body)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "InvalidInput");
}

#[tokio::test]
async fn download_with_password_in_query() {
    let app = app().await;
    let (_, body) = app
        .upload(
            &[
                Part::File { name: "k.bin", mime: "application/octet-stream", bytes: b"\x00\x01\x02" },
                Part::Field("password", "pw123456"),
            ],
            None,
        )
        .await;
    let id = unique_id(&body);

    let (status, _, _) = app.download(&format!("/api/download/{}", id)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, bytes, _) = app
        .download(&format!("/api/download/{}?password=pw123456", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"\x00\x01\x02");
}

#[tokio::test]
async fn expired_then_not_found() {
    let app = app().await;
    let (_, body) = app
        .upload(&[Part::Field("text", "fleeting"), Part::Field("expiryMinutes", "0")], None)
        .await;
    let id = unique_id(&body);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let (status, body) = app.peek(&id, None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "Expired");
    assert_eq!(app.peek(&id, None).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn accounts_register_login_me() {
    let app = app().await;
    let (status, body) = app.register("Ada", "Ada@Example.com").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["user"]["email"], "ada@example.com");
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = app.register("Ada again", "ada@example.com").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let login = |password: &str| {
        Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "email": "ADA@example.com", "password": password }).to_string(),
            ))
            .unwrap()
    };
    assert_eq!(app.json(login("nope")).await.0, StatusCode::UNAUTHORIZED);
    let (status, body) = app.json(login("hunter22")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["token"].is_string());

    let (status, body) = app.authed("GET", "/api/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["name"], "Ada");
    assert!(body["data"]["user"].get("password").is_none());

    assert_eq!(
        app.authed("GET", "/api/auth/me", None).await.0,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn short_password_rejected() {
    let app = app().await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "name": "Bo", "email": "bo@example.com", "password": "12345" }).to_string(),
        ))
        .unwrap();
    let (status, body) = app.json(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInput");
}

#[tokio::test]
async fn dashboard_lists_and_deactivates() {
    let app = app().await;
    let alice = app.token("Alice", "alice@example.com").await;
    let bob = app.token("Bob", "bob@example.com").await;

    let (_, body) = app
        .upload(&[Part::Field("text", "first")], Some(&alice))
        .await;
    let first = unique_id(&body);
    let (_, body) = app
        .upload(
            &[Part::File { name: "pic.png", mime: "image/png", bytes: b"\x89PNG" }],
            Some(&alice),
        )
        .await;
    let file = unique_id(&body);
    app.upload(&[Part::Field("text", "bob's")], Some(&bob)).await;
    app.upload(&[Part::Field("text", "anonymous")], None).await;

    let uri = format!("/api/dashboard/links/{}/deactivate", file);
    let (status, _) = app.authed("PATCH", &uri, Some(&bob)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.authed("PATCH", &uri, Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Link deactivated successfully");
    let (status, body) = app.authed("PATCH", &uri, Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Link is already deactivated");

    let (status, body) = app.authed("GET", "/api/dashboard/links", Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["counts"],
        json!({ "active": 1, "expired": 0, "deactivated": 1 })
    );
    let links = body["data"]["links"].as_array().unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(links[0]["uniqueId"], file.as_str());
    assert_eq!(links[0]["status"], "deactivated");
    assert_eq!(links[0]["fileName"], "pic.png");
    assert_eq!(links[1]["uniqueId"], first.as_str());
    assert_eq!(links[1]["status"], "active");

    // the content itself is gone
    assert_eq!(app.peek(&file, None).await.0, StatusCode::NOT_FOUND);

    assert_eq!(
        app.authed("GET", "/api/dashboard/links", None).await.0,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn delete_is_owner_scoped() {
    let app = app().await;
    let alice = app.token("Alice", "alice@example.com").await;
    let bob = app.token("Bob", "bob@example.com").await;

    let (_, body) = app.upload(&[Part::Field("text", "mine")], Some(&alice)).await;
    let owned = unique_id(&body);
    let (_, body) = app.upload(&[Part::Field("text", "nobody's")], None).await;
    let anonymous = unique_id(&body);

    let uri = format!("/api/content/{}", owned);
    assert_eq!(app.authed("DELETE", &uri, Some(&bob)).await.0, StatusCode::NOT_FOUND);
    assert_eq!(app.authed("DELETE", &uri, None).await.0, StatusCode::NOT_FOUND);
    let (status, body) = app.authed("DELETE", &uri, Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Content deleted successfully");
    assert_eq!(app.peek(&owned, None).await.0, StatusCode::NOT_FOUND);

    let uri = format!("/api/content/{}", anonymous);
    assert_eq!(app.authed("DELETE", &uri, None).await.0, StatusCode::NOT_FOUND);
    assert_eq!(app.peek(&anonymous, None).await.0, StatusCode::OK);
}

#[tokio::test]
async fn anonymous_delete_when_enabled() {
    let app = app_with(DeletePolicy::AllowAnonymous).await;
    let (_, body) = app.upload(&[Part::Field("text", "nobody's")], None).await;
    let id = unique_id(&body);

    let uri = format!("/api/content/{}", id);
    assert_eq!(app.authed("DELETE", &uri, None).await.0, StatusCode::OK);
    assert_eq!(app.peek(&id, None).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_token_uploads_anonymously() {
    let app = app().await;
    let (status, body) = app
        .upload(&[Part::Field("text", "hi")], Some("not-a-real-token"))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["uniqueId"].is_string());
}
