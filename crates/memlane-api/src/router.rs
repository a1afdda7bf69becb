use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::services::ServeDir;

use crate::media::{MAX_FILE_SIZE, MAX_FILES};
use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, memories, share, uploads};

/// Request body limit of the upload route: a full batch plus multipart framing.
pub const UPLOAD_BODY_LIMIT: usize = MAX_FILES * MAX_FILE_SIZE + 1024 * 1024;

/// Build every route of the API. Cross-cutting layers (CORS, tracing) are
/// added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/shared/{token}/memories", get(share::shared_memories))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route(
            "/upload",
            post(uploads::upload_images).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/memories",
            get(memories::list_memories).post(memories::create_memory),
        )
        .route(
            "/memories/{id}",
            get(memories::get_memory)
                .put(memories::update_memory)
                .delete(memories::delete_memory),
        )
        .route("/share-token", post(share::create_share_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let uploads_dir = ServeDir::new(state.media.dir());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/uploads", uploads_dir)
        .with_state(state)
}

/// GET /health: liveness check (no auth).
pub async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::Duration;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use memlane_db::Database;

    use super::*;
    use crate::auth::PasswordPolicy;
    use crate::media::MediaStore;
    use crate::state::AppStateInner;
    use crate::tokens::TokenKeys;

    const SECRET: &str = "router-test-secret";
    const BOUNDARY: &str = "memlane-test-boundary";

    struct TestApp {
        app: Router,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    async fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            media: MediaStore::new(dir.path().join("uploads")).await.unwrap(),
            tokens: TokenKeys::new(SECRET, Duration::hours(1), Duration::hours(1)),
            passwords: PasswordPolicy::new(1).unwrap(),
        });
        TestApp {
            app: router(state.clone()),
            state,
            _dir: dir,
        }
    }

    impl TestApp {
        async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let resp = self.app.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
                .await
                .unwrap();
            let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
            (status, json)
        }

        async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
            let mut req = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(token) = token {
                req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            self.send(req.body(Body::from(body.to_string())).unwrap()).await
        }

        async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
            let mut req = Request::builder().uri(uri);
            if let Some(token) = token {
                req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            self.send(req.body(Body::empty()).unwrap()).await
        }

        async fn register(&self, username: &str) -> String {
            let (status, body) = self
                .json(
                    "POST",
                    "/register",
                    None,
                    json!({
                        "username": username,
                        "email": format!("{}@example.com", username),
                        "password": "correct horse battery",
                    }),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{}", body);
            body["token"].as_str().unwrap().to_string()
        }

        async fn upload(&self, token: &str, parts: &[(&str, &str, Vec<u8>)]) -> (StatusCode, Value) {
            let req = Request::builder()
                .method("POST")
                .uri("/upload")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(multipart_body(parts)))
                .unwrap();
            self.send(req).await
        }

        fn upload_count(&self) -> usize {
            std::fs::read_dir(self.state.media.dir()).unwrap().count()
        }
    }

    fn multipart_body(parts: &[(&str, &str, Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (filename, content_type, data) in parts {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    BOUNDARY, filename, content_type
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn image_refs(upload: &Value) -> Vec<Value> {
        upload["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| json!({ "url": f["url"], "originalName": f["originalName"] }))
            .collect()
    }

    #[tokio::test]
    async fn register_and_login() {
        let t = test_app().await;
        t.register("ann").await;

        let (status, _) = t
            .json("POST", "/register", None, json!({"username": "ann", "email": "new@example.com", "password": "long enough"}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = t
            .json("POST", "/register", None, json!({"username": "ann2"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("username, email, password"));

        let (status, body) = t
            .json("POST", "/login", None, json!({"username": "ann", "password": "correct horse battery"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].is_string());

        let (bad_pw, bad_pw_body) = t
            .json("POST", "/login", None, json!({"username": "ann", "password": "wrong password"}))
            .await;
        let (no_user, no_user_body) = t
            .json("POST", "/login", None, json!({"username": "zed", "password": "wrong password"}))
            .await;
        assert_eq!(bad_pw, StatusCode::UNAUTHORIZED);
        assert_eq!(no_user, StatusCode::UNAUTHORIZED);
        assert_eq!(bad_pw_body, no_user_body);

        let (status, _) = t.json("POST", "/login", None, json!({"username": "ann"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bearer_guard_distinguishes_missing_and_invalid() {
        let t = test_app().await;
        let token = t.register("ann").await;

        let (status, _) = t.get("/memories", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = t.get("/memories", Some("garbage")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (share_status, share) = t.json("POST", "/share-token", Some(&token), json!({})).await;
        assert_eq!(share_status, StatusCode::OK);
        let (status, _) = t.get("/memories", share["token"].as_str()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = t.get("/memories", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["memories"], json!([]));
    }

    #[tokio::test]
    async fn memory_lifecycle_with_image_reconciliation() {
        let t = test_app().await;
        let token = t.register("ann").await;

        let (status, upload) = t
            .upload(
                &token,
                &[
                    ("a.png", "image/png", vec![1; 16]),
                    ("b.jpg", "image/jpeg", vec![2; 16]),
                    ("c.gif", "image/gif", vec![3; 16]),
                ],
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", upload);
        let refs = image_refs(&upload);
        let names: Vec<String> = upload["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["filename"].as_str().unwrap().to_string())
            .collect();

        // Uploaded files are served statically
        let (status, _) = t.get(refs[0]["url"].as_str().unwrap(), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, created) = t
            .json(
                "POST",
                "/memories",
                Some(&token),
                json!({
                    "title": "Lake",
                    "description": "First swim of the year",
                    "timestamp": "2024-06-01",
                    "images": [refs[0], refs[1]],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", created);
        let id = created["id"].as_i64().unwrap();

        let (_, got) = t.get(&format!("/memories/{}", id), Some(&token)).await;
        assert_eq!(got["memory"]["title"], "Lake");
        assert_eq!(got["memory"]["timestamp"], "2024-06-01");
        assert_eq!(got["memory"]["images"].as_array().unwrap().len(), 2);
        let b_before = got["memory"]["images"][1].clone();

        let (status, _) = t
            .json(
                "PUT",
                &format!("/memories/{}", id),
                Some(&token),
                json!({
                    "title": "Lake again",
                    "description": "Second swim",
                    "timestamp": "2024-06-02",
                    "images": [refs[1], refs[2]],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, got) = t.get(&format!("/memories/{}", id), Some(&token)).await;
        let images = got["memory"]["images"].as_array().unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0], b_before);
        assert_eq!(images[1]["url"], refs[2]["url"]);

        // A's file is gone, B and C remain
        assert!(!t.state.media.exists(&names[0]));
        assert!(t.state.media.exists(&names[1]));
        assert!(t.state.media.exists(&names[2]));

        let uri = format!("/memories/{}", id);
        let (status, _) = t.json("DELETE", &uri, Some(&token), json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = t.json("DELETE", &uri, Some(&token), json!(null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Memory not found");
        assert_eq!(t.upload_count(), 0);
    }

    #[tokio::test]
    async fn create_validation_and_missing_uploads() {
        let t = test_app().await;
        let token = t.register("ann").await;

        let (status, _) = t
            .json("POST", "/memories", Some(&token), json!({"title": "Lake", "timestamp": "2024-06-01"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = t
            .json(
                "POST",
                "/memories",
                Some(&token),
                json!({
                    "title": "Lake",
                    "description": "Swim",
                    "timestamp": "2024-06-01",
                    "images": [{"url": "/uploads/123-456.png"}],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("123-456.png"));

        let (status, _) = t
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/memories")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, list) = t.get("/memories", Some(&token)).await;
        assert_eq!(list["memories"], json!([]));
    }

    #[tokio::test]
    async fn owners_cannot_touch_each_others_memories() {
        let t = test_app().await;
        let ann = t.register("ann").await;
        let bob = t.register("bob").await;

        let (_, created) = t
            .json(
                "POST",
                "/memories",
                Some(&ann),
                json!({"title": "Mine", "description": "Private", "timestamp": "2024-01-01"}),
            )
            .await;
        let uri = format!("/memories/{}", created["id"]);

        let (status, _) = t.get(&uri, Some(&bob)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = t
            .json("PUT", &uri, Some(&bob), json!({"title": "Yours", "description": "x", "timestamp": "2024-01-01"}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = t.json("DELETE", &uri, Some(&bob), json!(null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, list) = t.get("/memories", Some(&bob)).await;
        assert_eq!(list["memories"], json!([]));
        let (_, got) = t.get(&uri, Some(&ann)).await;
        assert_eq!(got["memory"]["title"], "Mine");
    }

    #[tokio::test]
    async fn share_token_reads_only_subject_memories() {
        let t = test_app().await;
        let ann = t.register("ann").await;
        let bob = t.register("bob").await;

        for (token, title, ts) in [(&ann, "Old", "2023-01-01"), (&ann, "New", "2024-01-01"), (&bob, "Bob's", "2024-02-02")] {
            let (status, _) = t
                .json("POST", "/memories", Some(token.as_str()), json!({"title": title, "description": "d", "timestamp": ts}))
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (_, share) = t.json("POST", "/share-token", Some(&ann), json!({})).await;
        let share_token = share["token"].as_str().unwrap();
        assert!(share["expiresAt"].is_string());

        let (status, body) = t.get(&format!("/shared/{}/memories", share_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let titles: Vec<&str> = body["memories"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["New", "Old"]);

        let (_, body) = t
            .get(&format!("/shared/{}/memories?order=asc", share_token), None)
            .await;
        assert_eq!(body["memories"][0]["title"], "Old");

        // No write surface under the shared prefix
        let (status, _) = t
            .json("POST", &format!("/shared/{}/memories", share_token), None, json!({}))
            .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn expired_or_tampered_share_token_is_forbidden() {
        let t = test_app().await;
        let ann = t.register("ann").await;
        t.json("POST", "/memories", Some(&ann), json!({"title": "x", "description": "y", "timestamp": "2024-01-01"}))
            .await;

        let expired_issuer = TokenKeys::new(SECRET, Duration::hours(1), Duration::hours(-2));
        let (expired, _) = expired_issuer.issue_share(1).unwrap();
        let (status, body) = t.get(&format!("/shared/{}/memories", expired), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.get("memories").is_none());

        let (_, share) = t.json("POST", "/share-token", Some(&ann), json!({})).await;
        let mut tampered = share["token"].as_str().unwrap().to_string();
        tampered.push('x');
        let (status, _) = t.get(&format!("/shared/{}/memories", tampered), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn upload_batch_with_oversized_file_persists_nothing() {
        let t = test_app().await;
        let token = t.register("ann").await;

        let (status, body) = t
            .upload(
                &token,
                &[
                    ("a.png", "image/png", vec![1; 32]),
                    ("b.png", "image/png", vec![1; 32]),
                    ("c.png", "image/png", vec![1; 32]),
                    ("huge.png", "image/png", vec![0; MAX_FILE_SIZE + 1]),
                ],
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("huge.png"));
        assert_eq!(t.upload_count(), 0);
    }

    #[tokio::test]
    async fn upload_rejects_wrong_type_and_too_many_files() {
        let t = test_app().await;
        let token = t.register("ann").await;

        let (status, body) = t
            .upload(&token, &[("a.png", "image/png", vec![1; 8]), ("doc.pdf", "application/pdf", vec![1; 8])])
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let msg = body["error"].as_str().unwrap();
        assert!(msg.contains("doc.pdf") && msg.contains("application/pdf"));

        let parts: Vec<(&str, &str, Vec<u8>)> =
            (0..=MAX_FILES).map(|_| ("x.gif", "image/gif", vec![1; 4])).collect();
        let (status, _) = t.upload(&token, &parts).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(t.upload_count(), 0);

        let (status, _) = t.upload(&token, &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_is_public() {
        let t = test_app().await;
        let resp = t
            .app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn email_can_be_used_as_username() {
        let t = test_app().await;
        let email = "jonathan.richardson@northwind-example.com";

        let (status, body) = t
            .json(
                "POST",
                "/register",
                None,
                json!({"username": email, "email": email, "password": "correct horse battery"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);

        let (status, _) = t
            .json("POST", "/login", None, json!({"username": email, "password": "correct horse battery"}))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = t
            .json(
                "POST",
                "/register",
                None,
                json!({"username": "x".repeat(255), "email": "long@example.com", "password": "correct horse battery"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn timeline_orders_by_instant_across_offsets() {
        let t = test_app().await;
        let token = t.register("ann").await;

        for (title, ts) in [
            ("offset", "2024-06-01T23:00:00-05:00"),
            ("utc", "2024-06-02T01:00:00Z"),
            ("unpadded", "2024-6-1"),
            ("october", "2024-10-01"),
        ] {
            let (status, body) = t
                .json("POST", "/memories", Some(&token), json!({"title": title, "description": "d", "timestamp": ts}))
                .await;
            assert_eq!(status, StatusCode::CREATED, "{}", body);
        }

        let (_, body) = t.get("/memories", Some(&token)).await;
        let memories = body["memories"].as_array().unwrap();
        let titles: Vec<&str> = memories.iter().map(|m| m["title"].as_str().unwrap()).collect();
        assert_eq!(titles, vec!["october", "offset", "utc", "unpadded"]);

        // Timestamps come back exactly as written
        assert_eq!(memories[1]["timestamp"], "2024-06-01T23:00:00-05:00");
        assert_eq!(memories[3]["timestamp"], "2024-6-1");
    }

    #[tokio::test]
    async fn failed_writes_discard_only_unreferenced_uploads() {
        let t = test_app().await;
        let token = t.register("ann").await;

        let (status, upload) = t
            .upload(
                &token,
                &[
                    ("a.png", "image/png", vec![1; 8]),
                    ("b.png", "image/png", vec![2; 8]),
                    ("c.png", "image/png", vec![3; 8]),
                ],
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", upload);
        let refs = image_refs(&upload);
        let names: Vec<String> = upload["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["filename"].as_str().unwrap().to_string())
            .collect();

        let (status, created) = t
            .json(
                "POST",
                "/memories",
                Some(&token),
                json!({"title": "Kept", "description": "d", "timestamp": "2024-01-01", "images": [refs[1]]}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let kept_uri = format!("/memories/{}", created["id"]);

        // Every image insert now fails inside the transaction
        t.state
            .db
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_images BEFORE INSERT ON memory_images
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let (status, body) = t
            .json(
                "POST",
                "/memories",
                Some(&token),
                json!({"title": "Lost", "description": "d", "timestamp": "2024-01-02", "images": [refs[0], refs[1]]}),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(!t.state.media.exists(&names[0]));
        assert!(t.state.media.exists(&names[1]));

        let (status, _) = t
            .json(
                "PUT",
                &kept_uri,
                Some(&token),
                json!({"title": "Kept", "description": "d", "timestamp": "2024-01-01", "images": [refs[1], refs[2]]}),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!t.state.media.exists(&names[2]));
        assert!(t.state.media.exists(&names[1]));

        // The memory that referenced B is untouched
        let (_, got) = t.get(&kept_uri, Some(&token)).await;
        assert_eq!(got["memory"]["images"].as_array().unwrap().len(), 1);
        let (_, list) = t.get("/memories", Some(&token)).await;
        assert_eq!(list["memories"].as_array().unwrap().len(), 1);
    }
}
