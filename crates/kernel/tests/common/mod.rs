#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Each [`TestApp`] drives the real router and services over an in-memory
//! repository and a throwaway uploads directory, so tests are isolated from
//! each other and need no database.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use pictor_kernel::media::{LocalMediaStorage, MediaSettings};
use pictor_kernel::repository::InMemoryMediaRepository;
use pictor_kernel::services::token::TokenService;
use pictor_kernel::{AppState, build_router};
use pictor_test_utils::MultipartBody;

/// Secret used to sign test tokens.
pub const TEST_SECRET: &[u8] = b"pictor-integration-test-secret-32b!";

/// Test application wrapper using the real kernel routes and state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub repo: InMemoryMediaRepository,
    pub uploads: TempDir,
    tokens: TokenService,
}

impl TestApp {
    /// Create a test app with default intake settings.
    pub fn new() -> Self {
        Self::with_settings(MediaSettings::default())
    }

    /// Create a test app with custom intake settings.
    pub fn with_settings(settings: MediaSettings) -> Self {
        let uploads = tempfile::tempdir().expect("failed to create uploads dir");
        let repo = InMemoryMediaRepository::new();
        let storage = LocalMediaStorage::new(uploads.path(), "/uploads");
        let tokens = TokenService::new(TEST_SECRET);

        let state = AppState::from_parts(
            Arc::new(repo.clone()),
            Arc::new(storage),
            settings,
            tokens.clone(),
        );
        let router = build_router(state.clone());

        Self {
            router,
            state,
            repo,
            uploads,
            tokens,
        }
    }

    /// A valid bearer token for `user`.
    pub fn token(&self, user: Uuid) -> String {
        self.tokens.issue(user, 300).unwrap()
    }

    /// Send a request through the router.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Upload a multipart form as `user`.
    pub async fn upload(&self, user: Uuid, form: MultipartBody) -> Response {
        let content_type = form.content_type();
        let body = form.build();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/media")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(user)))
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap();
        self.request(request).await
    }

    /// Upload a single file in the `file_upload` field and return its id.
    pub async fn upload_ok(&self, user: Uuid, filename: &str, data: &[u8]) -> Uuid {
        let form = MultipartBody::new().file("file_upload", filename, None, data);
        let response = self.upload(user, form).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        body["id"].as_str().unwrap().parse().unwrap()
    }

    /// A handle to the router, for driving requests from spawned tasks.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Build a JSON request authenticated as `user`.
    pub fn json_request(
        &self,
        method: Method,
        uri: &str,
        user: Uuid,
        json: serde_json::Value,
    ) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(user)))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    /// Send a JSON body as `user`.
    pub async fn send_json(
        &self,
        method: Method,
        uri: &str,
        user: Uuid,
        json: serde_json::Value,
    ) -> Response {
        let request = self.json_request(method, uri, user, json);
        self.request(request).await
    }

    /// GET `uri`, authenticated as `user` if given.
    pub async fn get(&self, uri: &str, user: Option<Uuid>) -> Response {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", self.token(user)));
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    /// Let detached cleanup tasks finish.
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    /// Number of files in the uploads directory.
    pub fn stored_files(&self) -> usize {
        std::fs::read_dir(self.uploads.path()).unwrap().count()
    }
}

/// Read a response body as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

/// Read a response body as bytes.
pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}
