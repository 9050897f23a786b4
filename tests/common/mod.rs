//! Common test utilities.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use telebridge::client::{
    ClientFactory, EntityRef, ImportResult, LoopbackFactory, LoopbackService, MessagingClient,
    Result as ClientResult,
};
use telebridge::server::{self, AppState};
use telebridge::session::SessionRegistry;

pub const TEST_CODE: &str = "24680";

/// An in-process app backed by a loopback messaging service.
pub struct TestApp {
    pub router: Router,
    pub service: LoopbackService,
    pub registry: SessionRegistry,
}

/// Create a test app with an empty loopback service.
pub fn test_app() -> TestApp {
    let service = LoopbackService::new(TEST_CODE);
    let factory = Arc::new(LoopbackFactory::new(service.clone()));
    build_test_app(factory, service, Some(Duration::from_secs(5)), 30)
}

/// Create a test app whose code requests never complete and whose sessions
/// wait indefinitely.
pub fn stalled_app(request_timeout_seconds: u64) -> TestApp {
    build_test_app(
        Arc::new(StalledFactory),
        LoopbackService::default(),
        None,
        request_timeout_seconds,
    )
}

fn build_test_app(
    factory: Arc<dyn ClientFactory>,
    service: LoopbackService,
    operation_timeout: Option<Duration>,
    request_timeout_seconds: u64,
) -> TestApp {
    let registry = SessionRegistry::new(factory, operation_timeout);

    let state = AppState {
        registry: registry.clone(),
        max_connections: 64,
    };

    TestApp {
        router: server::build_app(state, request_timeout_seconds),
        service,
        registry,
    }
}

// ============================================================================
// Stalled Client
// ============================================================================

/// Connects fine, then never answers a code request.
struct StalledClient;

#[async_trait]
impl MessagingClient for StalledClient {
    async fn connect(&mut self) -> ClientResult<()> {
        Ok(())
    }

    async fn is_authorized(&mut self) -> ClientResult<bool> {
        Ok(false)
    }

    async fn request_code(&mut self, _phone: &str) -> ClientResult<()> {
        std::future::pending().await
    }

    async fn verify_code(&mut self, _phone: &str, _code: &str) -> ClientResult<()> {
        Ok(())
    }

    async fn resolve_entity(&mut self, _phone: &str) -> ClientResult<Option<EntityRef>> {
        Ok(None)
    }

    async fn register_contact(&mut self, _phone: &str) -> ClientResult<ImportResult> {
        Ok(ImportResult::default())
    }

    async fn send_message(&mut self, _to: &EntityRef, _text: &str) -> ClientResult<()> {
        Ok(())
    }

    async fn get_self(&mut self) -> ClientResult<EntityRef> {
        Ok(EntityRef::new("self"))
    }

    async fn log_out(&mut self) -> ClientResult<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> ClientResult<()> {
        Ok(())
    }
}

struct StalledFactory;

impl ClientFactory for StalledFactory {
    fn create(&self, _session_id: &str, _identity: &str) -> Box<dyn MessagingClient> {
        Box::new(StalledClient)
    }

    fn backend(&self) -> &'static str {
        "stalled"
    }
}

impl TestApp {
    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_raw(uri, body.to_string()).await
    }

    pub async fn post_raw(&self, uri: &str, body: impl Into<String>) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.into()))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    /// Admit a session for `phone`, returning its client id.
    pub async fn auth_by_phone(&self, phone: &str) -> String {
        let (status, json) = self
            .post("/auth_by_phone", serde_json::json!({ "phone": phone }))
            .await;
        assert_eq!(status, StatusCode::OK, "auth_by_phone failed: {json}");
        json["client_id"].as_str().unwrap().to_string()
    }

    /// Admit and sign in a session for `phone`, returning its client id.
    pub async fn sign_in(&self, phone: &str) -> String {
        let client_id = self.auth_by_phone(phone).await;
        let (status, json) = self
            .post(
                "/auth_by_code",
                serde_json::json!({ "client_id": client_id, "code": TEST_CODE }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "auth_by_code failed: {json}");
        client_id
    }
}
