//! HTTP surface: the webhook ingress endpoint and a liveness probe.
//!
//! # Endpoints
//!
//! - `POST /webhook` - accepts GitHub webhook deliveries (202 on queue)
//! - `GET /health` - returns 200 while the process serves

use std::sync::Arc;

pub mod webhook;

pub use webhook::{IngressError, webhook_handler};

use crate::dispatch::Dispatcher;
use crate::webhooks::IpAllowlist;

/// Shared application state, passed to handlers via axum's `State`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    dispatcher: Arc<Dispatcher>,

    /// HMAC secret; `None` disables signature verification (local
    /// development only).
    webhook_secret: Option<Vec<u8>>,

    /// Source allowlist; `None` disables the check entirely.
    allowlist: Option<IpAllowlist>,

    /// Honor `x-forwarded-for` for allowlisting.
    trust_forwarded: bool,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, webhook_secret: Option<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                dispatcher,
                webhook_secret,
                allowlist: None,
                trust_forwarded: false,
            }),
        }
    }

    /// Enables source allowlisting.
    pub fn with_allowlist(self, allowlist: IpAllowlist, trust_forwarded: bool) -> Self {
        let inner = &self.inner;
        AppState {
            inner: Arc::new(AppStateInner {
                dispatcher: Arc::clone(&inner.dispatcher),
                webhook_secret: inner.webhook_secret.clone(),
                allowlist: Some(allowlist),
                trust_forwarded,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn webhook_secret(&self) -> Option<&[u8]> {
        self.inner.webhook_secret.as_deref()
    }

    pub fn allowlist(&self) -> Option<&IpAllowlist> {
        self.inner.allowlist.as_ref()
    }

    pub fn trust_forwarded(&self) -> bool {
        self.inner.trust_forwarded
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

/// Liveness probe. Identifies the service so a probe hitting the wrong
/// port is obvious from the body.
async fn health_handler() -> &'static str {
    concat!("repo-warden ", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod integration_tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::dispatch::{
        DeliveryProcessor, DispatchOptions, MemorySink, ProcessOutcome,
    };
    use crate::handlers::HandlerError;
    use crate::webhooks::events::Event;
    use crate::webhooks::{compute_signature, format_signature_header};

    /// Processor that acknowledges everything; optionally stalls to fill
    /// queues.
    struct NoopProcessor {
        stall: Duration,
    }

    #[async_trait::async_trait]
    impl DeliveryProcessor for NoopProcessor {
        async fn process(&self, _event: &Event) -> Result<ProcessOutcome, HandlerError> {
            tokio::time::sleep(self.stall).await;
            Ok(ProcessOutcome {
                handled: true,
                token_spend: 0,
            })
        }
    }

    fn dispatcher(stall: Duration, queue_depth: usize) -> (Arc<Dispatcher>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let options = DispatchOptions {
            queue_depth,
            ..DispatchOptions::default()
        };
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(NoopProcessor { stall }),
            sink.clone(),
            options,
        ));
        (dispatcher, sink)
    }

    fn app(secret: Option<&[u8]>) -> (axum::Router, Arc<MemorySink>) {
        let (dispatcher, sink) = dispatcher(Duration::ZERO, 64);
        let state = AppState::new(dispatcher, secret.map(|s| s.to_vec()));
        (build_router(state), sink)
    }

    fn pull_request_body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "action": "synchronize",
            "pull_request": {
                "number": 7,
                "title": "fix: leak",
                "head": { "sha": "1234567890abcdef1234567890abcdef12345678", "ref": "b" },
                "base": { "sha": "abcdef1234567890abcdef1234567890abcdef12", "ref": "main" },
                "user": { "login": "dev" }
            },
            "repository": { "owner": { "login": "octo" }, "name": "widgets" }
        }))
        .unwrap()
    }

    /// A signed webhook request with the `ConnectInfo` extension the router
    /// would normally get from the listener.
    fn webhook_request(
        secret: Option<&[u8]>,
        event_type: &str,
        delivery_id: &str,
        body: Vec<u8>,
    ) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", event_type)
            .header("x-github-delivery", delivery_id);
        if let Some(secret) = secret {
            let header = format_signature_header(&compute_signature(&body, secret));
            builder = builder.header("x-hub-signature-256", header);
        }
        let mut request = builder.body(Body::from(body)).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 54321))));
        request
    }

    async fn wait_for_records(sink: &MemorySink, count: usize) {
        for _ in 0..500 {
            if sink.records().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} records, got {}", sink.records().len());
    }

    #[tokio::test]
    async fn health_returns_200() {
        let (app, _) = app(None);
        let mut request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 1))));

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.starts_with(b"repo-warden "));
    }

    #[tokio::test]
    async fn valid_signed_delivery_is_queued() {
        let secret = b"test-secret";
        let (app, sink) = app(Some(secret));

        let request = webhook_request(Some(secret), "pull_request", "d-1", pull_request_body());
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        wait_for_records(&sink, 1).await;
        assert_eq!(sink.records()[0].event_type, "pull_request");
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected_401() {
        let (app, sink) = app(Some(b"correct-secret"));

        let request = webhook_request(
            Some(b"wrong-secret"),
            "pull_request",
            "d-1",
            pull_request_body(),
        );
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_is_rejected_when_secret_configured() {
        let (app, _) = app(Some(b"secret"));
        let request = webhook_request(None, "pull_request", "d-1", pull_request_body());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsigned_delivery_accepted_without_secret() {
        let (app, sink) = app(None);
        let request = webhook_request(None, "pull_request", "d-1", pull_request_body());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        wait_for_records(&sink, 1).await;
    }

    #[tokio::test]
    async fn missing_event_header_is_400() {
        let (app, _) = app(None);
        let mut request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-github-delivery", "d-1")
            .body(Body::from(pull_request_body()))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 1))));

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_payload_for_known_type_is_400() {
        let secret = b"secret";
        let (app, _) = app(Some(secret));
        let request = webhook_request(
            Some(secret),
            "issue_comment",
            "d-1",
            b"{\"not\": \"a comment\"}".to_vec(),
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_acknowledged_without_requeue() {
        let secret = b"secret";
        let (dispatcher, sink) = dispatcher(Duration::ZERO, 64);
        let state = AppState::new(dispatcher, Some(secret.to_vec()));
        let app = build_router(state);

        let first = webhook_request(Some(secret), "pull_request", "same-id", pull_request_body());
        let response = app.clone().oneshot(first).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let second =
            webhook_request(Some(secret), "pull_request", "same-id", pull_request_body());
        let response = app.oneshot(second).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(std::str::from_utf8(&body).unwrap().contains("duplicate"));

        wait_for_records(&sink, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn full_backlog_returns_503() {
        let secret = b"secret";
        let (dispatcher, _sink) = dispatcher(Duration::from_secs(30), 1);
        let state = AppState::new(dispatcher, Some(secret.to_vec()));
        let app = build_router(state);

        // First occupies the worker, second fills the queue of one.
        for id in ["d-0", "d-1"] {
            let request = webhook_request(Some(secret), "pull_request", id, pull_request_body());
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            // Give the worker a moment to pull the first delivery off the
            // queue before filling it.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let request = webhook_request(Some(secret), "pull_request", "d-2", pull_request_body());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn source_outside_allowlist_is_403() {
        let (dispatcher, _) = dispatcher(Duration::ZERO, 64);
        let (allowlist, _) = IpAllowlist::from_ranges(&["140.82.112.0/20"]);
        let state = AppState::new(dispatcher, None).with_allowlist(allowlist, false);
        let app = build_router(state);

        // Peer is 127.0.0.1, outside the allowed range.
        let request = webhook_request(None, "pull_request", "d-1", pull_request_body());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn trusted_forwarded_header_admits_proxied_delivery() {
        let (dispatcher, sink) = dispatcher(Duration::ZERO, 64);
        let (allowlist, _) = IpAllowlist::from_ranges(&["140.82.112.0/20"]);
        let state = AppState::new(dispatcher, None).with_allowlist(allowlist, true);
        let app = build_router(state);

        let mut request = webhook_request(None, "pull_request", "d-1", pull_request_body());
        request
            .headers_mut()
            .insert("x-forwarded-for", "140.82.112.5".parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        wait_for_records(&sink, 1).await;
    }

    #[tokio::test]
    async fn unknown_event_type_is_accepted() {
        let secret = b"secret";
        let (app, _) = app(Some(secret));
        let body = serde_json::to_vec(&serde_json::json!({
            "zen": "Keep it logically awesome.",
            "repository": { "owner": { "login": "octo" }, "name": "widgets" }
        }))
        .unwrap();

        let request = webhook_request(Some(secret), "ping", "d-1", body);
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
