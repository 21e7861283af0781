//! End-to-end pipeline tests over the in-memory queue and store

use audit_relay::prelude::*;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceExt;

struct Harness {
    app: Router,
    queue: Arc<MemoryQueue>,
    store: Arc<MemoryEventStore>,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Harness {
    fn new() -> Self {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(MemoryEventStore::new());
        let persister = Persister::new(queue.clone(), store.clone(), persister_config());
        let stats = persister.stats();
        let state = AppState::new(Config::default(), queue.clone(), store.clone(), stats.clone());

        let shutdown = CancellationToken::new();
        let worker = persister.spawn(shutdown.clone());

        Self {
            app: router(state),
            queue,
            store,
            stats,
            shutdown,
            worker: Some(worker),
        }
    }

    /// Router and backends without a running persister
    fn without_persister() -> Self {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(MemoryEventStore::new());
        let stats = Arc::new(PipelineStats::new());
        let state = AppState::new(Config::default(), queue.clone(), store.clone(), stats.clone());

        Self {
            app: router(state),
            queue,
            store,
            stats,
            shutdown: CancellationToken::new(),
            worker: None,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(&self, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post("/api/events")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn wait_for_persisted(&self, count: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.stats.snapshot().persisted < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("persister did not catch up");
    }

    async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(worker) = self.worker.take() {
            tokio::time::timeout(Duration::from_secs(5), worker)
                .await
                .expect("persister did not stop")
                .unwrap();
        }
    }
}

fn persister_config() -> PersisterConfig {
    PersisterConfig {
        insert_timeout_ms: 1_000,
        redelivery_delay_ms: 10,
        max_deliveries: 0,
        max_in_flight: 1,
        outage_alert_secs: 0,
    }
}

fn customer_created() -> Value {
    json!({
        "event_type": "customer_created",
        "status": "success",
        "service_name": "billing",
        "user_id": "u-1001",
        "event_fields": {"plan": "pro"}
    })
}

#[tokio::test]
async fn submitted_event_is_persisted_with_resolved_codes() {
    let harness = Harness::new();

    let (status, body) = harness.post_json(customer_created()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Successfully added create event to the MQ");
    assert_eq!(body["sequence"], 1);
    let submitted_id = body["id"].as_str().unwrap().to_string();

    harness.wait_for_persisted(1).await;

    let (status, events) = harness.get("/api/events").await;
    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_type"], 1);
    assert_eq!(events[0]["status"], 100);
    assert_eq!(events[0]["service_name"], "billing");
    assert_eq!(events[0]["user_id"], "u-1001");
    assert_eq!(events[0]["event_fields"]["plan"], "pro");

    let id = events[0]["id"].as_str().unwrap().to_string();
    assert_eq!(id, submitted_id);

    let (status, event) = harness.get(&format!("/api/events/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["id"], id.as_str());

    let (status, by_type) = harness.get("/api/events/types/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_type.as_array().unwrap().len(), 1);

    let (status, by_type) = harness.get("/api/events/types/2").await;
    assert_eq!(status, StatusCode::OK);
    assert!(by_type.as_array().unwrap().is_empty());

    assert_eq!(harness.queue.depth(), 0);
    harness.stop().await;
}

#[tokio::test]
async fn event_time_defaults_to_submission_time() {
    let harness = Harness::new();

    let before = chrono::Utc::now();
    let (status, _) = harness.post_json(customer_created()).await;
    assert_eq!(status, StatusCode::OK);
    harness.wait_for_persisted(1).await;

    let events = harness.store.list().await.unwrap();
    let elapsed = events[0].event_time - before;
    assert!(elapsed >= chrono::Duration::zero());
    assert!(elapsed < chrono::Duration::seconds(5));

    harness.stop().await;
}

#[tokio::test]
async fn unknown_event_type_is_rejected_without_side_effects() {
    let harness = Harness::without_persister();

    let mut body = customer_created();
    body["event_type"] = json!("unknown_type");
    let (status, response) = harness.post_json(body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Invalid event type");
    assert_eq!(response["code"], "INVALID_EVENT_TYPE");
    assert_eq!(harness.queue.depth(), 0);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn unknown_status_is_rejected() {
    let harness = Harness::without_persister();

    let mut body = customer_created();
    body["status"] = json!("maybe");
    let (status, response) = harness.post_json(body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Invalid status");
    assert_eq!(harness.queue.depth(), 0);
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let harness = Harness::without_persister();

    let (status, response) = harness
        .send(
            Request::post("/api/events")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"event_type\": "))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "MALFORMED_EVENT");

    // Missing required fields
    let (status, _) = harness
        .post_json(json!({"event_type": "customer_created", "status": "success"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(harness.queue.depth(), 0);
}

#[tokio::test]
async fn queue_outage_is_a_server_error() {
    let harness = Harness::without_persister();
    harness.queue.set_available(false);

    let (status, response) = harness.post_json(customer_created()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["code"], "DELIVERY_UNAVAILABLE");
}

#[tokio::test]
async fn store_outage_does_not_block_intake_and_events_arrive_once() {
    let harness = Harness::new();
    harness.store.set_available(false);

    for _ in 0..3 {
        let (status, _) = harness.post_json(customer_created()).await;
        assert_eq!(status, StatusCode::OK);
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.stats.snapshot().store_failures < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(harness.queue.depth(), 3);

    harness.store.set_available(true);
    harness.wait_for_persisted(3).await;

    assert_eq!(harness.store.len(), 3);
    assert_eq!(harness.queue.depth(), 0);
    assert!(harness.queue.dead_letters().is_empty());

    let (status, stats) = harness.get("/api/pipeline/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["queue"], "audit-events");
    assert_eq!(stats["persisted"], 3);
    assert!(stats["store_failures"].as_u64().unwrap() >= 2);

    harness.stop().await;
}

#[tokio::test]
async fn poison_message_does_not_stop_the_consumer() {
    let harness = Harness::new();

    harness.queue.enqueue(b"definitely not json".to_vec()).await.unwrap();
    let (status, _) = harness.post_json(customer_created()).await;
    assert_eq!(status, StatusCode::OK);

    harness.wait_for_persisted(1).await;

    assert_eq!(harness.store.len(), 1);
    assert_eq!(harness.queue.depth(), 0);
    let letters = harness.queue.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].reason, DeadLetterReason::Malformed);
    assert_eq!(harness.stats.snapshot().malformed, 1);

    harness.stop().await;
}

#[tokio::test]
async fn delete_and_lookup_errors() {
    let harness = Harness::new();

    let (_, body) = harness.post_json(customer_created()).await;
    harness.wait_for_persisted(1).await;
    let id: EventId = body["id"].as_str().unwrap().parse().unwrap();

    let delete = |uri: String| Request::delete(uri).body(Body::empty()).unwrap();

    let (status, body) = harness.send(delete(format!("/api/events/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Successfully deleted the event");

    let (status, body) = harness.send(delete(format!("/api/events/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Event not found");

    let (status, _) = harness.get(&format!("/api/events/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = harness.get("/api/events/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = harness.get("/api/events/types/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot convert event type to int");

    harness.stop().await;
}

#[tokio::test]
async fn health_and_readiness() {
    let harness = Harness::without_persister();

    let (status, body) = harness.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = harness.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    harness.store.set_available(false);
    let (status, body) = harness.get("/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["dependencies"]["store"]["healthy"], false);
    assert_eq!(body["dependencies"]["queue"]["healthy"], true);
}

#[tokio::test]
async fn middleware_stack_assigns_request_ids() {
    let harness = Harness::without_persister();
    let app = Server::new(ServiceConfig::default()).layered(harness.app.clone());

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(request_id.starts_with("req_"));

    let response = app
        .oneshot(
            Request::get("/health")
                .header("x-request-id", "caller-supplied")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "caller-supplied");
}

#[cfg(feature = "jwt")]
#[tokio::test]
async fn api_requires_bearer_token_when_auth_is_configured() {
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    let secret = b"integration-secret-integration-secret";
    let auth_config = audit_relay::config::AuthConfig {
        key_path: "unused".into(),
        algorithm: "HS256".to_string(),
        issuer: None,
        audience: None,
    };
    let auth = JwtAuth::from_key(secret, &auth_config).unwrap();

    let queue = Arc::new(MemoryQueue::new("audit-events"));
    let store = Arc::new(MemoryEventStore::new());
    let state = AppState::new(Config::default(), queue, store, Arc::new(PipelineStats::new()));
    let app = authenticated_router(state, auth);

    let call = |request: Request<Body>| {
        let app = app.clone();
        async move { app.oneshot(request).await.unwrap().status() }
    };

    let status = call(Request::get("/api/events").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let status = call(Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let claims = Claims {
        sub: "client:billing".to_string(),
        exp: chrono::Utc::now().timestamp() + 600,
        iat: None,
        iss: None,
        roles: vec![],
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .unwrap();

    let status = call(
        Request::get("/api/events")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
