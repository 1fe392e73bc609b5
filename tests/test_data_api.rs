use axum::{
    extract::Query,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use sessionfeed::core::{Config, SessionFilter, SessionStatus};
use sessionfeed::feed::{ApiError, NullChannel, SessionFeed, SessionSource};
use sessionfeed::DataApiClient;

const ANON_KEY: &str = "anon-test-key";

async fn spawn_backend(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client_for(url: &str) -> DataApiClient {
    let mut config = Config::default();
    config.backend.url = url.to_string();
    config.backend.anon_key = ANON_KEY.to_string();
    config.backend.request_timeout_secs = 5;
    DataApiClient::from_config(&config).unwrap()
}

fn session_rows() -> Value {
    json!([
        {
            "id": "s1",
            "company_id": "company-1",
            "customer_name": "Ahmed Ali",
            "customer_phone": "+201001112233",
            "status": "active",
            "message_count": 3,
            "unread_count": 1,
            "last_message": "Is my order ready?",
            "last_message_time": "2024-05-01T10:00:00Z",
            "created_at": "2024-05-01T09:00:00Z"
        },
        {
            "id": "s2",
            "company_id": "company-1",
            "customer_name": "Fatima Hassan",
            "customer_phone": null,
            "status": "closed",
            "message_count": 5,
            "unread_count": 0,
            "last_message": null,
            "last_message_time": null,
            "created_at": "2024-04-30T08:00:00Z"
        }
    ])
}

async fn list_sessions(
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let api_key = headers.get("apikey").and_then(|v| v.to_str().ok());
    let bearer = headers.get("authorization").and_then(|v| v.to_str().ok());
    let expected_bearer = format!("Bearer {}", ANON_KEY);
    if api_key != Some(ANON_KEY) || bearer != Some(expected_bearer.as_str()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "invalid key" })));
    }

    let rows = match params.get("company_id").map(String::as_str) {
        Some("eq.company-1") => session_rows(),
        _ => json!([]),
    };
    (StatusCode::OK, Json(rows))
}

#[tokio::test]
async fn test_fetch_sessions_for_tenant() {
    let router = Router::new().route("/rest/v1/whatsapp_sessions", get(list_sessions));
    let client = client_for(&spawn_backend(router).await);
    assert!(client.is_reachable().await);

    let sessions = client.list_sessions("company-1").await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, "s1");
    assert_eq!(sessions[0].status, SessionStatus::Active);
    assert_eq!(sessions[1].id, "s2");
    assert!(sessions[1].last_message_time.is_none());

    let other = client.list_sessions("company-2").await.unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn test_server_error_maps_to_status() {
    let router = Router::new().route(
        "/rest/v1/whatsapp_sessions",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable") }),
    );
    let client = client_for(&spawn_backend(router).await);

    let err = client.list_sessions("company-1").await.unwrap_err();
    assert_eq!(
        err,
        ApiError::Status {
            status: 500,
            body: "database unavailable".to_string(),
        }
    );
}

#[tokio::test]
async fn test_wrong_key_is_rejected() {
    let router = Router::new().route("/rest/v1/whatsapp_sessions", get(list_sessions));
    let url = spawn_backend(router).await;

    let mut config = Config::default();
    config.backend.url = url;
    config.backend.anon_key = "wrong".to_string();
    let client = DataApiClient::from_config(&config).unwrap();

    match client.list_sessions("company-1").await {
        Err(ApiError::Status { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected 401, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let router = Router::new().route(
        "/rest/v1/whatsapp_sessions",
        get(|| async { Json(json!({ "unexpected": "object" })) }),
    );
    let client = client_for(&spawn_backend(router).await);

    let err = client.list_sessions("company-1").await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(&format!("http://{}", addr));
    let err = client.list_sessions("company-1").await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)), "got {:?}", err);
    assert!(!client.is_reachable().await);
}

async fn settle_channel() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_feed_over_rest_backend() {
    let router = Router::new().route("/rest/v1/whatsapp_sessions", get(list_sessions));
    let client = client_for(&spawn_backend(router).await);
    let feed = SessionFeed::new(Arc::new(client), Arc::new(NullChannel::default()));

    feed.initialize("company-1").await.unwrap();
    settle_channel().await;
    assert!(feed.last_error().is_none(), "one-shot channel must stay open");
    feed.set_filter(SessionFilter::Active);
    let active: Vec<String> = feed.visible_items().into_iter().map(|s| s.id).collect();
    assert_eq!(active, vec!["s1"]);

    feed.set_filter(SessionFilter::All);
    feed.set_search_text("fatima");
    let found: Vec<String> = feed.visible_items().into_iter().map(|s| s.id).collect();
    assert_eq!(found, vec!["s2"]);

    feed.dispose().await;
}
