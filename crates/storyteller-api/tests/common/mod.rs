//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use storyteller_core::clock::Clock;
use storyteller_core::config::StoryConfig;
use storyteller_core::repository::StoryRepository;
use storyteller_store::MemoryStoryRepository;
use storyteller_test_support::{FailingStoryRepository, FixedClock, SequenceTokenSource};
use tower::ServiceExt;

use storyteller_api::state::AppState;

/// Fixed timestamp used across all integration tests.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

/// Build the full app router over `repository` with a deterministic clock
/// and token source. Uses the same route structure as `main.rs`.
pub fn build_app_with(
    config: StoryConfig,
    clock: Arc<dyn Clock>,
    repository: Arc<dyn StoryRepository>,
) -> Router {
    let app_state = AppState::new(
        config,
        clock,
        Arc::new(SequenceTokenSource::new()),
        repository,
    );
    storyteller_api::app(app_state)
}

/// Build the full app router over a fresh in-memory store.
pub fn build_test_app() -> Router {
    build_app_with(
        StoryConfig::default(),
        Arc::new(FixedClock(fixed_now())),
        Arc::new(MemoryStoryRepository::new()),
    )
}

/// Build the full app router over a store that always fails.
pub fn build_failing_app() -> Router {
    build_app_with(
        StoryConfig::default(),
        Arc::new(FixedClock(fixed_now())),
        Arc::new(FailingStoryRepository),
    )
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Append `texts` one after another to story `story_id`, starting at `after`.
pub async fn append_all(app: &Router, story_id: i64, after: u32, texts: &[&str]) {
    for (offset, text) in (0..).zip(texts) {
        let (status, json) = post_json(
            app.clone(),
            &format!("/api/v1/stories/{story_id}/paragraphs"),
            &serde_json::json!({ "after_position": after + offset, "text": text }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "append failed: {json}");
    }
}
