//! Integration tests for the story routes.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::TimeDelta;
use storyteller_core::config::StoryConfig;
use storyteller_store::MemoryStoryRepository;
use storyteller_test_support::ManualClock;

#[tokio::test]
async fn test_root_story_is_created_and_continued() {
    let app = common::build_test_app();

    // GET /api/v1/stories creates the root story on first use.
    let (status, json) = common::get_json(app.clone(), "/api/v1/stories").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], 1);
    assert_eq!(json["length"], 0);

    common::append_all(
        &app,
        1,
        0,
        &["Once upon a time", "There   was a\nfox", "The fox was clever"],
    )
    .await;

    let (status, json) = common::get_json(app, "/api/v1/stories/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["length"], 3);
    let paragraphs = json["paragraphs"].as_array().unwrap();
    assert_eq!(paragraphs.len(), 3);
    assert_eq!(paragraphs[1]["text"], "There was a fox");
    assert_eq!(paragraphs[1]["position"], 2);
}

#[tokio::test]
async fn test_append_below_tip_forks_a_new_story() {
    let app = common::build_test_app();
    common::get_json(app.clone(), "/api/v1/stories").await;
    common::append_all(&app, 1, 0, &["Alpha one", "Alpha two", "Alpha three"]).await;

    // Continue from position 1 after someone else already wrote 2 and 3.
    let (status, json) = common::post_json(
        app.clone(),
        "/api/v1/stories/1/paragraphs",
        &serde_json::json!({ "after_position": 1, "text": "Beta two" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["forked"], true);
    assert_eq!(json["story_id"], 2);
    assert_eq!(json["base_position"], 1);
    assert_eq!(json["paragraph"]["position"], 2);

    let (status, json) = common::get_json(app.clone(), "/api/v1/stories/2/pages/1").await;
    assert_eq!(status, StatusCode::OK);
    let texts: Vec<_> = json["paragraphs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["text"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(texts, vec!["Alpha one", "Beta two"]);

    // The original story is untouched.
    let (_, json) = common::get_json(app.clone(), "/api/v1/stories/1").await;
    assert_eq!(json["length"], 3);

    // Paragraph 1 lists both of its continuations.
    let (status, json) = common::get_json(app, "/api/v1/stories/1/paragraphs/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["text"], "Alpha one");
    assert_eq!(json["branch_count"], 2);
    let branches = json["branches"].as_array().unwrap();
    assert_eq!(branches.len(), 2);
    assert_eq!(branches[1]["story_id"], 2);
}

#[tokio::test]
async fn test_explicit_fork_continues_without_forking_again() {
    let app = common::build_test_app();
    common::get_json(app.clone(), "/api/v1/stories").await;
    common::append_all(&app, 1, 0, &["Alpha one", "Alpha two", "Alpha three"]).await;

    let (status, json) = common::post_json(
        app.clone(),
        "/api/v1/stories/1/fork",
        &serde_json::json!({ "at_position": 2 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["story_id"], 2);
    assert_eq!(json["length"], 2);
    assert_eq!(json["ancestor_points"][0]["timeline_id"], 1);
    assert_eq!(json["ancestor_points"][0]["position"], 2);

    let (status, json) = common::post_json(
        app,
        "/api/v1/stories/2/paragraphs",
        &serde_json::json!({ "after_position": 2, "text": "Gamma three" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["forked"], false);
    assert_eq!(json["story_id"], 2);
}

#[tokio::test]
async fn test_missing_paragraph_returns_404() {
    let app = common::build_test_app();
    common::get_json(app.clone(), "/api/v1/stories").await;

    let (status, json) = common::get_json(app, "/api/v1/stories/1/paragraphs/4").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "paragraph_not_found");
}

#[tokio::test]
async fn test_lock_blocks_others_until_expiry() {
    let clock = Arc::new(ManualClock::new(common::fixed_now()));
    let config = StoryConfig::new(20, TimeDelta::seconds(60), 3).unwrap();
    let app = common::build_app_with(
        config,
        clock.clone(),
        Arc::new(MemoryStoryRepository::new()),
    );
    common::get_json(app.clone(), "/api/v1/stories").await;
    let lock_uri = "/api/v1/stories/1/lock";

    let (status, first) = common::post_json(app.clone(), lock_uri, &serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["auth_token"], "token-1");

    let (status, json) = common::post_json(app.clone(), lock_uri, &serde_json::json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "story_locked");

    let (status, json) = common::post_json(
        app.clone(),
        "/api/v1/stories/1/paragraphs",
        &serde_json::json!({ "after_position": 0, "text": "Cutting in line" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "story_locked");

    let (_, json) = common::get_json(app.clone(), "/api/v1/stories/1").await;
    assert_eq!(json["state"], "locked");

    clock.advance(TimeDelta::seconds(60));

    let (status, second) = common::post_json(app, lock_uri, &serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["auth_token"], "token-3");
}

#[tokio::test]
async fn test_lock_holder_appends_and_releases_lock() {
    let app = common::build_test_app();
    common::get_json(app.clone(), "/api/v1/stories").await;
    let (_, grant) = common::post_json(
        app.clone(),
        "/api/v1/stories/1/lock",
        &serde_json::json!({}),
    )
    .await;

    let (status, json) = common::post_json(
        app.clone(),
        "/api/v1/stories/1/paragraphs",
        &serde_json::json!({
            "after_position": 0,
            "text": "The holder writes first",
            "auth_token": grant["auth_token"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["forked"], false);

    let (_, json) = common::get_json(app, "/api/v1/stories/1").await;
    assert_eq!(json["state"], "open");
    assert_eq!(json["length"], 1);
}

#[tokio::test]
async fn test_vote_round_trip_finalizes_one_paragraph() {
    let app = common::build_test_app();
    common::get_json(app.clone(), "/api/v1/stories").await;
    common::append_all(&app, 1, 0, &["Once upon a time"]).await;

    let (status, json) = common::post_json(
        app.clone(),
        "/api/v1/stories/1/proposal",
        &serde_json::json!({ "text": "A vote decides this", "voter_id": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["finalized"].is_null());

    let (_, json) = common::get_json(app.clone(), "/api/v1/stories/1").await;
    assert_eq!(json["state"], "pending");
    assert_eq!(json["pending"]["yes"], 1);

    let votes_uri = "/api/v1/stories/1/votes";
    let (_, json) = common::post_json(
        app.clone(),
        votes_uri,
        &serde_json::json!({ "voter_id": "bob", "keep": true }),
    )
    .await;
    assert!(json["finalized"].is_null());

    let (status, json) = common::post_json(
        app.clone(),
        votes_uri,
        &serde_json::json!({ "voter_id": "carol", "keep": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["finalized"]["position"], 2);
    assert_eq!(json["finalized"]["text"], "A vote decides this");

    let (status, json) = common::post_json(
        app.clone(),
        votes_uri,
        &serde_json::json!({ "voter_id": "dave", "keep": true }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "votes_not_possible");

    let (_, json) = common::get_json(app, "/api/v1/stories/1").await;
    assert_eq!(json["length"], 2);
    assert_eq!(json["state"], "open");
}

#[tokio::test]
async fn test_append_while_pending_returns_409() {
    let app = common::build_test_app();
    common::get_json(app.clone(), "/api/v1/stories").await;
    common::post_json(
        app.clone(),
        "/api/v1/stories/1/proposal",
        &serde_json::json!({ "text": "Awaiting the vote", "voter_id": "alice" }),
    )
    .await;

    let (status, json) = common::post_json(
        app,
        "/api/v1/stories/1/paragraphs",
        &serde_json::json!({ "after_position": 0, "text": "Jumping the queue" }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "story_pending");
}

#[tokio::test]
async fn test_store_failure_returns_500() {
    let app = common::build_failing_app();

    let (status, json) = common::get_json(app, "/api/v1/stories").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "infrastructure_error");
}
