//! Meeting lifecycle integration tests: member join, status transitions,
//! ending, and organization scoping.

use sc_test_utils::{MeetingFixture, TestCoordinatorServer, TestServerOptions, TestUserToken};
use serde_json::{json, Value};

const ORG: &str = "org-acme";

async fn join(
    server: &TestCoordinatorServer,
    meeting_id: impl std::fmt::Display,
    token: &str,
    body: Option<Value>,
) -> Result<reqwest::Response, anyhow::Error> {
    let mut request = reqwest::Client::new()
        .post(format!("{}/api/v1/meetings/{}/join", server.url(), meeting_id))
        .bearer_auth(token);
    if let Some(body) = body {
        request = request.json(&body);
    }
    Ok(request.send().await?)
}

#[tokio::test]
async fn test_member_join_issues_credential_and_starts_meeting() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let token = TestUserToken::new("user-ada", ORG).named("Ada").sign();

    let response = join(&server, meeting.meeting_id, &token, None).await?;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await?;
    assert_eq!(body["display_name"], "Ada");
    assert_eq!(body["identity"], "user-ada");
    assert_eq!(body["room_name"], meeting.meeting_id.to_string());
    assert_eq!(body["server_endpoint"], "ws://media.test:7880");
    assert_eq!(body["expires_in"], 21_600);
    assert!(body["credential"].as_str().is_some_and(|c| !c.is_empty()));

    let record: Value = reqwest::Client::new()
        .get(format!("{}/api/v1/meetings/{}", server.url(), meeting.meeting_id))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(record["status"], "IN_PROGRESS");
    assert!(record["started_at"].is_string());
    assert_eq!(record["active_participants"], 1);
    assert_eq!(record["total_participants"], 1);

    Ok(())
}

#[tokio::test]
async fn test_join_display_name_override_and_validation() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let token = TestUserToken::new("user-ada", ORG).named("Ada").sign();

    let response = join(
        &server,
        meeting.meeting_id,
        &token,
        Some(json!({"display_name": "  Ada L.  "})),
    )
    .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["display_name"], "Ada L.");

    let too_long = "x".repeat(65);
    let response = join(
        &server,
        meeting.meeting_id,
        &token,
        Some(json!({ "display_name": too_long })),
    )
    .await?;
    assert_eq!(response.status(), 400);

    Ok(())
}

#[tokio::test]
async fn test_rejoin_keeps_single_participant_row() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let token = TestUserToken::new("user-ada", ORG).sign();

    for _ in 0..3 {
        let response = join(&server, meeting.meeting_id, &token, None).await?;
        assert_eq!(response.status(), 200);
    }

    let record: Value = reqwest::Client::new()
        .get(format!("{}/api/v1/meetings/{}", server.url(), meeting.meeting_id))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(record["total_participants"], 1);

    Ok(())
}

#[tokio::test]
async fn test_completed_meeting_rejects_join() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let token = TestUserToken::new("user-ada", ORG).sign();

    let ended = reqwest::Client::new()
        .post(format!("{}/api/v1/meetings/{}/end", server.url(), meeting.meeting_id))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(ended.status(), 200);
    let ended: Value = ended.json().await?;
    assert_eq!(ended["status"], "COMPLETED");

    let response = join(&server, meeting.meeting_id, &token, None).await?;
    assert_eq!(response.status(), 410);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "MEETING_ENDED");

    Ok(())
}

#[tokio::test]
async fn test_foreign_organization_is_unauthorized() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let token = TestUserToken::new("mallory", "org-other").sign();

    let response = join(&server, meeting.meeting_id, &token, None).await?;
    assert_eq!(response.status(), 401);
    assert!(response.headers().contains_key("www-authenticate"));

    Ok(())
}

#[tokio::test]
async fn test_invalid_tokens_are_unauthorized() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;

    let expired = TestUserToken::new("user-ada", ORG).expires_in(-600).sign();
    let response = join(&server, meeting.meeting_id, &expired, None).await?;
    assert_eq!(response.status(), 401);

    let forged = TestUserToken::new("user-ada", ORG)
        .signed_with("not-the-identity-secret")
        .sign();
    let response = join(&server, meeting.meeting_id, &forged, None).await?;
    assert_eq!(response.status(), 401);

    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    Ok(())
}

#[tokio::test]
async fn test_unknown_meeting_is_not_found() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let token = TestUserToken::new("user-ada", ORG).sign();

    let response = join(&server, uuid::Uuid::new_v4(), &token, None).await?;
    assert_eq!(response.status(), 404);

    Ok(())
}

#[tokio::test]
async fn test_status_transitions_only_move_forward() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let token = TestUserToken::new("user-ada", ORG).sign();
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/meetings/{}/status", server.url(), meeting.meeting_id);

    let started = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({"target_status": "IN_PROGRESS"}))
        .send()
        .await?;
    assert_eq!(started.status(), 200);

    let backward = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({"target_status": "SCHEDULED"}))
        .send()
        .await?;
    assert_eq!(backward.status(), 409);
    let body: Value = backward.json().await?;
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let cancelled = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({"target_status": "CANCELLED"}))
        .send()
        .await?;
    assert_eq!(cancelled.status(), 200);
    let body: Value = cancelled.json().await?;
    assert_eq!(body["status"], "CANCELLED");
    assert!(body["ended_at"].is_string());

    let reopen = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({"target_status": "IN_PROGRESS"}))
        .send()
        .await?;
    assert_eq!(reopen.status(), 409);

    Ok(())
}

#[tokio::test]
async fn test_missing_media_credentials_is_configuration_error() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn_with(TestServerOptions {
        media_configured: false,
        ..TestServerOptions::default()
    })
    .await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let token = TestUserToken::new("user-ada", ORG).sign();

    let response = join(&server, meeting.meeting_id, &token, None).await?;
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "CONFIGURATION_ERROR");

    // Nothing happened to the meeting
    let record: Value = reqwest::Client::new()
        .get(format!("{}/api/v1/meetings/{}", server.url(), meeting.meeting_id))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(record["status"], "SCHEDULED");
    assert_eq!(record["total_participants"], 0);

    Ok(())
}
