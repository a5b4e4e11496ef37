//! Presence integration tests. Updates authenticate with the room
//! credential handed out at join time.

use common::types::ParticipantIdentity;
use sc_test_utils::{MeetingFixture, TestCoordinatorServer, TestUserToken};
use serde_json::{json, Value};
use session_coordinator::models::ParticipantKind;
use session_coordinator::services::token_issuer::AccessTokenIssuer;

const ORG: &str = "org-acme";

async fn join_credential(
    server: &TestCoordinatorServer,
    meeting_id: impl std::fmt::Display,
    user: &str,
) -> Result<String, anyhow::Error> {
    let body: Value = reqwest::Client::new()
        .post(format!("{}/api/v1/meetings/{}/join", server.url(), meeting_id))
        .bearer_auth(TestUserToken::new(user, ORG).sign())
        .send()
        .await?
        .json()
        .await?;
    body["credential"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("join response has no credential"))
}

async fn report(
    server: &TestCoordinatorServer,
    meeting_id: impl std::fmt::Display,
    credential: &str,
    status: &str,
) -> Result<reqwest::Response, anyhow::Error> {
    Ok(reqwest::Client::new()
        .post(format!("{}/api/v1/rooms/{}/presence", server.url(), meeting_id))
        .bearer_auth(credential)
        .json(&json!({ "status": status }))
        .send()
        .await?)
}

async fn counts(
    server: &TestCoordinatorServer,
    meeting_id: impl std::fmt::Display,
) -> Result<(i64, i64), anyhow::Error> {
    let record: Value = reqwest::Client::new()
        .get(format!("{}/api/v1/meetings/{}", server.url(), meeting_id))
        .bearer_auth(TestUserToken::new("observer", ORG).sign())
        .send()
        .await?
        .json()
        .await?;
    Ok((
        record["active_participants"].as_i64().unwrap_or(-1),
        record["total_participants"].as_i64().unwrap_or(-1),
    ))
}

#[tokio::test]
async fn test_left_then_rejoin_updates_counts() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let credential = join_credential(&server, meeting.meeting_id, "user-ada").await?;
    assert_eq!(counts(&server, meeting.meeting_id).await?, (1, 1));

    let left = report(&server, meeting.meeting_id, &credential, "LEFT").await?;
    assert_eq!(left.status(), 200);
    let body: Value = left.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(counts(&server, meeting.meeting_id).await?, (0, 1));

    let joined = report(&server, meeting.meeting_id, &credential, "JOINED").await?;
    assert_eq!(joined.status(), 200);
    let body: Value = joined.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(counts(&server, meeting.meeting_id).await?, (1, 1));

    Ok(())
}

#[tokio::test]
async fn test_interleaved_joined_and_left_keep_one_row() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let credential = join_credential(&server, meeting.meeting_id, "user-ada").await?;

    let updates = (0..20).map(|i| {
        let status = if i % 2 == 0 { "LEFT" } else { "JOINED" };
        report(&server, meeting.meeting_id, &credential, status)
    });
    for response in futures::future::join_all(updates).await {
        assert_eq!(response?.status(), 200);
    }

    let (active, total) = counts(&server, meeting.meeting_id).await?;
    assert_eq!(total, 1);
    assert!((0..=total).contains(&active));

    // Once the burst settles the last report wins
    report(&server, meeting.meeting_id, &credential, "LEFT").await?;
    assert_eq!(counts(&server, meeting.meeting_id).await?, (0, 1));
    report(&server, meeting.meeting_id, &credential, "JOINED").await?;
    assert_eq!(counts(&server, meeting.meeting_id).await?, (1, 1));

    Ok(())
}

#[tokio::test]
async fn test_credential_for_other_room_is_rejected() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let first = MeetingFixture::new(ORG).insert(server.store()).await;
    let second = MeetingFixture::new(ORG).insert(server.store()).await;
    let credential = join_credential(&server, second.meeting_id, "user-ada").await?;

    let response = report(&server, first.meeting_id, &credential, "JOINED").await?;
    assert_eq!(response.status(), 401);
    assert_eq!(counts(&server, first.meeting_id).await?, (0, 0));

    Ok(())
}

#[tokio::test]
async fn test_user_token_is_not_a_room_credential() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let user_token = TestUserToken::new("user-ada", ORG).sign();

    let response = report(&server, meeting.meeting_id, &user_token, "JOINED").await?;
    assert_eq!(response.status(), 401);

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/rooms/{}/presence", server.url(), meeting.meeting_id))
        .json(&json!({ "status": "JOINED" }))
        .send()
        .await?;
    assert_eq!(response.status(), 401);

    Ok(())
}

#[tokio::test]
async fn test_left_for_unknown_identity_reports_failure() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;

    // Valid credential for an identity that never went through join
    let issuer = AccessTokenIssuer::from_config(server.config());
    let issued = issuer.issue_token(
        &meeting,
        &ParticipantIdentity::user("never-joined"),
        "Ghost",
        ParticipantKind::Member,
    )?;

    let response = report(&server, meeting.meeting_id, &issued.credential, "LEFT").await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(counts(&server, meeting.meeting_id).await?, (0, 0));

    Ok(())
}

#[tokio::test]
async fn test_unknown_presence_status_is_bad_request() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let meeting = MeetingFixture::new(ORG).insert(server.store()).await;
    let credential = join_credential(&server, meeting.meeting_id, "user-ada").await?;

    let response = report(&server, meeting.meeting_id, &credential, "AWAY").await?;
    assert_eq!(response.status(), 400);

    Ok(())
}
