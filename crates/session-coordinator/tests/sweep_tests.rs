//! Expiry sweep integration tests against a running coordinator.

use chrono::Utc;
use sc_test_utils::{
    assert_eventually, ConsistencyCategory, MeetingFixture, TestCoordinatorServer, TestUserToken,
};
use serde_json::Value;
use session_coordinator::tasks::run_sweep_once;

const ORG: &str = "org-acme";

#[tokio::test]
async fn test_sweep_completes_overdue_meeting_once() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    let overdue = MeetingFixture::new(ORG)
        .starting_in_minutes(-31)
        .lasting_minutes(30)
        .insert(server.store())
        .await;
    let upcoming = MeetingFixture::new(ORG)
        .starting_in_minutes(30)
        .insert(server.store())
        .await;

    let first = run_sweep_once(server.state_machine(), server.registry(), Utc::now()).await?;
    assert_eq!(first.updated_count, 1);
    assert_eq!(first.meeting_ids, vec![overdue.meeting_id]);

    let second = run_sweep_once(server.state_machine(), server.registry(), Utc::now()).await?;
    assert_eq!(second.updated_count, 0);

    let token = TestUserToken::new("user-ada", ORG).sign();
    let client = reqwest::Client::new();

    let record: Value = client
        .get(format!("{}/api/v1/meetings/{}", server.url(), overdue.meeting_id))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(record["status"], "COMPLETED");

    let record: Value = client
        .get(format!("{}/api/v1/meetings/{}", server.url(), upcoming.meeting_id))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(record["status"], "SCHEDULED");

    let transcript_url = format!(
        "{}/api/v1/meetings/{}/transcript",
        server.url(),
        overdue.meeting_id
    );
    assert_eventually(ConsistencyCategory::Finalization, || {
        let client = client.clone();
        let url = transcript_url.clone();
        let token = token.clone();
        async move {
            match client.get(&url).bearer_auth(&token).send().await {
                Ok(response) if response.status() == 200 => response
                    .json::<Value>()
                    .await
                    .map(|body| body["is_partial"] == false && body["provenance"] == "FALLBACK")
                    .unwrap_or(false),
                _ => false,
            }
        }
    })
    .await
    .map_err(anyhow::Error::msg)?;

    Ok(())
}
