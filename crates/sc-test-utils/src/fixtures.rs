//! Meeting fixtures for the in-memory store.

use chrono::{DateTime, Duration, Utc};
use session_coordinator::models::{Meeting, NewMeeting};
use session_coordinator::repositories::{InMemoryStore, MeetingsRepository};

/// Builder for meetings inserted directly into the store.
///
/// Meetings are created by an upstream project service in production, so
/// tests seed them here.
pub struct MeetingFixture {
    meeting: NewMeeting,
}

impl MeetingFixture {
    /// A 60 minute meeting in `org_id` that started now.
    pub fn new(org_id: &str) -> Self {
        Self {
            meeting: NewMeeting {
                org_id: org_id.to_string(),
                title: "Weekly sync".to_string(),
                scheduled_at: Utc::now(),
                duration_minutes: 60,
            },
        }
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.meeting.title = title.to_string();
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.meeting.scheduled_at = at;
        self
    }

    /// Shift the start by `minutes` relative to now (negative for the past).
    pub fn starting_in_minutes(self, minutes: i64) -> Self {
        self.scheduled_at(Utc::now() + Duration::minutes(minutes))
    }

    pub fn lasting_minutes(mut self, minutes: i32) -> Self {
        self.meeting.duration_minutes = minutes;
        self
    }

    /// Insert into the store and return the stored row.
    pub async fn insert(self, store: &InMemoryStore) -> Meeting {
        store
            .insert_meeting(self.meeting)
            .await
            .expect("in-memory insert should succeed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_coordinator::models::MeetingStatus;

    #[tokio::test]
    async fn test_fixture_inserts_scheduled_meeting() {
        let store = InMemoryStore::new();
        let meeting = MeetingFixture::new("org-1")
            .titled("Retro")
            .starting_in_minutes(-31)
            .lasting_minutes(30)
            .insert(&store)
            .await;

        assert_eq!(meeting.status, MeetingStatus::Scheduled);
        assert_eq!(meeting.title, "Retro");
        assert!(meeting.is_expired_at(Utc::now()));
    }
}
