//! Common data types for session coordinator crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a meeting. Doubles as the media room name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeetingId(pub Uuid);

impl MeetingId {
    /// Create a new random meeting ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Room name used by the media-room service for this meeting.
    #[must_use]
    pub fn room_name(&self) -> String {
        self.0.to_string()
    }
}

impl Default for MeetingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MeetingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for MeetingId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Identity of a room participant: an internal user id or a generated guest id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantIdentity(String);

/// Prefix carried by every guest identity.
pub const GUEST_IDENTITY_PREFIX: &str = "guest-";

impl ParticipantIdentity {
    /// Identity for an authenticated user.
    #[must_use]
    pub fn user(user_id: &str) -> Self {
        Self(user_id.to_string())
    }

    /// Identity for an anonymous guest, built from CSPRNG-derived bytes.
    #[must_use]
    pub fn guest(id: Uuid) -> Self {
        Self(format!("{GUEST_IDENTITY_PREFIX}{id}"))
    }

    /// Wrap a stored identity string.
    #[must_use]
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    /// Whether this identity was minted for a public-link join.
    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.0.starts_with(GUEST_IDENTITY_PREFIX)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
