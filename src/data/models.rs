//! Data models
//!
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Remote account following the local actor
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Follower {
    pub id: String,
    /// Follower address (user@domain format)
    pub follower_address: String,
    /// Follower's inbox URI for delivery
    pub inbox_uri: String,
    /// ActivityPub Follow activity URI
    pub uri: String,
    pub created_at: DateTime<Utc>,
}

impl Follower {
    pub fn new(follower_address: &str, inbox_uri: &str, uri: &str) -> Self {
        Self {
            id: EntityId::new().0,
            follower_address: follower_address.to_string(),
            inbox_uri: inbox_uri.to_string(),
            uri: uri.to_string(),
            created_at: Utc::now(),
        }
    }
}
