use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base users table model. Counters live in `user_stats` and are reached through
/// `UserRepository::increment_stat`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub display_name: String,
    pub vote_limit: i32,
    pub affinity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Achievement {
    pub id: i64,
    pub stat_key: String,
    pub threshold: i64,
    pub title: String,
    pub description: String,
}

#[derive(Clone, PartialEq, sqlx::FromRow)]
pub struct StoredToken {
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredToken")
            .field("provider", &self.provider)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Poll {
    pub id: i64,
    pub title: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Game {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Vote {
    pub poll_id: i64,
    pub user_id: UserId,
    pub slot: i32,
    pub game_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StreamChatter {
    pub login: String,
    pub display_name: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// One row of a paired-command content table: two free-text phrase slots.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PairedTemplate {
    pub id: i64,
    pub phrase_one: String,
    pub phrase_two: String,
}

/// Append-only structured event record consumed by the site and overlays.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct EventLogRecord {
    pub message: String,
    pub media_url: Option<String>,
    pub preview_url: Option<String>,
    pub title: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl EventLogRecord {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            media_url: None,
            preview_url: None,
            title: None,
            kind: kind.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_media(mut self, media_url: Option<String>, preview_url: Option<String>) -> Self {
        self.media_url = media_url;
        self.preview_url = preview_url;
        self
    }
}
