//! Repository contracts per entity.
//!
//! The engine only ever talks to these traits; `Pg*` types in the submodules implement them over
//! the shared `sqlx` pool and `db::memory::MemoryStore` implements them for tests.

use core::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::PgResult;
use crate::db::models::{
    Achievement, EventLogRecord, Game, PairedTemplate, Poll, StoredToken, StreamChatter, User,
    UserId, Vote,
};

pub mod achievement;
pub mod chatter;
pub mod event_log;
pub mod template;
pub mod token;
pub mod user;
pub mod vote;

#[async_trait]
pub trait UserRepository: Send + Sync + fmt::Debug {
    /// Creates the user on first sight, otherwise refreshes the display name.
    async fn upsert_seen(&self, login: &str, display_name: &str) -> PgResult<User>;

    async fn by_login(&self, login: &str) -> PgResult<Option<User>>;

    /// Adds `amount` to the named counter and returns the new value in a single statement.
    async fn increment_stat(&self, user_id: UserId, key: &str, amount: i64) -> PgResult<i64>;

    async fn increment_vote_limit(&self, user_id: UserId) -> PgResult<i32>;

    /// Applies `delta` to the affinity score, clamped to `[min, max]`.
    async fn adjust_affinity(&self, user_id: UserId, delta: i32, min: i32, max: i32)
    -> PgResult<i32>;
}

/// A catalog row to seed: `(stat_key, threshold, title)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchievementSeed {
    pub stat_key: String,
    pub threshold: i64,
    pub title: String,
}

#[async_trait]
pub trait AchievementRepository: Send + Sync + fmt::Debug {
    async fn seed(&self, seeds: &[AchievementSeed]) -> PgResult<()>;

    async fn for_key(&self, stat_key: &str) -> PgResult<Vec<Achievement>>;

    /// Achievement ids for `stat_key` already held by the user.
    async fn held_by(&self, user_id: UserId, stat_key: &str) -> PgResult<Vec<i64>>;

    /// Inserts the award row; `Ok(false)` if the user already held it.
    async fn award(
        &self,
        user_id: UserId,
        achievement_id: i64,
        earned_at: DateTime<Utc>,
    ) -> PgResult<bool>;
}

#[async_trait]
pub trait VoteRepository: Send + Sync + fmt::Debug {
    async fn for_user(&self, poll_id: i64, user_id: UserId) -> PgResult<Vec<Vote>>;

    async fn insert(&self, vote: &Vote) -> PgResult<()>;
}

#[async_trait]
pub trait PollRepository: Send + Sync + fmt::Debug {
    async fn active(&self) -> PgResult<Option<Poll>>;

    /// Games attached to a poll, in display order.
    async fn games(&self, poll_id: i64) -> PgResult<Vec<Game>>;
}

#[async_trait]
pub trait ChatterRepository: Send + Sync + fmt::Debug {
    /// Records the chatter as seen at `now`; returns `true` if they were not on the roster yet.
    async fn touch(&self, login: &str, display_name: &str, now: DateTime<Utc>) -> PgResult<bool>;

    async fn all(&self) -> PgResult<Vec<StreamChatter>>;

    async fn seen_since(&self, since: DateTime<Utc>) -> PgResult<Vec<StreamChatter>>;

    async fn count(&self) -> PgResult<i64>;

    async fn clear(&self) -> PgResult<u64>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync + fmt::Debug {
    async fn paired(&self, family: &str) -> PgResult<Vec<PairedTemplate>>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync + fmt::Debug {
    /// Freshest row for the provider expiring after `valid_after`.
    async fn latest_valid(
        &self,
        provider: &str,
        valid_after: DateTime<Utc>,
    ) -> PgResult<Option<StoredToken>>;

    /// Freshest row for the provider regardless of expiry.
    async fn latest(&self, provider: &str) -> PgResult<Option<StoredToken>>;

    async fn save(&self, token: &StoredToken) -> PgResult<()>;
}

#[async_trait]
pub trait EventLogRepository: Send + Sync + fmt::Debug {
    async fn append(&self, record: &EventLogRecord) -> PgResult<()>;
}
