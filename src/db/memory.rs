//! In-process store used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::*;
use crate::db::repositories::*;
use crate::db::{PgError, PgResult};

#[derive(Debug, Clone)]
struct UserAchievement {
    user_id: UserId,
    achievement_id: i64,
}

#[derive(Debug, Default)]
struct Inner {
    users: Vec<User>,
    stats: HashMap<(UserId, String), i64>,
    achievements: Vec<Achievement>,
    user_achievements: Vec<UserAchievement>,
    polls: Vec<Poll>,
    games: Vec<Game>,
    poll_games: HashMap<i64, Vec<i64>>,
    votes: Vec<Vote>,
    chatters: Vec<StreamChatter>,
    templates: HashMap<String, Vec<PairedTemplate>>,
    tokens: Vec<StoredToken>,
    events: Vec<EventLogRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
    token_reads: AtomicUsize,
}

fn injected() -> PgError {
    PgError::SqlxError(sqlx::Error::Protocol("injected failure".into()))
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writes(&self) -> PgResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected());
        }

        Ok(())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn add_user(&self, login: &str) -> User {
        let mut inner = self.lock();
        let user = User {
            id: UserId(inner.users.len() as i64 + 1),
            login: login.to_string(),
            display_name: login.to_string(),
            vote_limit: 1,
            affinity: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        inner.users.push(user.clone());
        user
    }

    pub fn user(&self, login: &str) -> Option<User> {
        self.lock().users.iter().find(|u| u.login == login).cloned()
    }

    pub fn set_vote_limit(&self, user_id: UserId, limit: i32) {
        if let Some(user) = self.lock().users.iter_mut().find(|u| u.id == user_id) {
            user.vote_limit = limit;
        }
    }

    pub fn stat(&self, user_id: UserId, key: &str) -> i64 {
        self.lock()
            .stats
            .get(&(user_id, key.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn stat_keys(&self, user_id: UserId) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .stats
            .keys()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, key)| key.clone())
            .collect();

        keys.sort();
        keys
    }

    /// Earned `(stat_key, threshold)` pairs for a user, in award order.
    pub fn earned(&self, user_id: UserId) -> Vec<(String, i64)> {
        let inner = self.lock();
        inner
            .user_achievements
            .iter()
            .filter(|ua| ua.user_id == user_id)
            .filter_map(|ua| {
                inner
                    .achievements
                    .iter()
                    .find(|a| a.id == ua.achievement_id)
                    .map(|a| (a.stat_key.clone(), a.threshold))
            })
            .collect()
    }

    pub fn add_poll(&self, title: &str, games: &[&str]) -> Poll {
        let mut inner = self.lock();
        for poll in inner.polls.iter_mut() {
            poll.is_active = false;
        }

        let poll = Poll {
            id: inner.polls.len() as i64 + 1,
            title: title.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };

        let mut ids = Vec::new();
        for name in games {
            let id = inner.games.len() as i64 + 1;
            inner.games.push(Game {
                id,
                name: name.to_string(),
            });
            ids.push(id);
        }

        inner.poll_games.insert(poll.id, ids);
        inner.polls.push(poll.clone());
        poll
    }

    pub fn votes(&self) -> Vec<Vote> {
        self.lock().votes.clone()
    }

    pub fn add_template(&self, family: &str, phrase_one: &str, phrase_two: &str) {
        let mut inner = self.lock();
        let entry = inner.templates.entry(family.to_string()).or_default();
        let id = entry.len() as i64 + 1;
        entry.push(PairedTemplate {
            id,
            phrase_one: phrase_one.to_string(),
            phrase_two: phrase_two.to_string(),
        });
    }

    pub fn add_chatter(&self, login: &str) {
        let now = Utc::now();
        self.lock().chatters.push(StreamChatter {
            login: login.to_string(),
            display_name: login.to_string(),
            first_seen_at: now,
            last_seen_at: now,
        });
    }

    pub fn chatter_logins(&self) -> Vec<String> {
        self.lock().chatters.iter().map(|c| c.login.clone()).collect()
    }

    pub fn add_token(&self, token: StoredToken) {
        self.lock().tokens.push(token);
    }

    pub fn tokens(&self) -> Vec<StoredToken> {
        self.lock().tokens.clone()
    }

    pub fn token_reads(&self) -> usize {
        self.token_reads.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<EventLogRecord> {
        self.lock().events.clone()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn upsert_seen(&self, login: &str, display_name: &str) -> PgResult<User> {
        self.check_writes()?;
        let mut inner = self.lock();
        let now = Utc::now();
        if let Some(user) = inner.users.iter_mut().find(|u| u.login == login) {
            user.display_name = display_name.to_string();
            user.updated_at = now;
            return Ok(user.clone());
        }

        let user = User {
            id: UserId(inner.users.len() as i64 + 1),
            login: login.to_string(),
            display_name: display_name.to_string(),
            vote_limit: 1,
            affinity: 0,
            created_at: now,
            updated_at: now,
        };

        inner.users.push(user.clone());
        Ok(user)
    }

    async fn by_login(&self, login: &str) -> PgResult<Option<User>> {
        Ok(self.user(login))
    }

    async fn increment_stat(&self, user_id: UserId, key: &str, amount: i64) -> PgResult<i64> {
        self.check_writes()?;
        let mut inner = self.lock();
        let value = inner.stats.entry((user_id, key.to_string())).or_default();
        *value += amount;

        Ok(*value)
    }

    async fn increment_vote_limit(&self, user_id: UserId) -> PgResult<i32> {
        self.check_writes()?;
        let mut inner = self.lock();
        let user = inner
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(PgError::SqlxError(sqlx::Error::RowNotFound))?;

        user.vote_limit += 1;
        Ok(user.vote_limit)
    }

    async fn adjust_affinity(
        &self,
        user_id: UserId,
        delta: i32,
        min: i32,
        max: i32,
    ) -> PgResult<i32> {
        self.check_writes()?;
        let mut inner = self.lock();
        let user = inner
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(PgError::SqlxError(sqlx::Error::RowNotFound))?;

        user.affinity = (user.affinity + delta).clamp(min, max);
        Ok(user.affinity)
    }
}

#[async_trait]
impl AchievementRepository for MemoryStore {
    async fn seed(&self, seeds: &[AchievementSeed]) -> PgResult<()> {
        let mut inner = self.lock();
        for seed in seeds {
            let exists = inner
                .achievements
                .iter()
                .any(|a| a.stat_key == seed.stat_key && a.threshold == seed.threshold);

            if !exists {
                let id = inner.achievements.len() as i64 + 1;
                inner.achievements.push(Achievement {
                    id,
                    stat_key: seed.stat_key.clone(),
                    threshold: seed.threshold,
                    title: seed.title.clone(),
                    description: String::new(),
                });
            }
        }

        Ok(())
    }

    async fn for_key(&self, stat_key: &str) -> PgResult<Vec<Achievement>> {
        let mut found: Vec<Achievement> = self
            .lock()
            .achievements
            .iter()
            .filter(|a| a.stat_key == stat_key)
            .cloned()
            .collect();

        found.sort_by_key(|a| a.threshold);
        Ok(found)
    }

    async fn held_by(&self, user_id: UserId, stat_key: &str) -> PgResult<Vec<i64>> {
        let inner = self.lock();
        Ok(inner
            .user_achievements
            .iter()
            .filter(|ua| ua.user_id == user_id)
            .filter(|ua| {
                inner
                    .achievements
                    .iter()
                    .any(|a| a.id == ua.achievement_id && a.stat_key == stat_key)
            })
            .map(|ua| ua.achievement_id)
            .collect())
    }

    async fn award(
        &self,
        user_id: UserId,
        achievement_id: i64,
        _earned_at: DateTime<Utc>,
    ) -> PgResult<bool> {
        self.check_writes()?;
        let mut inner = self.lock();
        let held = inner
            .user_achievements
            .iter()
            .any(|ua| ua.user_id == user_id && ua.achievement_id == achievement_id);

        if held {
            return Ok(false);
        }

        inner.user_achievements.push(UserAchievement {
            user_id,
            achievement_id,
        });

        Ok(true)
    }
}

#[async_trait]
impl VoteRepository for MemoryStore {
    async fn for_user(&self, poll_id: i64, user_id: UserId) -> PgResult<Vec<Vote>> {
        let mut votes: Vec<Vote> = self
            .lock()
            .votes
            .iter()
            .filter(|v| v.poll_id == poll_id && v.user_id == user_id)
            .cloned()
            .collect();

        votes.sort_by_key(|v| v.slot);
        Ok(votes)
    }

    async fn insert(&self, vote: &Vote) -> PgResult<()> {
        self.check_writes()?;
        let mut inner = self.lock();
        let duplicate = inner.votes.iter().any(|v| {
            v.poll_id == vote.poll_id && v.user_id == vote.user_id && v.slot == vote.slot
        });

        if duplicate {
            return Err(PgError::SqlxError(sqlx::Error::Protocol(
                "duplicate key value violates unique constraint \"votes_pkey\"".into(),
            )));
        }

        inner.votes.push(vote.clone());
        Ok(())
    }
}

#[async_trait]
impl PollRepository for MemoryStore {
    async fn active(&self) -> PgResult<Option<Poll>> {
        Ok(self.lock().polls.iter().rev().find(|p| p.is_active).cloned())
    }

    async fn games(&self, poll_id: i64) -> PgResult<Vec<Game>> {
        let inner = self.lock();
        let ids = inner.poll_games.get(&poll_id).cloned().unwrap_or_default();

        Ok(ids
            .iter()
            .filter_map(|id| inner.games.iter().find(|g| g.id == *id).cloned())
            .collect())
    }
}

#[async_trait]
impl ChatterRepository for MemoryStore {
    async fn touch(&self, login: &str, display_name: &str, now: DateTime<Utc>) -> PgResult<bool> {
        self.check_writes()?;
        let mut inner = self.lock();
        if let Some(chatter) = inner.chatters.iter_mut().find(|c| c.login == login) {
            chatter.display_name = display_name.to_string();
            chatter.last_seen_at = now;
            return Ok(false);
        }

        inner.chatters.push(StreamChatter {
            login: login.to_string(),
            display_name: display_name.to_string(),
            first_seen_at: now,
            last_seen_at: now,
        });

        Ok(true)
    }

    async fn all(&self) -> PgResult<Vec<StreamChatter>> {
        Ok(self.lock().chatters.clone())
    }

    async fn seen_since(&self, since: DateTime<Utc>) -> PgResult<Vec<StreamChatter>> {
        Ok(self
            .lock()
            .chatters
            .iter()
            .filter(|c| c.last_seen_at >= since)
            .cloned()
            .collect())
    }

    async fn count(&self) -> PgResult<i64> {
        Ok(self.lock().chatters.len() as i64)
    }

    async fn clear(&self) -> PgResult<u64> {
        let mut inner = self.lock();
        let cleared = inner.chatters.len() as u64;
        inner.chatters.clear();

        Ok(cleared)
    }
}

#[async_trait]
impl TemplateRepository for MemoryStore {
    async fn paired(&self, family: &str) -> PgResult<Vec<PairedTemplate>> {
        Ok(self
            .lock()
            .templates
            .get(family)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn latest_valid(
        &self,
        provider: &str,
        valid_after: DateTime<Utc>,
    ) -> PgResult<Option<StoredToken>> {
        self.token_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()
            .tokens
            .iter()
            .filter(|t| t.provider == provider && t.expires_at > valid_after)
            .max_by_key(|t| t.expires_at)
            .cloned())
    }

    async fn latest(&self, provider: &str) -> PgResult<Option<StoredToken>> {
        self.token_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()
            .tokens
            .iter()
            .filter(|t| t.provider == provider)
            .max_by_key(|t| t.expires_at)
            .cloned())
    }

    async fn save(&self, token: &StoredToken) -> PgResult<()> {
        self.check_writes()?;
        self.lock().tokens.push(token.clone());
        Ok(())
    }
}

#[async_trait]
impl EventLogRepository for MemoryStore {
    async fn append(&self, record: &EventLogRecord) -> PgResult<()> {
        self.check_writes()?;
        self.lock().events.push(record.clone());
        Ok(())
    }
}
