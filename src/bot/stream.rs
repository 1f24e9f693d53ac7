//! Tracks the channel's live status: the roster is cleared on every transition and chatters seen
//! while live are credited watch time.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tracing::instrument;

use crate::constants::STREAM_POLL_INTERVAL;
use crate::db::repositories::{ChatterRepository, UserRepository};
use crate::stats::StatCounter;
use crate::stats::catalog::WATCH_TIME;
use crate::util::helix::Helix;

/// Upper bound on minutes credited for one poll, in case polling stalled.
const MAX_CREDIT_MINUTES: i64 = 10;

#[derive(Debug)]
pub struct StreamWatcher {
    helix: Helix,
    channel_login: String,
    users: Arc<dyn UserRepository>,
    chatters: Arc<dyn ChatterRepository>,
    stats: StatCounter,
    live: Option<bool>,
    last_poll: Option<DateTime<Utc>>,
}

impl StreamWatcher {
    pub fn new(
        helix: Helix,
        channel_login: impl Into<String>,
        store: &crate::db::Store,
        stats: StatCounter,
    ) -> Self {
        Self {
            helix,
            channel_login: channel_login.into(),
            users: store.users.clone(),
            chatters: store.chatters.clone(),
            stats,
            live: None,
            last_poll: None,
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(STREAM_POLL_INTERVAL);

        loop {
            interval.tick().await;
            self.poll_once(Utc::now()).await;
        }
    }

    /// One status check. Returns the observed live flag, or `None` if the check failed.
    #[instrument(skip(self), fields(channel = %self.channel_login))]
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> Option<bool> {
        let stream = match self.helix.stream_by_login(&self.channel_login).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "stream status check failed");
                return None;
            }
        };

        let is_live = stream.is_some();
        let next_poll = match (self.live, self.last_poll) {
            (Some(was_live), _) if was_live != is_live => {
                tracing::info!(was_live, is_live, "stream status changed, clearing roster");
                if let Some(stream) = &stream {
                    tracing::info!(
                        title = %stream.title,
                        game = %stream.game_name,
                        started_at = %stream.started_at,
                        "stream went live"
                    );
                }
                if let Err(e) = self.chatters.clear().await {
                    tracing::error!(error = %e, "failed to clear roster");
                }
                now
            }
            (Some(true), Some(since)) => self.credit_watch_time(since, now).await,
            _ => now,
        };

        self.live = Some(is_live);
        self.last_poll = Some(next_poll);

        Some(is_live)
    }

    /// Credits whole minutes elapsed since `since` and returns the new poll mark. The mark only
    /// advances by the minutes credited, so sub-minute remainders carry over to the next poll.
    async fn credit_watch_time(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let elapsed = (now - since).num_minutes();
        if elapsed <= 0 {
            return since;
        }

        // a stalled poller does not get to backfill more than the cap
        let (minutes, next) = if elapsed > MAX_CREDIT_MINUTES {
            (MAX_CREDIT_MINUTES, now)
        } else {
            (elapsed, since + Duration::minutes(elapsed))
        };

        let seen = match self.chatters.seen_since(since).await {
            Ok(seen) => seen,
            Err(e) => {
                tracing::error!(error = %e, "failed to read roster");
                return next;
            }
        };

        let credits = seen.iter().map(|chatter| async move {
            match self.users.by_login(&chatter.login).await {
                Ok(Some(user)) => {
                    self.stats.increment_stat(user.id, WATCH_TIME, minutes).await;
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, login = %chatter.login, "user lookup failed"),
            }
        });

        join_all(credits).await;
        tracing::debug!(credited = seen.len(), minutes, "watch time credited");

        next
    }
}
