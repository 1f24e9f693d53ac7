//! Per-user counters and the achievement check that follows every mutation.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::instrument;

use crate::db::models::UserId;
use crate::db::repositories::{AchievementRepository, UserRepository};
use crate::db::{PgResult, Store};

pub mod catalog;
pub mod keys;

pub use catalog::Catalog;

#[derive(Debug, Clone)]
pub struct StatCounter {
    users: Arc<dyn UserRepository>,
    achievements: Arc<dyn AchievementRepository>,
    catalog: Arc<Catalog>,
}

impl StatCounter {
    pub fn new(store: &Store, catalog: Arc<Catalog>) -> Self {
        Self {
            users: store.users.clone(),
            achievements: store.achievements.clone(),
            catalog,
        }
    }

    /// Writes every catalog row so awards can reference them.
    pub async fn seed_catalog(&self) -> PgResult<()> {
        let seeds = self.catalog.seeds();
        self.achievements.seed(&seeds).await?;
        tracing::info!(seed_count = seeds.len(), "achievement catalog seeded");

        Ok(())
    }

    /// Adds `amount` to the counter and runs the achievement check on the new value.
    ///
    /// Store failures are logged and reported as `None`; the counter may not have advanced.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn increment_stat(&self, user_id: UserId, key: &str, amount: i64) -> Option<i64> {
        let value = match self.users.increment_stat(user_id, key, amount).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "failed to increment stat");
                return None;
            }
        };

        tracing::debug!(value, "stat incremented");
        self.check_and_award(user_id, key, value).await;

        Some(value)
    }

    /// Increments each key by one concurrently.
    pub async fn increment_all(&self, user_id: UserId, keys: &[String]) -> Vec<Option<i64>> {
        join_all(keys.iter().map(|key| self.increment_stat(user_id, key, 1))).await
    }

    /// Awards every catalog achievement for `key` whose threshold is at most `new_value` and that
    /// the user does not hold yet. Returns `true` if at least one row was inserted.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn check_and_award(&self, user_id: UserId, key: &str, new_value: i64) -> bool {
        let reached: Vec<i64> = self
            .catalog
            .thresholds(key)
            .iter()
            .copied()
            .take_while(|threshold| *threshold <= new_value)
            .collect();

        if reached.is_empty() {
            return false;
        }

        match self.award_reached(user_id, key, &reached).await {
            Ok(unlocked) => unlocked,
            Err(e) => {
                tracing::error!(error = %e, "achievement check failed");
                false
            }
        }
    }

    async fn award_reached(&self, user_id: UserId, key: &str, reached: &[i64]) -> PgResult<bool> {
        let rows = self.achievements.for_key(key).await?;
        let held = self.achievements.held_by(user_id, key).await?;
        let mut unlocked = false;

        for threshold in reached {
            let Some(achievement) = rows.iter().find(|a| a.threshold == *threshold) else {
                tracing::warn!(threshold, "catalog threshold has no achievement row");
                continue;
            };

            if held.contains(&achievement.id) {
                continue;
            }

            // the insert's row count decides; a concurrent award loses here
            if self
                .achievements
                .award(user_id, achievement.id, Utc::now())
                .await?
            {
                tracing::info!(threshold, title = %achievement.title, "achievement unlocked");
                unlocked = true;
            }
        }

        Ok(unlocked)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::memory::MemoryStore;

    async fn counter(catalog: Catalog) -> (StatCounter, Arc<MemoryStore>) {
        let (store, mem) = Store::memory();
        let counter = StatCounter::new(&store, Arc::new(catalog));
        counter.seed_catalog().await.unwrap();

        (counter, mem)
    }

    fn messages_catalog() -> Catalog {
        Catalog::from_entries([("total_messages", "Messages", vec![500, 1000, 2000])])
    }

    #[tokio::test]
    async fn awards_each_threshold_once_in_order() {
        let (counter, mem) = counter(messages_catalog()).await;
        let user = mem.add_user("milia");

        assert_eq!(counter.increment_stat(user.id, "total_messages", 500).await, Some(500));
        assert_eq!(mem.earned(user.id), vec![("total_messages".to_string(), 500)]);

        assert_eq!(counter.increment_stat(user.id, "total_messages", 1500).await, Some(2000));
        assert_eq!(
            mem.earned(user.id),
            vec![
                ("total_messages".to_string(), 500),
                ("total_messages".to_string(), 1000),
                ("total_messages".to_string(), 2000),
            ]
        );

        counter.increment_stat(user.id, "total_messages", 1).await;
        assert_eq!(mem.earned(user.id).len(), 3);
    }

    #[tokio::test]
    async fn check_reports_only_new_unlocks() {
        let (counter, mem) = counter(messages_catalog()).await;
        let user = mem.add_user("milia");

        assert!(!counter.check_and_award(user.id, "total_messages", 499).await);
        assert!(counter.check_and_award(user.id, "total_messages", 500).await);
        assert!(!counter.check_and_award(user.id, "total_messages", 999).await);
        assert!(counter.check_and_award(user.id, "total_messages", 1000).await);
    }

    #[tokio::test]
    async fn generated_keys_unlock_at_five() {
        let (counter, mem) = counter(Catalog::standard()).await;
        let user = mem.add_user("myramors");

        for _ in 0..4 {
            counter.increment_stat(user.id, "poceluy_self_no_tag", 1).await;
        }
        assert!(mem.earned(user.id).is_empty());

        counter.increment_stat(user.id, "poceluy_self_no_tag", 1).await;
        assert_eq!(
            mem.earned(user.id),
            vec![("poceluy_self_no_tag".to_string(), 5)]
        );
    }

    #[tokio::test]
    async fn keys_outside_catalog_still_count() {
        let (counter, mem) = counter(messages_catalog()).await;
        let user = mem.add_user("milia");

        assert_eq!(counter.increment_stat(user.id, "unlisted", 3).await, Some(3));
        assert_eq!(mem.stat(user.id, "unlisted"), 3);
        assert!(mem.earned(user.id).is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let (counter, mem) = counter(messages_catalog()).await;
        let user = mem.add_user("milia");
        mem.set_fail_writes(true);

        assert_eq!(counter.increment_stat(user.id, "total_messages", 600).await, None);
        assert!(!counter.check_and_award(user.id, "total_messages", 600).await);
        assert!(mem.earned(user.id).is_empty());
    }

    #[tokio::test]
    async fn increment_all_touches_every_key() {
        let (counter, mem) = counter(Catalog::standard()).await;
        let user = mem.add_user("milia");
        let keys = vec!["intim_no_tag".to_string(), "intim_self_no_tag".to_string()];

        let values = counter.increment_all(user.id, &keys).await;

        assert_eq!(values, vec![Some(1), Some(1)]);
        assert_eq!(mem.stat_keys(user.id), keys);
    }
}
