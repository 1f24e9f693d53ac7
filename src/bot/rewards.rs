//! Channel-point reward redemptions carried on chat messages.

use tracing::instrument;

use crate::bot::Engine;
use crate::db::models::User;

impl Engine {
    #[instrument(skip(self, user), fields(login = %user.login))]
    pub(crate) async fn redeem(&self, user: &User, reward_id: &str) {
        let name = &user.display_name;

        if self.config.extra_vote_reward_id.as_deref() == Some(reward_id) {
            let reply = match self.store.users.increment_vote_limit(user.id).await {
                Ok(limit) => {
                    tracing::info!(vote_limit = limit, "extra vote redeemed");
                    format!("@{name}, +1 голос! Теперь голосов: {limit}.")
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to raise vote limit");
                    format!("@{name}, не получилось добавить голос, напиши модераторам.")
                }
            };

            self.say(&reply).await;
            return;
        }

        let Some(helix) = &self.helix else {
            tracing::info!("reward redeemed");
            return;
        };

        match helix.custom_reward(&self.config.channel_id, reward_id).await {
            Ok(Some(reward)) => {
                tracing::info!(title = %reward.title, cost = reward.cost, "reward redeemed")
            }
            Ok(None) => tracing::warn!("redeemed reward not found"),
            Err(e) => tracing::warn!(error = %e, "reward lookup failed"),
        }
    }
}
