//! Per-message bookkeeping: user rows, message counts, the active roster and affinity.

use chrono::Utc;
use tracing::instrument;

use crate::bot::{ChatEvent, Engine};
use crate::constants::{AFFINITY_MAX, AFFINITY_MIN};
use crate::db::models::User;
use crate::stats::catalog::{FIRST_MESSAGE, TOTAL_MESSAGES, TOTAL_STREAMS_WATCHED};

const POSITIVE: &[&str] = &[
    "спасибо", "люблю", "молодец", "умница", "лучший", "хороший", "милый", "thanks", "love",
    "good",
];

const NEGATIVE: &[&str] = &[
    "дурак", "тупой", "плохой", "ненавижу", "глупый", "бесишь", "stupid", "hate", "bad",
];

/// `+1`/`-1` for messages addressed to the bot that contain only positive or only negative words.
pub fn affinity_delta(text: &str, bot_login: &str) -> i32 {
    let text = text.to_lowercase();
    let mention = format!("@{}", bot_login.to_lowercase());
    if bot_login.is_empty() || !text.contains(&mention) {
        return 0;
    }

    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let positive = words.iter().any(|w| POSITIVE.contains(w));
    let negative = words.iter().any(|w| NEGATIVE.contains(w));

    match (positive, negative) {
        (true, false) => 1,
        (false, true) => -1,
        _ => 0,
    }
}

impl Engine {
    /// Creates or refreshes the author's row and updates the session roster. `None` if the user
    /// row could not be written.
    #[instrument(skip(self, event), fields(login = %event.login))]
    pub(crate) async fn intake(&self, event: &ChatEvent) -> Option<User> {
        let login = event.login.to_lowercase();
        let display_name = if event.display_name.is_empty() {
            event.login.as_str()
        } else {
            event.display_name.as_str()
        };

        let user = match self.store.users.upsert_seen(&login, display_name).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(error = %e, "failed to upsert user");
                return None;
            }
        };

        let mut keys = vec![TOTAL_MESSAGES.to_string()];
        match self.store.chatters.touch(&login, display_name, Utc::now()).await {
            Ok(true) => {
                tracing::debug!("new chatter this session");
                keys.push(TOTAL_STREAMS_WATCHED.to_string());

                if let Ok(1) = self.store.chatters.count().await {
                    tracing::info!("first chatter of the session");
                    keys.push(FIRST_MESSAGE.to_string());
                }
            }
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "failed to update roster"),
        }

        self.stats.increment_all(user.id, &keys).await;
        Some(user)
    }

    pub(crate) async fn adjust_affinity(&self, user: &User, text: &str) {
        let delta = affinity_delta(text, &self.config.bot_login);
        if delta == 0 {
            return;
        }

        match self
            .store
            .users
            .adjust_affinity(user.id, delta, AFFINITY_MIN, AFFINITY_MAX)
            .await
        {
            Ok(affinity) => tracing::debug!(delta, affinity, "affinity adjusted"),
            Err(e) => tracing::error!(error = %e, "failed to adjust affinity"),
        }
    }
}
