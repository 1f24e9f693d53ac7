use tracing::instrument;

use crate::bot::Engine;
use crate::db::models::{EventLogRecord, User};
use crate::stats::catalog::CLIPS_CREATED;
use crate::util::helix::HelixErr;

impl Engine {
    /// Creates a clip with the broadcaster token and returns the chat reply.
    #[instrument(skip(self, user), fields(login = %user.login))]
    pub(crate) async fn clip(&self, user: &User) -> String {
        let name = &user.display_name;
        let Some(helix) = &self.helix else {
            return format!("@{name}, клипы сейчас недоступны.");
        };

        match helix.create_clip(&self.config.channel_id).await {
            Ok(clip) => {
                let url = clip.url();
                tracing::info!(clip_id = %clip.id, "clip created");

                self.stats.increment_stat(user.id, CLIPS_CREATED, 1).await;
                let record = EventLogRecord::new("clip", format!("{name} создал(а) клип"))
                    .with_title(name.clone())
                    .with_media(Some(url.clone()), Some(clip.edit_url.clone()));
                self.record(record).await;

                format!("@{name}, клип готов: {url}")
            }
            Err(HelixErr::TokenUnavailable(_)) => {
                tracing::warn!("no broadcaster token for clip");
                format!("@{name}, клипы сейчас недоступны.")
            }
            Err(e) => {
                tracing::error!(error = %e, "clip creation failed");
                format!("@{name}, не получилось создать клип. Стрим точно идёт?")
            }
        }
    }
}
