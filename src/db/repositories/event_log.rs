use sqlx::{Pool, Postgres};
use tracing::instrument;

use super::EventLogRepository;
use crate::db::PgResult;
use crate::db::models::EventLogRecord;

#[derive(Debug)]
pub struct PgEventLogRepository {
    pool: &'static Pool<Postgres>,
}

impl PgEventLogRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EventLogRepository for PgEventLogRepository {
    #[instrument(skip(self, record), fields(kind = %record.kind))]
    async fn append(&self, record: &EventLogRecord) -> PgResult<()> {
        sqlx::query(
            r#"
            INSERT INTO event_log (message, media_url, preview_url, title, type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.message)
        .bind(&record.media_url)
        .bind(&record.preview_url)
        .bind(&record.title)
        .bind(&record.kind)
        .bind(record.created_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
