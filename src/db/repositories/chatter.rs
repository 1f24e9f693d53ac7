use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::instrument;

use super::ChatterRepository;
use crate::db::PgResult;
use crate::db::models::StreamChatter;

#[derive(Debug)]
pub struct PgChatterRepository {
    pool: &'static Pool<Postgres>,
}

impl PgChatterRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChatterRepository for PgChatterRepository {
    #[instrument(skip(self, now))]
    async fn touch(&self, login: &str, display_name: &str, now: DateTime<Utc>) -> PgResult<bool> {
        // `xmax = 0` only holds for a freshly inserted tuple
        Ok(sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO stream_chatters (login, display_name, first_seen_at, last_seen_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (login)
            DO UPDATE SET
                display_name = EXCLUDED.display_name,
                last_seen_at = EXCLUDED.last_seen_at
            RETURNING (xmax = 0)
            "#,
        )
        .bind(login)
        .bind(display_name)
        .bind(now)
        .fetch_one(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn all(&self) -> PgResult<Vec<StreamChatter>> {
        Ok(sqlx::query_as::<_, StreamChatter>(
            r#"
            SELECT login, display_name, first_seen_at, last_seen_at
            FROM stream_chatters
            ORDER BY first_seen_at ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn seen_since(&self, since: DateTime<Utc>) -> PgResult<Vec<StreamChatter>> {
        Ok(sqlx::query_as::<_, StreamChatter>(
            r#"
            SELECT login, display_name, first_seen_at, last_seen_at
            FROM stream_chatters
            WHERE last_seen_at >= $1
            "#,
        )
        .bind(since)
        .fetch_all(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn count(&self) -> PgResult<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stream_chatters")
                .fetch_one(self.pool)
                .await?,
        )
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> PgResult<u64> {
        let result = sqlx::query("DELETE FROM stream_chatters")
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
