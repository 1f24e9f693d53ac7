use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::instrument;

use super::TokenRepository;
use crate::db::PgResult;
use crate::db::models::StoredToken;

const TOKEN_FIELDS: &str = "provider, access_token, refresh_token, expires_at";

#[derive(Debug)]
pub struct PgTokenRepository {
    pool: &'static Pool<Postgres>,
}

impl PgTokenRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TokenRepository for PgTokenRepository {
    #[instrument(skip(self))]
    async fn latest_valid(
        &self,
        provider: &str,
        valid_after: DateTime<Utc>,
    ) -> PgResult<Option<StoredToken>> {
        Ok(sqlx::query_as::<_, StoredToken>(&format!(
            r#"
            SELECT {TOKEN_FIELDS}
            FROM tokens
            WHERE provider = $1 AND expires_at > $2
            ORDER BY expires_at DESC
            LIMIT 1
            "#
        ))
        .bind(provider)
        .bind(valid_after)
        .fetch_optional(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn latest(&self, provider: &str) -> PgResult<Option<StoredToken>> {
        Ok(sqlx::query_as::<_, StoredToken>(&format!(
            r#"
            SELECT {TOKEN_FIELDS}
            FROM tokens
            WHERE provider = $1
            ORDER BY expires_at DESC
            LIMIT 1
            "#
        ))
        .bind(provider)
        .fetch_optional(self.pool)
        .await?)
    }

    #[instrument(skip(self, token), fields(provider = %token.provider))]
    async fn save(&self, token: &StoredToken) -> PgResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (provider, access_token, refresh_token, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&token.provider)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(token.expires_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
