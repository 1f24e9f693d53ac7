use sqlx::{Pool, Postgres};
use tracing::instrument;

use super::UserRepository;
use crate::db::PgResult;
use crate::db::models::{User, UserId};

const USER_FIELDS: &str = r#"
    id,
    login,
    display_name,
    vote_limit,
    affinity,
    created_at,
    updated_at
"#;

#[derive(Debug)]
pub struct PgUserRepository {
    pool: &'static Pool<Postgres>,
}

impl PgUserRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserRepository for PgUserRepository {
    #[instrument(skip(self))]
    async fn upsert_seen(&self, login: &str, display_name: &str) -> PgResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (login, display_name)
            VALUES ($1, $2)
            ON CONFLICT (login)
            DO UPDATE SET
                display_name = EXCLUDED.display_name,
                updated_at = NOW()
            RETURNING {USER_FIELDS}
            "#
        ))
        .bind(login)
        .bind(display_name)
        .fetch_one(self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, "failure during user upsert"))?;

        Ok(user)
    }

    #[instrument(skip(self))]
    async fn by_login(&self, login: &str) -> PgResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_FIELDS} FROM users WHERE login = $1"
        ))
        .bind(login)
        .fetch_optional(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn increment_stat(&self, user_id: UserId, key: &str, amount: i64) -> PgResult<i64> {
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO user_stats (user_id, stat_key, value, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, stat_key)
            DO UPDATE SET
                value = user_stats.value + EXCLUDED.value,
                updated_at = NOW()
            RETURNING value
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(amount)
        .fetch_one(self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, "failure during stat increment"))?;

        Ok(value)
    }

    #[instrument(skip(self))]
    async fn increment_vote_limit(&self, user_id: UserId) -> PgResult<i32> {
        Ok(sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE users
            SET vote_limit = vote_limit + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING vote_limit
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn adjust_affinity(
        &self,
        user_id: UserId,
        delta: i32,
        min: i32,
        max: i32,
    ) -> PgResult<i32> {
        Ok(sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE users
            SET affinity = LEAST(GREATEST(affinity + $2, $3), $4),
                updated_at = NOW()
            WHERE id = $1
            RETURNING affinity
            "#,
        )
        .bind(user_id)
        .bind(delta)
        .bind(min)
        .bind(max)
        .fetch_one(self.pool)
        .await?)
    }
}
