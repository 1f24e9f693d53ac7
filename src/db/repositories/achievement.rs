use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::instrument;

use super::{AchievementRepository, AchievementSeed};
use crate::db::PgResult;
use crate::db::models::{Achievement, UserId};

#[derive(Debug)]
pub struct PgAchievementRepository {
    pool: &'static Pool<Postgres>,
}

impl PgAchievementRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AchievementRepository for PgAchievementRepository {
    #[instrument(skip(self, seeds), fields(seed_count = seeds.len()))]
    async fn seed(&self, seeds: &[AchievementSeed]) -> PgResult<()> {
        let mut tx = self.pool.begin().await?;
        for seed in seeds {
            sqlx::query(
                r#"
                INSERT INTO achievements (stat_key, threshold, title)
                VALUES ($1, $2, $3)
                ON CONFLICT (stat_key, threshold)
                DO NOTHING
                "#,
            )
            .bind(&seed.stat_key)
            .bind(seed.threshold)
            .bind(&seed.title)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!("achievement catalog seeded");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn for_key(&self, stat_key: &str) -> PgResult<Vec<Achievement>> {
        Ok(sqlx::query_as::<_, Achievement>(
            r#"
            SELECT id, stat_key, threshold, title, description
            FROM achievements
            WHERE stat_key = $1
            ORDER BY threshold ASC
            "#,
        )
        .bind(stat_key)
        .fetch_all(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn held_by(&self, user_id: UserId, stat_key: &str) -> PgResult<Vec<i64>> {
        Ok(sqlx::query_scalar::<_, i64>(
            r#"
            SELECT ua.achievement_id
            FROM user_achievements ua
            JOIN achievements a ON a.id = ua.achievement_id
            WHERE ua.user_id = $1 AND a.stat_key = $2
            "#,
        )
        .bind(user_id)
        .bind(stat_key)
        .fetch_all(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn award(
        &self,
        user_id: UserId,
        achievement_id: i64,
        earned_at: DateTime<Utc>,
    ) -> PgResult<bool> {
        // the primary key is the at-most-once guard, a concurrent duplicate affects zero rows
        let result = sqlx::query(
            r#"
            INSERT INTO user_achievements (user_id, achievement_id, earned_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, achievement_id)
            DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(achievement_id)
        .bind(earned_at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
