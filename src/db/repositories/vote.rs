use sqlx::{Pool, Postgres};
use tracing::instrument;

use super::{PollRepository, VoteRepository};
use crate::db::PgResult;
use crate::db::models::{Game, Poll, UserId, Vote};

#[derive(Debug)]
pub struct PgVoteRepository {
    pool: &'static Pool<Postgres>,
}

impl PgVoteRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl VoteRepository for PgVoteRepository {
    #[instrument(skip(self))]
    async fn for_user(&self, poll_id: i64, user_id: UserId) -> PgResult<Vec<Vote>> {
        Ok(sqlx::query_as::<_, Vote>(
            r#"
            SELECT poll_id, user_id, slot, game_id, created_at
            FROM votes
            WHERE poll_id = $1 AND user_id = $2
            ORDER BY slot ASC
            "#,
        )
        .bind(poll_id)
        .bind(user_id)
        .fetch_all(self.pool)
        .await?)
    }

    #[instrument(skip(self, vote), fields(poll_id = vote.poll_id, user_id = %vote.user_id, slot = vote.slot))]
    async fn insert(&self, vote: &Vote) -> PgResult<()> {
        match sqlx::query(
            r#"
            INSERT INTO votes (poll_id, user_id, slot, game_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(vote.poll_id)
        .bind(vote.user_id)
        .bind(vote.slot)
        .bind(vote.game_id)
        .bind(vote.created_at)
        .execute(self.pool)
        .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!(error = ?e, "failure during vote insertion");
                Err(e.into())
            }
        }
    }
}

#[derive(Debug)]
pub struct PgPollRepository {
    pool: &'static Pool<Postgres>,
}

impl PgPollRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PollRepository for PgPollRepository {
    #[instrument(skip(self))]
    async fn active(&self) -> PgResult<Option<Poll>> {
        Ok(sqlx::query_as::<_, Poll>(
            r#"
            SELECT id, title, is_active, created_at
            FROM polls
            WHERE is_active
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn games(&self, poll_id: i64) -> PgResult<Vec<Game>> {
        Ok(sqlx::query_as::<_, Game>(
            r#"
            SELECT g.id, g.name
            FROM poll_games pg
            JOIN games g ON g.id = pg.game_id
            WHERE pg.poll_id = $1
            ORDER BY pg.position ASC, g.id ASC
            "#,
        )
        .bind(poll_id)
        .fetch_all(self.pool)
        .await?)
    }
}
