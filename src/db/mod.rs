use std::sync::{Arc, LazyLock};

use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::util::env::{self, Var};
use crate::var;

#[cfg(test)]
pub mod memory;
pub mod models;
pub mod repositories;

static DB_POOL: LazyLock<OnceCell<Db>> = LazyLock::new(OnceCell::new);
pub async fn db_pool() -> PgResult<&'static PgPool> {
    Ok(&DB_POOL
        .get_or_try_init(|| async { Db::new_pool().await })
        .await?
        .pool)
}

struct Db {
    pool: PgPool,
}

impl Db {
    #[instrument]
    async fn new_pool() -> PgResult<Self> {
        let db_url = var!(Var::DatabaseUrl)?;
        let pool = sqlx::PgPool::connect(db_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("database migrations applied");

        Ok(Self { pool })
    }
}

/// Capability bundle handed to the engine; every member is a repository contract rather than a
/// concrete query builder.
#[derive(Debug, Clone)]
pub struct Store {
    pub users: Arc<dyn repositories::UserRepository>,
    pub achievements: Arc<dyn repositories::AchievementRepository>,
    pub votes: Arc<dyn repositories::VoteRepository>,
    pub polls: Arc<dyn repositories::PollRepository>,
    pub chatters: Arc<dyn repositories::ChatterRepository>,
    pub templates: Arc<dyn repositories::TemplateRepository>,
    pub tokens: Arc<dyn repositories::TokenRepository>,
    pub events: Arc<dyn repositories::EventLogRepository>,
}

impl Store {
    pub fn postgres(pool: &'static PgPool) -> Self {
        use repositories::*;

        Self {
            users: Arc::new(user::PgUserRepository::new(pool)),
            achievements: Arc::new(achievement::PgAchievementRepository::new(pool)),
            votes: Arc::new(vote::PgVoteRepository::new(pool)),
            polls: Arc::new(vote::PgPollRepository::new(pool)),
            chatters: Arc::new(chatter::PgChatterRepository::new(pool)),
            templates: Arc::new(template::PgTemplateRepository::new(pool)),
            tokens: Arc::new(token::PgTokenRepository::new(pool)),
            events: Arc::new(event_log::PgEventLogRepository::new(pool)),
        }
    }

    #[cfg(test)]
    pub fn memory() -> (Self, Arc<memory::MemoryStore>) {
        let mem = Arc::new(memory::MemoryStore::default());
        let store = Self {
            users: mem.clone(),
            achievements: mem.clone(),
            votes: mem.clone(),
            polls: mem.clone(),
            chatters: mem.clone(),
            templates: mem.clone(),
            tokens: mem.clone(),
            events: mem.clone(),
        };

        (store, mem)
    }
}

pub type PgResult<T> = core::result::Result<T, PgError>;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum PgError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    EnvError(#[from] env::EnvErr),
}
