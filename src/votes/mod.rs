//! Slot-bounded vote bookkeeping per `(poll, user)`.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use crate::db::PgError;
use crate::db::models::{User, Vote};
use crate::db::repositories::VoteRepository;

pub mod command;

#[derive(Debug, Clone)]
pub struct VoteLedger {
    votes: Arc<dyn VoteRepository>,
}

impl VoteLedger {
    pub fn new(votes: Arc<dyn VoteRepository>) -> Self {
        Self { votes }
    }

    /// Records a vote in the lowest free slot in `[1, user.vote_limit]` and returns that slot.
    #[instrument(skip(self, user), fields(user_id = %user.id, vote_limit = user.vote_limit))]
    pub async fn add_vote(&self, user: &User, poll_id: i64, game_id: i64) -> VoteResult<i32> {
        let existing = self.votes.for_user(poll_id, user.id).await?;
        if existing.len() >= user.vote_limit.max(0) as usize {
            tracing::debug!(used = existing.len(), "vote limit reached");
            return Err(VoteError::LimitReached);
        }

        let slot = (1..=user.vote_limit)
            .find(|slot| !existing.iter().any(|v| v.slot == *slot))
            .ok_or(VoteError::LimitReached)?;

        let vote = Vote {
            poll_id,
            user_id: user.id,
            slot,
            game_id,
            created_at: Utc::now(),
        };

        // a concurrent vote on the same slot fails the unique key and surfaces as a db error
        self.votes.insert(&vote).await?;
        tracing::info!(slot, game_id, "vote recorded");

        Ok(slot)
    }

    pub async fn votes_of(&self, user: &User, poll_id: i64) -> VoteResult<Vec<Vote>> {
        Ok(self.votes.for_user(poll_id, user.id).await?)
    }
}

pub type VoteResult<T> = core::result::Result<T, VoteError>;

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("vote limit reached")]
    LimitReached,

    #[error("db error")]
    Db(#[from] PgError),
}
