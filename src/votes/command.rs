//! The `!голос` command family: list, own votes, numeric and by-name selection.

use std::sync::Arc;

use tracing::instrument;

use crate::db::models::{Game, Poll, User};
use crate::db::repositories::PollRepository;
use crate::votes::{VoteError, VoteLedger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteArg {
    Usage,
    List,
    Mine,
    Index(usize),
    Name(String),
}

impl VoteArg {
    pub fn parse(rest: &str) -> Self {
        let rest = rest.trim();
        if rest.is_empty() {
            return VoteArg::Usage;
        }

        match rest.to_lowercase().as_str() {
            "список" | "list" => VoteArg::List,
            "голоса" | "votes" => VoteArg::Mine,
            other => match other.parse::<usize>() {
                Ok(index) => VoteArg::Index(index),
                Err(_) => VoteArg::Name(rest.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoteDesk {
    ledger: VoteLedger,
    polls: Arc<dyn PollRepository>,
}

enum Pick<'a> {
    Found(&'a Game),
    Ambiguous(Vec<&'a Game>),
    Missing,
}

fn find_by_name<'a>(games: &'a [Game], query: &str) -> Pick<'a> {
    let query = query.trim().to_lowercase();

    if let Some(game) = games.iter().find(|g| g.name.to_lowercase() == query) {
        return Pick::Found(game);
    }

    let partial: Vec<&Game> = games
        .iter()
        .filter(|g| g.name.to_lowercase().contains(&query))
        .collect();

    match partial.len() {
        0 => Pick::Missing,
        1 => Pick::Found(partial[0]),
        _ => Pick::Ambiguous(partial),
    }
}

impl VoteDesk {
    pub fn new(ledger: VoteLedger, polls: Arc<dyn PollRepository>) -> Self {
        Self { ledger, polls }
    }

    /// Produces exactly one chat reply for the command.
    #[instrument(skip(self, user), fields(login = %user.login))]
    pub async fn handle(&self, user: &User, arg: VoteArg) -> String {
        let name = &user.display_name;

        let (poll, games) = match self.active_poll().await {
            Ok(Some(found)) => found,
            Ok(None) => return format!("@{name}, сейчас нет активного голосования."),
            Err(e) => {
                tracing::error!(error = %e, "failed to load active poll");
                return format!("@{name}, голосование сейчас недоступно, попробуй позже.");
            }
        };

        match arg {
            VoteArg::Usage => format!(
                "@{name}, !голос <номер или название игры>, !голос список, !голос голоса"
            ),
            VoteArg::List => list(&poll, &games),
            VoteArg::Mine => self.mine(user, &poll, &games).await,
            VoteArg::Index(index) => match index.checked_sub(1).and_then(|i| games.get(i)) {
                Some(game) => self.cast(user, &poll, game).await,
                None => format!(
                    "@{name}, нет игры под номером {index}. Всего игр: {}.",
                    games.len()
                ),
            },
            VoteArg::Name(query) => match find_by_name(&games, &query) {
                Pick::Found(game) => self.cast(user, &poll, game).await,
                Pick::Ambiguous(candidates) => {
                    let names: Vec<&str> = candidates.iter().map(|g| g.name.as_str()).collect();
                    format!("@{name}, уточни игру: {}", names.join(", "))
                }
                Pick::Missing => format!("@{name}, не нашёл игру «{query}». Смотри !голос список"),
            },
        }
    }

    async fn active_poll(&self) -> crate::db::PgResult<Option<(Poll, Vec<Game>)>> {
        let Some(poll) = self.polls.active().await? else {
            return Ok(None);
        };

        let games = self.polls.games(poll.id).await?;
        Ok(Some((poll, games)))
    }

    async fn cast(&self, user: &User, poll: &Poll, game: &Game) -> String {
        let name = &user.display_name;

        match self.ledger.add_vote(user, poll.id, game.id).await {
            Ok(slot) => format!(
                "@{name}, голос за «{}» принят ({slot}/{}).",
                game.name, user.vote_limit
            ),
            Err(VoteError::LimitReached) => format!(
                "@{name}, все голоса уже отданы ({}/{}).",
                user.vote_limit, user.vote_limit
            ),
            Err(e @ VoteError::Db(_)) => {
                tracing::error!(error = ?e, "vote insert failed");
                format!("@{name}, не получилось сохранить голос, попробуй ещё раз.")
            }
        }
    }

    async fn mine(&self, user: &User, poll: &Poll, games: &[Game]) -> String {
        let name = &user.display_name;

        let votes = match self.ledger.votes_of(user, poll.id).await {
            Ok(votes) => votes,
            Err(e) => {
                tracing::error!(error = ?e, "failed to read votes");
                return format!("@{name}, не получилось получить голоса, попробуй позже.");
            }
        };

        if votes.is_empty() {
            return format!("@{name}, ты ещё не голосовал(а) (0/{}).", user.vote_limit);
        }

        let picked: Vec<&str> = votes
            .iter()
            .map(|v| {
                games
                    .iter()
                    .find(|g| g.id == v.game_id)
                    .map(|g| g.name.as_str())
                    .unwrap_or("?")
            })
            .collect();

        format!(
            "@{name}, твои голоса: {} ({}/{}).",
            picked.join(", "),
            votes.len(),
            user.vote_limit
        )
    }
}

fn list(poll: &Poll, games: &[Game]) -> String {
    if games.is_empty() {
        return format!("{}: пока пусто.", poll.title);
    }

    let entries: Vec<String> = games
        .iter()
        .enumerate()
        .map(|(i, g)| format!("{}. {}", i + 1, g.name))
        .collect();

    format!("{}: {}", poll.title, entries.join(" | "))
}
