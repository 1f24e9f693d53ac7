//! Inbound message handling.
//!
//! The chat transport pushes [`Inbound`] items into a bounded queue; a single consumer runs
//! [`Engine::handle`] for each message to completion before taking the next one. Independent work
//! inside one handler (stat increments, lookups) is fanned out and joined.

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::instrument;

use crate::auth::TokenVault;
use crate::composer::{EventComposer, PairedOutcome};
use crate::db::Store;
use crate::db::models::EventLogRecord;
use crate::overlay::{Overlay, OverlayEvent};
use crate::stats::StatCounter;
use crate::util::helix::Helix;
use crate::votes::VoteLedger;
use crate::votes::command::VoteDesk;

pub mod clip;
pub mod commands;
pub mod donations;
pub mod intake;
pub mod rewards;
pub mod stream;

use commands::Command;

/// One chat message as delivered by the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatEvent {
    pub login: String,
    pub display_name: String,
    pub platform_id: Option<String>,
    pub text: String,
    pub reward_id: Option<String>,
    pub is_echo: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ChatEvent),
    /// The transport re-established its connection.
    Reconnected,
}

#[async_trait]
pub trait ChatSink: Send + Sync + fmt::Debug {
    async fn say(&self, text: &str) -> BotResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub bot_login: String,
    pub channel_id: String,
    pub ignore_logins: Vec<String>,
    pub extra_vote_reward_id: Option<String>,
}

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: Store,
    stats: StatCounter,
    composer: EventComposer,
    votes: VoteDesk,
    helix: Option<Helix>,
    vault: Option<Arc<TokenVault>>,
    sink: Arc<dyn ChatSink>,
    overlay: Overlay,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Store,
        stats: StatCounter,
        composer: EventComposer,
        sink: Arc<dyn ChatSink>,
        overlay: Overlay,
    ) -> Self {
        let votes = VoteDesk::new(VoteLedger::new(store.votes.clone()), store.polls.clone());

        Self {
            config,
            store,
            stats,
            composer,
            votes,
            helix: None,
            vault: None,
            sink,
            overlay,
        }
    }

    pub fn with_helix(mut self, helix: Helix) -> Self {
        self.helix = Some(helix);
        self
    }

    /// Token caches are dropped together with the engine state on reconnect.
    pub fn with_vault(mut self, vault: Arc<TokenVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Consumes inbound items one at a time until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<Inbound>) {
        tracing::info!("engine consumer started");

        while let Some(inbound) = rx.recv().await {
            match inbound {
                Inbound::Message(event) => self.handle(event).await,
                Inbound::Reconnected => self.reset().await,
            }
        }

        tracing::info!("inbound queue closed, engine stopping");
    }

    pub async fn reset(&self) {
        self.composer.state().reset();
        if let Some(vault) = &self.vault {
            vault.reset().await;
        }

        tracing::info!("engine state reset after reconnect");
    }

    fn is_ignored(&self, login: &str) -> bool {
        login.eq_ignore_ascii_case(&self.config.bot_login)
            || self
                .config
                .ignore_logins
                .iter()
                .any(|ignored| ignored.eq_ignore_ascii_case(login))
    }

    #[instrument(skip(self, event), fields(login = %event.login, platform_id = ?event.platform_id))]
    pub async fn handle(&self, event: ChatEvent) {
        if event.is_echo || self.is_ignored(&event.login) {
            return;
        }

        let command = Command::parse(&event.text);
        let Some(user) = self.intake(&event).await else {
            if command.is_some() {
                self.say(&format!("@{}, не получилось, попробуй позже.", event.display_name))
                    .await;
            }
            return;
        };

        if let Some(reward_id) = &event.reward_id {
            self.redeem(&user, reward_id).await;
        }

        self.adjust_affinity(&user, &event.text).await;

        let Some(command) = command else {
            return;
        };

        tracing::info!(command = command.name(), "handling command");
        match command {
            Command::Paired { family, rest } => {
                let outcome = self.composer.paired(family, &user, &rest).await;
                self.emit_paired(outcome).await;
            }
            Command::Single { family, rest } => {
                let reply = self.composer.single(family, &user, &rest).await;
                self.say(&reply).await;
            }
            Command::Who { rest } => {
                let reply = self.composer.who(&user, &rest).await;
                self.say(&reply).await;
            }
            Command::Clip => {
                let reply = self.clip(&user).await;
                self.say(&reply).await;
            }
            Command::Vote(arg) => {
                let reply = self.votes.handle(&user, arg).await;
                self.say(&reply).await;
            }
        }
    }

    async fn emit_paired(&self, outcome: PairedOutcome) {
        self.say(&outcome.reply).await;

        let Some(dominant) = outcome.dominant else {
            tracing::info!(event = "paired_generic", family = %outcome.family, "paired event");
            return;
        };

        let record = EventLogRecord::new(dominant, outcome.reply).with_title(outcome.family.as_str());
        self.record(record).await;
    }

    /// Appends to the event log and fires the overlay trigger.
    async fn record(&self, record: EventLogRecord) {
        if let Err(e) = self.store.events.append(&record).await {
            tracing::error!(error = %e, kind = %record.kind, "failed to append event log");
        }

        self.overlay.trigger(OverlayEvent::from(&record));
    }

    async fn say(&self, text: &str) {
        if let Err(e) = self.sink.say(text).await {
            tracing::error!(error = %e, "failed to send chat message");
        }
    }
}

pub type BotResult<T> = core::result::Result<T, BotErr>;

#[derive(Debug, Error)]
pub enum BotErr {
    #[error("chat transport closed")]
    TransportClosed,
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::composer::EngineState;
    use crate::db::memory::MemoryStore;
    use crate::generator::TextGenerator;
    use crate::stats::Catalog;

    #[derive(Debug, Default)]
    pub struct CapturingSink {
        sent: Mutex<Vec<String>>,
    }

    impl CapturingSink {
        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatSink for CapturingSink {
        async fn say(&self, text: &str) -> BotResult<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    pub struct Harness {
        pub engine: Engine,
        pub mem: Arc<MemoryStore>,
        pub sink: Arc<CapturingSink>,
        pub overlay: Overlay,
    }

    pub async fn harness(config: EngineConfig, generator: Arc<dyn TextGenerator>) -> Harness {
        let (store, mem) = Store::memory();
        let stats = StatCounter::new(&store, Arc::new(Catalog::standard()));
        stats.seed_catalog().await.unwrap();

        let composer = EventComposer::new(
            &store,
            stats.clone(),
            generator,
            Arc::new(EngineState::default()),
        )
        .with_seed(7);

        let sink = Arc::new(CapturingSink::default());
        let overlay = Overlay::new(16);
        let engine = Engine::new(config, store, stats, composer, sink.clone(), overlay.clone());

        Harness {
            engine,
            mem,
            sink,
            overlay,
        }
    }

    pub fn message(login: &str, text: &str) -> ChatEvent {
        ChatEvent {
            login: login.to_string(),
            display_name: login.to_string(),
            text: text.to_string(),
            ..ChatEvent::default()
        }
    }

    pub fn config() -> EngineConfig {
        EngineConfig {
            bot_login: "roulette_bot".into(),
            channel_id: "1234".into(),
            ignore_logins: vec!["nightbot".into()],
            extra_vote_reward_id: Some("extra-vote".into()),
        }
    }
}
