use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::auth::oauth::OAuthClient;
use crate::auth::source::{ClientCredentials, PersistedToken, StaticOrPersisted};
use crate::auth::{Provider, TokenVault};
use crate::bot::donations::DonationPoller;
use crate::bot::stream::StreamWatcher;
use crate::bot::{ChatSink, Engine, EngineConfig};
use crate::composer::{EngineState, EventComposer};
use crate::constants::{
    DONATION_API_BASE, DONATION_TOKEN_URI, GENERATOR_DEFAULT_MODEL, GENERATOR_DEFAULT_URL,
    HELIX_URI_BASE, INBOUND_QUEUE_CAPACITY, OVERLAY_CHANNEL_CAPACITY, TWITCH_TOKEN_URI,
};
use crate::db::{PgError, Store};
use crate::generator::{ChatCompletionsClient, TextGenerator, Unavailable};
use crate::irc::{IrcSink, irc_runner};
use crate::overlay::Overlay;
use crate::stats::{Catalog, StatCounter};
use crate::util::env::{Config, EnvErr};
use crate::util::helix::Helix;
use crate::util::telemetry::Telemetry;

mod auth;
mod bot;
mod composer;
mod constants;
mod db;
mod generator;
mod irc;
mod overlay;
mod stats;
mod util;
mod votes;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Pg(#[from] PgError),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = util::env::load()?;
    let telemetry = Telemetry::new(config)?.register();

    tracing::info!(?config, "starting roulette bot");

    let store = Store::postgres(db::db_pool().await?);
    let stats = StatCounter::new(&store, Arc::new(Catalog::standard()));
    stats.seed_catalog().await?;

    let http = reqwest::Client::new();
    let vault = Arc::new(token_vault(config, &http, &store));
    let helix = Helix::new(
        http.clone(),
        HELIX_URI_BASE,
        &config.twitch_client_id,
        vault.clone(),
    );

    let composer = EventComposer::new(
        &store,
        stats.clone(),
        generator(config, &http),
        Arc::new(EngineState::default()),
    )
    .with_helix(helix.clone());

    let overlay = Overlay::new(OVERLAY_CHANNEL_CAPACITY);
    let (irc_sink, irc_commands) = IrcSink::channel();
    let sink: Arc<dyn ChatSink> = Arc::new(irc_sink);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);

    let engine_config = EngineConfig {
        bot_login: config.bot_login.to_lowercase(),
        channel_id: config.channel_id.clone(),
        ignore_logins: config.bot_ignore_logins.clone(),
        extra_vote_reward_id: config.extra_vote_reward_id.clone(),
    };

    let engine = Engine::new(
        engine_config,
        store.clone(),
        stats.clone(),
        composer,
        sink.clone(),
        overlay.clone(),
    )
    .with_helix(helix.clone())
    .with_vault(vault.clone());

    let watcher = StreamWatcher::new(helix, &config.channel_login, &store, stats);
    let donations = DonationPoller::new(
        http,
        DONATION_API_BASE,
        vault.clone(),
        store.events.clone(),
        sink,
        overlay.clone(),
    );

    let overlay_port = config.overlay_port;
    let handles = vec![
        tokio::spawn(async move {
            if let Err(e) = irc_runner(vault, inbound_tx, irc_commands).await {
                tracing::error!(error = %e, "chat transport stopped");
            }
        }),
        tokio::spawn(engine.run(inbound_rx)),
        tokio::spawn(watcher.run()),
        tokio::spawn(donations.run()),
        tokio::spawn(async move {
            if let Err(e) = overlay.serve(overlay_port).await {
                tracing::error!(error = %e, "overlay server stopped");
            }
        }),
    ];

    _ = join_all(handles).await;

    telemetry.shutdown();
    Ok(())
}

fn token_vault(config: &Config, http: &reqwest::Client, store: &Store) -> TokenVault {
    let twitch = OAuthClient::new(
        http.clone(),
        TWITCH_TOKEN_URI,
        &config.twitch_client_id,
        &config.twitch_client_secret,
    );

    let donation = match (&config.donation_client_id, &config.donation_client_secret) {
        (Some(id), Some(secret)) => Some(OAuthClient::new(
            http.clone(),
            DONATION_TOKEN_URI,
            id,
            secret,
        )),
        _ => None,
    };

    let persisted = |provider, refresher| PersistedToken::new(provider, store.tokens.clone(), refresher);

    TokenVault::new(
        Arc::new(ClientCredentials::new(twitch.clone())),
        Arc::new(persisted(Provider::Donation, donation)),
        Arc::new(persisted(Provider::Broadcaster, Some(twitch.clone()))),
        Arc::new(StaticOrPersisted::new(
            config.bot_token.clone(),
            persisted(Provider::Bot, Some(twitch)),
        )),
    )
}

fn generator(config: &Config, http: &reqwest::Client) -> Arc<dyn TextGenerator> {
    let Some(api_key) = &config.generator_api_key else {
        tracing::warn!("no generator key configured, using fallback phrases only");
        return Arc::new(Unavailable);
    };

    Arc::new(ChatCompletionsClient::new(
        http.clone(),
        config.generator_url.as_deref().unwrap_or(GENERATOR_DEFAULT_URL),
        api_key,
        config.generator_model.as_deref().unwrap_or(GENERATOR_DEFAULT_MODEL),
    ))
}
