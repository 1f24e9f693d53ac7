//! Cached credentials for the four external identities the bot acts as.
//!
//! Each [`Provider`] owns an in-memory slot plus a [`TokenSource`] that knows how to obtain a new
//! token. A cached token is returned without any I/O while `expires_at - TOKEN_SKEW_SECS > now`.
//! Concurrent callers that all find a stale slot may each perform a refresh; the last writer wins.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::constants::{TOKEN_REFRESH_TIMEOUT, TOKEN_SKEW_SECS};
use crate::db::PgError;

pub mod oauth;
pub mod source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Client-credentials app token; required by every caller that asks for it.
    App,
    Donation,
    Broadcaster,
    Bot,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::App,
        Provider::Donation,
        Provider::Broadcaster,
        Provider::Bot,
    ];

    /// Key of this provider's rows in the `tokens` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::App => "twitch_app",
            Provider::Donation => "donation",
            Provider::Broadcaster => "twitch_broadcaster",
            Provider::Bot => "twitch_bot",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: i64,
}

impl Token {
    pub fn is_fresh_at(&self, now: i64) -> bool {
        self.expires_at.saturating_sub(TOKEN_SKEW_SECS) > now
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync + fmt::Debug {
    /// Obtains a new token. `Ok(None)` means no usable credential exists right now.
    async fn fetch(&self) -> AuthResult<Option<Token>>;
}

#[derive(Debug)]
struct Slot {
    cached: RwLock<Option<Token>>,
    source: Arc<dyn TokenSource>,
}

#[derive(Debug)]
pub struct TokenVault {
    slots: HashMap<Provider, Slot>,
}

impl TokenVault {
    pub fn new(
        app: Arc<dyn TokenSource>,
        donation: Arc<dyn TokenSource>,
        broadcaster: Arc<dyn TokenSource>,
        bot: Arc<dyn TokenSource>,
    ) -> Self {
        let slots = [
            (Provider::App, app),
            (Provider::Donation, donation),
            (Provider::Broadcaster, broadcaster),
            (Provider::Bot, bot),
        ]
        .into_iter()
        .map(|(provider, source)| {
            let slot = Slot {
                cached: RwLock::new(None),
                source,
            };
            (provider, slot)
        })
        .collect();

        Self { slots }
    }

    /// Returns the access token for `provider`, refreshing it if the cache is stale.
    ///
    /// Only [`Provider::App`] surfaces refresh failures as errors. Every other provider logs the
    /// failure and yields `Ok(None)`, which callers treat as "feature unavailable this cycle".
    pub async fn get_token(&self, provider: Provider) -> AuthResult<Option<String>> {
        self.get_token_at(provider, Utc::now().timestamp()).await
    }

    #[instrument(skip(self), fields(provider = %provider))]
    pub(crate) async fn get_token_at(
        &self,
        provider: Provider,
        now: i64,
    ) -> AuthResult<Option<String>> {
        let slot = self.slot(provider)?;

        if let Some(token) = slot.cached.read().await.as_ref()
            && token.is_fresh_at(now)
        {
            return Ok(Some(token.access_token.clone()));
        }

        tracing::debug!("cached token missing or stale, refreshing");
        let fetched = match tokio::time::timeout(TOKEN_REFRESH_TIMEOUT, slot.source.fetch()).await {
            Ok(res) => res,
            Err(_) => Err(AuthErr::Timeout(provider)),
        };

        let token = match fetched {
            Ok(token) => token,
            Err(e) if provider == Provider::App => {
                tracing::error!(error = %e, "required token refresh failed");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed, treating provider as unavailable");
                return Ok(None);
            }
        };

        let mut cached = slot.cached.write().await;
        match token {
            Some(token) => {
                tracing::info!(expires_at = token.expires_at, "token refreshed");
                let access = token.access_token.clone();
                *cached = Some(token);
                Ok(Some(access))
            }
            None => {
                tracing::debug!("no valid token available");
                *cached = None;
                Ok(None)
            }
        }
    }

    /// Drops the cached token so the next call refreshes (e.g. after a 401).
    pub async fn invalidate(&self, provider: Provider) {
        if let Ok(slot) = self.slot(provider) {
            *slot.cached.write().await = None;
        }
    }

    /// Drops every cached token.
    pub async fn reset(&self) {
        for provider in Provider::ALL {
            self.invalidate(provider).await;
        }

        tracing::debug!("token caches cleared");
    }

    fn slot(&self, provider: Provider) -> AuthResult<&Slot> {
        self.slots
            .get(&provider)
            .ok_or(AuthErr::UnknownProvider(provider))
    }
}

#[cfg(test)]
#[derive(Debug)]
struct FixedSource(Option<String>);

#[cfg(test)]
#[async_trait]
impl TokenSource for FixedSource {
    async fn fetch(&self) -> AuthResult<Option<Token>> {
        Ok(self.0.clone().map(|access_token| Token {
            access_token,
            refresh_token: None,
            expires_at: i64::MAX,
        }))
    }
}

#[cfg(test)]
impl TokenVault {
    /// Vault handing out fixed tokens; providers not listed yield `None`.
    pub(crate) fn fixed(tokens: &[(Provider, &str)]) -> Self {
        let source = |p: Provider| -> Arc<dyn TokenSource> {
            let token = tokens
                .iter()
                .find(|(provider, _)| *provider == p)
                .map(|(_, token)| token.to_string());
            Arc::new(FixedSource(token))
        };

        Self::new(
            source(Provider::App),
            source(Provider::Donation),
            source(Provider::Broadcaster),
            source(Provider::Bot),
        )
    }
}

pub type AuthResult<T> = core::result::Result<T, AuthErr>;

#[derive(Debug, Error)]
pub enum AuthErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("token endpoint rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token store error: {0}")]
    StoreError(#[from] PgError),

    #[error("token refresh for {0} timed out")]
    Timeout(Provider),

    #[error("no token source registered for {0}")]
    UnknownProvider(Provider),
}
