//! Per-provider refresh strategies plugged into the vault.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::instrument;

use crate::auth::oauth::OAuthClient;
use crate::auth::{AuthResult, Provider, Token, TokenSource};
use crate::constants::TOKEN_SKEW_SECS;
use crate::db::models::StoredToken;
use crate::db::repositories::TokenRepository;

impl From<StoredToken> for Token {
    fn from(row: StoredToken) -> Self {
        Self {
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            expires_at: row.expires_at.timestamp(),
        }
    }
}

fn stored(provider: Provider, token: &Token) -> StoredToken {
    StoredToken {
        provider: provider.as_str().to_string(),
        access_token: token.access_token.clone(),
        refresh_token: token.refresh_token.clone(),
        expires_at: DateTime::from_timestamp(token.expires_at, 0).unwrap_or_else(Utc::now),
    }
}

/// App token via the client-credentials grant.
#[derive(Debug)]
pub struct ClientCredentials {
    oauth: OAuthClient,
}

impl ClientCredentials {
    pub fn new(oauth: OAuthClient) -> Self {
        Self { oauth }
    }
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn fetch(&self) -> AuthResult<Option<Token>> {
        self.oauth.client_credentials().await.map(Some)
    }
}

/// Reads the freshest valid row from the token table. An expired row that carries a refresh
/// token is refreshed and written back when a refresher is configured.
#[derive(Debug)]
pub struct PersistedToken {
    provider: Provider,
    repo: Arc<dyn TokenRepository>,
    refresher: Option<OAuthClient>,
}

impl PersistedToken {
    pub fn new(
        provider: Provider,
        repo: Arc<dyn TokenRepository>,
        refresher: Option<OAuthClient>,
    ) -> Self {
        Self {
            provider,
            repo,
            refresher,
        }
    }
}

#[async_trait]
impl TokenSource for PersistedToken {
    #[instrument(skip(self), fields(provider = %self.provider))]
    async fn fetch(&self) -> AuthResult<Option<Token>> {
        let key = self.provider.as_str();
        let valid_after = Utc::now() + Duration::seconds(TOKEN_SKEW_SECS);

        if let Some(row) = self.repo.latest_valid(key, valid_after).await? {
            return Ok(Some(row.into()));
        }

        let Some(refresher) = &self.refresher else {
            tracing::debug!("no valid persisted token and no refresher configured");
            return Ok(None);
        };

        let Some(refresh_token) = self
            .repo
            .latest(key)
            .await?
            .and_then(|row| row.refresh_token)
        else {
            tracing::debug!("no persisted refresh token");
            return Ok(None);
        };

        let token = refresher.refresh(&refresh_token).await?;
        self.repo.save(&stored(self.provider, &token)).await?;
        tracing::info!("persisted token refreshed and written back");

        Ok(Some(token))
    }
}

/// Bot identity: a statically configured token wins, otherwise the persisted row is used.
#[derive(Debug)]
pub struct StaticOrPersisted {
    static_token: Option<String>,
    fallback: PersistedToken,
}

impl StaticOrPersisted {
    pub fn new(static_token: Option<String>, fallback: PersistedToken) -> Self {
        Self {
            static_token,
            fallback,
        }
    }
}

#[async_trait]
impl TokenSource for StaticOrPersisted {
    async fn fetch(&self) -> AuthResult<Option<Token>> {
        match &self.static_token {
            Some(token) => Ok(Some(Token {
                access_token: token.trim_start_matches("oauth:").to_string(),
                refresh_token: None,
                expires_at: i64::MAX,
            })),
            None => self.fallback.fetch().await,
        }
    }
}
