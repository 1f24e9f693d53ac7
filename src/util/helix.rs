use std::sync::Arc;

use http::header::{AUTHORIZATION, InvalidHeaderValue};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::auth::{AuthErr, Provider, TokenVault};
use crate::constants::HELIX_TIMEOUT;

pub const HELIX_URN_USERS: &str = "users";
pub const HELIX_URN_STREAMS: &str = "streams";
pub const HELIX_URN_CLIPS: &str = "clips";
pub const HELIX_URN_REWARDS: &str = "channel_points/custom_rewards";
pub const CLIP_URL_BASE: &str = "https://clips.twitch.tv";

#[derive(Debug, Clone, Copy)]
pub enum HelixUri {
    Users,
    Streams,
    Clips,
    Rewards,
}

impl HelixUri {
    fn urn(&self) -> &'static str {
        match self {
            HelixUri::Users => HELIX_URN_USERS,
            HelixUri::Streams => HELIX_URN_STREAMS,
            HelixUri::Clips => HELIX_URN_CLIPS,
            HelixUri::Rewards => HELIX_URN_REWARDS,
        }
    }
}

/// Twitch Helix client. Bearer tokens come from the vault on every request, so a refreshed token
/// is picked up without rebuilding the client.
#[derive(Debug, Clone)]
pub struct Helix {
    http: reqwest::Client,
    base: String,
    client_id: String,
    vault: Arc<TokenVault>,
}

impl Helix {
    pub fn new(
        http: reqwest::Client,
        base: impl Into<String>,
        client_id: impl Into<String>,
        vault: Arc<TokenVault>,
    ) -> Self {
        Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            vault,
        }
    }

    /// Look up a single user by login. `Ok(None)` if the login does not exist.
    #[instrument(skip(self))]
    pub async fn user_by_login(&self, login: &str) -> HelixResult<Option<HelixUser>> {
        let login = login.trim_start_matches('@').to_lowercase();
        let res: HelixDataResponse<HelixUser> = self
            .request(
                Method::GET,
                HelixUri::Users,
                &[("login", login.as_str())],
                Provider::App,
            )
            .await?;

        Ok(res.data.into_iter().next())
    }

    /// The channel's live stream, or `None` while offline.
    #[instrument(skip(self))]
    pub async fn stream_by_login(&self, login: &str) -> HelixResult<Option<HelixStream>> {
        let res: HelixDataResponse<HelixStream> = self
            .request(
                Method::GET,
                HelixUri::Streams,
                &[("user_login", login)],
                Provider::App,
            )
            .await?;

        Ok(res.data.into_iter().next())
    }

    /// Creates a clip of the live broadcast. Requires the broadcaster-delegated token.
    #[instrument(skip(self))]
    pub async fn create_clip(&self, broadcaster_id: &str) -> HelixResult<HelixClip> {
        let res: HelixDataResponse<HelixClip> = self
            .request(
                Method::POST,
                HelixUri::Clips,
                &[("broadcaster_id", broadcaster_id)],
                Provider::Broadcaster,
            )
            .await?;

        res.data.into_iter().next().ok_or(HelixErr::EmptyDataField)
    }

    #[instrument(skip(self))]
    pub async fn custom_reward(
        &self,
        broadcaster_id: &str,
        reward_id: &str,
    ) -> HelixResult<Option<HelixReward>> {
        let res: HelixDataResponse<HelixReward> = self
            .request(
                Method::GET,
                HelixUri::Rewards,
                &[("broadcaster_id", broadcaster_id), ("id", reward_id)],
                Provider::Broadcaster,
            )
            .await?;

        Ok(res.data.into_iter().next())
    }

    async fn headers(&self, provider: Provider) -> HelixResult<HeaderMap> {
        let token = self
            .vault
            .get_token(provider)
            .await?
            .ok_or(HelixErr::TokenUnavailable(provider))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );
        headers.insert("Client-Id", HeaderValue::from_str(&self.client_id)?);

        Ok(headers)
    }

    #[instrument(skip(self, query))]
    /// Sends a request and parses the response body according to the specified `T` output type
    async fn request<T>(
        &self,
        method: Method,
        uri: HelixUri,
        query: &[(&str, &str)],
        provider: Provider,
    ) -> HelixResult<T>
    where
        T: DeserializeOwned,
    {
        let headers = self.headers(provider).await?;
        let url = format!("{}/{}", self.base, uri.urn());

        let res = self
            .http
            .request(method, url)
            .headers(headers)
            .query(query)
            .timeout(HELIX_TIMEOUT)
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(provider = %provider, "helix rejected token, invalidating cache");
            self.vault.invalidate(provider).await;
            return Err(HelixErr::Unauthorized(provider));
        }

        if !status.is_success() {
            tracing::error!(code = %status, "non-2xx response");
            return Err(match res.json::<Value>().await {
                Ok(body) => {
                    tracing::error!(body = ?body, "error message in response");
                    HelixErr::FetchErrWithBody { body }
                }
                Err(_) => HelixErr::FetchErr(status.to_string()),
            });
        }

        if let Some(remaining) = res.headers().get("ratelimit-remaining")
            && let Some(total) = res.headers().get("ratelimit-limit")
        {
            tracing::debug!(ratelimit_available = ?remaining, ratelimit_total = ?total, "rate-limit bucket");
        }

        Ok(res.json::<T>().await?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixDataResponse<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixStream {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub game_name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixClip {
    pub id: String,
    pub edit_url: String,
}

impl HelixClip {
    pub fn url(&self) -> String {
        format!("{}/{}", CLIP_URL_BASE, self.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixReward {
    pub title: String,
    #[serde(default)]
    pub cost: i64,
}

pub type HelixResult<T> = core::result::Result<T, HelixErr>;

#[derive(Debug, Error)]
pub enum HelixErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("while fetching a token: {0}")]
    AuthError(#[from] AuthErr),

    #[error("while creating a HeaderValue ({0})")]
    HeaderError(#[from] InvalidHeaderValue),

    #[error("no {0} token available")]
    TokenUnavailable(Provider),

    #[error("helix rejected the {0} token")]
    Unauthorized(Provider),

    #[error("error during helix fetch: {0}")]
    FetchErr(String),

    #[error("error (with detail) during helix fetch: {:#?}", body)]
    FetchErrWithBody { body: Value },

    #[error("empty data field")]
    EmptyDataField,
}
