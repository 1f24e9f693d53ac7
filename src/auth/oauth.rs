//! OAuth2 token endpoint client (client-credentials and refresh-token grants).

use chrono::Utc;
use serde::Deserialize;
use tracing::instrument;

use crate::auth::{AuthErr, AuthResult, Token};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    token_uri: String,
    client_id: String,
    client_secret: String,
}

impl core::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl OAuthClient {
    pub fn new(
        http: reqwest::Client,
        token_uri: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_uri: token_uri.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    #[instrument(skip(self), fields(token_uri = %self.token_uri))]
    pub async fn client_credentials(&self) -> AuthResult<Token> {
        self.exchange(&[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    #[instrument(skip(self, refresh_token), fields(token_uri = %self.token_uri))]
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<Token> {
        let mut token = self
            .exchange(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ])
            .await?;

        // some providers only rotate the refresh token occasionally
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    async fn exchange(&self, form: &[(&str, &str)]) -> AuthResult<Token> {
        let res = self.http.post(&self.token_uri).form(form).send().await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!(code = %status, body, "token exchange rejected");
            return Err(AuthErr::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = res.json::<TokenResponse>().await?;
        Ok(Token {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: Utc::now().timestamp() + body.expires_in,
        })
    }
}
