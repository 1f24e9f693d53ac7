//! Donation announcer. Polls the donation platform and announces anything newer than the last
//! seen donation id.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use crate::auth::{Provider, TokenVault};
use crate::bot::ChatSink;
use crate::constants::{DONATION_POLL_INTERVAL, DONATION_TIMEOUT};
use crate::db::models::EventLogRecord;
use crate::db::repositories::EventLogRepository;
use crate::overlay::{Overlay, OverlayEvent};

const ANONYMOUS: &str = "Аноним";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Donation {
    pub id: i64,
    pub username: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub message: Option<String>,
}

impl Donation {
    pub fn announcement(&self) -> String {
        let name = self.username.as_deref().unwrap_or(ANONYMOUS);
        let mut text = format!("{name} задонатил {} {}!", self.amount, self.currency);

        if let Some(message) = self.message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            text.push_str(&format!(" «{message}»"));
        }

        text
    }
}

#[derive(Debug, Deserialize)]
struct DonationPage {
    data: Vec<Donation>,
}

#[derive(Debug)]
pub struct DonationPoller {
    http: reqwest::Client,
    base: String,
    vault: Arc<TokenVault>,
    events: Arc<dyn EventLogRepository>,
    sink: Arc<dyn ChatSink>,
    overlay: Overlay,
    watermark: Option<i64>,
}

impl DonationPoller {
    pub fn new(
        http: reqwest::Client,
        base: impl Into<String>,
        vault: Arc<TokenVault>,
        events: Arc<dyn EventLogRepository>,
        sink: Arc<dyn ChatSink>,
        overlay: Overlay,
    ) -> Self {
        Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            vault,
            events,
            sink,
            overlay,
            watermark: None,
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(DONATION_POLL_INTERVAL);

        loop {
            interval.tick().await;
            if let Err(e) = self.poll_once().await {
                tracing::warn!(error = %e, "donation poll failed");
            }
        }
    }

    /// Returns the donations announced during this cycle.
    #[instrument(skip(self), fields(watermark = ?self.watermark))]
    pub async fn poll_once(&mut self) -> DonationResult<Vec<Donation>> {
        let token = match self.vault.get_token(Provider::Donation).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!("no donation token, skipping cycle");
                return Ok(Vec::new());
            }
            Err(e) => {
                tracing::warn!(error = %e, "donation token lookup failed, skipping cycle");
                return Ok(Vec::new());
            }
        };

        let mut donations = self.fetch(&token).await?;
        donations.sort_by_key(|d| d.id);

        let latest = donations.last().map(|d| d.id);
        let Some(watermark) = self.watermark else {
            self.watermark = Some(latest.unwrap_or(0));
            tracing::info!(watermark = ?self.watermark, "donation watermark recorded");
            return Ok(Vec::new());
        };

        let fresh: Vec<Donation> = donations.into_iter().filter(|d| d.id > watermark).collect();
        for donation in &fresh {
            self.announce(donation).await;
            self.watermark = Some(donation.id);
        }

        Ok(fresh)
    }

    async fn fetch(&self, token: &str) -> DonationResult<Vec<Donation>> {
        let request = self
            .http
            .get(format!("{}/alerts/donations", self.base))
            .bearer_auth(token)
            .send();

        let res = tokio::time::timeout(DONATION_TIMEOUT, request)
            .await
            .map_err(|_| DonationErr::Timeout)??;

        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.vault.invalidate(Provider::Donation).await;
        }
        if !status.is_success() {
            return Err(DonationErr::Status(status.as_u16()));
        }

        let page: DonationPage = res.json().await?;
        Ok(page.data)
    }

    async fn announce(&self, donation: &Donation) {
        let text = donation.announcement();
        tracing::info!(id = donation.id, amount = donation.amount, "announcing donation");

        if let Err(e) = self.sink.say(&text).await {
            tracing::error!(error = %e, "failed to send donation announcement");
        }

        let record = EventLogRecord::new("donation", text)
            .with_title(donation.username.as_deref().unwrap_or(ANONYMOUS));
        if let Err(e) = self.events.append(&record).await {
            tracing::error!(error = %e, "failed to append donation event");
        }

        self.overlay.trigger(OverlayEvent::from(&record));
    }
}

pub type DonationResult<T> = core::result::Result<T, DonationErr>;

#[derive(Debug, Error)]
pub enum DonationErr {
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error("donation platform responded with status {0}")]
    Status(u16),

    #[error("donation platform request timed out")]
    Timeout,
}
