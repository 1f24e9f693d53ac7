//! Overlay triggers pushed to browser sources over a websocket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{MatchedPath, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::db::models::EventLogRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub title: Option<String>,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&EventLogRecord> for OverlayEvent {
    fn from(record: &EventLogRecord) -> Self {
        Self {
            kind: record.kind.clone(),
            message: record.message.clone(),
            title: record.title.clone(),
            media_url: record.media_url.clone(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Overlay {
    tx: broadcast::Sender<OverlayEvent>,
}

impl Overlay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fans the event out to every connected overlay; a no-op when none are connected.
    pub fn trigger(&self, event: OverlayEvent) {
        match self.tx.send(event) {
            Ok(receivers) => tracing::debug!(receivers, "overlay triggered"),
            Err(_) => tracing::debug!("no overlay connected"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.tx.subscribe()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/overlay", get(overlay_handler))
            .layer(
                TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method();
                    let uri = req.uri();

                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched| matched.as_str());

                    tracing::debug_span!("overlay_request", ?method, ?uri, ?matched_path)
                }),
            )
            .with_state(self.clone())
    }

    #[instrument(skip(self))]
    pub async fn serve(self, port: u16) -> std::io::Result<()> {
        let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let listener = tokio::net::TcpListener::bind(socket_addr).await?;
        tracing::info!(%socket_addr, "overlay listening");

        axum::serve(listener, self.router()).await
    }
}

async fn overlay_handler(ws: WebSocketUpgrade, State(overlay): State<Overlay>) -> Response {
    let rx = overlay.subscribe();
    ws.on_upgrade(move |socket| forward(socket, rx))
}

async fn forward(mut socket: WebSocket, mut rx: broadcast::Receiver<OverlayEvent>) {
    tracing::info!("overlay connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(payload) = serde_json::to_string(&event) else {
                        continue;
                    };

                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "overlay lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },

            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => (),
            },
        }
    }

    tracing::info!("overlay disconnected");
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn triggers_reach_subscribers() {
        let overlay = Overlay::new(8);
        let mut rx = overlay.subscribe();

        let record = EventLogRecord::new("intim_self_no_tag_69", "@milia ...").with_title("intim");
        overlay.trigger(OverlayEvent::from(&record));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "intim_self_no_tag_69");
        assert_eq!(event.title.as_deref(), Some("intim"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "intim_self_no_tag_69");
    }

    #[test]
    fn trigger_without_subscribers_is_fine() {
        Overlay::new(1).trigger(OverlayEvent::from(&EventLogRecord::new("clip", "x")));
    }

    #[tokio::test]
    async fn plain_get_is_rejected() {
        let overlay = Overlay::new(8);
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, overlay.router()).await });

        let res = reqwest::get(format!("http://{addr}/overlay")).await.unwrap();
        assert!(res.status().is_client_error());
    }
}
