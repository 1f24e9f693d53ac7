//! Twitch chat transport.
//!
//! Incoming `PRIVMSG`s are converted to [`ChatEvent`]s and pushed into the engine's bounded
//! queue; outgoing replies arrive as [`IrcCommand`]s through [`IrcSink`]. A dropped connection is
//! re-established with backoff, and the engine is told about it with [`Inbound::Reconnected`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use ::irc::client::prelude::*;
use ::irc::proto::CapSubCommand;
use thiserror::Error;
use tokio::sync::mpsc::{self, Sender, UnboundedReceiver, UnboundedSender};
use tracing::instrument;
use uuid::Uuid;

use crate::auth::{AuthErr, Provider, TokenVault};
use crate::bot::{BotErr, BotResult, ChatEvent, ChatSink, Inbound};
use crate::constants::{
    IRC_PING_SECS, IRC_RECONNECT_MAX, IRC_RECONNECT_MIN, TTV_IRC_PORT, TTV_IRC_URI,
};
use crate::util::env::{EnvErr, Var};
use crate::var;

#[derive(Debug)]
pub enum IrcCommand {
    Say(String),
}

/// Sends replies to the joined channel through the running connection.
#[derive(Debug, Clone)]
pub struct IrcSink {
    tx: UnboundedSender<IrcCommand>,
}

impl IrcSink {
    pub fn channel() -> (Self, UnboundedReceiver<IrcCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ChatSink for IrcSink {
    async fn say(&self, text: &str) -> BotResult<()> {
        self.tx
            .send(IrcCommand::Say(text.to_string()))
            .map_err(|_| BotErr::TransportClosed)
    }
}

/// What the read loop should do after handling one item.
#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Reconnect,
    Shutdown,
}

/// Connects, reads and reconnects until the engine queue or the command channel closes.
#[instrument(skip_all)]
pub async fn irc_runner(
    vault: Arc<TokenVault>,
    inbound: Sender<Inbound>,
    mut commands: UnboundedReceiver<IrcCommand>,
) -> IrcResult<()> {
    let bot_login = var!(Var::BotLogin)?.to_lowercase();
    let channel = format!("#{}", var!(Var::ChannelLogin)?.to_lowercase());

    let mut delay = IRC_RECONNECT_MIN;
    let mut connected_before = false;

    loop {
        match IrcConnection::connect(&vault, &bot_login, &channel).await {
            Ok(mut connection) => {
                if connected_before && inbound.send(Inbound::Reconnected).await.is_err() {
                    return Ok(());
                }
                connected_before = true;
                delay = IRC_RECONNECT_MIN;

                match connection.pump(&inbound, &mut commands).await {
                    Ok(Flow::Shutdown) => {
                        tracing::info!(id = %connection.id, "chat transport shutting down");
                        return Ok(());
                    }
                    Ok(_) => tracing::warn!(id = %connection.id, "chat connection lost"),
                    Err(e) => tracing::error!(id = %connection.id, error = %e, "chat connection failed"),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to connect to chat");
                vault.invalidate(Provider::Bot).await;
            }
        }

        tracing::info!(delay_secs = delay.as_secs(), "reconnecting to chat");
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(IRC_RECONNECT_MAX);
    }
}

#[derive(Debug)]
pub struct IrcConnection {
    client: Client,
    bot_login: String,
    channel: String,
    id: Uuid,
}

impl IrcConnection {
    #[instrument(skip(vault))]
    async fn connect(vault: &TokenVault, bot_login: &str, channel: &str) -> IrcResult<Self> {
        let token = vault
            .get_token(Provider::Bot)
            .await?
            .ok_or(IrcClientErr::MissingToken)?;

        let config = Config {
            use_tls: Some(true),
            nickname: Some(bot_login.to_string()),
            password: Some(format!("oauth:{token}")),

            server: Some(TTV_IRC_URI.to_string()),
            port: Some(TTV_IRC_PORT),
            ping_time: Some(IRC_PING_SECS),
            ..Config::default()
        };

        let client = Client::from_config(config).await?;
        client.identify()?;
        client.send_cap_req(&[
            TtvCap::Commands.into(),
            TtvCap::Membership.into(),
            TtvCap::Tags.into(),
        ])?;

        let connection = Self {
            client,
            bot_login: bot_login.to_string(),
            channel: channel.to_string(),
            id: Uuid::new_v4(),
        };

        tracing::info!(id = %connection.id, "chat connection opened");
        Ok(connection)
    }

    #[instrument(skip_all, fields(id = %self.id))]
    async fn pump(
        &mut self,
        inbound: &Sender<Inbound>,
        commands: &mut UnboundedReceiver<IrcCommand>,
    ) -> IrcResult<Flow> {
        let mut stream = self.client.stream()?;

        loop {
            let flow = tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(msg)) => self.dispatch(&msg, inbound).await?,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "chat stream error");
                        Flow::Reconnect
                    }
                    None => Flow::Reconnect,
                },

                command = commands.recv() => match command {
                    Some(IrcCommand::Say(text)) => {
                        self.client.send_privmsg(&self.channel, text)?;
                        Flow::Continue
                    }
                    None => Flow::Shutdown,
                },
            };

            if flow != Flow::Continue {
                return Ok(flow);
            }
        }
    }

    async fn dispatch(&self, msg: &Message, inbound: &Sender<Inbound>) -> IrcResult<Flow> {
        match &msg.command {
            Command::PRIVMSG(_, text) => {
                let Some(event) = parse_privmsg(msg, text, &self.bot_login) else {
                    return Ok(Flow::Continue);
                };

                tracing::debug!(login = %event.login, "RX PRIVMSG");
                if inbound.send(Inbound::Message(event)).await.is_err() {
                    return Ok(Flow::Shutdown);
                }
            }

            Command::CAP(_, CapSubCommand::ACK, caps, _) => {
                tracing::info!(caps = ?caps, "CAP REQ ok");
                if self.client.list_channels().is_none_or(|joined| joined.is_empty()) {
                    self.client.send_join(&self.channel)?;
                }
            }

            Command::CAP(_, CapSubCommand::NAK, caps, _) => {
                tracing::warn!(caps = ?caps, "CAP REQ rejected");
            }

            Command::NOTICE(target, notice) => {
                tracing::warn!(%target, %notice, "RX NOTICE");
            }

            Command::JOIN(channel, _, _) => {
                if msg.source_nickname() == Some(self.bot_login.as_str()) {
                    tracing::info!(%channel, "joined channel");
                }
            }

            // server asks clients to move to another edge node
            Command::Raw(raw, _) if raw == "RECONNECT" => return Ok(Flow::Reconnect),

            _ => {
                tracing::trace!(command = ?msg.command, "IRC received generic cmd");
            }
        }

        Ok(Flow::Continue)
    }
}

/// Builds a [`ChatEvent`] from a tagged `PRIVMSG`; `None` if the sender cannot be determined.
pub fn parse_privmsg(msg: &Message, text: &str, bot_login: &str) -> Option<ChatEvent> {
    let login = msg.source_nickname()?.to_lowercase();
    let mut event = ChatEvent {
        is_echo: login == bot_login,
        text: text.to_string(),
        ..ChatEvent::default()
    };

    for tag in msg.tags.iter().flatten() {
        let Some(value) = tag.1.as_deref().filter(|v| !v.is_empty()) else {
            continue;
        };

        match tag.0.as_str() {
            "display-name" => event.display_name = value.to_string(),
            "user-id" => event.platform_id = Some(value.to_string()),
            "custom-reward-id" => event.reward_id = Some(value.to_string()),
            _ => (),
        }
    }

    if event.display_name.is_empty() {
        event.display_name = login.clone();
    }
    event.login = login;

    Some(event)
}

pub type IrcResult<T> = core::result::Result<T, IrcClientErr>;

#[derive(Debug, Error)]
pub enum IrcClientErr {
    #[error(transparent)]
    EnvError(#[from] EnvErr),

    #[error(transparent)]
    ClientError(#[from] ::irc::error::Error),

    #[error(transparent)]
    AuthError(#[from] AuthErr),

    #[error("no bot token available")]
    MissingToken,
}

#[derive(Debug)]
pub enum TtvCap {
    Tags,
    Commands,
    Membership,
}

impl From<TtvCap> for Capability {
    fn from(value: TtvCap) -> Self {
        match value {
            TtvCap::Tags => Capability::Custom("twitch.tv/tags"),
            TtvCap::Commands => Capability::Custom("twitch.tv/commands"),
            TtvCap::Membership => Capability::Custom("twitch.tv/membership"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn privmsg(raw: &str) -> Option<ChatEvent> {
        let msg: Message = raw.parse().unwrap();
        let Command::PRIVMSG(_, text) = &msg.command else {
            panic!("not a PRIVMSG: {raw}");
        };

        parse_privmsg(&msg, text, "roulette_bot")
    }

    #[test]
    fn tags_are_read_into_event() {
        let event = privmsg(
            "@display-name=Milia;user-id=42;custom-reward-id=abc-123 \
             :milia!milia@milia.tmi.twitch.tv PRIVMSG #channel :!интим @myramors",
        )
        .unwrap();

        assert_eq!(event.login, "milia");
        assert_eq!(event.display_name, "Milia");
        assert_eq!(event.platform_id.as_deref(), Some("42"));
        assert_eq!(event.reward_id.as_deref(), Some("abc-123"));
        assert_eq!(event.text, "!интим @myramors");
        assert!(!event.is_echo);
    }

    #[test]
    fn missing_tags_fall_back_to_login() {
        let event = privmsg(
            "@display-name=;custom-reward-id= :Milia!milia@milia.tmi.twitch.tv PRIVMSG #channel :hi",
        )
        .unwrap();

        assert_eq!(event.login, "milia");
        assert_eq!(event.display_name, "milia");
        assert!(event.reward_id.is_none());
        assert!(event.platform_id.is_none());
    }

    #[test]
    fn own_messages_are_echoes() {
        let event = privmsg(":roulette_bot!roulette_bot@x.tmi.twitch.tv PRIVMSG #channel :hi").unwrap();
        assert!(event.is_echo);
    }

    #[test]
    fn server_messages_have_no_sender() {
        assert!(privmsg("PRIVMSG #channel :hi").is_none());
    }

    #[tokio::test]
    async fn sink_reports_closed_transport() {
        let (sink, mut rx) = IrcSink::channel();

        sink.say("привет").await.unwrap();
        assert!(matches!(rx.recv().await, Some(IrcCommand::Say(text)) if text == "привет"));

        drop(rx);
        assert!(matches!(sink.say("привет").await, Err(BotErr::TransportClosed)));
    }
}
