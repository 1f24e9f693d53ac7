use std::time::Duration;

pub const HELIX_URI_BASE: &str = "https://api.twitch.tv/helix";
pub const TWITCH_TOKEN_URI: &str = "https://id.twitch.tv/oauth2/token";
pub const DONATION_TOKEN_URI: &str = "https://www.donationalerts.com/oauth/token";
pub const DONATION_API_BASE: &str = "https://www.donationalerts.com/api/v1";
pub const GENERATOR_DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const GENERATOR_DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const TTV_IRC_URI: &str = "irc.chat.twitch.tv";
pub const TTV_IRC_PORT: u16 = 6697;

/// Tokens are treated as expired this many seconds before their real expiry.
pub const TOKEN_SKEW_SECS: i64 = 60;

pub const TOKEN_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);
pub const HELIX_TIMEOUT: Duration = Duration::from_secs(8);
pub const DONATION_TIMEOUT: Duration = Duration::from_secs(8);
pub const GENERATOR_TIMEOUT: Duration = Duration::from_secs(6);
pub const GENERATOR_ATTEMPTS: u32 = 3;
pub const GENERATOR_BACKOFF: Duration = Duration::from_millis(500);

pub const STREAM_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DONATION_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const COMBO_WINDOW: Duration = Duration::from_secs(60);

pub const INBOUND_QUEUE_CAPACITY: usize = 256;
pub const OVERLAY_CHANNEL_CAPACITY: usize = 64;

pub const AFFINITY_MIN: i32 = -100;
pub const AFFINITY_MAX: i32 = 100;

pub const IRC_PING_SECS: u32 = 300;
pub const IRC_RECONNECT_MIN: Duration = Duration::from_secs(2);
pub const IRC_RECONNECT_MAX: Duration = Duration::from_secs(60);
