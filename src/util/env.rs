//! Environment-driven configuration.
//!
//! Values are read from the process environment (and a `.env` file if present) and deserialized
//! into [`Config`] through a small map deserializer modelled on the [`envy`] crate. Compared to
//! `envy`, empty values deserialize as `None` for optional fields and lists are comma-separated.
//!
//! [`envy`]: https://github.com/softprops/envy

use std::iter::empty;
use std::sync::OnceLock;

use serde::Deserialize;
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, IntoDeserializer};
use thiserror::Error;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Loads the configuration once; later calls return the cached value.
pub fn load() -> EnvResult<&'static Config> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = Config::from_env()?;
    Ok(CONFIG.get_or_init(|| config))
}

pub fn get_var(var: Var) -> EnvResult<&'static str> {
    let config = load()?;
    Ok(match var {
        Var::BotLogin => &config.bot_login,
        Var::ChannelLogin => &config.channel_login,
        Var::DatabaseUrl => &config.database_url,
    })
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

#[derive(Debug)]
pub enum Var {
    BotLogin,
    ChannelLogin,
    DatabaseUrl,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    pub bot_login: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    pub channel_login: String,
    pub channel_id: String,
    pub database_url: String,

    #[serde(default)]
    pub donation_client_id: Option<String>,
    #[serde(default)]
    pub donation_client_secret: Option<String>,

    #[serde(default)]
    pub generator_url: Option<String>,
    #[serde(default)]
    pub generator_api_key: Option<String>,
    #[serde(default)]
    pub generator_model: Option<String>,

    #[serde(default)]
    pub extra_vote_reward_id: Option<String>,
    #[serde(default)]
    pub bot_ignore_logins: Vec<String>,

    #[serde(default = "default_overlay_port")]
    pub overlay_port: u16,
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub log_filter: Option<String>,
}

impl Config {
    pub fn from_env() -> EnvResult<Self> {
        // a missing .env file is fine, the process environment still applies
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(EnvErr::Dotenvy(e));
        }

        Ok(from_iter(std::env::vars())?)
    }
}

// secrets stay out of debug output
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bot_login", &self.bot_login)
            .field("channel_login", &self.channel_login)
            .field("channel_id", &self.channel_id)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("generator_url", &self.generator_url)
            .field("generator_model", &self.generator_model)
            .field("extra_vote_reward_id", &self.extra_vote_reward_id)
            .field("overlay_port", &self.overlay_port)
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

#[inline]
const fn default_overlay_port() -> u16 {
    3000
}

#[inline]
fn default_service_name() -> String {
    String::from("roulette-bot")
}

// ---
//  Deserializer implementation
// ---

struct Val(String, String);
struct Varname(String);

struct Vars<Iter: Iterator<Item = (String, String)>>(Iter);

impl<Iter: Iterator<Item = (String, String)>> Iterator for Vars<Iter> {
    type Item = (Varname, Val);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(k, v)| (Varname(k.clone()), Val(k, v)))
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Val {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Varname {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! forward_parsed_vals {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                match self.1.trim().parse::<$ty>() {
                    Ok(val) => val.into_deserializer().$method(visitor),
                    Err(e) => Err(de::Error::custom(format_args!(
                        "{}: while parsing '{}' (variable: {})",
                        e, self.1, self.0
                    ))),
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Val {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.1.into_deserializer().deserialize_any(visitor)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.1.trim().is_empty() {
            return SeqDeserializer::new(empty::<Val>()).deserialize_seq(visitor);
        }

        let name = self.0;
        let values = self
            .1
            .split(',')
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| Val(name.clone(), v.to_owned()))
            .collect::<Vec<_>>();

        SeqDeserializer::new(values.into_iter()).deserialize_seq(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.1.trim().is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    forward_parsed_vals! {
        bool => deserialize_bool,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i32 => deserialize_i32,
        i64 => deserialize_i64,
    }

    serde::forward_to_deserialize_any! {
        u8 i8 i16 f32 f64 char str string unit bytes byte_buf map
        unit_struct tuple_struct identifier tuple ignored_any enum struct
    }
}

impl<'de> de::Deserializer<'de> for Varname {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.0.into_deserializer().deserialize_any(visitor)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf map newtype_struct
        unit_struct tuple_struct identifier tuple ignored_any
        bool u8 u16 u32 u64 i8 i16 i32 i64 f32 f64 enum struct
    }
}

pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    let map = MapDeserializer::new(Vars(iter.into_iter()));
    T::deserialize(de::value::MapAccessDeserializer::new(map))
}

impl de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field.to_uppercase())
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing required variable {0}")]
    MissingValue(String),
}

#[cfg(test)]
mod test {
    use super::*;

    fn required() -> Vec<(String, String)> {
        [
            ("TWITCH_CLIENT_ID", "cid"),
            ("TWITCH_CLIENT_SECRET", "secret"),
            ("BOT_LOGIN", "roulettebot"),
            ("CHANNEL_LOGIN", "streamer"),
            ("CHANNEL_ID", "1234"),
            ("DATABASE_URL", "postgres://localhost/bot"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_required_vars_and_defaults() {
        let config: Config = from_iter(required()).unwrap();

        assert_eq!(config.bot_login, "roulettebot");
        assert_eq!(config.overlay_port, 3000);
        assert_eq!(config.service_name, "roulette-bot");
        assert!(config.bot_token.is_none());
        assert!(config.bot_ignore_logins.is_empty());
    }

    #[test]
    fn test_empty_optional_is_none() {
        let mut vars = required();
        vars.push(("BOT_TOKEN".into(), "".into()));
        vars.push(("GENERATOR_API_KEY".into(), "sk-test".into()));
        vars.push(("OVERLAY_PORT".into(), "8080".into()));
        vars.push(("BOT_IGNORE_LOGINS".into(), "nightbot, streamelements,".into()));

        let config: Config = from_iter(vars).unwrap();
        assert!(config.bot_token.is_none());
        assert_eq!(config.generator_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.overlay_port, 8080);
        assert_eq!(config.bot_ignore_logins, vec!["nightbot", "streamelements"]);
    }

    #[test]
    fn test_missing_required_var() {
        let vars = required()
            .into_iter()
            .filter(|(k, _)| k != "DATABASE_URL");

        match from_iter::<_, Config>(vars) {
            Err(EnvDeserializeError::MissingValue(name)) => assert_eq!(name, "DATABASE_URL"),
            other => panic!("expected missing value error, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_port() {
        let mut vars = required();
        vars.push(("OVERLAY_PORT".into(), "not-a-port".into()));
        assert!(from_iter::<_, Config>(vars).is_err());
    }
}
