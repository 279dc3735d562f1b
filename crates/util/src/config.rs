use std::{env, fmt, net::SocketAddr, time::Duration};

use url::Url;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

const MIN_WEBHOOK_SECRET_LEN: usize = 10;
const MAX_WEBHOOK_SECRET_LEN: usize = 100;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STARTUP_MAX_ATTEMPTS: u32 = 3;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Credentials and channel the chat bot connects with.
#[derive(Clone)]
pub struct ChatConfig {
    pub username: String,
    /// Chat token without the `oauth:` prefix.
    pub oauth_token: String,
    pub channel: String,
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("username", &self.username)
            .field("oauth_token", &"<redacted>")
            .field("channel", &self.channel)
            .finish()
    }
}

/// Application identity and broadcaster used against the Twitch APIs.
#[derive(Clone)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    pub broadcaster_id: String,
    pub webhook_secret: String,
    pub public_base_url: Url,
}

impl fmt::Debug for TwitchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitchConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("broadcaster_id", &self.broadcaster_id)
            .field("webhook_secret", &"<redacted>")
            .field("public_base_url", &self.public_base_url.as_str())
            .finish()
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub chat: ChatConfig,
    pub twitch: TwitchConfig,
    pub http_timeout: Duration,
    pub startup_max_attempts: u32,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = optional("APP_BIND_ADDR")
            .as_deref()
            .unwrap_or(DEFAULT_BIND_ADDR)
            .parse::<SocketAddr>()
            .map_err(ConfigError::BindAddress)?;

        let username = required("TWITCH_USERNAME")?.to_lowercase();
        let oauth_token = required("TWITCH_OAUTH_TOKEN")?;
        let oauth_token = oauth_token
            .strip_prefix("oauth:")
            .unwrap_or(&oauth_token)
            .to_string();
        let channel = optional("TWITCH_CHANNEL")
            .map(|value| value.trim_start_matches('#').to_lowercase())
            .unwrap_or_else(|| username.clone());

        let webhook_secret = required("SECRET")?;
        let secret_len = webhook_secret.chars().count();
        if !(MIN_WEBHOOK_SECRET_LEN..=MAX_WEBHOOK_SECRET_LEN).contains(&secret_len) {
            return Err(ConfigError::WebhookSecretLength(secret_len));
        }

        let base_raw = optional("PUBLIC_BASE_URL")
            .or_else(|| optional("NGROK_TUNNEL"))
            .ok_or(ConfigError::Missing("PUBLIC_BASE_URL"))?;
        let public_base_url = parse_base_url(&base_raw)?;

        let http_timeout = Duration::from_secs(parse_number(
            "HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);
        let startup_max_attempts =
            parse_number("STARTUP_MAX_ATTEMPTS", DEFAULT_STARTUP_MAX_ATTEMPTS)?.max(1);

        Ok(Self {
            bind_addr,
            environment,
            chat: ChatConfig {
                username,
                oauth_token,
                channel,
            },
            twitch: TwitchConfig {
                client_id: required("CLIENT_ID")?,
                client_secret: required("CLIENT_SECRET")?,
                broadcaster_id: required("BROADCASTER_ID")?,
                webhook_secret,
                public_base_url,
            },
            http_timeout,
            startup_max_attempts,
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parse_number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        None => Ok(default),
    }
}

/// Parses the public base URL, ensuring a trailing slash so relative joins keep the path.
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(ConfigError::PublicBaseUrl)
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    Missing(&'static str),
    WebhookSecretLength(usize),
    PublicBaseUrl(url::ParseError),
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::Missing(name) => write!(f, "{name} must be set"),
            Self::WebhookSecretLength(len) => write!(
                f,
                "SECRET must be between {MIN_WEBHOOK_SECRET_LEN} and {MAX_WEBHOOK_SECRET_LEN} characters (got {len})"
            ),
            Self::PublicBaseUrl(err) => write!(f, "invalid PUBLIC_BASE_URL value: {err}"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
