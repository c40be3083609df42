//! Engine Configuration Settings
//!
//! Configuration types for the stream engine, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::{ReconnectionPolicy, Venue};
use crate::infrastructure::websocket::EngineConfig;

/// Public market data or authenticated account streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamKind {
    /// Orderbook, trade and ticker streams.
    #[default]
    Public,
    /// Order, position, balance and execution streams.
    Private,
}

impl StreamKind {
    /// Parse kind from string; anything but `private` is public.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "private" => Self::Private,
            _ => Self::Public,
        }
    }

    /// Get the kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

/// Public data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Orderbook depth.
    Orderbook,
    /// Trade prints.
    Trades,
    /// Best bid/ask or last price.
    Ticker,
}

impl Channel {
    /// Parse a channel name (`orderbook`/`depth`, `trades`/`trade`, `ticker`).
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "orderbook" | "depth" | "book" => Some(Self::Orderbook),
            "trades" | "trade" => Some(Self::Trades),
            "ticker" | "tickers" => Some(Self::Ticker),
            _ => None,
        }
    }
}

/// Venue API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Keepalive override; `None` keeps the venue's own cadence.
    pub heartbeat_interval: Option<Duration>,
    /// Bound on TCP + TLS + upgrade.
    pub connect_timeout: Duration,
    /// Bound on the authentication round trip.
    pub auth_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: None,
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Exchange to connect to.
    pub venue: Venue,
    /// Public or private streams.
    pub kind: StreamKind,
    /// Endpoint override; `None` uses the venue's production URL.
    pub url: Option<String>,
    /// Symbols in the venue's own spelling.
    pub symbols: Vec<String>,
    /// Public channels to subscribe to.
    pub channels: Vec<Channel>,
    /// API credentials, required by private streams.
    pub credentials: Option<Credentials>,
    /// Processing queue capacity.
    pub queue_capacity: usize,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
}

impl EngineSettings {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required keys are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let venue_name = required(&lookup, "STREAM_VENUE")?;
        let venue = Venue::from_str_case_insensitive(&venue_name).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "STREAM_VENUE".to_string(),
                value: venue_name.clone(),
            }
        })?;

        let kind = lookup("STREAM_KIND")
            .map(|s| StreamKind::from_str_case_insensitive(&s))
            .unwrap_or_default();
        if kind == StreamKind::Private && venue != Venue::Bybit {
            return Err(ConfigError::Unsupported(format!(
                "private streams are not available on {}",
                venue.as_str()
            )));
        }

        let symbols = comma_list(&lookup("STREAM_SYMBOLS").unwrap_or_default());
        if kind == StreamKind::Public && symbols.is_empty() {
            return Err(ConfigError::EmptyValue("STREAM_SYMBOLS".to_string()));
        }

        let channels = match lookup("STREAM_CHANNELS") {
            Some(raw) => comma_list(&raw)
                .iter()
                .map(|name| {
                    Channel::from_str_case_insensitive(name).ok_or_else(|| {
                        ConfigError::InvalidValue {
                            key: "STREAM_CHANNELS".to_string(),
                            value: name.clone(),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![Channel::Orderbook, Channel::Trades],
        };

        // Missing credentials are reported by the engine as an auth failure,
        // not here.
        let credentials = match (lookup("STREAM_API_KEY"), lookup("STREAM_API_SECRET")) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(Credentials::new(key, secret))
            }
            _ => None,
        };

        let defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: lookup("STREAM_HEARTBEAT_INTERVAL_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            connect_timeout: parse_env_duration_secs(
                &lookup,
                "STREAM_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            ),
            auth_timeout: parse_env_duration_secs(
                &lookup,
                "STREAM_AUTH_TIMEOUT_SECS",
                defaults.auth_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                &lookup,
                "STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                &lookup,
                "STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env(
                &lookup,
                "STREAM_RECONNECT_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env(
                &lookup,
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        Ok(Self {
            venue,
            kind,
            url: lookup("STREAM_URL").filter(|url| !url.trim().is_empty()),
            symbols,
            channels,
            credentials,
            queue_capacity: parse_env(&lookup, "STREAM_QUEUE_CAPACITY", 1000),
            metrics_port: parse_env(&lookup, "STREAM_METRICS_PORT", 0),
            websocket,
        })
    }

    /// Whether `channel` was requested.
    #[must_use]
    pub fn wants(&self, channel: Channel) -> bool {
        self.channels.contains(&channel)
    }

    /// Backoff schedule built from the reconnect settings.
    #[must_use]
    pub fn reconnection_policy(&self) -> ReconnectionPolicy {
        ReconnectionPolicy::new(
            self.websocket.max_reconnect_attempts,
            self.websocket.reconnect_delay_initial,
            self.websocket.reconnect_delay_multiplier,
            self.websocket.reconnect_delay_max,
        )
    }

    /// Engine tuning built from the queue and timeout settings.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            queue_capacity: self.queue_capacity.max(1),
            connect_timeout: self.websocket.connect_timeout,
            ..EngineConfig::default()
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value outside the accepted set.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Valid values that cannot be combined.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Result<EngineSettings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        EngineSettings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn stream_kind_parsing() {
        assert_eq!(StreamKind::from_str_case_insensitive("PRIVATE"), StreamKind::Private);
        assert_eq!(StreamKind::from_str_case_insensitive("public"), StreamKind::Public);
        assert_eq!(StreamKind::from_str_case_insensitive("other"), StreamKind::Public);
    }

    #[test]
    fn channel_parsing() {
        assert_eq!(Channel::from_str_case_insensitive(" Depth"), Some(Channel::Orderbook));
        assert_eq!(Channel::from_str_case_insensitive("trade"), Some(Channel::Trades));
        assert_eq!(Channel::from_str_case_insensitive("klines"), None);
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("key123".to_string(), "secret456".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn minimal_public_config() {
        let settings =
            settings(&[("STREAM_VENUE", "binance"), ("STREAM_SYMBOLS", "btcusdt, ethusdt")])
                .unwrap();
        assert_eq!(settings.venue, Venue::Binance);
        assert_eq!(settings.kind, StreamKind::Public);
        assert_eq!(settings.symbols, vec!["btcusdt", "ethusdt"]);
        assert!(settings.wants(Channel::Orderbook));
        assert!(!settings.wants(Channel::Ticker));
        assert!(settings.credentials.is_none());
        assert!(settings.url.is_none());
        assert_eq!(settings.queue_capacity, 1000);
        assert_eq!(settings.metrics_port, 0);
        assert_eq!(settings.websocket.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.websocket.heartbeat_interval, None);
    }

    #[test]
    fn missing_venue() {
        assert!(matches!(
            settings(&[("STREAM_SYMBOLS", "BTCUSDT")]),
            Err(ConfigError::MissingEnvVar(key)) if key == "STREAM_VENUE"
        ));
    }

    #[test]
    fn unknown_venue() {
        assert!(matches!(
            settings(&[("STREAM_VENUE", "kraken"), ("STREAM_SYMBOLS", "XBTUSD")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn public_needs_symbols() {
        assert!(matches!(
            settings(&[("STREAM_VENUE", "upbit")]),
            Err(ConfigError::EmptyValue(key)) if key == "STREAM_SYMBOLS"
        ));
    }

    #[test]
    fn private_only_on_bybit() {
        assert!(matches!(
            settings(&[("STREAM_VENUE", "binance"), ("STREAM_KIND", "private")]),
            Err(ConfigError::Unsupported(_))
        ));

        let settings = settings(&[
            ("STREAM_VENUE", "bybit"),
            ("STREAM_KIND", "private"),
            ("STREAM_API_KEY", "k"),
            ("STREAM_API_SECRET", "s"),
        ])
        .unwrap();
        assert_eq!(settings.kind, StreamKind::Private);
        assert_eq!(settings.credentials.unwrap().api_key(), "k");
    }

    #[test]
    fn overrides_flow_into_policies() {
        let settings = settings(&[
            ("STREAM_VENUE", "bybit"),
            ("STREAM_SYMBOLS", "BTCUSDT"),
            ("STREAM_CHANNELS", "ticker"),
            ("STREAM_QUEUE_CAPACITY", "64"),
            ("STREAM_CONNECT_TIMEOUT_SECS", "3"),
            ("STREAM_RECONNECT_DELAY_INITIAL_MS", "100"),
            ("STREAM_RECONNECT_DELAY_MAX_SECS", "5"),
            ("STREAM_RECONNECT_MULTIPLIER", "3.0"),
            ("STREAM_MAX_RECONNECT_ATTEMPTS", "7"),
            ("STREAM_HEARTBEAT_INTERVAL_SECS", "15"),
        ])
        .unwrap();

        assert_eq!(settings.channels, vec![Channel::Ticker]);
        assert_eq!(settings.websocket.heartbeat_interval, Some(Duration::from_secs(15)));

        let policy = settings.reconnection_policy();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
        assert!((policy.backoff_factor - 3.0).abs() < f64::EPSILON);

        let config = settings.engine_config();
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn invalid_channel() {
        assert!(matches!(
            settings(&[
                ("STREAM_VENUE", "bybit"),
                ("STREAM_SYMBOLS", "BTCUSDT"),
                ("STREAM_CHANNELS", "orderbook,klines"),
            ]),
            Err(ConfigError::InvalidValue { value, .. }) if value == "klines"
        ));
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let settings = settings(&[
            ("STREAM_VENUE", "binance"),
            ("STREAM_SYMBOLS", "BTCUSDT"),
            ("STREAM_QUEUE_CAPACITY", "lots"),
        ])
        .unwrap();
        assert_eq!(settings.queue_capacity, 1000);
    }
}
