use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_drain_timeout", deserialize_with = "deserialize_duration")]
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
            max_body_bytes: default_max_body_bytes(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,
    #[serde(default = "default_statement_timeout", deserialize_with = "deserialize_duration")]
    pub statement_timeout: Duration,
    #[serde(default = "default_true")]
    pub apply_schema: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: None,
            acquire_timeout_secs: None,
            statement_timeout: default_statement_timeout(),
            apply_schema: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    #[serde(default = "default_poll_timeout", deserialize_with = "deserialize_duration")]
    pub poll_timeout: Duration,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: String::new(),
            api_url: default_telegram_api_url(),
            poll_timeout: default_poll_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_update_timeout", deserialize_with = "deserialize_duration")]
    pub update_timeout: Duration,
    #[serde(default = "default_poll_retry_delay", deserialize_with = "deserialize_duration")]
    pub poll_retry_delay: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            update_timeout: default_update_timeout(),
            poll_retry_delay: default_poll_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_events_path")]
    pub events_path: PathBuf,
    #[serde(default = "default_templates_path")]
    pub templates_path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            events_path: default_events_path(),
            templates_path: default_templates_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Attempt every recipient and report the failures.
    #[default]
    Continue,
    /// Stop the fan-out on the first failed send.
    AbortOnFirst,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub mode: DeliveryMode,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_send_timeout", deserialize_with = "deserialize_duration")]
    pub send_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::default(),
            max_concurrency: default_max_concurrency(),
            send_timeout: default_send_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

fn default_base_path() -> String {
    "/api".to_string()
}

const fn default_max_body_bytes() -> usize {
    1_048_576
}

const fn default_drain_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_statement_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

const fn default_poll_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_update_timeout() -> Duration {
    Duration::from_secs(3)
}

const fn default_poll_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_events_path() -> PathBuf {
    PathBuf::from("events.json")
}

fn default_templates_path() -> PathBuf {
    PathBuf::from("templates.json")
}

const fn default_max_concurrency() -> usize {
    8
}

const fn default_send_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

/// Accepts humantime strings (`"1500ms"`, `"5s"`) or a bare number of seconds.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => match text.trim().parse::<u64>() {
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(_) => humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom),
        },
    }
}

/// Loads `path` into the process environment. A missing file is the normal case
/// outside development; anything else wrong with it is a configuration error.
pub fn load_env_file(path: &Path) -> Result<bool, ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(ConfigError::Message(format!(
            "failed to load {}: {err}",
            path.display()
        ))),
    }
}

impl NotifierConfig {
    /// Layered load: `.env.local`, then `config/<NOTIFIER_ENV>`, then an optional explicit
    /// file, then `NOTIFIER__*` environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        load_env_file(Path::new(".env.local"))?;

        let profile = std::env::var("NOTIFIER_ENV").unwrap_or_else(|_| "local".to_string());

        let mut builder = Config::builder();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder.set_default("database.url", url)?;
        }
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            builder = builder.set_default("telegram.token", token)?;
        }

        builder = builder.add_source(File::with_name(&format!("config/{profile}")).required(false));
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(Environment::with_prefix("NOTIFIER").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.database.url.trim().is_empty() {
            errors.push("database.url must be set (or DATABASE_URL)".to_string());
        }
        if self.telegram.enabled && self.telegram.token.trim().is_empty() {
            errors.push(
                "telegram.token must be set when telegram is enabled (or BOT_TOKEN)".to_string(),
            );
        }
        if !self.server.base_path.is_empty() && !self.server.base_path.starts_with('/') {
            errors.push(format!(
                "server.base_path `{}` must start with `/`",
                self.server.base_path
            ));
        }
        if self.delivery.max_concurrency == 0 {
            errors.push("delivery.max_concurrency must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Message(errors.join("; ")))
        }
    }
}
