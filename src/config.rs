use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub page: PageConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "mails".to_string()
}

/// Where the mail page snapshot lives and how to find messages inside it.
///
/// The selectors are an external, unversioned contract with the mail client;
/// the defaults match the web client the browser bridge targets.
#[derive(Debug, Deserialize, Clone)]
pub struct PageConfig {
    #[serde(default = "default_snapshot")]
    pub snapshot: PathBuf,
    #[serde(default = "default_message_selector")]
    pub message_selector: String,
    #[serde(default = "default_body_selector")]
    pub body_selector: String,
    #[serde(default = "default_quote_selector")]
    pub quote_selector: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            snapshot: default_snapshot(),
            message_selector: default_message_selector(),
            body_selector: default_body_selector(),
            quote_selector: default_quote_selector(),
        }
    }
}

fn default_snapshot() -> PathBuf {
    PathBuf::from("./data/page.html")
}
fn default_message_selector() -> String {
    "div.adn.ads".to_string()
}
fn default_body_selector() -> String {
    "div.a3s".to_string()
}
fn default_quote_selector() -> String {
    ".gmail_quote".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    /// How long the reply watcher waits for a new outgoing message.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Poll interval backing up the filesystem watcher.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Window during which repeated send triggers collapse into one run.
    #[serde(default = "default_send_cooldown_ms")]
    pub send_cooldown_ms: u64,
    /// Delay before the suggestion pipeline reads a freshly-changed page.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_store_ready_timeout_ms")]
    pub store_ready_timeout_ms: u64,
    /// File the browser bridge touches when the user clicks send.
    #[serde(default = "default_send_signal")]
    pub send_signal: PathBuf,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: default_reply_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            send_cooldown_ms: default_send_cooldown_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            store_ready_timeout_ms: default_store_ready_timeout_ms(),
            send_signal: default_send_signal(),
        }
    }
}

fn default_reply_timeout_ms() -> u64 {
    12_000
}
fn default_poll_interval_ms() -> u64 {
    300
}
fn default_send_cooldown_ms() -> u64 {
    4_000
}
fn default_settle_delay_ms() -> u64 {
    1_500
}
fn default_store_ready_timeout_ms() -> u64 {
    15_000
}
fn default_send_signal() -> PathBuf {
    PathBuf::from("./data/send.signal")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// `disabled` or `openai-compat`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            base_url: default_base_url(),
            model: None,
            temperature: default_temperature(),
            top_k: default_top_k(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_top_k() -> u32 {
    40
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidate records offered to the ranker per run.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Character cap per candidate entry in the ranking listing.
    #[serde(default = "default_entry_chars")]
    pub entry_chars: usize,
    /// Character cap on the query text shown to the ranker.
    #[serde(default = "default_query_chars")]
    pub query_chars: usize,
    /// Attempts for the corpus fetch, with linearly increasing backoff.
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            entry_chars: default_entry_chars(),
            query_chars: default_query_chars(),
            fetch_attempts: default_fetch_attempts(),
        }
    }
}

fn default_max_candidates() -> usize {
    60
}
fn default_entry_chars() -> usize {
    300
}
fn default_query_chars() -> usize {
    800
}
fn default_fetch_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate db
    if config.db.collection.trim().is_empty() {
        anyhow::bail!("db.collection must not be empty");
    }

    // Validate retrieval
    if config.retrieval.max_candidates == 0 {
        anyhow::bail!("retrieval.max_candidates must be > 0");
    }
    if config.retrieval.fetch_attempts == 0 {
        anyhow::bail!("retrieval.fetch_attempts must be >= 1");
    }

    // Validate watcher
    if config.watcher.poll_interval_ms == 0 {
        anyhow::bail!("watcher.poll_interval_ms must be > 0");
    }

    // Validate model
    if !(0.0..=2.0).contains(&config.model.temperature) {
        anyhow::bail!("model.temperature must be in [0.0, 2.0]");
    }
    if config.model.is_enabled() && config.model.model.is_none() {
        anyhow::bail!(
            "model.model must be specified when provider is '{}'",
            config.model.provider
        );
    }

    match config.model.provider.as_str() {
        "disabled" | "openai-compat" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled or openai-compat.",
            other
        ),
    }

    Ok(config)
}
