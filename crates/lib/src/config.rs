//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.taskbridge/config.json`) and environment.
//! Everything is read once at startup and never mutated afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener for health and the Telegram webhook.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (e.g. Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// External agent process settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Chunking and retry settings for replies.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 15151).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    15151
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// Telegram user id whose messages count as self-originated. Overridden by TELEGRAM_OWNER_ID.
    /// Without it no message is accepted.
    pub owner_id: Option<i64>,
    /// When set, use webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
}

/// Agent process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Executable to spawn (default "claude"). Resolved through PATH.
    #[serde(default = "default_agent_command")]
    pub command: String,
    /// Working directory for the agent. Overridden by WORKSPACE env; falls back to the current directory.
    pub workspace: Option<PathBuf>,
    /// Set from `run --workspace`; wins over WORKSPACE env and `workspace`. Never read from the file.
    #[serde(skip)]
    pub workspace_override: Option<PathBuf>,
    /// Execution budget per task in seconds (default 1200).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Case-sensitive prefix that marks a chat message as a command (default "/claude ").
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Mirror agent stdout to this process's stdout while it runs (default true).
    #[serde(default = "default_true")]
    pub mirror_output: bool,
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_timeout_secs() -> u64 {
    1200
}

fn default_command_prefix() -> String {
    "/claude ".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            workspace: None,
            workspace_override: None,
            timeout_secs: default_timeout_secs(),
            command_prefix: default_command_prefix(),
            mirror_output: true,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Reply chunking and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfig {
    /// Longest message the channel accepts, in UTF-16 code units (default 4096).
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Send attempts per segment (default 3).
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Base backoff; attempt k waits k times this (default 1000).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Pause between segments of a multi-part reply (default 500).
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

fn default_max_message_length() -> usize {
    4096
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_pacing_ms() -> u64 {
    500
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    non_empty_env("TELEGRAM_BOT_TOKEN").or_else(|| {
        config
            .channels
            .telegram
            .bot_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the owner user id: env TELEGRAM_OWNER_ID overrides config. An unparsable env value is ignored.
pub fn resolve_telegram_owner(config: &Config) -> Option<i64> {
    match non_empty_env("TELEGRAM_OWNER_ID").map(|s| s.parse::<i64>()) {
        Some(Ok(id)) => Some(id),
        Some(Err(e)) => {
            log::warn!("ignoring TELEGRAM_OWNER_ID: {}", e);
            config.channels.telegram.owner_id
        }
        None => config.channels.telegram.owner_id,
    }
}

/// Resolve the agent working directory: command-line override, env WORKSPACE, then config,
/// then the current directory.
pub fn resolve_workspace_dir(config: &Config) -> PathBuf {
    config
        .agent
        .workspace_override
        .clone()
        .or_else(|| non_empty_env("WORKSPACE").map(PathBuf::from))
        .or_else(|| config.agent.workspace.clone())
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TASKBRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".taskbridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, the default path, or TASKBRIDGE_CONFIG_PATH. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = read_config(&path)?;
    Ok((config, path))
}

fn read_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}
