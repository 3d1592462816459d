//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::deploy::notifier::NotifyOn;
use crate::deploy::orchestrator::ConflictPolicy;
use crate::logs::LogLevel;

/// Service settings
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rolling log files here
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Webhook listener
    #[serde(default)]
    pub server: ServerSettings,

    /// Shared secret path segment of the webhook URL
    #[serde(default)]
    pub webhook_token: String,

    /// JSON file listing deployment targets
    #[serde(default = "default_targets_file")]
    pub targets_file: PathBuf,

    /// Image registry credentials
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Container runtime connection
    #[serde(default)]
    pub runtime: RuntimeSettings,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    #[serde(default)]
    pub notify_on: NotifyOn,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Seconds to wait for in-flight runs on shutdown
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_targets_file() -> PathBuf {
    PathBuf::from("config.json")
}

fn default_max_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            webhook_token: String::new(),
            targets_file: default_targets_file(),
            registry: RegistrySettings::default(),
            runtime: RuntimeSettings::default(),
            conflict_policy: ConflictPolicy::default(),
            notify_on: NotifyOn::default(),
            retry: RetrySettings::default(),
            max_shutdown_delay_secs: default_max_shutdown_delay(),
        }
    }
}

impl Settings {
    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup
    ///
    /// Honours the variable names of earlier deployments: `ENV_SERVICESYNC_PORT`,
    /// `ENV_WEBHOOK_TOKEN`, `ENV_USERNAME`, `ENV_PASSWORD`, plus `DOCKER_HOST`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = non_empty("ENV_SERVICESYNC_PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(token) = non_empty("ENV_WEBHOOK_TOKEN") {
            self.webhook_token = token;
        }
        if let Some(username) = non_empty("ENV_USERNAME") {
            self.registry.username = Some(username);
        }
        if let Some(password) = non_empty("ENV_PASSWORD") {
            self.registry.password = Some(SecretString::from(password));
        }
        if let Some(host) = non_empty("DOCKER_HOST") {
            self.runtime.endpoint = Some(host);
        }
    }
}

/// Webhook listener settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Registry credential settings
#[derive(Debug, Default, Deserialize)]
pub struct RegistrySettings {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,

    /// Registry host the credentials belong to
    #[serde(default)]
    pub server_address: Option<String>,

    /// Fall back to an anonymous pull when credentials are rejected
    #[serde(default)]
    pub allow_anonymous_pull: bool,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Container runtime settings
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSettings {
    /// Engine endpoint, unset means `DOCKER_HOST` or the local socket
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_version: Option<String>,

    /// Platform requested on pull, e.g. `linux/amd64`
    #[serde(default)]
    pub platform: Option<String>,

    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Deadline for list, create, start, inspect and update
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,
}

fn default_pull_timeout() -> u64 {
    600
}

fn default_stop_timeout() -> u64 {
    60
}

fn default_call_timeout() -> u64 {
    30
}

fn default_callback_timeout() -> u64 {
    10
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_version: None,
            platform: None,
            pull_timeout_secs: default_pull_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            call_timeout_secs: default_call_timeout(),
            callback_timeout_secs: default_callback_timeout(),
        }
    }
}

/// Whole-run retry settings
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per run, 1 disables retrying
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_base_delay() -> u64 {
    5
}

fn default_max_delay() -> u64 {
    300
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}
