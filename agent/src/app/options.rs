//! Application configuration options

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::deploy::dispatcher::{DispatchOptions, RetryPolicy};
use crate::deploy::orchestrator::{OrchestratorSettings, Timeouts};
use crate::errors::AgentError;
use crate::runtime::docker::DockerOptions;
use crate::runtime::Credentials;
use crate::storage::settings::{RegistrySettings, Settings};
use crate::utils::CooldownOptions;

/// Main application options
#[derive(Debug)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Webhook listener configuration
    pub server: ServerOptions,

    /// Shared secret expected in the webhook path
    pub webhook_token: String,

    /// Which runtime the orchestrator drives
    pub runtime: RuntimeBackend,

    /// Registry credentials presented on pull and service update
    pub credentials: Option<Credentials>,

    pub orchestrator: OrchestratorSettings,

    pub dispatch: DispatchOptions,

    /// Deadline for the completion callback
    pub callback_timeout: Duration,
}

impl AppOptions {
    /// Build options from loaded settings
    ///
    /// Fails when no webhook token is configured.
    pub fn from_settings(settings: &Settings, dry_run: bool) -> Result<Self, AgentError> {
        let webhook_token = settings.webhook_token.trim().to_string();
        if webhook_token.is_empty() {
            return Err(AgentError::ConfigError(
                "webhook_token is empty, set it in the settings file or ENV_WEBHOOK_TOKEN"
                    .to_string(),
            ));
        }

        let runtime = if dry_run {
            RuntimeBackend::DryRun
        } else {
            RuntimeBackend::Docker(DockerOptions {
                endpoint: settings.runtime.endpoint.clone(),
                api_version: settings.runtime.api_version.clone(),
                platform: settings.runtime.platform.clone(),
                // Per-step deadlines are enforced by the orchestrator
                request_timeout: Duration::from_secs(
                    settings
                        .runtime
                        .pull_timeout_secs
                        .max(settings.runtime.stop_timeout_secs)
                        .max(settings.runtime.call_timeout_secs),
                ),
            })
        };

        Ok(Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            webhook_token,
            runtime,
            credentials: credentials(&settings.registry),
            orchestrator: OrchestratorSettings {
                conflict_policy: settings.conflict_policy,
                allow_anonymous_pull: settings.registry.allow_anonymous_pull,
                timeouts: Timeouts {
                    pull: Duration::from_secs(settings.runtime.pull_timeout_secs),
                    stop: Duration::from_secs(settings.runtime.stop_timeout_secs),
                    call: Duration::from_secs(settings.runtime.call_timeout_secs),
                },
            },
            dispatch: DispatchOptions {
                notify_on: settings.notify_on,
                retry: RetryPolicy {
                    max_attempts: settings.retry.max_attempts,
                    cooldown: CooldownOptions {
                        base_delay: Duration::from_secs(settings.retry.base_delay_secs),
                        max_delay: Duration::from_secs(settings.retry.max_delay_secs),
                        ..Default::default()
                    },
                },
            },
            callback_timeout: Duration::from_secs(settings.runtime.callback_timeout_secs),
        })
    }
}

fn credentials(registry: &RegistrySettings) -> Option<Credentials> {
    match (&registry.username, &registry.password) {
        (Some(username), Some(password)) => Some(Credentials {
            username: username.clone(),
            password: SecretString::from(password.expose_secret().to_string()),
            server_address: registry.server_address.clone(),
        }),
        (None, None) => None,
        _ => {
            warn!("Registry username and password must both be set, pulling anonymously");
            None
        }
    }
}

/// Runtime the orchestrator drives
#[derive(Debug, Clone)]
pub enum RuntimeBackend {
    /// A local or remote Docker Engine
    Docker(DockerOptions),

    /// Simulated in memory, nothing is deployed
    DryRun,
}

/// Lifecycle options for the service
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, including in-flight runs
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Webhook HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}
