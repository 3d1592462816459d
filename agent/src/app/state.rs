//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::app::options::RuntimeBackend;
use crate::deploy::dispatcher::{DispatchOptions, Dispatcher};
use crate::deploy::notifier::{CallbackNotifier, HttpNotifier};
use crate::deploy::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::errors::AgentError;
use crate::runtime::docker::DockerEngine;
use crate::runtime::memory::MemoryRuntime;
use crate::runtime::{Credentials, RuntimeService};
use crate::targets::TargetRegistry;

/// Main application state
pub struct AppState {
    /// Deployment targets, immutable after startup
    pub registry: Arc<TargetRegistry>,

    /// Runtime every run is executed against
    pub runtime: Arc<dyn RuntimeService>,

    /// Starts and supervises redeploy runs
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Wire the runtime, orchestrator, notifier and dispatcher together
    pub fn init(
        registry: TargetRegistry,
        backend: &RuntimeBackend,
        credentials: Option<Credentials>,
        orchestrator_settings: OrchestratorSettings,
        dispatch_options: DispatchOptions,
        callback_timeout: Duration,
    ) -> Result<Self, AgentError> {
        let runtime: Arc<dyn RuntimeService> = match backend {
            RuntimeBackend::Docker(options) => {
                let engine = DockerEngine::new(options)?;
                info!(
                    "Using Docker Engine at {}",
                    options.endpoint.as_deref().unwrap_or("the default local socket")
                );
                Arc::new(engine)
            }
            RuntimeBackend::DryRun => {
                info!("Dry run: deployments are simulated in memory");
                Arc::new(MemoryRuntime::new())
            }
        };

        let notifier: Arc<dyn CallbackNotifier> = Arc::new(HttpNotifier::new(callback_timeout)?);
        Ok(Self::with_parts(
            registry,
            runtime,
            credentials,
            orchestrator_settings,
            dispatch_options,
            notifier,
        ))
    }

    /// Build state around an existing runtime and notifier
    pub fn with_parts(
        registry: TargetRegistry,
        runtime: Arc<dyn RuntimeService>,
        credentials: Option<Credentials>,
        orchestrator_settings: OrchestratorSettings,
        dispatch_options: DispatchOptions,
        notifier: Arc<dyn CallbackNotifier>,
    ) -> Self {
        let registry = Arc::new(registry);
        let orchestrator = Arc::new(Orchestrator::new(
            runtime.clone(),
            credentials,
            orchestrator_settings,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            orchestrator,
            notifier,
            dispatch_options,
        ));

        Self {
            registry,
            runtime,
            dispatcher,
        }
    }

    /// Wait for in-flight runs to finish
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        info!("Shutting down app state...");
        self.dispatcher.shutdown().await;
        Ok(())
    }
}
