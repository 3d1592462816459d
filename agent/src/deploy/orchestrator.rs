//! Redeploy orchestrator
//!
//! Drives one [`RedeployRun`] through pull, conflict resolution, replacement
//! and start against the runtime. Steps run strictly in order, each bounded by
//! a deadline; the first failure moves the run to `Failed` and nothing is
//! rolled back.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::deploy::fsm::RunEvent;
use crate::errors::RedeployError;
use crate::models::run::RedeployRun;
use crate::runtime::{
    ContainerSpec, Credentials, ProgressSink, RuntimeError, RuntimeService, TracingProgressSink,
    Workload,
};
use crate::targets::DeployAction;

/// How running containers that stand in the way are detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Anything publishing the target's host port. Survives tag changes.
    #[default]
    HostPort,

    /// Anything running the exact image reference being deployed. Use when
    /// the host port is not bound yet.
    Image,
}

impl ConflictPolicy {
    pub fn conflicts(&self, workload: &Workload, image_ref: &str, host_port: u16) -> bool {
        match self {
            ConflictPolicy::HostPort => workload.host_ports.contains(&host_port),
            ConflictPolicy::Image => workload.image == image_ref,
        }
    }
}

/// Deadlines for runtime calls
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub pull: Duration,
    pub stop: Duration,
    /// List, create, start, inspect and update
    pub call: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pull: Duration::from_secs(600),
            stop: Duration::from_secs(60),
            call: Duration::from_secs(30),
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub conflict_policy: ConflictPolicy,

    /// Retry a pull without credentials when the registry rejects them
    pub allow_anonymous_pull: bool,

    pub timeouts: Timeouts,
}

/// Executes redeploy runs against a runtime service
pub struct Orchestrator {
    runtime: Arc<dyn RuntimeService>,
    credentials: Option<Credentials>,
    progress: Arc<dyn ProgressSink>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn RuntimeService>,
        credentials: Option<Credentials>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            runtime,
            credentials,
            progress: Arc::new(TracingProgressSink),
            settings,
        }
    }

    /// Send pull progress somewhere other than the debug log
    pub fn with_progress_sink(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Run the state machine to a terminal state
    pub async fn execute(&self, run: &mut RedeployRun) -> Result<(), RedeployError> {
        info!(run_id = %run.id, "Redeploying {} with {}", run.target, run.image_ref);

        match self.drive(run).await {
            Ok(()) => {
                info!(run_id = %run.id, "Redeploy of {} succeeded", run.image_ref);
                Ok(())
            }
            Err(e) => {
                error!(
                    run_id = %run.id,
                    state = ?run.state(),
                    "Redeploy of {} failed: {}",
                    run.image_ref,
                    e
                );
                run.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn drive(&self, run: &mut RedeployRun) -> Result<(), RedeployError> {
        let image_ref = run.image_ref.clone();

        run.advance(RunEvent::Pull)?;
        self.pull(&image_ref).await?;

        match run.target.action.clone() {
            DeployAction::RecreateContainer {
                container_port,
                host_port,
            } => {
                run.advance(RunEvent::ScanConflicts)?;
                self.resolve_conflicts(&image_ref, host_port).await?;

                run.advance(RunEvent::Replace)?;
                let spec = ContainerSpec::published(&image_ref, container_port, host_port);
                let container_id = self.create_container(&spec).await?;

                run.advance(RunEvent::Start)?;
                self.start_container(&container_id).await?;
            }
            DeployAction::UpdateClusterService { service_id } => {
                run.advance(RunEvent::Replace)?;
                self.update_service(&service_id, &image_ref).await?;
            }
        }

        run.advance(RunEvent::Complete)?;
        Ok(())
    }

    async fn pull(&self, image_ref: &str) -> Result<(), RedeployError> {
        info!("Pulling new image '{}'", image_ref);

        let result = call(
            "pull",
            self.settings.timeouts.pull,
            self.runtime
                .pull_image(image_ref, self.credentials.as_ref(), self.progress.as_ref()),
            pull_error,
        )
        .await;

        match result {
            Err(RedeployError::Authentication(reason))
                if self.credentials.is_some() && self.settings.allow_anonymous_pull =>
            {
                warn!(
                    "Registry rejected credentials for {} ({}), pulling anonymously",
                    image_ref, reason
                );
                call(
                    "pull",
                    self.settings.timeouts.pull,
                    self.runtime.pull_image(image_ref, None, self.progress.as_ref()),
                    pull_error,
                )
                .await
            }
            result => result,
        }
    }

    async fn resolve_conflicts(
        &self,
        image_ref: &str,
        host_port: u16,
    ) -> Result<(), RedeployError> {
        debug!("Scanning running containers for conflicts");

        let workloads = call(
            "list",
            self.settings.timeouts.call,
            self.runtime.list_running_workloads(),
            |e| RedeployError::ConflictResolution(format!("listing running workloads: {}", e)),
        )
        .await?;

        let conflicts: Vec<Workload> = workloads
            .into_iter()
            .filter(|w| self.settings.conflict_policy.conflicts(w, image_ref, host_port))
            .collect();

        if conflicts.is_empty() {
            debug!("No conflicting containers for port {}", host_port);
            return Ok(());
        }

        for workload in conflicts {
            info!(
                "Container {} ({}) conflicts with port {}, stopping it",
                workload.id, workload.image, host_port
            );
            call(
                "stop",
                self.settings.timeouts.stop,
                self.runtime.stop_workload(&workload.id),
                |e| RedeployError::ConflictResolution(format!("stopping container: {}", e)),
            )
            .await?;
            info!("Stopped {}, port {} is now free", workload.id, host_port);
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RedeployError> {
        info!(
            "Creating container from {} ({}:{} -> {}/tcp)",
            spec.image, spec.host_ip, spec.host_port, spec.container_port
        );

        call(
            "create",
            self.settings.timeouts.call,
            self.runtime.create_container(spec),
            |e| RedeployError::Replace(format!("creating container: {}", e)),
        )
        .await
    }

    async fn start_container(&self, container_id: &str) -> Result<(), RedeployError> {
        info!("Starting container {}", container_id);

        call(
            "start",
            self.settings.timeouts.call,
            self.runtime.start_container(container_id),
            |e| RedeployError::Start(e.to_string()),
        )
        .await
    }

    async fn update_service(&self, service_id: &str, image_ref: &str) -> Result<(), RedeployError> {
        let mut spec = call(
            "inspect",
            self.settings.timeouts.call,
            self.runtime.inspect_service(service_id),
            |e| RedeployError::Replace(format!("inspecting service: {}", e)),
        )
        .await?;

        let version = spec.version;
        let now = Utc::now().timestamp().max(0) as u64;
        spec.image = image_ref.to_string();
        // Must change even when two pushes land in the same second
        spec.force_update = now.max(spec.force_update + 1);

        info!(
            "Updating service {} to {} (version {})",
            service_id, image_ref, version
        );
        call(
            "update",
            self.settings.timeouts.call,
            self.runtime
                .update_service(service_id, version, &spec, self.credentials.as_ref()),
            |e| RedeployError::Replace(format!("updating service: {}", e)),
        )
        .await
    }
}

fn pull_error(err: RuntimeError) -> RedeployError {
    match err {
        RuntimeError::Unauthorized(reason) => RedeployError::Authentication(reason),
        other => RedeployError::Pull(other.to_string()),
    }
}

/// Await a runtime call under a deadline
async fn call<T, F>(
    operation: &'static str,
    deadline: Duration,
    fut: F,
    map_err: fn(RuntimeError) -> RedeployError,
) -> Result<T, RedeployError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(map_err),
        Err(_) => Err(RedeployError::Timeout(format!(
            "{} did not complete within {:?}",
            operation, deadline
        ))),
    }
}
