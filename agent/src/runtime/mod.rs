//! Container runtime boundary
//!
//! The redeploy engine drives workloads only through [`RuntimeService`].
//! [`docker::DockerEngine`] talks to a Docker Engine through bollard and
//! [`memory::MemoryRuntime`] simulates one for dry runs and tests.

pub mod docker;
pub mod memory;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Error reported by a runtime call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Registry credentials were rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Stale object version on update
    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("runtime API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Registry credentials presented on pull
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    pub server_address: Option<String>,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
            server_address: None,
        }
    }
}

/// A running workload as seen by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workload {
    pub id: String,
    pub image: String,
    /// Host ports this workload publishes
    pub host_ports: Vec<u16>,
}

/// Definition of a container to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    pub image: String,
    pub container_port: u16,
    pub host_port: u16,
    pub host_ip: String,
}

impl ContainerSpec {
    /// Publish `container_port/tcp` on all interfaces
    pub fn published(image: &str, container_port: u16, host_port: u16) -> Self {
        Self {
            image: image.to_string(),
            container_port,
            host_port,
            host_ip: "0.0.0.0".to_string(),
        }
    }
}

/// Current definition of a cluster service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub id: String,
    /// Object version to present on update
    pub version: u64,
    pub image: String,
    /// Bumped to force the orchestrator to roll tasks
    pub force_update: u64,
    /// Full engine definition, carried through to the update
    pub definition: bollard::models::ServiceSpec,
}

/// One line of image pull progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullProgress {
    pub image_ref: String,
    pub message: String,
}

/// Receives pull progress as it streams in
pub trait ProgressSink: Send + Sync {
    fn forward(&self, progress: PullProgress);
}

/// Writes pull progress to the debug log
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn forward(&self, progress: PullProgress) {
        debug!(image = %progress.image_ref, "{}", progress.message);
    }
}

/// Capabilities of the container runtime the redeploy engine depends on
#[async_trait]
pub trait RuntimeService: Send + Sync {
    /// Pull an image, streaming progress into `progress`
    async fn pull_image(
        &self,
        image_ref: &str,
        credentials: Option<&Credentials>,
        progress: &dyn ProgressSink,
    ) -> Result<(), RuntimeError>;

    /// List running containers
    async fn list_running_workloads(&self) -> Result<Vec<Workload>, RuntimeError>;

    /// Stop a workload with the runtime's default grace period
    async fn stop_workload(&self, id: &str) -> Result<(), RuntimeError>;

    /// Create a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Start a created container
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Fetch a service's current definition
    async fn inspect_service(&self, id: &str) -> Result<ServiceSpec, RuntimeError>;

    /// Replace a service's definition, guarded by `version`
    async fn update_service(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        credentials: Option<&Credentials>,
    ) -> Result<(), RuntimeError>;
}
