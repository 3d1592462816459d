//! Docker Engine runtime backed by bollard

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{CreateImageInfo, HostConfig, PortBinding, TaskSpec, TaskSpecContainerSpec};
use bollard::service::{InspectServiceOptions, UpdateServiceOptions};
use bollard::{ClientVersion, Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use secrecy::ExposeSecret;
use tracing::{debug, error};

use crate::errors::AgentError;
use crate::runtime::{
    ContainerSpec, Credentials, ProgressSink, PullProgress, RuntimeError, RuntimeService,
    ServiceSpec, Workload,
};

/// Docker Engine client options
#[derive(Debug, Clone)]
pub struct DockerOptions {
    /// Engine endpoint (`unix://`, `tcp://` or `http://`). `None` uses
    /// `DOCKER_HOST` or the local socket.
    pub endpoint: Option<String>,

    /// Pin the API version, such as `1.43`
    pub api_version: Option<String>,

    /// Platform requested on pull
    pub platform: Option<String>,

    /// Upper bound for a single engine request
    pub request_timeout: Duration,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_version: None,
            platform: None,
            request_timeout: Duration::from_secs(600),
        }
    }
}

/// Runtime service backed by a Docker Engine
pub struct DockerEngine {
    docker: Docker,
    platform: Option<String>,
}

impl DockerEngine {
    /// Create a new engine client. No connection is made until the first call.
    pub fn new(options: &DockerOptions) -> Result<Self, AgentError> {
        let version = match options.api_version.as_deref() {
            Some(version) if !version.is_empty() => parse_api_version(version).ok_or_else(|| {
                AgentError::ConfigError(format!("invalid Docker API version {:?}", version))
            })?,
            _ => API_DEFAULT_VERSION.clone(),
        };
        let docker = connect(options, &version).map_err(|e| {
            AgentError::ConfigError(format!("unable to set up Docker client: {}", e))
        })?;

        Ok(Self {
            docker,
            platform: options.platform.clone(),
        })
    }
}

fn connect(options: &DockerOptions, version: &ClientVersion) -> Result<Docker, DockerError> {
    let timeout = options.request_timeout.as_secs();

    match options.endpoint.as_deref().map(str::trim) {
        None | Some("") => Docker::connect_with_defaults()
            .map(|docker| docker.with_timeout(options.request_timeout)),
        #[cfg(unix)]
        Some(endpoint) if endpoint.starts_with("unix://") => {
            Docker::connect_with_unix(endpoint, timeout, version)
        }
        Some(endpoint) => Docker::connect_with_http(endpoint, timeout, version),
    }
}

fn parse_api_version(version: &str) -> Option<ClientVersion> {
    let (major, minor) = version.trim_start_matches('v').split_once('.')?;
    Some(ClientVersion {
        major_version: major.parse().ok()?,
        minor_version: minor.parse().ok()?,
    })
}

/// Split `repo:tag` without mistaking a registry port for a tag
pub fn split_image_ref(image_ref: &str) -> (&str, &str) {
    match image_ref.rfind(':') {
        Some(idx) if !image_ref[idx + 1..].contains('/') => {
            (&image_ref[..idx], &image_ref[idx + 1..])
        }
        _ => (image_ref, "latest"),
    }
}

/// Registry auth sent with pulls and service updates
pub fn docker_credentials(credentials: &Credentials) -> DockerCredentials {
    DockerCredentials {
        username: Some(credentials.username.clone()),
        password: Some(credentials.password.expose_secret().to_string()),
        serveraddress: credentials.server_address.clone(),
        ..Default::default()
    }
}

/// Container config publishing `container_port/tcp` on `host_ip:host_port`
pub fn container_config(spec: &ContainerSpec) -> Config<String> {
    let port = format!("{}/tcp", spec.container_port);
    let binding = PortBinding {
        host_ip: Some(spec.host_ip.clone()),
        host_port: Some(spec.host_port.to_string()),
    };

    Config {
        image: Some(spec.image.clone()),
        exposed_ports: Some(HashMap::from([(port.clone(), HashMap::new())])),
        host_config: Some(HostConfig {
            port_bindings: Some(HashMap::from([(port, Some(vec![binding]))])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service definition with the new image and force-update counter applied
pub fn service_update(spec: &ServiceSpec) -> bollard::models::ServiceSpec {
    let mut definition = spec.definition.clone();
    let task_template = definition.task_template.get_or_insert_with(TaskSpec::default);
    task_template
        .container_spec
        .get_or_insert_with(TaskSpecContainerSpec::default)
        .image = Some(spec.image.clone());
    task_template.force_update = Some(i64::try_from(spec.force_update).unwrap_or(i64::MAX));
    definition
}

/// Update options presenting the service's object version
pub fn update_options(version: u64) -> UpdateServiceOptions {
    UpdateServiceOptions {
        version,
        ..Default::default()
    }
}

fn is_auth_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("unauthorized")
        || message.contains("authentication required")
        || message.contains("access denied")
        || message.contains("incorrect username or password")
}

/// Map a bollard error onto a runtime error
pub fn map_docker_error(err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError { status_code, message } => match status_code {
            401 | 403 => RuntimeError::Unauthorized(message),
            404 => RuntimeError::NotFound(message),
            _ if message.contains("out of sequence") => RuntimeError::VersionConflict(message),
            _ if is_auth_failure(&message) => RuntimeError::Unauthorized(message),
            status => RuntimeError::Api { status, message },
        },
        DockerError::DockerStreamError { error } if is_auth_failure(&error) => {
            RuntimeError::Unauthorized(error)
        }
        DockerError::DockerStreamError { error } => RuntimeError::Api {
            status: 200,
            message: error,
        },
        other => RuntimeError::Transport(other.to_string()),
    }
}

fn log_failure(operation: &str, err: DockerError) -> RuntimeError {
    error!("Docker {} failed: {}", operation, err);
    map_docker_error(err)
}

/// Forward one pull status to the sink. Errors can arrive mid-stream.
fn forward_info(
    info: CreateImageInfo,
    image_ref: &str,
    progress: &dyn ProgressSink,
) -> Result<(), RuntimeError> {
    if let Some(error) = info.error {
        return Err(map_docker_error(DockerError::DockerStreamError { error }));
    }

    let message = [info.id, info.status, info.progress]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if !message.is_empty() {
        progress.forward(PullProgress {
            image_ref: image_ref.to_string(),
            message,
        });
    }
    Ok(())
}

/// Stop and start answer 304 when the container is already in that state
fn accept_not_modified(result: Result<(), DockerError>) -> Result<(), DockerError> {
    match result {
        Err(DockerError::DockerResponseServerError { status_code: 304, .. }) => Ok(()),
        other => other,
    }
}

#[async_trait]
impl RuntimeService for DockerEngine {
    async fn pull_image(
        &self,
        image_ref: &str,
        credentials: Option<&Credentials>,
        progress: &dyn ProgressSink,
    ) -> Result<(), RuntimeError> {
        let (repository, tag) = split_image_ref(image_ref);
        debug!("Creating image {}", image_ref);

        let options = CreateImageOptions {
            from_image: repository,
            tag,
            platform: self.platform.as_deref().unwrap_or_default(),
            ..Default::default()
        };
        let mut stream = self
            .docker
            .create_image(Some(options), None, credentials.map(docker_credentials));

        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| log_failure("image pull", e))?;
            forward_info(info, image_ref, progress)?;
        }
        Ok(())
    }

    async fn list_running_workloads(&self) -> Result<Vec<Workload>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| log_failure("container list", e))?;

        Ok(containers
            .into_iter()
            .map(|c| Workload {
                id: c.id.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                host_ports: c
                    .ports
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|p| p.public_port)
                    .collect(),
            })
            .collect())
    }

    async fn stop_workload(&self, id: &str) -> Result<(), RuntimeError> {
        debug!("Stopping container {}", id);
        let result = self.docker.stop_container(id, None::<StopContainerOptions>).await;
        accept_not_modified(result).map_err(|e| log_failure("container stop", e))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        debug!("Creating container from {}", spec.image);
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, container_config(spec))
            .await
            .map_err(|e| log_failure("container create", e))?;

        for warning in created.warnings {
            debug!("Container create warning: {}", warning);
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        debug!("Starting container {}", id);
        let result = self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await;
        accept_not_modified(result).map_err(|e| log_failure("container start", e))
    }

    async fn inspect_service(&self, id: &str) -> Result<ServiceSpec, RuntimeError> {
        let service = self
            .docker
            .inspect_service(id, None::<InspectServiceOptions>)
            .await
            .map_err(|e| log_failure("service inspect", e))?;

        let version = service.version.and_then(|v| v.index).ok_or_else(|| {
            RuntimeError::Transport(format!("service {} has no version index", id))
        })?;
        let definition = service.spec.unwrap_or_default();
        let task_template = definition.task_template.as_ref();

        Ok(ServiceSpec {
            id: service.id.unwrap_or_else(|| id.to_string()),
            version,
            image: task_template
                .and_then(|t| t.container_spec.as_ref())
                .and_then(|c| c.image.clone())
                .unwrap_or_default(),
            force_update: task_template
                .and_then(|t| t.force_update)
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or(0),
            definition,
        })
    }

    async fn update_service(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        credentials: Option<&Credentials>,
    ) -> Result<(), RuntimeError> {
        debug!("Updating service {} at version {}", id, version);
        let response = self
            .docker
            .update_service(
                id,
                service_update(spec),
                update_options(version),
                credentials.map(docker_credentials),
            )
            .await
            .map_err(|e| log_failure("service update", e))?;

        for warning in response.warnings.unwrap_or_default() {
            debug!("Service update warning: {}", warning);
        }
        Ok(())
    }
}
