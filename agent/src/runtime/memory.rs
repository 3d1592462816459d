//! In-memory runtime
//!
//! Simulates containers and services without touching a real engine. Backs
//! `--dry-run` and doubles as the runtime in tests, so every call is recorded
//! and individual operations can be told to fail.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::runtime::{
    ContainerSpec, Credentials, ProgressSink, PullProgress, RuntimeError, RuntimeService,
    ServiceSpec, Workload,
};

/// Runtime operation, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Pull,
    List,
    Stop,
    Create,
    Start,
    Inspect,
    Update,
}

/// A recorded runtime call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    /// Image ref, workload id or service id the call was about
    pub subject: String,
    /// Whether credentials were presented (pull and update only)
    pub authenticated: bool,
}

#[derive(Debug, Clone)]
struct SimContainer {
    image: String,
    host_ports: Vec<u16>,
    running: bool,
}

#[derive(Default)]
struct Inner {
    containers: Vec<(String, SimContainer)>,
    services: HashMap<String, ServiceSpec>,
    calls: Vec<Call>,
    failures: HashMap<Operation, RuntimeError>,
    delays: HashMap<Operation, Duration>,
    reject_credentials: bool,
    next_id: u64,
}

/// Simulated runtime service
#[derive(Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a running container, returning its id
    pub fn add_container(&self, image: &str, host_ports: &[u16]) -> String {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("sim-{:04}", inner.next_id);
        inner.containers.push((
            id.clone(),
            SimContainer {
                image: image.to_string(),
                host_ports: host_ports.to_vec(),
                running: true,
            },
        ));
        id
    }

    /// Add a cluster service at version 1
    pub fn add_service(&self, id: &str, image: &str) {
        self.lock().services.insert(
            id.to_string(),
            ServiceSpec {
                id: id.to_string(),
                version: 1,
                image: image.to_string(),
                force_update: 0,
                definition: Default::default(),
            },
        );
    }

    /// Make every call of `operation` fail with `err`
    pub fn fail_on(&self, operation: Operation, err: RuntimeError) {
        self.lock().failures.insert(operation, err);
    }

    /// Delay every call of `operation`
    pub fn delay_on(&self, operation: Operation, delay: Duration) {
        self.lock().delays.insert(operation, delay);
    }

    /// Reject pulls that present credentials
    pub fn reject_credentials(&self) {
        self.lock().reject_credentials = true;
    }

    /// Calls made so far
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls of one operation made so far
    pub fn calls_of(&self, operation: Operation) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    /// Running containers publishing `port`
    pub fn running_on_port(&self, port: u16) -> Vec<Workload> {
        self.lock()
            .containers
            .iter()
            .filter(|(_, c)| c.running && c.host_ports.contains(&port))
            .map(|(id, c)| Workload {
                id: id.clone(),
                image: c.image.clone(),
                host_ports: c.host_ports.clone(),
            })
            .collect()
    }

    /// Current definition of a service
    pub fn service(&self, id: &str) -> Option<ServiceSpec> {
        self.lock().services.get(id).cloned()
    }

    /// Record a call and apply any configured delay or failure
    async fn enter(
        &self,
        operation: Operation,
        subject: &str,
        authenticated: bool,
    ) -> Result<(), RuntimeError> {
        let (delay, failure) = {
            let mut inner = self.lock();
            inner.calls.push(Call {
                operation,
                subject: subject.to_string(),
                authenticated,
            });
            (
                inner.delays.get(&operation).copied(),
                inner.failures.get(&operation).cloned(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RuntimeService for MemoryRuntime {
    async fn pull_image(
        &self,
        image_ref: &str,
        credentials: Option<&Credentials>,
        progress: &dyn ProgressSink,
    ) -> Result<(), RuntimeError> {
        self.enter(Operation::Pull, image_ref, credentials.is_some()).await?;

        if credentials.is_some() && self.lock().reject_credentials {
            return Err(RuntimeError::Unauthorized(
                "incorrect username or password".to_string(),
            ));
        }

        progress.forward(PullProgress {
            image_ref: image_ref.to_string(),
            message: format!("Status: Downloaded newer image for {}", image_ref),
        });
        Ok(())
    }

    async fn list_running_workloads(&self) -> Result<Vec<Workload>, RuntimeError> {
        self.enter(Operation::List, "", false).await?;

        Ok(self
            .lock()
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(id, c)| Workload {
                id: id.clone(),
                image: c.image.clone(),
                host_ports: c.host_ports.clone(),
            })
            .collect())
    }

    async fn stop_workload(&self, id: &str) -> Result<(), RuntimeError> {
        self.enter(Operation::Stop, id, false).await?;

        let mut inner = self.lock();
        match inner.containers.iter_mut().find(|(cid, _)| cid == id) {
            Some((_, container)) => {
                container.running = false;
                info!("[dry-run] stopped container {}", id);
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!("no such container: {}", id))),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.enter(Operation::Create, &spec.image, false).await?;

        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("sim-{:04}", inner.next_id);
        inner.containers.push((
            id.clone(),
            SimContainer {
                image: spec.image.clone(),
                host_ports: vec![spec.host_port],
                running: false,
            },
        ));
        info!(
            "[dry-run] created container {} from {} ({}:{} -> {})",
            id, spec.image, spec.host_ip, spec.host_port, spec.container_port
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.enter(Operation::Start, id, false).await?;

        let mut inner = self.lock();
        let port_taken = {
            let ports = match inner.containers.iter().find(|(cid, _)| cid == id) {
                Some((_, c)) => c.host_ports.clone(),
                None => return Err(RuntimeError::NotFound(format!("no such container: {}", id))),
            };
            inner.containers.iter().any(|(cid, c)| {
                cid != id && c.running && c.host_ports.iter().any(|p| ports.contains(p))
            })
        };
        if port_taken {
            return Err(RuntimeError::Api {
                status: 500,
                message: "port is already allocated".to_string(),
            });
        }

        if let Some((_, container)) = inner.containers.iter_mut().find(|(cid, _)| cid == id) {
            container.running = true;
        }
        info!("[dry-run] started container {}", id);
        Ok(())
    }

    async fn inspect_service(&self, id: &str) -> Result<ServiceSpec, RuntimeError> {
        self.enter(Operation::Inspect, id, false).await?;

        self.lock()
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("service {} not found", id)))
    }

    async fn update_service(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        credentials: Option<&Credentials>,
    ) -> Result<(), RuntimeError> {
        self.enter(Operation::Update, id, credentials.is_some()).await?;

        let mut inner = self.lock();
        let current = inner
            .services
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("service {} not found", id)))?;

        if current.version != version {
            return Err(RuntimeError::VersionConflict(format!(
                "update out of sequence: have {}, got {}",
                current.version, version
            )));
        }

        current.image = spec.image.clone();
        current.force_update = spec.force_update;
        current.version += 1;
        info!("[dry-run] updated service {} to {}", id, spec.image);
        Ok(())
    }
}
