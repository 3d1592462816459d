//! Deployment target model

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::AgentError;

/// What to do when a target's image is pushed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DeployAction {
    /// Replace a standalone container publishing `container_port` on `host_port`
    RecreateContainer { container_port: u16, host_port: u16 },

    /// Roll the tasks of an existing cluster service
    UpdateClusterService { service_id: String },
}

impl DeployAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            DeployAction::RecreateContainer { .. } => ActionKind::Container,
            DeployAction::UpdateClusterService { .. } => ActionKind::Service,
        }
    }
}

/// Discriminant of [`DeployAction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Container,
    Service,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Container => write!(f, "container"),
            ActionKind::Service => write!(f, "service"),
        }
    }
}

/// Identity of a target within the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub repository: String,
    pub tag: String,
    pub kind: ActionKind,
}

/// A workload this process is allowed to redeploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentTarget {
    pub repository: String,

    /// Empty means any tag
    pub tag: String,

    pub action: DeployAction,
}

impl DeploymentTarget {
    pub fn container(repository: &str, tag: &str, container_port: u16, host_port: u16) -> Self {
        Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
            action: DeployAction::RecreateContainer {
                container_port,
                host_port,
            },
        }
    }

    pub fn service(repository: &str, tag: &str, service_id: &str) -> Self {
        Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
            action: DeployAction::UpdateClusterService {
                service_id: service_id.to_string(),
            },
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey {
            repository: self.repository.clone(),
            tag: self.tag.clone(),
            kind: self.action.kind(),
        }
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.tag.is_empty() { "*" } else { &self.tag };
        match &self.action {
            DeployAction::RecreateContainer {
                container_port,
                host_port,
            } => write!(
                f,
                "{}:{} -> container {}:{}",
                self.repository, tag, host_port, container_port
            ),
            DeployAction::UpdateClusterService { service_id } => {
                write!(f, "{}:{} -> service {}", self.repository, tag, service_id)
            }
        }
    }
}

/// A target as written in the targets file
///
/// Both the snake_case keys and the legacy capitalised keys are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetRecord {
    #[serde(default, alias = "Repository")]
    pub repository: String,

    #[serde(default, alias = "Tag")]
    pub tag: String,

    #[serde(
        default,
        alias = "Containerport",
        alias = "containerPort",
        deserialize_with = "deserialize_port"
    )]
    pub container_port: Option<u16>,

    #[serde(
        default,
        alias = "Hostport",
        alias = "hostPort",
        deserialize_with = "deserialize_port"
    )]
    pub host_port: Option<u16>,

    #[serde(default, alias = "ServiceID", alias = "serviceID", alias = "serviceId")]
    pub service_id: Option<String>,
}

impl TargetRecord {
    /// Validate the record and turn it into a target
    pub fn into_target(self) -> Result<DeploymentTarget, AgentError> {
        let repository = self.repository.trim().to_string();
        if repository.is_empty() {
            return Err(AgentError::ConfigError(
                "target is missing a repository".to_string(),
            ));
        }

        let service_id = self.service_id.filter(|s| !s.trim().is_empty());
        let action = match (self.container_port, self.host_port, service_id) {
            (Some(container_port), Some(host_port), None) => DeployAction::RecreateContainer {
                container_port,
                host_port,
            },
            (None, None, Some(service_id)) => DeployAction::UpdateClusterService { service_id },
            (_, _, Some(_)) => {
                return Err(AgentError::ConfigError(format!(
                    "target {} sets both ports and a service id",
                    repository
                )));
            }
            _ => {
                return Err(AgentError::ConfigError(format!(
                    "target {} needs either container_port and host_port, or service_id",
                    repository
                )));
            }
        };

        Ok(DeploymentTarget {
            repository,
            tag: self.tag.trim().to_string(),
            action,
        })
    }
}

/// Ports are accepted as numbers or as decimal strings
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPort {
        Number(u64),
        Text(String),
    }

    let raw = Option::<RawPort>::deserialize(deserializer)?;
    let value = match raw {
        None => return Ok(None),
        Some(RawPort::Number(n)) => n,
        Some(RawPort::Text(s)) if s.trim().is_empty() => return Ok(None),
        Some(RawPort::Text(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {:?}", s)))?,
    };

    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(Some(port)),
        _ => Err(serde::de::Error::custom(format!(
            "port out of range: {}",
            value
        ))),
    }
}
