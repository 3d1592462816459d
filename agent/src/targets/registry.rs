//! Target registry

use std::collections::HashSet;

use tracing::{debug, info};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::targets::target::{DeploymentTarget, TargetRecord};

/// The configured set of deployment targets
///
/// Built once at startup and never mutated afterwards; share it behind an
/// `Arc`.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<DeploymentTarget>,
}

impl TargetRegistry {
    /// Load the registry from a JSON targets file
    pub async fn load(file: &File) -> Result<Self, AgentError> {
        info!("Loading deployment targets from {}", file.path().display());

        let contents = file.read_string().await.map_err(|e| {
            AgentError::ConfigError(format!(
                "unable to read targets file {}: {}",
                file.path().display(),
                e
            ))
        })?;

        let registry = Self::parse(&contents)?;
        info!("Loaded {} deployment target(s)", registry.len());
        Ok(registry)
    }

    /// Parse a JSON array of target records
    pub fn parse(contents: &str) -> Result<Self, AgentError> {
        let records: Vec<TargetRecord> = serde_json::from_str(contents)
            .map_err(|e| AgentError::ConfigError(format!("malformed targets file: {}", e)))?;

        let targets = records
            .into_iter()
            .map(TargetRecord::into_target)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(targets)
    }

    /// Build a registry, rejecting ambiguous targets
    pub fn new(targets: Vec<DeploymentTarget>) -> Result<Self, AgentError> {
        let mut seen = HashSet::new();
        for target in &targets {
            if !seen.insert(target.key()) {
                return Err(AgentError::ConfigError(format!(
                    "duplicate deployment target: {} (tag {:?}, {})",
                    target.repository,
                    target.tag,
                    target.action.kind()
                )));
            }
            debug!("Registered target: {}", target);
        }

        Ok(Self { targets })
    }

    /// All targets in configuration order
    pub fn all(&self) -> &[DeploymentTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
