//! Deployment targets and the registry holding them

pub mod registry;
pub mod target;

pub use registry::TargetRegistry;
pub use target::{ActionKind, DeployAction, DeploymentTarget, TargetKey, TargetRecord};
