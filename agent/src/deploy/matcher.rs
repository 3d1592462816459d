//! Matching push events to deployment targets

use crate::models::event::PushEvent;
use crate::targets::{DeploymentTarget, TargetRegistry};

/// Whether `target` should be redeployed for `event`
///
/// The repository must match exactly; a target with an empty tag accepts any
/// tag, otherwise the tags must match exactly.
pub fn matches(event: &PushEvent, target: &DeploymentTarget) -> bool {
    event.repository_name == target.repository
        && (target.tag.is_empty() || event.tag == target.tag)
}

/// Targets that apply to `event`, in registry order
pub fn match_targets<'a>(
    event: &PushEvent,
    registry: &'a TargetRegistry,
) -> Vec<&'a DeploymentTarget> {
    registry
        .all()
        .iter()
        .filter(|target| matches(event, target))
        .collect()
}
