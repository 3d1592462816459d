//! Finite State Machine for a redeploy run

use serde::{Deserialize, Serialize};

use crate::errors::RedeployError;
use crate::targets::ActionKind;

/// Run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, nothing done yet
    Pending,

    /// Pulling the new image
    Pulling,

    /// Stopping workloads that hold the target's port
    ResolvingConflict,

    /// Creating the container or updating the service
    Replacing,

    /// Starting the new container
    Starting,

    /// Replacement accepted by the runtime
    Succeeded,

    /// Run failed
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

/// Run event
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Begin pulling the image
    Pull,

    /// Image pulled, scan for conflicting workloads
    ScanConflicts,

    /// Create the replacement workload
    Replace,

    /// Start the created container
    Start,

    /// Runtime accepted the replacement
    Complete,

    /// A step failed
    Fail(RedeployError),
}

/// Redeploy FSM
///
/// Container runs go through every state; service runs skip conflict
/// resolution and starting because the service update rolls the tasks itself.
#[derive(Debug, Clone)]
pub struct RunFsm {
    kind: ActionKind,
    state: RunState,
    history: Vec<RunState>,
    error: Option<RedeployError>,
}

impl RunFsm {
    /// Create a new FSM in pending state
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            state: RunState::Pending,
            history: vec![RunState::Pending],
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Get error if any
    pub fn error(&self) -> Option<&RedeployError> {
        self.error.as_ref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: RunEvent) -> Result<RunState, RedeployError> {
        let new_state = match (self.kind, self.state, event) {
            (_, RunState::Pending, RunEvent::Pull) => RunState::Pulling,

            (ActionKind::Container, RunState::Pulling, RunEvent::ScanConflicts) => {
                RunState::ResolvingConflict
            }
            (ActionKind::Container, RunState::ResolvingConflict, RunEvent::Replace) => {
                RunState::Replacing
            }
            (ActionKind::Container, RunState::Replacing, RunEvent::Start) => RunState::Starting,
            (ActionKind::Container, RunState::Starting, RunEvent::Complete) => RunState::Succeeded,

            (ActionKind::Service, RunState::Pulling, RunEvent::Replace) => RunState::Replacing,
            (ActionKind::Service, RunState::Replacing, RunEvent::Complete) => RunState::Succeeded,

            (_, state, RunEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err);
                RunState::Failed
            }

            // Invalid transitions
            (kind, state, event) => {
                return Err(RedeployError::InvalidTransition(format!(
                    "{:?} run cannot handle {:?} in state {:?}",
                    kind, event, state
                )));
            }
        };

        self.state = new_state;
        self.history.push(new_state);
        Ok(new_state)
    }
}
