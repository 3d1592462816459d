//! Redeploy run records

use chrono::{DateTime, Utc};

use crate::deploy::fsm::{RunEvent, RunFsm, RunState};
use crate::errors::RedeployError;
use crate::targets::DeploymentTarget;
use crate::utils::generate_uuid;

/// One execution of the redeploy state machine for one matched target
#[derive(Debug, Clone)]
pub struct RedeployRun {
    pub id: String,
    pub target: DeploymentTarget,
    pub image_ref: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    fsm: RunFsm,
}

impl RedeployRun {
    pub fn new(target: DeploymentTarget, image_ref: String) -> Self {
        let fsm = RunFsm::new(target.action.kind());
        Self {
            id: generate_uuid(),
            target,
            image_ref,
            started_at: Utc::now(),
            finished_at: None,
            fsm,
        }
    }

    pub fn state(&self) -> RunState {
        self.fsm.state()
    }

    pub fn history(&self) -> &[RunState] {
        self.fsm.history()
    }

    pub fn error(&self) -> Option<&RedeployError> {
        self.fsm.error()
    }

    /// Apply an event, stamping the finish time on terminal states
    pub fn advance(&mut self, event: RunEvent) -> Result<RunState, RedeployError> {
        let state = self.fsm.process(event)?;
        if state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(state)
    }

    /// Move the run to `Failed`
    pub fn fail(&mut self, err: RedeployError) {
        // Only rejected when already terminal, which leaves the outcome as is
        let _ = self.advance(RunEvent::Fail(err));
    }

    pub fn report(&self, attempts: u32) -> RunReport {
        RunReport {
            run_id: self.id.clone(),
            target: self.target.clone(),
            image_ref: self.image_ref.clone(),
            state: self.state(),
            history: self.history().to_vec(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error().cloned(),
            attempts,
        }
    }
}

/// Terminal summary of a run, handed back through the dispatch channel
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub target: DeploymentTarget,
    pub image_ref: String,
    pub state: RunState,
    pub history: Vec<RunState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<RedeployError>,
    pub attempts: u32,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }
}
