//! FSM unit tests

use servicesync::deploy::fsm::{RunEvent, RunFsm, RunState};
use servicesync::errors::RedeployError;
use servicesync::targets::ActionKind;

#[test]
fn test_fsm_initial_state() {
    let fsm = RunFsm::new(ActionKind::Container);
    assert_eq!(fsm.state(), RunState::Pending);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.history(), &[RunState::Pending]);
}

#[test]
fn test_fsm_container_success_flow() {
    let mut fsm = RunFsm::new(ActionKind::Container);

    fsm.process(RunEvent::Pull).unwrap();
    fsm.process(RunEvent::ScanConflicts).unwrap();
    fsm.process(RunEvent::Replace).unwrap();
    fsm.process(RunEvent::Start).unwrap();
    fsm.process(RunEvent::Complete).unwrap();

    assert_eq!(
        fsm.history(),
        &[
            RunState::Pending,
            RunState::Pulling,
            RunState::ResolvingConflict,
            RunState::Replacing,
            RunState::Starting,
            RunState::Succeeded,
        ]
    );
}

#[test]
fn test_fsm_service_skips_conflicts_and_start() {
    let mut fsm = RunFsm::new(ActionKind::Service);

    fsm.process(RunEvent::Pull).unwrap();
    assert!(fsm.process(RunEvent::ScanConflicts).is_err());
    fsm.process(RunEvent::Replace).unwrap();
    assert!(fsm.process(RunEvent::Start).is_err());
    fsm.process(RunEvent::Complete).unwrap();

    assert_eq!(
        fsm.history(),
        &[
            RunState::Pending,
            RunState::Pulling,
            RunState::Replacing,
            RunState::Succeeded,
        ]
    );
}

#[test]
fn test_fsm_failure_records_error() {
    let mut fsm = RunFsm::new(ActionKind::Container);

    fsm.process(RunEvent::Pull).unwrap();
    fsm.process(RunEvent::Fail(RedeployError::Pull("manifest unknown".to_string())))
        .unwrap();

    assert_eq!(fsm.state(), RunState::Failed);
    assert_eq!(
        fsm.error(),
        Some(&RedeployError::Pull("manifest unknown".to_string()))
    );
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let mut fsm = RunFsm::new(ActionKind::Service);
    fsm.process(RunEvent::Pull).unwrap();
    fsm.process(RunEvent::Fail(RedeployError::Timeout("pull".to_string())))
        .unwrap();

    let err = fsm
        .process(RunEvent::Fail(RedeployError::Replace("late".to_string())))
        .unwrap_err();
    assert!(matches!(err, RedeployError::InvalidTransition(_)));
    assert!(fsm.process(RunEvent::Pull).is_err());
    assert_eq!(fsm.error(), Some(&RedeployError::Timeout("pull".to_string())));
}

#[test]
fn test_fsm_cannot_skip_pull() {
    let mut fsm = RunFsm::new(ActionKind::Container);
    assert!(fsm.process(RunEvent::ScanConflicts).is_err());
    assert!(fsm.process(RunEvent::Complete).is_err());
    assert_eq!(fsm.state(), RunState::Pending);
}
