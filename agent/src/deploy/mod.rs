//! Redeploy engine

pub mod dispatcher;
pub mod fsm;
pub mod matcher;
pub mod notifier;
pub mod orchestrator;
