//! servicesync library
//!
//! Receives image registry push webhooks and redeploys the matching
//! containers or cluster services.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod targets;
pub mod utils;
