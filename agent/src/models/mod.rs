//! Data models

pub mod event;
pub mod run;
