//! Server state

use std::sync::Arc;

use crate::deploy::dispatcher::Dispatcher;

/// Server state shared across handlers
pub struct ServerState {
    pub dispatcher: Arc<Dispatcher>,

    /// Expected path segment of `/webhooks/{token}`
    pub webhook_token: String,
}

impl ServerState {
    pub fn new(dispatcher: Arc<Dispatcher>, webhook_token: String) -> Self {
        Self {
            dispatcher,
            webhook_token,
        }
    }
}
