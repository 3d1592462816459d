//! Callback notification to the event source

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::errors::{AgentError, RedeployError};

/// Which run outcome triggers the callback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyOn {
    #[default]
    Success,
    Failure,
}

/// Acknowledges a push to the system that sent it
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn notify(&self, callback_url: &str) -> Result<(), RedeployError>;
}

/// Sends a GET to the callback URL
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackNotifier for HttpNotifier {
    async fn notify(&self, callback_url: &str) -> Result<(), RedeployError> {
        let url = Url::parse(callback_url)
            .map_err(|e| RedeployError::Notify(format!("invalid callback url: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RedeployError::Notify(format!(
                "unsupported callback scheme: {}",
                url.scheme()
            )));
        }

        debug!("GET {} (callback)", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RedeployError::Notify(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RedeployError::Notify(format!(
                "callback returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
