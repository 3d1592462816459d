//! Inbound push notifications

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Registry webhook body
///
/// Only the fields the redeploy engine needs are modelled; anything else in
/// the payload is ignored and every field is optional so that a partial body
/// still parses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub callback_url: Option<String>,

    #[serde(default)]
    pub push_data: Option<PushData>,

    #[serde(default)]
    pub repository: Option<RepositoryData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushData {
    #[serde(default)]
    pub tag: Option<String>,

    /// Unix seconds
    #[serde(default)]
    pub pushed_at: Option<i64>,

    #[serde(default)]
    pub pusher: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryData {
    #[serde(default)]
    pub repo_name: Option<String>,
}

/// A validated push notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushEvent {
    pub repository_name: String,
    pub tag: String,
    pub pushed_at: DateTime<Utc>,
    pub callback_url: Option<String>,
}

impl PushEvent {
    pub fn new(repository_name: &str, tag: &str) -> Self {
        Self {
            repository_name: repository_name.to_string(),
            tag: tag.to_string(),
            pushed_at: Utc::now(),
            callback_url: None,
        }
    }

    pub fn with_callback(mut self, callback_url: &str) -> Self {
        self.callback_url = Some(callback_url.to_string());
        self
    }

    /// Validate a payload, returning `None` when a required field is missing
    pub fn from_payload(payload: WebhookPayload) -> Option<Self> {
        let repository_name = payload
            .repository
            .and_then(|r| r.repo_name)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())?;

        let push_data = payload.push_data?;
        let tag = push_data.tag?.trim().to_string();

        let pushed_at = push_data
            .pushed_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        let callback_url = payload
            .callback_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        Some(Self {
            repository_name,
            tag,
            pushed_at,
            callback_url,
        })
    }

    /// Parse a raw webhook body
    pub fn from_body(body: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        let payload: WebhookPayload = serde_json::from_slice(body)?;
        Ok(Self::from_payload(payload))
    }

    /// Image reference to deploy for a target repository
    pub fn image_ref(&self, repository: &str) -> String {
        let tag = if self.tag.is_empty() { "latest" } else { &self.tag };
        format!("{}:{}", repository, tag)
    }
}
