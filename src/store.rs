//! Channel lookups against the external conversation store.
//!
//! Channels are fetched on demand and never cached beyond a single
//! authorization check — ownership can change out-of-band between requests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A conversation channel as the gateway sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub owner_user_id: String,
    pub organization_id: String,
}

/// Abstraction over the external conversation store.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get_channel(&self, channel_id: &str) -> Result<Channel, StoreError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Store client fetching channels over HTTP.
#[derive(Clone)]
pub struct HttpChannelStore {
    base_url: String,
    http: reqwest::Client,
}

impl HttpChannelStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelStore for HttpChannelStore {
    async fn get_channel(&self, channel_id: &str) -> Result<Channel, StoreError> {
        let url = format!("{}/api/v1/channels/{}", self.base_url, channel_id);

        let resp = self.http.get(&url).send().await.map_err(|e| {
            tracing::error!(?e, "conversation store request failed");
            StoreError::Unavailable
        })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }
        if !resp.status().is_success() {
            tracing::error!(status = %resp.status(), "conversation store returned an error");
            return Err(StoreError::Unavailable);
        }

        resp.json::<Channel>().await.map_err(|e| {
            tracing::error!(?e, "conversation store response parse failed");
            StoreError::Unavailable
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests / local development)
// ---------------------------------------------------------------------------

/// Store backed by an in-memory map.
pub struct MemoryChannelStore {
    channels: Mutex<HashMap<String, Channel>>,
}

impl MemoryChannelStore {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, channel: Channel) {
        self.channels
            .lock()
            .insert(channel.channel_id.clone(), channel);
    }

    pub fn remove(&self, channel_id: &str) {
        self.channels.lock().remove(channel_id);
    }
}

impl Default for MemoryChannelStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn get_channel(&self, channel_id: &str) -> Result<Channel, StoreError> {
        self.channels
            .lock()
            .get(channel_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}
