use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::{ApiError, ChannelError};
use crate::core::{ChangeKind, Session};

/// Request/response side of the backend
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Full session list of a tenant, in backend order
    async fn list_sessions(&self, tenant_id: &str) -> Result<Vec<Session>, ApiError>;
}

/// Push side of the backend
#[async_trait]
pub trait ChangeChannel: Send + Sync {
    async fn subscribe(
        &self,
        tenant_id: &str,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, ChannelError>;

    /// Unknown or already removed handles are ignored
    async fn unsubscribe(&self, handle: SubscriptionHandle);
}

pub type EventSink = mpsc::UnboundedSender<ChangeEvent>;

/// Something relevant to a tenant's sessions changed.
///
/// The feed never inspects these fields; they exist for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub received_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(table: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            table: table.into(),
            kind,
            received_at: Utc::now(),
        }
    }

    pub fn resync() -> Self {
        Self::new("*", ChangeKind::Resync)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel that accepts subscriptions and never delivers events.
/// Sinks stay open until unsubscribed, so the stream never ends on its own.
#[derive(Debug, Default)]
pub struct NullChannel {
    sinks: Mutex<HashMap<SubscriptionHandle, EventSink>>,
}

#[async_trait]
impl ChangeChannel for NullChannel {
    async fn subscribe(
        &self,
        _tenant_id: &str,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, ChannelError> {
        let handle = SubscriptionHandle::new();
        self.sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(handle, sink);
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&handle);
    }
}
