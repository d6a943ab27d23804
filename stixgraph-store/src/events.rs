//! Change notification
//!
//! Publication is fire-and-forget: a notifier never reports failure back to
//! the operation that triggered it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use stixgraph_core::{Principal, StixEntity};

/// Topics change events are published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusTopic {
    StixDomainEntityAdded,
    StixObservableAdded,
}

impl BusTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusTopic::StixDomainEntityAdded => "STIX_DOMAIN_ENTITY_ADDED_TOPIC",
            BusTopic::StixObservableAdded => "STIX_OBSERVABLE_ADDED_TOPIC",
        }
    }
}

impl std::fmt::Display for BusTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub topic: BusTopic,
    pub entity: StixEntity,
    /// Acting principal; system-initiated changes carry none
    pub principal: Option<Principal>,
    pub emitted_at: DateTime<Utc>,
}

impl EntityEvent {
    pub fn new(
        topic: BusTopic,
        entity: StixEntity,
        principal: Option<Principal>,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topic,
            entity,
            principal,
            emitted_at,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: EntityEvent);
}

/// Thread-safe reference to a notifier
pub type SharedNotifier = Arc<dyn Notifier>;

/// Fans events out to in-process subscribers
pub struct BroadcastNotifier {
    sender: broadcast::Sender<EntityEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, event: EntityEvent) {
        let topic = event.topic;
        if self.sender.send(event).is_err() {
            debug!("No subscribers for {}", topic);
        }
    }
}

/// Writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: EntityEvent) {
        info!(
            topic = event.topic.as_str(),
            entity_type = %event.entity.entity_type(),
            entity_id = event.entity.id(),
            principal = event.principal.as_ref().map(|p| p.name.as_str()).unwrap_or("system"),
            "entity event"
        );
    }
}
