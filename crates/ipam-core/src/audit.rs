//! Audit events
//!
//! Every mutating store or allocator operation emits exactly one
//! [`AuditEvent`] to the configured [`AuditSink`]. The core does not persist
//! audit data itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Kind of mutation recorded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    /// Record inserted
    Create,
    /// Attributes replaced
    Update,
    /// Record removed
    Delete,
    /// Address handed out by the allocator
    Allocate,
    /// Address returned to FREE
    Release,
    /// Address held as RESERVED
    Reserve,
    /// Address flagged as CONFLICT
    Conflict,
}

/// One mutation with before/after snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuditEvent {
    pub action: AuditAction,
    /// Table the record lives in, e.g. `ip_addresses`
    pub table_name: String,
    pub record_id: Uuid,
    /// Record before the mutation; `{}` on create
    pub old_values: serde_json::Value,
    /// Record after the mutation; `{}` on delete
    pub new_values: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event from optional before/after records
    pub fn new<T: Serialize>(
        action: AuditAction,
        table_name: &str,
        record_id: Uuid,
        old: Option<&T>,
        new: Option<&T>,
    ) -> Self {
        Self {
            action,
            table_name: table_name.to_string(),
            record_id,
            old_values: snapshot(old),
            new_values: snapshot(new),
            created_at: Utc::now(),
        }
    }
}

fn snapshot<T: Serialize>(record: Option<&T>) -> serde_json::Value {
    record
        .and_then(|r| serde_json::to_value(r).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}

/// Receiver of audit events
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `ipam::audit` tracing target
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait::async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        info!(
            target: "ipam::audit",
            action = ?event.action,
            table = %event.table_name,
            record_id = %event.record_id,
            old = %event.old_values,
            new = %event.new_values,
            "audit"
        );
    }
}

/// Keeps audit events in memory (for tests and embedding)
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events in emission order
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        let id = Uuid::new_v4();
        let before = serde_json::json!({"state": "FREE"});
        let after = serde_json::json!({"state": "ASSIGNED"});

        sink.record(AuditEvent::new(AuditAction::Create, "ip_addresses", id, None, Some(&before)))
            .await;
        sink.record(AuditEvent::new(
            AuditAction::Allocate,
            "ip_addresses",
            id,
            Some(&before),
            Some(&after),
        ))
        .await;

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::Create);
        assert_eq!(events[0].old_values, serde_json::json!({}));
        assert_eq!(events[1].action, AuditAction::Allocate);
        assert_eq!(events[1].new_values["state"], "ASSIGNED");
    }
}
