use crate::models::{Priority, Property};
use std::collections::BTreeMap;

/// An event after enrichment, as it travels through the queues and onto the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedEvent {
    pub(crate) id: String,
    pub(crate) tenant_token: String,
    pub(crate) name: String,
    pub(crate) base_type: String,
    pub(crate) timestamp: i64,
    pub(crate) priority: Priority,
    pub(crate) sequence: u64,
    pub(crate) init_id: String,
    pub(crate) send_attempt: u32,
    pub(crate) properties: BTreeMap<String, Property>,
}

impl EnrichedEvent {
    /// Generated event id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tenant token the event belongs to.
    pub fn tenant_token(&self) -> &str {
        &self.tenant_token
    }

    /// Normalized event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized base type.
    pub fn base_type(&self) -> &str {
        &self.base_type
    }

    /// Event time in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Per-tenant sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Per-tenant init id.
    pub fn init_id(&self) -> &str {
        &self.init_id
    }

    /// Number of times the event was handed to the network.
    pub fn send_attempt(&self) -> u32 {
        self.send_attempt
    }

    /// Properties, including the ones added during enrichment.
    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.properties
    }
}

#[cfg(test)]
pub(crate) fn test_event(tenant_token: &str, name: &str, priority: Priority) -> EnrichedEvent {
    EnrichedEvent {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_token: tenant_token.to_string(),
        name: name.to_string(),
        base_type: "custom".to_string(),
        timestamp: 1_596_665_700_000,
        priority,
        sequence: 1,
        init_id: "init".to_string(),
        send_attempt: 0,
        properties: BTreeMap::new(),
    }
}
