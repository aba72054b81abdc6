//! Audit event log.
//!
//! Every security decision and task start is emitted here. Records go to
//! the `audit` tracing target, are counted for `/metrics`, and are
//! broadcast to any subscribers.

use std::collections::HashMap;
use std::sync::Mutex;

use chatrun_core::{AuditRecord, Event};
use tokio::sync::broadcast;
use tracing::info;

use crate::state::lock;

const AUDIT_CHANNEL_CAPACITY: usize = 256;

/// Counts and fans out audit records.
pub struct EventLog {
    counts: Mutex<HashMap<Event, u64>>,
    tx: broadcast::Sender<AuditRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(AUDIT_CHANNEL_CAPACITY);
        Self {
            counts: Mutex::new(HashMap::new()),
            tx,
        }
    }

    /// Record an audit event.
    pub fn emit(&self, record: AuditRecord) {
        info!(
            target: "audit",
            event = %record.event,
            task = %record.task,
            user = %record.user,
            channel = %record.channel,
            "{}",
            record.message
        );
        *lock(&self.counts).entry(record.event).or_insert(0) += 1;
        // No subscribers is fine.
        let _ = self.tx.send(record);
    }

    /// Number of times `event` has been emitted.
    pub fn count(&self, event: Event) -> u64 {
        lock(&self.counts).get(&event).copied().unwrap_or(0)
    }

    /// Per-event counts, in `Event::ALL` order.
    pub fn snapshot(&self) -> Vec<(Event, u64)> {
        let counts = lock(&self.counts);
        Event::ALL
            .iter()
            .map(|e| (*e, counts.get(e).copied().unwrap_or(0)))
            .collect()
    }

    /// Receive every record emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.tx.subscribe()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
