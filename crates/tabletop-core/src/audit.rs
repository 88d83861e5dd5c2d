//! Audit trail of gateway operations
//!
//! Every semantic operation, allowed or not, leaves one [`AuditEntry`]. The
//! log is a bounded ring held in memory; each entry is also emitted as a
//! `tracing` event so the JSONL log layer captures it on disk.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{PlayerId, RoomId};

/// How an audited operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditOutcome {
    /// Written into the room document
    Committed,
    /// No ready session; applied to the local optimistic copy
    AppliedLocally,
    Denied,
    /// Allowed but failed validation (bad permutation, unknown card, ...)
    Rejected,
}

/// One audited operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub room_id: RoomId,
    pub actor: PlayerId,
    pub operation: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Affected record before the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// Affected record after the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
}

/// Bounded in-memory audit log; the oldest entries fall off first
#[derive(Debug, Clone)]
pub struct AuditLog {
    entries: VecDeque<AuditEntry>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry and emit it as a tracing event
    pub fn record(&mut self, entry: AuditEntry) {
        match entry.outcome {
            AuditOutcome::Denied | AuditOutcome::Rejected => warn!(
                room_id = %entry.room_id,
                actor = %entry.actor,
                operation = %entry.operation,
                outcome = ?entry.outcome,
                reason = entry.reason.as_deref().unwrap_or(""),
                "Operation dropped"
            ),
            AuditOutcome::Committed | AuditOutcome::AppliedLocally => info!(
                room_id = %entry.room_id,
                actor = %entry.actor,
                operation = %entry.operation,
                outcome = ?entry.outcome,
                "Operation applied"
            ),
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&AuditEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with the given outcome, oldest first
    pub fn with_outcome(&self, outcome: AuditOutcome) -> Vec<&AuditEntry> {
        self.entries.iter().filter(|e| e.outcome == outcome).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
