//! Intents: locally submitted operations awaiting confirmation
//!
//! An [`Intent`] wraps a [`BoardOp`] with a ULID. It is applied to the
//! displayed state immediately, sent to peers, and tracked by the
//! [`IntentReconciler`] until the authoritative state confirms, rejects or
//! outgrows it.
//!
//! ```text
//! Pending ──ack ok──────────────▶ Acknowledged
//!    │    ──ack error───────────▶ Rejected
//!    │    ──retry window spent──▶ Rejected (+ ReconcileFailure)
//!    └────reflected / invalid───▶ Superseded
//! ```

pub mod expectation;
pub mod reconciler;

pub use expectation::Expectation;
pub use reconciler::{IntentReconciler, ReconcileFailure};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ops::BoardOp;
use crate::types::IntentId;

/// A locally submitted operation
///
/// Wire shape: `{"id": "...", "type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    #[serde(flatten)]
    pub op: BoardOp,
}

impl Intent {
    pub fn new(op: BoardOp) -> Self {
        Self {
            id: IntentId::new(),
            op,
        }
    }
}

/// Lifecycle of an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentStatus {
    /// Applied optimistically, awaiting confirmation
    Pending,
    /// Confirmed; the authoritative state carries it
    Acknowledged,
    /// Refused, or gave up on after the retry window
    Rejected,
    /// Already reflected in, or invalidated by, a newer authoritative state
    Superseded,
}

impl IntentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, IntentStatus::Pending)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentStatus::Pending => write!(f, "pending"),
            IntentStatus::Acknowledged => write!(f, "acknowledged"),
            IntentStatus::Rejected => write!(f, "rejected"),
            IntentStatus::Superseded => write!(f, "superseded"),
        }
    }
}
