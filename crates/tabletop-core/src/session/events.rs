//! Session status and lifecycle events
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SessionStatus: per-room readiness                              │
//! │  ├── Hydrating: waiting for the first full document from peers  │
//! │  └── Ready: mutations run immediately                           │
//! │                                                                 │
//! │  SessionEvent: notifications about session activity             │
//! │  ├── Created / Released / Destroyed                             │
//! │  ├── Committed: a local transaction closed                      │
//! │  ├── RemoteChanged: peer changes were merged                    │
//! │  ├── HostReassigned / MutationDropped                           │
//! │  └── MutationRejected: a write failed inside the transaction    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::types::{PlayerId, RoomId};

/// Readiness of a room session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    /// A network provider is attached but the document has not synced yet
    Hydrating,
    /// Mutations may run against the document
    #[default]
    Ready,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Hydrating => write!(f, "Hydrating"),
            SessionStatus::Ready => write!(f, "Ready"),
        }
    }
}

/// Events emitted by the session registry
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A document was created on first acquire
    Created { room_id: RoomId },
    /// A reference was released
    Released { room_id: RoomId, ref_count: usize },
    /// The default mutation target changed
    ActiveChanged { room_id: Option<RoomId> },
    /// A local transaction was committed
    Committed {
        room_id: RoomId,
        /// Size of the incremental change handed to the network provider
        change_bytes: usize,
    },
    /// Changes from a peer were merged into the document
    RemoteChanged { room_id: RoomId, ops_applied: usize },
    /// Host moved to another player because the previous host left
    HostReassigned {
        room_id: RoomId,
        previous: PlayerId,
        next: Option<PlayerId>,
    },
    /// A queued mutation was discarded without running
    MutationDropped { room_id: RoomId, reason: String },
    /// A mutation ran but refused to write, e.g. a queued action whose actor
    /// lost permission before the flush
    MutationRejected {
        room_id: RoomId,
        label: String,
        reason: String,
    },
    /// The session was torn down; anything tied to it must be discarded
    Destroyed { room_id: RoomId },
}

impl SessionEvent {
    /// Get the room associated with this event, if any
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            SessionEvent::Created { room_id } => Some(room_id),
            SessionEvent::Released { room_id, .. } => Some(room_id),
            SessionEvent::ActiveChanged { room_id } => room_id.as_ref(),
            SessionEvent::Committed { room_id, .. } => Some(room_id),
            SessionEvent::RemoteChanged { room_id, .. } => Some(room_id),
            SessionEvent::HostReassigned { room_id, .. } => Some(room_id),
            SessionEvent::MutationDropped { room_id, .. } => Some(room_id),
            SessionEvent::MutationRejected { room_id, .. } => Some(room_id),
            SessionEvent::Destroyed { room_id } => Some(room_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_default_is_ready() {
        assert_eq!(SessionStatus::default(), SessionStatus::Ready);
    }

    #[test]
    fn test_session_status_display() {
        assert_eq!(format!("{}", SessionStatus::Hydrating), "Hydrating");
        assert_eq!(format!("{}", SessionStatus::Ready), "Ready");
    }

    #[test]
    fn test_session_event_room_id() {
        let room_id = RoomId::from("r1");
        let event = SessionEvent::Committed {
            room_id: room_id.clone(),
            change_bytes: 10,
        };
        assert_eq!(event.room_id(), Some(&room_id));

        let event = SessionEvent::ActiveChanged { room_id: None };
        assert_eq!(event.room_id(), None);

        let event = SessionEvent::MutationRejected {
            room_id: room_id.clone(),
            label: "tapCard".into(),
            reason: "not yours".into(),
        };
        assert_eq!(event.room_id(), Some(&room_id));
    }
}
