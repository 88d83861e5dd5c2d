//! Core types for Tabletop Sync
//!
//! Identifiers are opaque strings chosen by whoever creates the object (room
//! codes, player ids handed out by the lobby, card ids minted on deck load),
//! so they are thin newtypes over `String`. Intent ids are ULIDs so they sort
//! by submission time.

pub mod card;
pub mod player;
pub mod state;
pub mod zone;

pub use card::{Card, CardIdentity, Counter, FaceDownMode, Position, Visibility};
pub use player::{LibraryTopReveal, Player, PlayerUpdate};
pub use state::{GameState, Placement, RoomMeta};
pub use zone::{Zone, ZoneKind};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a room (one replicated document per room)
    RoomId
);
string_id!(
    /// Identifier of a seated player
    PlayerId
);
string_id!(
    /// Identifier of a zone (hand, library, battlefield, ...)
    ZoneId
);
string_id!(
    /// Identifier of a card instance
    CardId
);

impl RoomId {
    /// Create a fresh random room id
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }
}

/// Unique identifier for a locally submitted intent
///
/// Uses ULID so ids are unique across peers and order by submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntentId(pub Ulid);

impl IntentId {
    /// Create a new IntentId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse from string representation
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IntentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_id_display() {
        let id = PlayerId::new("alice");
        assert_eq!(format!("{}", id), "alice");
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn test_string_id_serializes_transparently() {
        let id = CardId::from("c-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c-1\"");
    }

    #[test]
    fn test_room_id_generate_unique() {
        assert_ne!(RoomId::generate(), RoomId::generate());
    }

    #[test]
    fn test_intent_id_string_roundtrip() {
        let id = IntentId::new();
        let parsed = IntentId::from_string(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_intent_ids_sort_by_creation() {
        let first = IntentId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = IntentId::new();
        assert!(first < second);
    }
}
