//! Cards, counters and per-card visibility

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{CardId, PlayerId, ZoneId};

/// Name shown for a card whose identity has not resolved yet
pub const PLACEHOLDER_NAME: &str = "Card";

/// Identity fields of a card
///
/// This is the part of a card that hidden zones conceal and private overlays
/// reveal. Everything else on [`Card`] is public board state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toughness: Option<String>,
    /// Opaque reference into the external card-data service (image / metadata)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_text: Option<String>,
}

impl CardIdentity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// How a face-down card was put onto the battlefield
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaceDownMode {
    #[default]
    Plain,
    Morph,
    Manifest,
}

/// Who may see a card's identity beyond the zone rules
///
/// The states are mutually exclusive, so a card cannot be both face down and
/// revealed to everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Visibility {
    /// Visibility follows the zone: public zones show the card, hidden zones
    /// show it to the owner only
    #[default]
    Standard,
    /// Face down on a public zone; only the controller knows the identity
    FaceDown { mode: FaceDownMode },
    /// Temporarily shown to specific viewers
    RevealedTo { viewers: BTreeSet<PlayerId> },
    /// Temporarily shown to every viewer
    RevealedToAll,
    /// Identity is public knowledge even inside a hidden zone
    KnownToAll,
}

impl Visibility {
    pub fn is_face_down(&self) -> bool {
        matches!(self, Visibility::FaceDown { .. })
    }

    /// Whether the identity is exposed to every viewer
    pub fn is_public_knowledge(&self) -> bool {
        matches!(self, Visibility::RevealedToAll | Visibility::KnownToAll)
    }

    /// Whether `viewer` was explicitly granted sight of the card
    pub fn reveals_to(&self, viewer: &PlayerId) -> bool {
        match self {
            Visibility::RevealedTo { viewers } => viewers.contains(viewer),
            Visibility::RevealedToAll | Visibility::KnownToAll => true,
            Visibility::Standard | Visibility::FaceDown { .. } => false,
        }
    }
}

/// Normalized board position; both axes lie in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Build a position, clamping each axis into `[0, 1]` (NaN becomes 0)
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: clamp_unit(x),
            y: clamp_unit(y),
        }
    }

    /// Generic spot used for cards with no layout yet
    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::origin()
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// One counter entry; a card holds at most one entry per kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Counter {
    pub fn new(kind: impl Into<String>, count: u32) -> Self {
        Self {
            kind: kind.into(),
            count,
            color: None,
        }
    }
}

/// A card instance on the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    /// None while the identity is concealed from this replica
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<CardIdentity>,
    pub owner_id: PlayerId,
    pub controller_id: PlayerId,
    pub zone_id: ZoneId,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub tapped: bool,
    /// Degrees, normalized into `[0, 360)`
    #[serde(default)]
    pub rotation: u16,
    #[serde(default)]
    pub counters: Vec<Counter>,
    #[serde(default)]
    pub current_face: u8,
    #[serde(default)]
    pub is_commander: bool,
    #[serde(default)]
    pub is_token: bool,
    #[serde(default)]
    pub visibility: Visibility,
}

impl Card {
    /// Create a face-up card owned and controlled by `owner`
    pub fn new(
        id: impl Into<CardId>,
        identity: CardIdentity,
        owner: impl Into<PlayerId>,
        zone_id: impl Into<ZoneId>,
    ) -> Self {
        let owner = owner.into();
        Self {
            id: id.into(),
            identity: Some(identity),
            controller_id: owner.clone(),
            owner_id: owner,
            zone_id: zone_id.into(),
            position: Position::origin(),
            tapped: false,
            rotation: 0,
            counters: Vec::new(),
            current_face: 0,
            is_commander: false,
            is_token: false,
            visibility: Visibility::Standard,
        }
    }

    /// Stand-in for a hidden card whose identity has not resolved
    pub fn placeholder(id: CardId, zone_id: ZoneId, owner: PlayerId) -> Self {
        Self {
            identity: None,
            ..Self::new(id, CardIdentity::default(), owner, zone_id)
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.identity.is_none()
    }

    /// Name to display, falling back to the placeholder label
    pub fn display_name(&self) -> &str {
        self.identity
            .as_ref()
            .map(|i| i.name.as_str())
            .unwrap_or(PLACEHOLDER_NAME)
    }

    pub fn counter(&self, kind: &str) -> u32 {
        self.counters
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Add `delta` to the counter of `kind`, flooring at zero.
    ///
    /// A count that reaches zero removes the entry. Returns the new count.
    pub fn apply_counter_delta(&mut self, kind: &str, delta: i64, color: Option<&str>) -> u32 {
        let current = i64::from(self.counter(kind));
        let next = (current + delta).clamp(0, i64::from(u32::MAX)) as u32;
        if next == 0 {
            self.counters.retain(|c| c.kind != kind);
        } else if let Some(entry) = self.counters.iter_mut().find(|c| c.kind == kind) {
            entry.count = next;
        } else {
            self.counters.push(Counter {
                kind: kind.to_string(),
                count: next,
                color: color.map(str::to_string),
            });
        }
        next
    }

    /// Set the rotation in degrees, wrapping into `[0, 360)`
    pub fn set_rotation(&mut self, degrees: i32) {
        self.rotation = degrees.rem_euclid(360) as u16;
    }

    /// Drop all battlefield-only state (used when the card leaves play)
    pub fn reset_board_state(&mut self) {
        self.tapped = false;
        self.rotation = 0;
        self.counters.clear();
        self.current_face = 0;
        if self.visibility.is_face_down() {
            self.visibility = Visibility::Standard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> Card {
        Card::new("c1", CardIdentity::named("Llanowar Elves"), "p1", "bf-p1")
    }

    #[test]
    fn test_counter_add_and_remove_to_zero() {
        let mut c = card();
        assert_eq!(c.apply_counter_delta("+1/+1", 1, None), 1);
        assert_eq!(c.counter("+1/+1"), 1);
        assert_eq!(c.apply_counter_delta("+1/+1", -1, None), 0);
        assert!(c.counters.is_empty());
    }

    #[test]
    fn test_counter_floor_is_zero() {
        let mut c = card();
        c.apply_counter_delta("loyalty", 3, None);
        assert_eq!(c.apply_counter_delta("loyalty", -10, None), 0);
        assert!(c.counters.iter().all(|e| e.kind != "loyalty"));
    }

    #[test]
    fn test_counter_one_entry_per_kind() {
        let mut c = card();
        c.apply_counter_delta("charge", 2, Some("#ffaa00"));
        c.apply_counter_delta("charge", 3, Some("#000000"));
        assert_eq!(c.counters.len(), 1);
        assert_eq!(c.counters[0].count, 5);
        assert_eq!(c.counters[0].color.as_deref(), Some("#ffaa00"));
    }

    #[test]
    fn test_position_clamped() {
        let p = Position::new(-0.5, 1.7);
        assert_eq!(p, Position { x: 0.0, y: 1.0 });
        assert_eq!(Position::new(f64::NAN, 0.25).x, 0.0);
    }

    #[test]
    fn test_rotation_wraps() {
        let mut c = card();
        c.set_rotation(450);
        assert_eq!(c.rotation, 90);
        c.set_rotation(-90);
        assert_eq!(c.rotation, 270);
    }

    #[test]
    fn test_visibility_serialization_is_tagged() {
        let v = Visibility::FaceDown {
            mode: FaceDownMode::Morph,
        };
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"state":"faceDown","mode":"morph"}"#);
        let back: Visibility = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_reveals_to() {
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        let v = Visibility::RevealedTo {
            viewers: [alice.clone()].into_iter().collect(),
        };
        assert!(v.reveals_to(&alice));
        assert!(!v.reveals_to(&bob));
        assert!(Visibility::KnownToAll.reveals_to(&bob));
        assert!(!Visibility::Standard.reveals_to(&bob));
    }

    #[test]
    fn test_reset_board_state() {
        let mut c = card();
        c.tapped = true;
        c.set_rotation(90);
        c.apply_counter_delta("+1/+1", 2, None);
        c.visibility = Visibility::FaceDown {
            mode: FaceDownMode::Manifest,
        };
        c.reset_board_state();
        assert!(!c.tapped);
        assert_eq!(c.rotation, 0);
        assert!(c.counters.is_empty());
        assert_eq!(c.visibility, Visibility::Standard);
    }

    #[test]
    fn test_placeholder_display_name() {
        let c = Card::placeholder(CardId::from("x"), ZoneId::from("hand"), PlayerId::from("p"));
        assert!(c.is_placeholder());
        assert_eq!(c.display_name(), PLACEHOLDER_NAME);
    }
}
