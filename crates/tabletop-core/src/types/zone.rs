//! Zones: ordered containers of card ids owned by one player

use serde::{Deserialize, Serialize};

use super::{CardId, PlayerId, ZoneId};

/// Kind of zone
///
/// Hidden kinds conceal card identity from everyone but the owner; public
/// kinds are fully visible to all peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZoneKind {
    Hand,
    Library,
    Sideboard,
    Battlefield,
    Graveyard,
    Exile,
    /// Older documents wrote this zone as `command`
    #[serde(alias = "command")]
    Commander,
}

impl ZoneKind {
    /// Whether card identities in this zone are concealed from non-owners
    pub fn is_hidden(self) -> bool {
        matches!(self, ZoneKind::Hand | ZoneKind::Library | ZoneKind::Sideboard)
    }

    /// Whether every peer may see the contents of this zone
    pub fn is_public(self) -> bool {
        !self.is_hidden()
    }
}

impl std::fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ZoneKind::Hand => "hand",
            ZoneKind::Library => "library",
            ZoneKind::Sideboard => "sideboard",
            ZoneKind::Battlefield => "battlefield",
            ZoneKind::Graveyard => "graveyard",
            ZoneKind::Exile => "exile",
            ZoneKind::Commander => "commander",
        };
        f.write_str(name)
    }
}

/// A zone and its ordered membership list
///
/// `card_ids[0]` is the bottom of the pile; the last entry is the top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: ZoneId,
    #[serde(rename = "type")]
    pub kind: ZoneKind,
    pub owner_id: PlayerId,
    #[serde(default)]
    pub card_ids: Vec<CardId>,
}

impl Zone {
    /// Create an empty zone
    pub fn new(id: impl Into<ZoneId>, kind: ZoneKind, owner_id: impl Into<PlayerId>) -> Self {
        Self {
            id: id.into(),
            kind,
            owner_id: owner_id.into(),
            card_ids: Vec::new(),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.kind.is_hidden()
    }

    pub fn contains(&self, card_id: &CardId) -> bool {
        self.card_ids.contains(card_id)
    }

    /// The card currently on top (tail of the list)
    pub fn top(&self) -> Option<&CardId> {
        self.card_ids.last()
    }

    /// Remove every occurrence of `card_id`, returning whether it was present
    pub fn remove(&mut self, card_id: &CardId) -> bool {
        let before = self.card_ids.len();
        self.card_ids.retain(|id| id != card_id);
        before != self.card_ids.len()
    }

    /// Insert `card_id` at `index` (clamped), or on top when `index` is None.
    ///
    /// Any existing occurrence is removed first so membership stays unique.
    pub fn insert(&mut self, card_id: CardId, index: Option<usize>) {
        self.remove(&card_id);
        let at = index.unwrap_or(self.card_ids.len()).min(self.card_ids.len());
        self.card_ids.insert(at, card_id);
    }

    /// Whether `order` is a permutation of this zone's current ids
    pub fn is_permutation(&self, order: &[CardId]) -> bool {
        if order.len() != self.card_ids.len() {
            return false;
        }
        let mut current: Vec<&CardId> = self.card_ids.iter().collect();
        let mut proposed: Vec<&CardId> = order.iter().collect();
        current.sort();
        proposed.sort();
        current == proposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<CardId> {
        raw.iter().map(|s| CardId::from(*s)).collect()
    }

    #[test]
    fn test_hidden_and_public_partition() {
        for kind in [ZoneKind::Hand, ZoneKind::Library, ZoneKind::Sideboard] {
            assert!(kind.is_hidden(), "{kind} should be hidden");
        }
        for kind in [
            ZoneKind::Battlefield,
            ZoneKind::Graveyard,
            ZoneKind::Exile,
            ZoneKind::Commander,
        ] {
            assert!(kind.is_public(), "{kind} should be public");
        }
    }

    #[test]
    fn test_legacy_command_alias() {
        let kind: ZoneKind = serde_json::from_str("\"command\"").unwrap();
        assert_eq!(kind, ZoneKind::Commander);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"commander\"");
    }

    #[test]
    fn test_insert_keeps_membership_unique() {
        let mut zone = Zone::new("lib", ZoneKind::Library, "p1");
        zone.insert(CardId::from("a"), None);
        zone.insert(CardId::from("b"), None);
        zone.insert(CardId::from("a"), Some(5));
        assert_eq!(zone.card_ids, ids(&["b", "a"]));
        assert_eq!(zone.top(), Some(&CardId::from("a")));
    }

    #[test]
    fn test_insert_at_bottom() {
        let mut zone = Zone::new("lib", ZoneKind::Library, "p1");
        zone.card_ids = ids(&["a", "b"]);
        zone.insert(CardId::from("c"), Some(0));
        assert_eq!(zone.card_ids, ids(&["c", "a", "b"]));
    }

    #[test]
    fn test_is_permutation() {
        let mut zone = Zone::new("hand", ZoneKind::Hand, "p1");
        zone.card_ids = ids(&["a", "b", "c"]);
        assert!(zone.is_permutation(&ids(&["c", "a", "b"])));
        assert!(!zone.is_permutation(&ids(&["a", "b"])));
        assert!(!zone.is_permutation(&ids(&["a", "b", "d"])));
        assert!(!zone.is_permutation(&ids(&["a", "a", "b"])));
    }
}
