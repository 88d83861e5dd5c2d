//! Automerge document wrapper for a room's public board state
//!
//! RoomDoc wraps an Automerge document holding one map per record type
//! (`players`, `zones`, `cards`, `reveals`, `counterColors`, `meta`). Each
//! record is stored as a JSON string under its id, so concurrent writes to
//! different records merge independently and concurrent writes to the same
//! record resolve deterministically.
//!
//! Only public information is ever written: card identities in hidden zones
//! and face-down cards are stripped on the way in.

use std::collections::BTreeMap;

use automerge::{
    transaction::{CommitOptions, Transactable},
    ActorId, AutoCommit, ObjId, ObjType, ReadDoc, ROOT,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::{TabletopError, TabletopResult};
use crate::types::{Card, GameState, ZoneKind};

const PLAYERS: &str = "players";
const ZONES: &str = "zones";
const CARDS: &str = "cards";
const REVEALS: &str = "reveals";
const COUNTER_COLORS: &str = "counterColors";
const META: &str = "meta";

const GENESIS_ACTOR: [u8; 16] = *b"tabletop-genesis";

const MAPS: [&str; 6] = [PLAYERS, ZONES, CARDS, REVEALS, COUNTER_COLORS, META];

const META_HOST: &str = "hostId";
const META_LOCKED: &str = "locked";

/// Automerge document wrapper for a room
///
/// # Example
///
/// ```
/// use tabletop_core::room::RoomDoc;
/// use tabletop_core::types::Player;
///
/// let mut doc = RoomDoc::new().unwrap();
/// doc.mutate(|state| {
///     state.upsert_player(Player::new("p1", "Alice", 40));
///     Ok(())
/// })
/// .unwrap();
/// doc.commit("seat player");
///
/// let state = doc.snapshot().unwrap();
/// assert_eq!(state.players.len(), 1);
/// ```
pub struct RoomDoc {
    doc: AutoCommit,
}

impl RoomDoc {
    /// Create a new empty room document with all record maps in place.
    ///
    /// The initial change is byte-identical on every replica (fixed actor,
    /// zero timestamp), so independently created documents share the same
    /// record maps instead of racing for the root keys.
    pub fn new() -> TabletopResult<Self> {
        let mut doc = AutoCommit::new().with_actor(ActorId::from(GENESIS_ACTOR.as_slice()));
        for name in MAPS {
            doc.put_object(ROOT, name, ObjType::Map)?;
        }
        doc.commit_with(
            CommitOptions::default()
                .with_message("init room".to_string())
                .with_time(0),
        );
        doc.set_actor(ActorId::random());
        Ok(Self { doc })
    }

    /// Load a room document from saved bytes
    ///
    /// # Errors
    ///
    /// Returns `TabletopError::Automerge` if the bytes are not a valid Automerge document.
    pub fn load(data: &[u8]) -> TabletopResult<Self> {
        let doc = AutoCommit::load(data)?;
        Ok(Self { doc })
    }

    /// Save the full document state to bytes
    pub fn save(&mut self) -> Vec<u8> {
        self.doc.save()
    }

    /// Fork the document for concurrent editing (another replica)
    pub fn fork(&mut self) -> Self {
        Self {
            doc: self.doc.fork(),
        }
    }

    /// Merge another replica into this one
    ///
    /// The merge is commutative: the result is the same regardless of order.
    pub fn merge(&mut self, other: &mut RoomDoc) -> TabletopResult<()> {
        self.doc.merge(&mut other.doc)?;
        Ok(())
    }

    /// Changes since the last call, suitable for broadcasting to peers
    pub fn generate_sync_message(&mut self) -> Vec<u8> {
        self.doc.save_incremental()
    }

    /// Apply incremental changes received from a peer
    ///
    /// Returns the number of operations loaded.
    pub fn apply_sync_message(&mut self, data: &[u8]) -> TabletopResult<usize> {
        Ok(self.doc.load_incremental(data)?)
    }

    /// Current heads of the change DAG
    pub fn heads(&mut self) -> Vec<automerge::ChangeHash> {
        self.doc.get_heads()
    }

    /// Close the open transaction, returning whether anything was recorded
    pub fn commit(&mut self, message: &str) -> bool {
        self.doc
            .commit_with(CommitOptions::default().with_message(message.to_string()))
            .is_some()
    }

    /// Discard uncommitted operations
    pub fn rollback(&mut self) -> usize {
        self.doc.rollback()
    }

    /// Materialize the document into a [`GameState`]
    ///
    /// Records that fail to parse are skipped with a warning.
    pub fn snapshot(&self) -> TabletopResult<GameState> {
        let mut state = GameState::new();
        state.players = self.read_map(PLAYERS)?;
        state.zones = self.read_map(ZONES)?;
        state.cards = self.read_map(CARDS)?;
        state.reveals = self.read_map(REVEALS)?;
        state.counter_colors = self.read_map(COUNTER_COLORS)?;

        let meta: BTreeMap<String, serde_json::Value> = self.read_map(META)?;
        state.meta.host_id = meta
            .get(META_HOST)
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        state.meta.locked = meta
            .get(META_LOCKED)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        Ok(state)
    }

    /// Run `f` against a fresh snapshot and write back whatever it changed.
    ///
    /// Nothing is written if `f` fails, so a rejected mutation leaves the
    /// open transaction untouched.
    pub fn mutate<R>(
        &mut self,
        f: impl FnOnce(&mut GameState) -> TabletopResult<R>,
    ) -> TabletopResult<R> {
        let before = self.snapshot()?;
        let mut after = before.clone();
        let result = f(&mut after)?;
        self.write_changes(&before, &after)?;
        Ok(result)
    }

    /// Write the records that differ between `before` and `after`.
    ///
    /// Returns the number of keys written or deleted.
    pub fn write_changes(&mut self, before: &GameState, after: &GameState) -> TabletopResult<usize> {
        let mut written = 0;
        written += self.sync_map(PLAYERS, &before.players, &after.players)?;
        written += self.sync_map(ZONES, &before.zones, &after.zones)?;

        let public_before = public_cards(before);
        let public_after = public_cards(after);
        written += self.sync_map(CARDS, &public_before, &public_after)?;
        written += self.sync_map(REVEALS, &before.reveals, &after.reveals)?;

        // First writer wins: never overwrite or delete a registered color
        let colors = self.map_id(COUNTER_COLORS)?;
        for (kind, color) in &after.counter_colors {
            if self.doc.get(&colors, kind.as_str())?.is_none() {
                self.put_json(&colors, kind, color)?;
                written += 1;
            }
        }

        let meta = self.map_id(META)?;
        if before.meta.host_id != after.meta.host_id {
            match &after.meta.host_id {
                Some(host) => self.put_json(&meta, META_HOST, host)?,
                None => self.doc.delete(&meta, META_HOST)?,
            }
            written += 1;
        }
        if before.meta.locked != after.meta.locked {
            self.put_json(&meta, META_LOCKED, &after.meta.locked)?;
            written += 1;
        }
        Ok(written)
    }

    fn sync_map<K, V>(
        &mut self,
        name: &str,
        before: &BTreeMap<K, V>,
        after: &BTreeMap<K, V>,
    ) -> TabletopResult<usize>
    where
        K: Ord + std::fmt::Display,
        V: PartialEq + Serialize,
    {
        let obj = self.map_id(name)?;
        let mut written = 0;
        for (key, value) in after {
            if before.get(key) != Some(value) {
                self.put_json(&obj, &key.to_string(), value)?;
                written += 1;
            }
        }
        for key in before.keys() {
            if !after.contains_key(key) {
                self.doc.delete(&obj, key.to_string())?;
                written += 1;
            }
        }
        Ok(written)
    }

    fn map_id(&self, name: &str) -> TabletopResult<ObjId> {
        self.doc
            .get(ROOT, name)?
            .map(|(_, id)| id)
            .ok_or_else(|| TabletopError::Automerge(format!("{name} map not found")))
    }

    fn put_json<T: Serialize + ?Sized>(&mut self, obj: &ObjId, key: &str, value: &T) -> TabletopResult<()> {
        let json = serde_json::to_string(value)?;
        self.doc.put(obj, key, json)?;
        Ok(())
    }

    fn read_map<K, V>(&self, name: &str) -> TabletopResult<BTreeMap<K, V>>
    where
        K: Ord + From<String>,
        V: DeserializeOwned,
    {
        let obj = self.map_id(name)?;
        let mut out = BTreeMap::new();
        for key in self.doc.keys(&obj) {
            let Some((value, _)) = self.doc.get(&obj, key.as_str())? else {
                continue;
            };
            let Some(json) = value.to_str() else {
                warn!(map = name, %key, "Skipping non-string record");
                continue;
            };
            match serde_json::from_str::<V>(json) {
                Ok(record) => {
                    out.insert(K::from(key), record);
                }
                Err(e) => warn!(map = name, %key, error = %e, "Skipping corrupt record"),
            }
        }
        Ok(out)
    }
}

/// Card records as every peer may see them
fn public_cards(state: &GameState) -> BTreeMap<crate::types::CardId, Card> {
    state
        .cards
        .iter()
        .map(|(id, card)| {
            let kind = state.zones.get(&card.zone_id).map(|z| z.kind);
            (id.clone(), public_form(card, kind))
        })
        .collect()
}

fn public_form(card: &Card, zone_kind: Option<ZoneKind>) -> Card {
    let concealed =
        zone_kind.map(ZoneKind::is_hidden).unwrap_or(true) || card.visibility.is_face_down();
    if concealed && card.identity.is_some() {
        Card {
            identity: None,
            ..card.clone()
        }
    } else {
        card.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::state::{two_player_table, Placement};
    use crate::types::{CardId, CardIdentity, FaceDownMode, PlayerId, ZoneId};

    fn seeded() -> RoomDoc {
        let mut doc = RoomDoc::new().unwrap();
        doc.mutate(|state| {
            *state = two_player_table();
            state.add_card(
                Card::new("c1", CardIdentity::named("Forest"), "p1", "library-p1"),
                None,
            )?;
            state.add_card(
                Card::new("c2", CardIdentity::named("Shock"), "p1", "battlefield-p1"),
                None,
            )?;
            Ok(())
        })
        .unwrap();
        doc.commit("seed");
        doc
    }

    #[test]
    fn test_room_doc_new_is_empty() {
        let doc = RoomDoc::new().unwrap();
        assert_eq!(doc.snapshot().unwrap(), GameState::new());
    }

    #[test]
    fn test_independent_replicas_share_record_maps() {
        let mut host = seeded();
        let mut joiner = RoomDoc::new().unwrap();
        joiner.merge(&mut host).unwrap();
        assert_eq!(joiner.snapshot().unwrap(), host.snapshot().unwrap());
        assert_eq!(joiner.snapshot().unwrap().players.len(), 2);
    }

    #[test]
    fn test_hidden_identities_are_stripped() {
        let doc = seeded();
        let state = doc.snapshot().unwrap();
        assert!(state.card(&CardId::from("c1")).unwrap().identity.is_none());
        assert_eq!(
            state.card(&CardId::from("c2")).unwrap().display_name(),
            "Shock"
        );
    }

    #[test]
    fn test_face_down_identity_is_stripped() {
        let mut doc = seeded();
        doc.mutate(|state| {
            state.move_card(
                &CardId::from("c1"),
                &ZoneId::from("battlefield-p1"),
                Placement {
                    face_down: Some(FaceDownMode::Morph),
                    identity: Some(CardIdentity::named("Forest")),
                    ..Default::default()
                },
            )
        })
        .unwrap();
        let state = doc.snapshot().unwrap();
        let card = state.card(&CardId::from("c1")).unwrap();
        assert!(card.identity.is_none());
        assert!(card.visibility.is_face_down());
    }

    #[test]
    fn test_failed_mutation_writes_nothing() {
        let mut doc = seeded();
        let before = doc.snapshot().unwrap();
        let result = doc.mutate(|state| {
            state.set_tapped(&CardId::from("c2"), true)?;
            state.reorder_zone(&ZoneId::from("library-p1"), vec![])
        });
        assert!(result.is_err());
        assert_eq!(doc.snapshot().unwrap(), before);
    }

    #[test]
    fn test_save_and_load() {
        let mut doc = seeded();
        let bytes = doc.save();
        let loaded = RoomDoc::load(&bytes).unwrap();
        assert_eq!(loaded.snapshot().unwrap(), doc.snapshot().unwrap());
    }

    #[test]
    fn test_concurrent_edits_merge() {
        let mut doc1 = seeded();
        let mut doc2 = doc1.fork();

        doc1.mutate(|s| s.set_tapped(&CardId::from("c2"), true)).unwrap();
        doc1.commit("tap");
        doc2.mutate(|s| {
            s.update_player(
                &PlayerId::from("p2"),
                &crate::types::PlayerUpdate::life(12),
                &(-999..=999),
            )
        })
        .unwrap();
        doc2.commit("life");

        doc1.merge(&mut doc2).unwrap();
        let state = doc1.snapshot().unwrap();
        assert!(state.card(&CardId::from("c2")).unwrap().tapped);
        assert_eq!(state.player(&PlayerId::from("p2")).unwrap().life, 12);
    }

    #[test]
    fn test_counter_color_not_overwritten_by_merge_partner() {
        let mut doc1 = seeded();
        let mut doc2 = doc1.fork();
        doc1.mutate(|s| s.add_counter(&CardId::from("c2"), "poison", 1, Some("green")))
            .unwrap();
        doc1.commit("poison");
        doc2.merge(&mut doc1).unwrap();
        doc2.mutate(|s| {
            s.counter_colors.insert("poison".into(), "purple".into());
            Ok(())
        })
        .unwrap();
        assert_eq!(doc2.snapshot().unwrap().counter_colors["poison"], "green");
    }

    #[test]
    fn test_incremental_sync() {
        let mut doc1 = seeded();
        let full = doc1.save();
        let mut doc2 = RoomDoc::load(&full).unwrap();
        let _ = doc1.generate_sync_message();

        doc1.mutate(|s| {
            s.meta.host_id = Some(PlayerId::from("p1"));
            s.set_locked(true);
            Ok(())
        })
        .unwrap();
        doc1.commit("meta");
        let msg = doc1.generate_sync_message();
        doc2.apply_sync_message(&msg).unwrap();

        let meta = doc2.snapshot().unwrap().meta;
        assert_eq!(meta.host_id, Some(PlayerId::from("p1")));
        assert!(meta.locked);
    }

    #[test]
    fn test_heads_change_on_commit() {
        let mut doc = seeded();
        let heads1 = doc.heads();
        doc.mutate(|s| s.set_tapped(&CardId::from("c2"), true)).unwrap();
        assert!(doc.commit("tap"));
        assert_ne!(heads1, doc.heads());
        assert!(!doc.commit("nothing"));
    }
}
