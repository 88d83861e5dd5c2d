//! Folds a viewer's private overlay into the public snapshot
//!
//! ## Merge order
//!
//! 1. Placeholders for hidden-zone ids with no card record
//! 2. Reveal projections recorded in public state
//! 3. Overlay cards (identity only for cards the public state knows)
//! 4. Private zone orders, restricted to the public membership
//! 5. Placeholders again, since step 3/4 may have changed what is listed
//!
//! Public board fields (zone, position, tapped, counters, rotation, control,
//! face, flags and visibility) always come from the public snapshot. A stale
//! overlay can change what a card *is*, never where it is or how it sits.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::payload::{FullOverlay, OverlayCard, OverlayDiff, OverlayPayload};
use crate::error::{TabletopError, TabletopResult};
use crate::session::SessionRegistry;
use crate::types::{Card, CardId, GameState, PlayerId, RoomId, Visibility, ZoneId};

/// Private overlay state for one viewer in one room
#[derive(Debug, Clone)]
pub struct PrivateOverlayMerger {
    room_id: RoomId,
    viewer_id: PlayerId,
    version: Option<u64>,
    cards: BTreeMap<CardId, OverlayCard>,
    zone_orders: BTreeMap<ZoneId, Vec<CardId>>,
}

impl PrivateOverlayMerger {
    pub fn new(room_id: RoomId, viewer_id: PlayerId) -> Self {
        Self {
            room_id,
            viewer_id,
            version: None,
            cards: BTreeMap::new(),
            zone_orders: BTreeMap::new(),
        }
    }

    /// Last applied overlay version; None until the first full payload
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn viewer_id(&self) -> &PlayerId {
        &self.viewer_id
    }

    pub fn known_cards(&self) -> usize {
        self.cards.len()
    }

    /// Apply a payload.
    ///
    /// Returns `Ok(false)` for a diff that was already applied. A diff built
    /// on any other version fails with [`TabletopError::StaleOverlayVersion`];
    /// the caller should request a full overlay.
    pub fn apply_payload(&mut self, payload: &OverlayPayload) -> TabletopResult<bool> {
        match payload {
            OverlayPayload::Full(full) => self.apply_full(full).map(|()| true),
            OverlayPayload::Diff(diff) => self.apply_diff(diff),
        }
    }

    fn apply_full(&mut self, full: &FullOverlay) -> TabletopResult<()> {
        if full.room_id != self.room_id {
            return Err(TabletopError::Validation(format!(
                "overlay for room {} delivered to {}",
                full.room_id, self.room_id
            )));
        }
        if let Some(viewer) = &full.viewer_id {
            if viewer != &self.viewer_id {
                return Err(TabletopError::Validation(format!(
                    "overlay for viewer {viewer} delivered to {}",
                    self.viewer_id
                )));
            }
        }
        self.cards = full
            .cards
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();
        self.zone_orders = full.zone_card_orders.clone();
        self.version = Some(full.overlay_version);
        debug!(
            room_id = %self.room_id,
            viewer = %self.viewer_id,
            version = full.overlay_version,
            cards = self.cards.len(),
            "Applied full overlay"
        );
        Ok(())
    }

    fn apply_diff(&mut self, diff: &OverlayDiff) -> TabletopResult<bool> {
        if self.version == Some(diff.overlay_version) && self.version != Some(diff.base_overlay_version) {
            debug!(room_id = %self.room_id, version = diff.overlay_version, "Duplicate overlay diff");
            return Ok(false);
        }
        if self.version != Some(diff.base_overlay_version) {
            warn!(
                room_id = %self.room_id,
                viewer = %self.viewer_id,
                have = ?self.version,
                base = diff.base_overlay_version,
                "Stale overlay diff; full resync needed"
            );
            return Err(TabletopError::StaleOverlayVersion {
                expected: self.version,
                received: diff.base_overlay_version,
            });
        }

        for card in &diff.upserts {
            self.cards.insert(card.id.clone(), card.clone());
        }
        for id in &diff.removes {
            self.cards.remove(id);
        }
        for zone in &diff.zone_order_removals {
            self.zone_orders.remove(zone);
        }
        for (zone, order) in &diff.zone_card_orders {
            self.zone_orders.insert(zone.clone(), order.clone());
        }
        self.version = Some(diff.overlay_version);
        debug!(
            room_id = %self.room_id,
            viewer = %self.viewer_id,
            version = diff.overlay_version,
            upserts = diff.upserts.len(),
            removes = diff.removes.len(),
            "Applied overlay diff"
        );
        Ok(true)
    }

    /// Forget everything; the next payload must be a full one
    pub fn reset(&mut self) {
        self.version = None;
        self.cards.clear();
        self.zone_orders.clear();
    }

    /// Produce the viewer's state from the public snapshot
    pub fn merge(&self, public: &GameState) -> GameState {
        let mut state = public.clone();
        synthesize_placeholders(&mut state);
        project_reveals(&mut state);

        for overlay in self.cards.values() {
            if public.cards.contains_key(&overlay.id) {
                if let Some(card) = state.cards.get_mut(&overlay.id) {
                    card.identity = Some(overlay.identity.clone());
                }
                continue;
            }
            // Unknown publicly: accept only where public membership lists it
            let Some(zone_id) = state.zone_containing(&overlay.id).cloned() else {
                continue;
            };
            state
                .cards
                .insert(overlay.id.clone(), overlay.to_card(zone_id));
        }

        for (zone_id, order) in &self.zone_orders {
            let Some(zone) = state.zones.get_mut(zone_id) else {
                continue;
            };
            if !zone.is_hidden() {
                continue;
            }
            zone.card_ids = reconcile_order(&zone.card_ids, order);
        }

        synthesize_placeholders(&mut state);
        state
    }
}

/// Add placeholder records for hidden-zone ids with no card record
fn synthesize_placeholders(state: &mut GameState) {
    let missing: Vec<(CardId, ZoneId, PlayerId)> = state
        .zones
        .values()
        .filter(|z| z.is_hidden())
        .flat_map(|z| {
            z.card_ids
                .iter()
                .map(move |id| (id.clone(), z.id.clone(), z.owner_id.clone()))
        })
        .filter(|(id, _, _)| !state.cards.contains_key(id))
        .collect();
    for (id, zone_id, owner) in missing {
        state
            .cards
            .insert(id.clone(), Card::placeholder(id, zone_id, owner));
    }
}

/// Merge identities published for everyone into their cards
///
/// A library-top record applies only while its card is the tail of the zone.
fn project_reveals(state: &mut GameState) {
    let reveals: Vec<_> = state
        .reveals
        .iter()
        .map(|(id, r)| (id.clone(), r.clone()))
        .collect();
    for (card_id, record) in reveals {
        let Some(zone_id) = state.zone_containing(&card_id).cloned() else {
            continue;
        };
        if record.library_top {
            let is_top = state
                .zone(&zone_id)
                .and_then(|z| z.top())
                .map(|top| top == &card_id)
                .unwrap_or(false);
            if !is_top {
                continue;
            }
        }
        let Some(card) = state.cards.get_mut(&card_id) else {
            continue;
        };
        card.identity = Some(record.identity);
        if !card.visibility.is_public_knowledge() {
            card.visibility = Visibility::RevealedToAll;
        }
    }
}

/// Apply a private ordering without changing membership: ids the public list
/// no longer has are dropped, ids the private order lacks keep their public
/// slot relative to each other at the end
fn reconcile_order(public: &[CardId], private: &[CardId]) -> Vec<CardId> {
    let members: BTreeSet<&CardId> = public.iter().collect();
    let mut seen = BTreeSet::new();
    let mut order: Vec<CardId> = private
        .iter()
        .filter(|id| members.contains(id) && seen.insert(*id))
        .cloned()
        .collect();
    order.extend(public.iter().filter(|id| !seen.contains(id)).cloned());
    order
}

/// Run an overlay fetch tied to the room's session.
///
/// The fetched payload is delivered on `tx`. Destroying the session aborts
/// the fetch, so a late response can never land in another room.
pub fn spawn_overlay_fetch<F>(
    registry: &mut SessionRegistry,
    room_id: &RoomId,
    fetch: F,
    tx: mpsc::UnboundedSender<(RoomId, OverlayPayload)>,
) where
    F: Future<Output = TabletopResult<OverlayPayload>> + Send + 'static,
{
    let target = room_id.clone();
    let handle = tokio::spawn(async move {
        match fetch.await {
            Ok(payload) => {
                let _ = tx.send((target, payload));
            }
            Err(e) => warn!(room_id = %target, error = %e, "Overlay fetch failed"),
        }
    });
    registry.track_task(room_id, handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::state::two_player_table;
    use crate::types::state::RevealRecord;
    use crate::types::{CardIdentity, Position, ZoneKind};
    use std::time::Duration;

    fn room() -> RoomId {
        RoomId::from("r1")
    }

    /// Public view as any peer sees it: p1 holds h1, h2 (identities stripped),
    /// a bear on the battlefield, and an id in the library with no record
    fn public_state() -> GameState {
        let mut state = two_player_table();
        for id in ["h1", "h2"] {
            let mut card = Card::new(id, CardIdentity::named("x"), "p1", "hand-p1");
            card.identity = None;
            state.add_card(card, None).unwrap();
        }
        let mut bear = Card::new("bear", CardIdentity::named("Bear"), "p1", "battlefield-p1");
        bear.tapped = true;
        bear.position = Position::new(0.3, 0.4);
        bear.apply_counter_delta("+1/+1", 2, None);
        state.add_card(bear, None).unwrap();
        state
            .zones
            .get_mut(&ZoneId::from("library-p1"))
            .unwrap()
            .card_ids
            .extend([CardId::from("l1"), CardId::from("l2")]);
        state
    }

    fn full(version: u64, cards: Vec<OverlayCard>) -> OverlayPayload {
        OverlayPayload::Full(FullOverlay {
            schema_version: 1,
            overlay_version: version,
            room_id: room(),
            viewer_id: Some(PlayerId::from("p1")),
            cards,
            zone_card_orders: BTreeMap::new(),
            meta: None,
        })
    }

    fn diff(base: u64, version: u64) -> OverlayDiff {
        OverlayDiff {
            base_overlay_version: base,
            overlay_version: version,
            upserts: Vec::new(),
            removes: Vec::new(),
            zone_order_removals: Vec::new(),
            zone_card_orders: BTreeMap::new(),
            meta: None,
        }
    }

    fn merger() -> PrivateOverlayMerger {
        PrivateOverlayMerger::new(room(), PlayerId::from("p1"))
    }

    #[test]
    fn test_placeholders_fill_unknown_hidden_ids() {
        let merged = merger().merge(&public_state());
        let l1 = merged.card(&CardId::from("l1")).unwrap();
        assert!(l1.is_placeholder());
        assert_eq!(l1.zone_id, ZoneId::from("library-p1"));
        assert_eq!(l1.position, Position::origin());
        assert_eq!(merged.zone_len(&PlayerId::from("p1"), ZoneKind::Library), 2);
        merged.check_membership().unwrap();
    }

    #[test]
    fn test_full_overlay_resolves_identities() {
        let mut m = merger();
        m.apply_payload(&full(
            1,
            vec![
                OverlayCard::new("h1", "hand-p1", "p1", CardIdentity::named("Opt")),
                OverlayCard::new("l2", "library-p1", "p1", CardIdentity::named("Island")),
            ],
        ))
        .unwrap();
        let merged = m.merge(&public_state());
        assert_eq!(merged.card(&CardId::from("h1")).unwrap().display_name(), "Opt");
        assert_eq!(merged.card(&CardId::from("l2")).unwrap().display_name(), "Island");
        assert!(merged.card(&CardId::from("h2")).unwrap().is_placeholder());
    }

    #[test]
    fn test_public_fields_win_over_overlay() {
        let mut m = merger();
        let mut stale = OverlayCard::new("bear", "graveyard-p1", "p1", CardIdentity::named("Grizzly"));
        stale.position = Some(Position::new(0.9, 0.9));
        stale.controller_id = Some(PlayerId::from("p2"));
        stale.visibility = Some(Visibility::FaceDown {
            mode: crate::types::FaceDownMode::Morph,
        });
        m.apply_payload(&full(1, vec![stale])).unwrap();

        let public = public_state();
        let merged = m.merge(&public);
        let before = public.card(&CardId::from("bear")).unwrap();
        let after = merged.card(&CardId::from("bear")).unwrap();
        assert_eq!(after.display_name(), "Grizzly");
        assert_eq!(after.zone_id, before.zone_id);
        assert_eq!(after.position, before.position);
        assert_eq!(after.tapped, before.tapped);
        assert_eq!(after.counters, before.counters);
        assert_eq!(after.controller_id, before.controller_id);
        assert_eq!(after.visibility, before.visibility);
    }

    #[test]
    fn test_overlay_card_not_listed_publicly_is_ignored() {
        let mut m = merger();
        m.apply_payload(&full(
            1,
            vec![OverlayCard::new("gone", "hand-p1", "p1", CardIdentity::named("Ghost"))],
        ))
        .unwrap();
        let merged = m.merge(&public_state());
        assert!(merged.card(&CardId::from("gone")).is_none());
        merged.check_membership().unwrap();
    }

    #[test]
    fn test_stale_diff_rejected() {
        let mut m = merger();
        assert!(matches!(
            m.apply_payload(&OverlayPayload::Diff(diff(0, 1))),
            Err(TabletopError::StaleOverlayVersion { expected: None, received: 0 })
        ));
        m.apply_payload(&full(5, Vec::new())).unwrap();
        assert!(matches!(
            m.apply_payload(&OverlayPayload::Diff(diff(3, 4))),
            Err(TabletopError::StaleOverlayVersion { expected: Some(5), received: 3 })
        ));
        assert_eq!(m.version(), Some(5));
    }

    #[test]
    fn test_diff_applied_twice_is_idempotent() {
        let mut m = merger();
        m.apply_payload(&full(1, Vec::new())).unwrap();
        let mut d = diff(1, 2);
        d.upserts
            .push(OverlayCard::new("h2", "hand-p1", "p1", CardIdentity::named("Brainstorm")));
        let payload = OverlayPayload::Diff(d);

        assert!(m.apply_payload(&payload).unwrap());
        let once = m.merge(&public_state());
        assert!(!m.apply_payload(&payload).unwrap());
        let twice = m.merge(&public_state());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_diff_removals_and_zone_orders() {
        let mut m = merger();
        m.apply_payload(&full(
            1,
            vec![OverlayCard::new("h1", "hand-p1", "p1", CardIdentity::named("Opt"))],
        ))
        .unwrap();
        let mut d = diff(1, 2);
        d.removes.push(CardId::from("h1"));
        d.zone_card_orders.insert(
            ZoneId::from("library-p1"),
            vec![CardId::from("l2"), CardId::from("stale"), CardId::from("l1")],
        );
        m.apply_payload(&OverlayPayload::Diff(d)).unwrap();

        let merged = m.merge(&public_state());
        assert!(merged.card(&CardId::from("h1")).unwrap().is_placeholder());
        assert_eq!(
            merged.zone(&ZoneId::from("library-p1")).unwrap().card_ids,
            vec![CardId::from("l2"), CardId::from("l1")]
        );

        let mut d = diff(2, 3);
        d.zone_order_removals.push(ZoneId::from("library-p1"));
        m.apply_payload(&OverlayPayload::Diff(d)).unwrap();
        let merged = m.merge(&public_state());
        assert_eq!(
            merged.zone(&ZoneId::from("library-p1")).unwrap().card_ids,
            vec![CardId::from("l1"), CardId::from("l2")]
        );
    }

    #[test]
    fn test_reveal_projection_and_library_top_tail_rule() {
        let mut public = public_state();
        public.reveals.insert(
            CardId::from("h1"),
            RevealRecord {
                identity: CardIdentity::named("Counterspell"),
                library_top: false,
            },
        );
        // Recorded as library top, but l1 is no longer the tail
        public.reveals.insert(
            CardId::from("l1"),
            RevealRecord {
                identity: CardIdentity::named("Swamp"),
                library_top: true,
            },
        );
        let merged = merger().merge(&public);
        let h1 = merged.card(&CardId::from("h1")).unwrap();
        assert_eq!(h1.display_name(), "Counterspell");
        assert_eq!(h1.visibility, Visibility::RevealedToAll);
        assert!(merged.card(&CardId::from("l1")).unwrap().is_placeholder());

        public.reveals.insert(
            CardId::from("l2"),
            RevealRecord {
                identity: CardIdentity::named("Plains"),
                library_top: true,
            },
        );
        let merged = merger().merge(&public);
        assert_eq!(merged.card(&CardId::from("l2")).unwrap().display_name(), "Plains");
    }

    #[test]
    fn test_wrong_viewer_overlay_rejected() {
        let mut m = PrivateOverlayMerger::new(room(), PlayerId::from("p2"));
        assert!(matches!(
            m.apply_payload(&full(1, Vec::new())),
            Err(TabletopError::Validation(_))
        ));
        assert_eq!(m.version(), None);
    }

    #[tokio::test]
    async fn test_fetch_delivers_payload() {
        let mut registry = SessionRegistry::new(Duration::from_secs(30));
        registry.acquire(&room()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_overlay_fetch(&mut registry, &room(), async { Ok(full(1, Vec::new())) }, tx);
        let (target, payload) = rx.recv().await.unwrap();
        assert_eq!(target, room());
        assert_eq!(payload.overlay_version(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_aborts_fetch() {
        let mut registry = SessionRegistry::new(Duration::from_secs(30));
        registry.acquire(&room()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_overlay_fetch(
            &mut registry,
            &room(),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(full(1, Vec::new()))
            },
            tx,
        );
        registry.destroy(&room(), None);
        tokio::time::advance(Duration::from_secs(10)).await;
        // Sender was dropped with the aborted task
        assert!(rx.recv().await.is_none());
    }
}
