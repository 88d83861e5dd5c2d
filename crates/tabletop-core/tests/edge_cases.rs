//! Edge case and boundary condition tests
//!
//! These tests drive the public API through unusual inputs: empty
//! libraries, bounds, foreign overlays, malformed links and frames.

mod common;

use std::collections::BTreeMap;

use tabletop_core::overlay::{FullOverlay, OverlayDiff, OVERLAY_SCHEMA_VERSION};
use tabletop_core::{
    decode_inbound, verify_join_token, AuditOutcome, CardId, EngineConfig, MutationGateway,
    MutationOutcome, OverlayPayload, PlayerId, PlayerUpdate, PrivateOverlayMerger, RoleLink,
    RoomId, TabletopError, TokenError, VerifyOptions, ZoneId, ZoneKind,
};

use common::{fill, registry_with, two_player_table};

fn room() -> RoomId {
    RoomId::from("r1")
}

fn gateway(actor: &str) -> MutationGateway {
    MutationGateway::new(room(), PlayerId::from(actor), EngineConfig::default())
}

// ============================================================================
// Board Boundaries
// ============================================================================

#[test]
fn test_draw_from_empty_library_is_rejected() {
    let mut registry = registry_with(&room(), two_player_table());
    let mut p1 = gateway("p1");

    let outcome = p1.draw_cards(&mut registry, 1);
    assert!(matches!(outcome, MutationOutcome::Rejected(_)));
    assert_eq!(p1.audit().last().unwrap().outcome, AuditOutcome::Rejected);
    let state = registry.snapshot(&room()).unwrap();
    assert_eq!(state.zone_len(&PlayerId::from("p1"), ZoneKind::Hand), 0);
}

#[test]
fn test_draw_more_than_library_moves_nothing() {
    let mut state = two_player_table();
    fill(&mut state, "l", "library-p1", "p1", 2);
    let mut registry = registry_with(&room(), state);
    let mut p1 = gateway("p1");

    assert!(matches!(p1.draw_cards(&mut registry, 3), MutationOutcome::Rejected(_)));
    let state = registry.snapshot(&room()).unwrap();
    assert_eq!(state.zone_len(&PlayerId::from("p1"), ZoneKind::Library), 2);
    assert_eq!(state.zone_len(&PlayerId::from("p1"), ZoneKind::Hand), 0);
}

#[test]
fn test_life_clamps_at_both_bounds() {
    let mut registry = registry_with(&room(), two_player_table());
    let mut p1 = gateway("p1");
    let me = PlayerId::from("p1");

    p1.update_player(&mut registry, &me, PlayerUpdate::life(5_000));
    assert_eq!(registry.snapshot(&room()).unwrap().player(&me).unwrap().life, 999);

    p1.update_player(&mut registry, &me, PlayerUpdate::life_delta(i32::MIN));
    assert_eq!(registry.snapshot(&room()).unwrap().player(&me).unwrap().life, -999);
}

#[test]
fn test_removing_more_counters_than_present_floors_at_zero() {
    let mut state = two_player_table();
    fill(&mut state, "b", "battlefield-p1", "p1", 1);
    let mut registry = registry_with(&room(), state);
    let mut p1 = gateway("p1");
    let card = CardId::from("b0");

    p1.add_counter(&mut registry, &card, "charge", 2, Some("yellow"));
    assert_eq!(p1.remove_counter(&mut registry, &card, "charge", 10), MutationOutcome::Committed);
    let state = registry.snapshot(&room()).unwrap();
    assert!(state.card(&card).unwrap().counters.is_empty());
    // The color registration outlives the counter
    assert_eq!(state.counter_colors["charge"], "yellow");
}

#[test]
fn test_reorder_with_foreign_id_is_rejected() {
    let mut state = two_player_table();
    fill(&mut state, "l", "library-p1", "p1", 2);
    let mut registry = registry_with(&room(), state);
    let mut p1 = gateway("p1");

    let outcome = p1.reorder_zone(
        &mut registry,
        &ZoneId::from("library-p1"),
        vec![CardId::from("l1"), CardId::from("zz")],
    );
    assert!(matches!(outcome, MutationOutcome::Rejected(_)));
}

#[test]
fn test_operations_on_unknown_entities_are_rejected_not_denied() {
    let mut registry = registry_with(&room(), two_player_table());
    let mut p1 = gateway("p1");
    let ghost = CardId::from("ghost");

    assert!(matches!(p1.tap_card(&mut registry, &ghost, true), MutationOutcome::Rejected(_)));
    assert!(matches!(
        p1.update_player(&mut registry, &PlayerId::from("nobody"), PlayerUpdate::life(1)),
        MutationOutcome::Rejected(_)
    ));
}

#[test]
fn test_only_host_can_lock() {
    let mut state = two_player_table();
    state.meta.host_id = Some(PlayerId::from("p1"));
    let mut registry = registry_with(&room(), state);

    assert!(matches!(gateway("p2").set_room_lock(&mut registry, true), MutationOutcome::Denied(_)));
    assert_eq!(gateway("p1").set_room_lock(&mut registry, true), MutationOutcome::Committed);
    assert!(registry.snapshot(&room()).unwrap().meta.locked);
}

// ============================================================================
// Sessions
// ============================================================================

#[test]
fn test_set_active_unknown_room_is_ignored() {
    let mut registry = registry_with(&room(), two_player_table());
    registry.set_active(Some(RoomId::from("nowhere")));
    assert_eq!(registry.active(), Some(&room()));
}

#[test]
fn test_release_unknown_room_is_none() {
    let mut registry = registry_with(&room(), two_player_table());
    assert_eq!(registry.release(&RoomId::from("nowhere")), None);
    assert!(!registry.destroy(&RoomId::from("nowhere"), None));
}

// ============================================================================
// Overlays
// ============================================================================

fn full(room_id: &str, viewer: &str, version: u64) -> OverlayPayload {
    OverlayPayload::Full(FullOverlay {
        schema_version: OVERLAY_SCHEMA_VERSION,
        overlay_version: version,
        room_id: RoomId::from(room_id),
        viewer_id: Some(PlayerId::from(viewer)),
        cards: vec![],
        zone_card_orders: BTreeMap::new(),
        meta: None,
    })
}

fn diff(base: u64, version: u64) -> OverlayPayload {
    OverlayPayload::Diff(OverlayDiff {
        base_overlay_version: base,
        overlay_version: version,
        upserts: vec![],
        removes: vec![],
        zone_order_removals: vec![],
        zone_card_orders: BTreeMap::new(),
        meta: None,
    })
}

#[test]
fn test_overlay_for_other_room_or_viewer_is_refused() {
    let mut merger = PrivateOverlayMerger::new(room(), PlayerId::from("p1"));
    assert!(matches!(
        merger.apply_payload(&full("r2", "p1", 1)),
        Err(TabletopError::Validation(_))
    ));
    assert!(matches!(
        merger.apply_payload(&full("r1", "p2", 1)),
        Err(TabletopError::Validation(_))
    ));
    assert_eq!(merger.version(), None);
}

#[test]
fn test_diff_before_any_full_overlay_is_stale() {
    let mut merger = PrivateOverlayMerger::new(room(), PlayerId::from("p1"));
    match merger.apply_payload(&diff(0, 1)) {
        Err(TabletopError::StaleOverlayVersion { expected, received }) => {
            assert_eq!(expected, None);
            assert_eq!(received, 0);
        }
        other => panic!("expected stale overlay, got {other:?}"),
    }
}

#[test]
fn test_diff_with_gap_is_stale() {
    let mut merger = PrivateOverlayMerger::new(room(), PlayerId::from("p1"));
    merger.apply_payload(&full("r1", "p1", 3)).unwrap();
    assert!(merger.apply_payload(&diff(3, 4)).unwrap());
    assert!(matches!(
        merger.apply_payload(&diff(5, 6)),
        Err(TabletopError::StaleOverlayVersion { expected: Some(4), received: 5 })
    ));
    // A later full overlay recovers
    merger.apply_payload(&full("r1", "p1", 6)).unwrap();
    assert_eq!(merger.version(), Some(6));
}

#[test]
fn test_placeholders_fill_unknown_hidden_ids() {
    let mut public = two_player_table();
    public
        .zones
        .get_mut(&ZoneId::from("library-p2"))
        .unwrap()
        .card_ids
        .push(CardId::from("mystery"));
    let merged = PrivateOverlayMerger::new(room(), PlayerId::from("p1")).merge(&public);
    let card = merged.card(&CardId::from("mystery")).unwrap();
    assert!(card.is_placeholder());
    assert_eq!(card.owner_id, PlayerId::from("p2"));
    merged.check_membership().unwrap();
}

// ============================================================================
// Wire and Links
// ============================================================================

#[test]
fn test_malformed_frames() {
    for raw in ["", "[]", "{}", r#"{"type":"ack"}"#, r#"{"type":"ack","intentId":"not-a-ulid","ok":true}"#] {
        assert!(
            matches!(decode_inbound(raw), Err(TabletopError::Validation(_))),
            "frame {raw:?} should be refused"
        );
    }
}

#[test]
fn test_token_whitespace_is_missing() {
    let opts = VerifyOptions::default();
    assert_eq!(verify_join_token(Some("\t \n"), b"k", opts), Err(TokenError::Missing));
    assert_eq!(TokenError::Missing.to_string(), "missing token");
    assert_eq!(TokenError::Expired.to_string(), "token expired");
}

#[test]
fn test_bad_role_links() {
    for fragment in ["", "#", "#k=", "#k=zz", "#s=00", "#x=1234"] {
        assert!(RoleLink::parse_fragment(fragment).is_err(), "{fragment:?}");
    }
}
