//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::time::Duration;

use tabletop_core::types::{Card, CardIdentity, GameState, Player, Zone, ZoneKind};
use tabletop_core::{RoomId, SessionRegistry};

pub const MAX_AGE: Duration = Duration::from_secs(30);

pub const KINDS: [ZoneKind; 4] = [
    ZoneKind::Hand,
    ZoneKind::Library,
    ZoneKind::Battlefield,
    ZoneKind::Graveyard,
];

pub fn zone_id(kind: ZoneKind, player: &str) -> String {
    format!("{kind}-{player}")
}

/// p1 and p2 seated, each with hand, library, battlefield and graveyard
pub fn two_player_table() -> GameState {
    let mut state = GameState::new();
    for (id, name) in [("p1", "Alice"), ("p2", "Bob")] {
        state.upsert_player(Player::new(id, name, 40));
        for kind in KINDS {
            state.add_zone(Zone::new(zone_id(kind, id), kind, id)).unwrap();
        }
    }
    state
}

/// Add `count` named cards to `zone`, ids `<prefix>0..`
pub fn fill(state: &mut GameState, prefix: &str, zone: &str, owner: &str, count: usize) {
    for i in 0..count {
        state
            .add_card(
                Card::new(
                    format!("{prefix}{i}"),
                    CardIdentity::named(format!("{prefix} card {i}")),
                    owner,
                    zone,
                ),
                None,
            )
            .unwrap();
    }
}

/// Registry with `room` active, ready and seeded with `state`
pub fn registry_with(room: &RoomId, state: GameState) -> SessionRegistry {
    let mut registry = SessionRegistry::new(MAX_AGE);
    registry.acquire(room).unwrap();
    registry.set_active(Some(room.clone()));
    registry.run_mutation(room, "seed", move |doc| {
        doc.mutate(move |s| {
            *s = state;
            Ok(())
        })
    });
    registry
}
