//! Permission rules
//!
//! Pure decisions over (actor, card, zone, player). Nothing here has state or
//! fails: every check returns a [`PermissionResult`] and callers log and drop
//! denied operations.

use crate::types::{Card, PlayerId, PlayerUpdate, Player, RoomMeta, Visibility, Zone};

/// Outcome of a permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionResult {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PermissionResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    fn from_bool(allowed: bool, reason: &str) -> Self {
        if allowed {
            Self::allow()
        } else {
            Self::deny(reason)
        }
    }

    /// Denial reason, or an empty string when allowed
    pub fn reason_str(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

/// Public zones are visible to all; hidden zones only to their owner.
///
/// Per-card reveals are decided by [`can_view_card`], not here.
pub fn can_view_zone(actor: &PlayerId, zone: &Zone) -> PermissionResult {
    if !zone.is_hidden() {
        return PermissionResult::allow();
    }
    PermissionResult::from_bool(
        actor == &zone.owner_id,
        "Hidden zone is only visible to its owner",
    )
}

/// Whether `actor` may see the identity of `card` sitting in `zone`
pub fn can_view_card(actor: &PlayerId, card: &Card, zone: &Zone) -> PermissionResult {
    if card.visibility.reveals_to(actor) {
        return PermissionResult::allow();
    }
    if let Visibility::FaceDown { .. } = card.visibility {
        return PermissionResult::from_bool(
            actor == &card.controller_id,
            "Face-down card is only visible to its controller",
        );
    }
    can_view_zone(actor, zone)
}

/// Controller may move the card anywhere; anyone may rearrange between two of
/// their own zones.
pub fn can_move_card(
    actor: &PlayerId,
    card: &Card,
    from_zone: &Zone,
    to_zone: &Zone,
) -> PermissionResult {
    if actor == &card.controller_id {
        return PermissionResult::allow();
    }
    if actor == &from_zone.owner_id && actor == &to_zone.owner_id {
        return PermissionResult::allow();
    }
    PermissionResult::deny("Only the controller or the owner of both zones can move this card")
}

/// Tapping follows control, not ownership
pub fn can_tap_card(actor: &PlayerId, card: &Card, zone: &Zone) -> PermissionResult {
    can_modify_card_state(actor, card, zone)
}

/// Counters, rotation, face state and tapping all follow control.
///
/// The zone does not matter: the rule is the same for hidden and public zones.
pub fn can_modify_card_state(actor: &PlayerId, card: &Card, _zone: &Zone) -> PermissionResult {
    PermissionResult::from_bool(
        actor == &card.controller_id,
        "Only the card's controller can change its state",
    )
}

/// Tokens can only be created in zones the actor owns
pub fn can_create_token(actor: &PlayerId, zone: &Zone) -> PermissionResult {
    PermissionResult::from_bool(
        actor == &zone.owner_id,
        "Tokens can only be created in your own zones",
    )
}

/// Zones can only be added for the actor themselves
pub fn can_add_zone(actor: &PlayerId, zone: &Zone) -> PermissionResult {
    PermissionResult::from_bool(
        actor == &zone.owner_id,
        "Zones can only be created for yourself",
    )
}

/// Only a zone's owner may rearrange it or publish its top card
pub fn can_reorder_zone(actor: &PlayerId, zone: &Zone) -> PermissionResult {
    PermissionResult::from_bool(
        actor == &zone.owner_id,
        "Only the zone's owner can rearrange it",
    )
}

/// Players edit their own record freely; another player's record only
/// through commander-damage entries attributed to the actor.
pub fn can_update_player(
    actor: &PlayerId,
    player: &Player,
    updates: &PlayerUpdate,
) -> PermissionResult {
    if actor == &player.id {
        return PermissionResult::allow();
    }
    if updates.touches_more_than_commander_damage() {
        return PermissionResult::deny("Cannot change another player's record");
    }
    if updates.commander_damage.keys().any(|source| source != actor) {
        return PermissionResult::deny(
            "Commander damage on another player must come from your own commander",
        );
    }
    PermissionResult::allow()
}

/// Only the host may lock or unlock the room
pub fn can_lock_room(actor: &PlayerId, meta: &RoomMeta) -> PermissionResult {
    PermissionResult::from_bool(
        meta.host_id.as_ref() == Some(actor),
        "Only the host can lock the room",
    )
}
