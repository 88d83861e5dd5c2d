//! Mutation gateway: the only way local actions reach the board
//!
//! ## Flow
//!
//! ```text
//! BoardOp ─▶ snapshot (room doc if it can run, else local copy)
//!         ─▶ authorize ── denied ──▶ audit + MutationOutcome::Denied
//!         ─▶ dry run    ── invalid ─▶ audit + MutationOutcome::Rejected
//!         ─▶ run_mutation (re-authorize + apply inside the transaction)
//!              ├── ran    ─▶ MutationOutcome::Committed
//!              └── queued ─▶ apply to local copy, MutationOutcome::AppliedLocally
//! ```
//!
//! The transaction re-reads the document and re-runs both the permission
//! check and the domain rules, so counter deltas land on the document's
//! current value rather than the value seen when the action was issued.
//! A queued write that fails there surfaces as
//! [`SessionEvent::MutationRejected`]; feeding it to
//! [`MutationGateway::handle_session_event`] audits it and drops the local
//! copy's optimistic effect.

use chrono::Utc;
use tracing::{debug, info};

use crate::audit::{AuditEntry, AuditLog, AuditOutcome};
use crate::config::EngineConfig;
use crate::error::TabletopError;
use crate::ops::BoardOp;
use crate::session::{SessionEvent, SessionRegistry};
use crate::types::{
    Card, CardId, CardIdentity, GameState, Placement, Player, PlayerId, PlayerUpdate, Position, RoomId,
    Visibility, Zone, ZoneId,
};

/// Result of a gateway operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Written to the room document
    Committed,
    /// No ready session; the change lives in the local copy and the document
    /// write is queued
    AppliedLocally,
    /// Permission rules refused the action; nothing changed
    Denied(String),
    /// The action broke a domain rule or referenced something unknown
    Rejected(String),
}

impl MutationOutcome {
    /// Whether the displayed state changed
    pub fn is_applied(&self) -> bool {
        matches!(self, MutationOutcome::Committed | MutationOutcome::AppliedLocally)
    }
}

/// Per-room, per-actor entry point for board mutations
pub struct MutationGateway {
    room_id: RoomId,
    actor: PlayerId,
    config: EngineConfig,
    /// Optimistic copy used while the room document cannot take writes
    local: GameState,
    audit: AuditLog,
}

impl MutationGateway {
    pub fn new(room_id: RoomId, actor: PlayerId, config: EngineConfig) -> Self {
        let audit = AuditLog::new(config.audit_capacity);
        Self {
            room_id,
            actor,
            config,
            local: GameState::new(),
            audit,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn actor(&self) -> &PlayerId {
        &self.actor
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The optimistic local copy
    pub fn local_state(&self) -> &GameState {
        &self.local
    }

    /// Replace the local copy, e.g. after a full resync
    pub fn reset_local(&mut self, state: GameState) {
        self.local = state;
    }

    /// Authorize, validate and commit one operation
    pub fn execute(&mut self, registry: &mut SessionRegistry, op: BoardOp) -> MutationOutcome {
        let runnable = registry.can_run(&self.room_id);
        let before = if runnable {
            registry
                .snapshot(&self.room_id)
                .unwrap_or_else(|| self.local.clone())
        } else {
            self.local.clone()
        };

        let permission = match op.authorize(&self.actor, &before) {
            Ok(permission) => permission,
            Err(e) => return self.reject(&op, &before, e),
        };
        if !permission.allowed {
            let reason = permission.reason_str().to_string();
            self.record(&op, AuditOutcome::Denied, Some(reason.clone()), &before, None);
            return MutationOutcome::Denied(reason);
        }

        let life_bounds = self.config.life_bounds();
        let mut after = before.clone();
        if let Err(e) = op.apply(&mut after, &life_bounds) {
            return self.reject(&op, &before, e);
        }

        let actor = self.actor.clone();
        let doc_op = op.clone();
        let ran = registry.run_mutation(&self.room_id, op.label(), move |doc| {
            doc.mutate(|state| {
                let permission = doc_op.authorize(&actor, state)?;
                if !permission.allowed {
                    return Err(TabletopError::PermissionDenied(permission.reason_str().to_string()));
                }
                doc_op.apply(state, &life_bounds)
            })
        });

        let outcome = if ran {
            self.local = registry.snapshot(&self.room_id).unwrap_or(after);
            AuditOutcome::Committed
        } else {
            debug!(room_id = %self.room_id, operation = op.label(), "Applied to local copy");
            self.local = after;
            AuditOutcome::AppliedLocally
        };
        let local = self.local.clone();
        self.record(&op, outcome, None, &before, Some(&local));

        match outcome {
            AuditOutcome::Committed => MutationOutcome::Committed,
            _ => MutationOutcome::AppliedLocally,
        }
    }

    /// Audit a write the room document refused after it was queued here,
    /// then re-adopt the document's state.
    ///
    /// Returns true when the event concerned this gateway's room.
    pub fn handle_session_event(&mut self, registry: &SessionRegistry, event: &SessionEvent) -> bool {
        let SessionEvent::MutationRejected {
            room_id,
            label,
            reason,
        } = event
        else {
            return false;
        };
        if room_id != &self.room_id {
            return false;
        }
        self.audit.record(AuditEntry {
            at: Utc::now(),
            room_id: self.room_id.clone(),
            actor: self.actor.clone(),
            operation: label.clone(),
            outcome: AuditOutcome::Rejected,
            reason: Some(reason.clone()),
            before: None,
            after: None,
        });
        if let Some(snapshot) = registry.snapshot(&self.room_id) {
            info!(room_id = %self.room_id, operation = %label, "Local copy resynced after rejected write");
            self.local = snapshot;
        }
        true
    }

    fn reject(&mut self, op: &BoardOp, before: &GameState, error: TabletopError) -> MutationOutcome {
        let reason = error.to_string();
        self.record(op, AuditOutcome::Rejected, Some(reason.clone()), before, None);
        MutationOutcome::Rejected(reason)
    }

    fn record(
        &mut self,
        op: &BoardOp,
        outcome: AuditOutcome,
        reason: Option<String>,
        before: &GameState,
        after: Option<&GameState>,
    ) {
        self.audit.record(AuditEntry {
            at: Utc::now(),
            room_id: self.room_id.clone(),
            actor: self.actor.clone(),
            operation: op.label().to_string(),
            outcome,
            reason,
            before: op.subject(before),
            after: after.and_then(|s| op.subject(s)),
        });
    }

    // ------------------------------------------------------------------
    // Semantic operations
    // ------------------------------------------------------------------

    pub fn add_counter(
        &mut self,
        registry: &mut SessionRegistry,
        card_id: &CardId,
        kind: &str,
        amount: u32,
        color: Option<&str>,
    ) -> MutationOutcome {
        self.execute(
            registry,
            BoardOp::AddCounter {
                card_id: card_id.clone(),
                kind: kind.to_string(),
                delta: i64::from(amount),
                color: color.map(str::to_string),
            },
        )
    }

    pub fn remove_counter(
        &mut self,
        registry: &mut SessionRegistry,
        card_id: &CardId,
        kind: &str,
        amount: u32,
    ) -> MutationOutcome {
        self.execute(
            registry,
            BoardOp::AddCounter {
                card_id: card_id.clone(),
                kind: kind.to_string(),
                delta: -i64::from(amount),
                color: None,
            },
        )
    }

    /// Move a card; `placement.identity` is needed when a concealed card goes
    /// public
    pub fn move_card(
        &mut self,
        registry: &mut SessionRegistry,
        card_id: &CardId,
        to_zone_id: &ZoneId,
        placement: Placement,
    ) -> MutationOutcome {
        let Placement {
            index,
            position,
            face_down,
            identity,
        } = placement;
        self.execute(
            registry,
            BoardOp::MoveCard {
                card_id: card_id.clone(),
                to_zone_id: to_zone_id.clone(),
                index,
                position,
                face_down,
                identity,
            },
        )
    }

    pub fn tap_card(
        &mut self,
        registry: &mut SessionRegistry,
        card_id: &CardId,
        tapped: bool,
    ) -> MutationOutcome {
        self.execute(
            registry,
            BoardOp::TapCard {
                card_id: card_id.clone(),
                tapped,
            },
        )
    }

    /// Reorder a zone; `order` must be a permutation of its current ids
    pub fn reorder_zone(
        &mut self,
        registry: &mut SessionRegistry,
        zone_id: &ZoneId,
        order: Vec<CardId>,
    ) -> MutationOutcome {
        self.execute(
            registry,
            BoardOp::ReorderZone {
                zone_id: zone_id.clone(),
                order,
            },
        )
    }

    /// Seat the actor with the configured starting life
    pub fn add_player(&mut self, registry: &mut SessionRegistry, name: &str) -> MutationOutcome {
        let player = Player::new(self.actor.clone(), name, self.config.starting_life);
        self.execute(registry, BoardOp::AddPlayer { player })
    }

    pub fn update_player(
        &mut self,
        registry: &mut SessionRegistry,
        player_id: &PlayerId,
        update: PlayerUpdate,
    ) -> MutationOutcome {
        self.execute(
            registry,
            BoardOp::UpdatePlayer {
                player_id: player_id.clone(),
                update,
            },
        )
    }

    pub fn add_zone(&mut self, registry: &mut SessionRegistry, zone: Zone) -> MutationOutcome {
        self.execute(registry, BoardOp::AddZone { zone })
    }

    pub fn add_card(
        &mut self,
        registry: &mut SessionRegistry,
        card: Card,
        index: Option<usize>,
    ) -> MutationOutcome {
        self.execute(registry, BoardOp::AddCard { card, index })
    }

    /// Create a token on one of the actor's zones
    pub fn create_token(
        &mut self,
        registry: &mut SessionRegistry,
        card_id: CardId,
        identity: CardIdentity,
        zone_id: &ZoneId,
        position: Position,
    ) -> MutationOutcome {
        let mut card = Card::new(card_id, identity, self.actor.clone(), zone_id.clone());
        card.is_token = true;
        card.position = position;
        self.execute(registry, BoardOp::AddCard { card, index: None })
    }

    pub fn set_view_scale(&mut self, registry: &mut SessionRegistry, scale: f64) -> MutationOutcome {
        let player_id = self.actor.clone();
        self.execute(registry, BoardOp::SetViewScale { player_id, scale })
    }

    pub fn set_room_lock(&mut self, registry: &mut SessionRegistry, locked: bool) -> MutationOutcome {
        self.execute(registry, BoardOp::SetRoomLock { locked })
    }

    pub fn reveal_card(
        &mut self,
        registry: &mut SessionRegistry,
        card_id: &CardId,
        visibility: Visibility,
        identity: Option<CardIdentity>,
    ) -> MutationOutcome {
        self.execute(
            registry,
            BoardOp::RevealCard {
                card_id: card_id.clone(),
                visibility,
                identity,
            },
        )
    }

    pub fn publish_library_top(
        &mut self,
        registry: &mut SessionRegistry,
        zone_id: &ZoneId,
        identity: Option<CardIdentity>,
    ) -> MutationOutcome {
        self.execute(
            registry,
            BoardOp::PublishLibraryTop {
                zone_id: zone_id.clone(),
                identity,
            },
        )
    }

    pub fn draw_cards(&mut self, registry: &mut SessionRegistry, count: u32) -> MutationOutcome {
        let player_id = self.actor.clone();
        self.execute(registry, BoardOp::DrawCards { player_id, count })
    }
}
