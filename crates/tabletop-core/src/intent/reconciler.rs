//! Replays pending intents over authoritative snapshots
//!
//! The reconciler keeps the latest authoritative public state and the list
//! of intents this peer has submitted but not seen resolved. The displayed
//! state is always `replay(authoritative, pending)`: nothing is patched field
//! by field, so a late, reordered or coalesced snapshot converges without
//! the local view jumping backwards.

use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::expectation::{apply_with_expectation, Expectation};
use super::{Intent, IntentStatus};
use crate::config::EngineConfig;
use crate::error::{TabletopError, TabletopResult};
use crate::ops::BoardOp;
use crate::session::SessionEvent;
use crate::types::{GameState, IntentId, PlayerId, RoomId};

/// Resolved statuses remembered for [`IntentReconciler::status`]
const RESOLVED_CAPACITY: usize = 1024;

/// Raised when a pending intent is abandoned without confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileFailure {
    pub intent_id: IntentId,
    pub operation: &'static str,
    pub attempts: u32,
    pub reason: String,
}

struct PendingIntent {
    intent: Intent,
    actor: PlayerId,
    submitted_at: Instant,
    /// Replays performed without the authoritative state catching up
    attempts: u32,
    expectation: Option<Expectation>,
}

/// Tracks optimistic intents for one room
pub struct IntentReconciler {
    room_id: RoomId,
    pending: Vec<PendingIntent>,
    resolved: HashMap<IntentId, IntentStatus>,
    /// Resolution order, oldest first; evicted past [`RESOLVED_CAPACITY`]
    resolved_order: VecDeque<IntentId>,
    authoritative: GameState,
    displayed: GameState,
    failures: Vec<ReconcileFailure>,
    life_bounds: RangeInclusive<i32>,
    retry_window: Duration,
    max_attempts: u32,
}

impl IntentReconciler {
    pub fn new(room_id: RoomId, config: &EngineConfig) -> Self {
        Self {
            room_id,
            pending: Vec::new(),
            resolved: HashMap::new(),
            resolved_order: VecDeque::new(),
            authoritative: GameState::new(),
            displayed: GameState::new(),
            failures: Vec::new(),
            life_bounds: config.life_bounds(),
            retry_window: config.intent_retry_window(),
            max_attempts: config.max_intent_attempts,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Apply `op` for `actor` optimistically and track it until resolved.
    ///
    /// Fails without recording anything when `actor` may not perform `op` or
    /// when it does not apply to the displayed state.
    pub fn submit(&mut self, actor: &PlayerId, op: BoardOp) -> TabletopResult<Intent> {
        let permission = op.authorize(actor, &self.displayed)?;
        if !permission.allowed {
            warn!(
                room_id = %self.room_id,
                %actor,
                operation = op.label(),
                reason = permission.reason_str(),
                "Intent denied"
            );
            return Err(TabletopError::PermissionDenied(permission.reason_str().to_string()));
        }
        let (after, expectation) =
            apply_with_expectation(&op, &self.authoritative, &self.displayed, &self.life_bounds)?;
        let intent = Intent::new(op);
        debug!(
            room_id = %self.room_id,
            intent_id = %intent.id,
            operation = intent.op.label(),
            "Intent submitted"
        );
        self.displayed = after;
        self.pending.push(PendingIntent {
            intent: intent.clone(),
            actor: actor.clone(),
            submitted_at: Instant::now(),
            attempts: 0,
            expectation,
        });
        Ok(intent)
    }

    /// Resolve an intent from a server/peer acknowledgement.
    ///
    /// Returns false for ids that are not pending.
    pub fn acknowledge(&mut self, id: &IntentId, ok: bool, error: Option<&str>) -> bool {
        let Some(index) = self.pending.iter().position(|p| &p.intent.id == id) else {
            debug!(room_id = %self.room_id, intent_id = %id, "Ack for unknown intent");
            return false;
        };
        let entry = self.pending.remove(index);
        if ok {
            self.resolve(*id, IntentStatus::Acknowledged);
            debug!(room_id = %self.room_id, intent_id = %id, "Intent acknowledged");
        } else {
            self.resolve(*id, IntentStatus::Rejected);
            warn!(
                room_id = %self.room_id,
                intent_id = %id,
                operation = entry.intent.op.label(),
                error = error.unwrap_or("unspecified"),
                "Intent rejected"
            );
            // Drop the optimistic effect
            let base = self.authoritative.clone();
            self.apply_pending_intents(&base);
        }
        true
    }

    /// Replay still-pending intents over `snapshot` in submission order.
    ///
    /// Intents the snapshot already reflects, and intents that no longer
    /// apply, become Superseded. Intents past the retry window or attempt
    /// bound, and intents their actor may no longer perform, become Rejected
    /// and raise a [`ReconcileFailure`].
    pub fn apply_pending_intents(&mut self, snapshot: &GameState) -> GameState {
        let now = Instant::now();
        let mut view = snapshot.clone();
        let mut kept = Vec::with_capacity(self.pending.len());

        for mut entry in std::mem::take(&mut self.pending) {
            let id = entry.intent.id;
            let reflected = entry
                .expectation
                .as_ref()
                .map(|e| e.is_met(snapshot))
                .unwrap_or(false);
            if reflected {
                debug!(room_id = %self.room_id, intent_id = %id, "Intent already reflected");
                self.resolve(id, IntentStatus::Superseded);
                continue;
            }

            let expired = now.duration_since(entry.submitted_at) > self.retry_window;
            if expired || entry.attempts >= self.max_attempts {
                let reason = if expired {
                    "retry window elapsed"
                } else {
                    "replay attempts exhausted"
                };
                self.fail(&entry, reason.to_string());
                continue;
            }

            match entry.intent.op.authorize(&entry.actor, &view) {
                Ok(permission) if !permission.allowed => {
                    self.fail(&entry, format!("permission revoked: {}", permission.reason_str()));
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(room_id = %self.room_id, intent_id = %id, error = %e, "Intent no longer applies");
                    self.resolve(id, IntentStatus::Superseded);
                    continue;
                }
            }

            let mut next = view.clone();
            match entry.intent.op.apply(&mut next, &self.life_bounds) {
                Ok(()) => {
                    entry.attempts += 1;
                    view = next;
                    kept.push(entry);
                }
                Err(e) => {
                    debug!(room_id = %self.room_id, intent_id = %id, error = %e, "Intent no longer applies");
                    self.resolve(id, IntentStatus::Superseded);
                }
            }
        }

        self.pending = kept;
        self.displayed = view.clone();
        view
    }

    /// Reject a pending intent that will never be confirmed
    fn fail(&mut self, entry: &PendingIntent, reason: String) {
        warn!(
            room_id = %self.room_id,
            intent_id = %entry.intent.id,
            attempts = entry.attempts,
            reason = %reason,
            "Dropping unconfirmed intent"
        );
        self.resolve(entry.intent.id, IntentStatus::Rejected);
        self.failures.push(ReconcileFailure {
            intent_id: entry.intent.id,
            operation: entry.intent.op.label(),
            attempts: entry.attempts,
            reason,
        });
    }

    fn resolve(&mut self, id: IntentId, status: IntentStatus) {
        if self.resolved.insert(id, status).is_none() {
            self.resolved_order.push_back(id);
        }
        while self.resolved_order.len() > RESOLVED_CAPACITY {
            if let Some(oldest) = self.resolved_order.pop_front() {
                self.resolved.remove(&oldest);
            }
        }
    }

    /// Store a new authoritative snapshot and rebuild the displayed state.
    ///
    /// `previous_base` names the snapshot the sender built `next` on. When it
    /// disagrees with the stored state the update arrived out of sequence;
    /// `next` is still adopted and `false` tells the caller to resync.
    pub fn set_authoritative_state(&mut self, next: GameState, previous_base: Option<&GameState>) -> bool {
        let in_sequence = previous_base.map(|b| b == &self.authoritative).unwrap_or(true);
        if !in_sequence {
            warn!(room_id = %self.room_id, "Authoritative snapshot out of sequence");
        }
        self.authoritative = next;
        let base = self.authoritative.clone();
        self.apply_pending_intents(&base);
        in_sequence
    }

    pub fn public_authoritative_state(&self) -> &GameState {
        &self.authoritative
    }

    /// Authoritative state with pending intents replayed on top
    pub fn displayed_state(&self) -> &GameState {
        &self.displayed
    }

    /// Drop every pending intent; reconnection resyncs from scratch
    pub fn discard_all(&mut self) -> usize {
        let count = self.pending.len();
        for entry in std::mem::take(&mut self.pending) {
            self.resolve(entry.intent.id, IntentStatus::Superseded);
        }
        self.displayed = self.authoritative.clone();
        if count > 0 {
            info!(room_id = %self.room_id, count, "Discarded pending intents");
        }
        count
    }

    /// React to session lifecycle; a destroyed session abandons its intents
    pub fn handle_session_event(&mut self, event: &SessionEvent) {
        if let SessionEvent::Destroyed { room_id } = event {
            if room_id == &self.room_id {
                self.discard_all();
            }
        }
    }

    pub fn status(&self, id: &IntentId) -> Option<IntentStatus> {
        if self.pending.iter().any(|p| &p.intent.id == id) {
            return Some(IntentStatus::Pending);
        }
        self.resolved.get(id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending intents in submission order
    pub fn pending_intents(&self) -> impl Iterator<Item = &Intent> {
        self.pending.iter().map(|p| &p.intent)
    }

    /// Failures raised since the last call
    pub fn take_failures(&mut self) -> Vec<ReconcileFailure> {
        std::mem::take(&mut self.failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::state::two_player_table;
    use crate::types::{Card, CardId, CardIdentity, PlayerId, PlayerUpdate, ZoneKind};

    fn p1() -> PlayerId {
        PlayerId::from("p1")
    }

    fn base() -> GameState {
        let mut state = two_player_table();
        for i in 0..3 {
            state
                .add_card(
                    Card::new(format!("c{i}"), CardIdentity::named("Island"), "p1", "library-p1"),
                    None,
                )
                .unwrap();
        }
        state
            .add_card(
                Card::new("bear", CardIdentity::named("Bear"), "p1", "battlefield-p1"),
                None,
            )
            .unwrap();
        state
    }

    fn reconciler() -> IntentReconciler {
        let mut r = IntentReconciler::new(RoomId::from("r1"), &EngineConfig::default());
        r.set_authoritative_state(base(), None);
        r
    }

    fn draw_one() -> BoardOp {
        BoardOp::DrawCards {
            player_id: p1(),
            count: 1,
        }
    }

    #[test]
    fn test_draw_reflected_by_snapshot_is_not_doubled() {
        let mut r = reconciler();
        let before = r.displayed_state().zone_len(&p1(), ZoneKind::Hand);
        let intent = r.submit(&p1(), draw_one()).unwrap();
        assert_eq!(r.displayed_state().zone_len(&p1(), ZoneKind::Hand), before + 1);

        // The authoritative state catches up with the same draw
        let mut confirmed = base();
        draw_one().apply(&mut confirmed, &(-999..=999)).unwrap();
        r.set_authoritative_state(confirmed, None);

        assert_eq!(r.displayed_state().zone_len(&p1(), ZoneKind::Hand), before + 1);
        assert_eq!(r.status(&intent.id), Some(IntentStatus::Superseded));
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_unreflected_intent_is_replayed_over_new_snapshot() {
        let mut r = reconciler();
        r.submit(&p1(), BoardOp::TapCard {
            card_id: CardId::from("bear"),
            tapped: true,
        })
        .unwrap();

        // Unrelated remote change
        let mut next = base();
        next.update_player(&p1(), &PlayerUpdate::life(30), &(-999..=999))
            .unwrap();
        r.set_authoritative_state(next, None);

        let shown = r.displayed_state();
        assert!(shown.card(&CardId::from("bear")).unwrap().tapped);
        assert_eq!(shown.player(&p1()).unwrap().life, 30);
        assert_eq!(r.pending_count(), 1);
    }

    #[test]
    fn test_replay_keeps_submission_order() {
        let mut r = reconciler();
        r.submit(&p1(), draw_one()).unwrap();
        r.submit(&p1(), draw_one()).unwrap();
        let hand = r
            .displayed_state()
            .zone_of_kind(&p1(), ZoneKind::Hand)
            .unwrap()
            .card_ids
            .clone();
        assert_eq!(hand, vec![CardId::from("c2"), CardId::from("c1")]);

        r.set_authoritative_state(base(), None);
        let replayed = r
            .displayed_state()
            .zone_of_kind(&p1(), ZoneKind::Hand)
            .unwrap()
            .card_ids
            .clone();
        assert_eq!(replayed, hand);
    }

    #[test]
    fn test_rejected_ack_drops_optimistic_effect() {
        let mut r = reconciler();
        let intent = r
            .submit(&p1(), BoardOp::TapCard {
                card_id: CardId::from("bear"),
                tapped: true,
            })
            .unwrap();
        assert!(r.acknowledge(&intent.id, false, Some("not allowed")));
        assert_eq!(r.status(&intent.id), Some(IntentStatus::Rejected));
        assert!(!r.displayed_state().card(&CardId::from("bear")).unwrap().tapped);
        assert!(!r.acknowledge(&intent.id, true, None));
    }

    #[test]
    fn test_ok_ack_resolves() {
        let mut r = reconciler();
        let intent = r.submit(&p1(), draw_one()).unwrap();
        assert!(r.acknowledge(&intent.id, true, None));
        assert_eq!(r.status(&intent.id), Some(IntentStatus::Acknowledged));
    }

    #[test]
    fn test_invalidated_intent_is_superseded() {
        let mut r = reconciler();
        let intent = r
            .submit(&p1(), BoardOp::TapCard {
                card_id: CardId::from("bear"),
                tapped: true,
            })
            .unwrap();
        let mut next = base();
        next.remove_card(&CardId::from("bear"));
        r.set_authoritative_state(next, None);
        assert_eq!(r.status(&intent.id), Some(IntentStatus::Superseded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_window_raises_failure() {
        let mut r = reconciler();
        let intent = r
            .submit(&p1(), BoardOp::TapCard {
                card_id: CardId::from("bear"),
                tapped: true,
            })
            .unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        r.set_authoritative_state(base(), None);

        let failures = r.take_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].intent_id, intent.id);
        assert_eq!(r.status(&intent.id), Some(IntentStatus::Rejected));
        assert!(!r.displayed_state().card(&CardId::from("bear")).unwrap().tapped);
    }

    #[test]
    fn test_attempt_bound_raises_failure() {
        let config = EngineConfig {
            max_intent_attempts: 2,
            ..EngineConfig::default()
        };
        let mut r = IntentReconciler::new(RoomId::from("r1"), &config);
        r.set_authoritative_state(base(), None);
        r.submit(&p1(), draw_one()).unwrap();
        for _ in 0..3 {
            r.set_authoritative_state(base(), None);
        }
        assert_eq!(r.pending_count(), 0);
        assert_eq!(r.take_failures().len(), 1);
    }

    #[test]
    fn test_out_of_sequence_snapshot_is_flagged() {
        let mut r = reconciler();
        let stale = two_player_table();
        assert!(!r.set_authoritative_state(base(), Some(&stale)));
        assert!(r.set_authoritative_state(base(), Some(&base())));
    }

    #[test]
    fn test_destroy_event_discards_pending() {
        let mut r = reconciler();
        r.submit(&p1(), draw_one()).unwrap();
        r.handle_session_event(&SessionEvent::Destroyed {
            room_id: RoomId::from("other"),
        });
        assert_eq!(r.pending_count(), 1);
        r.handle_session_event(&SessionEvent::Destroyed {
            room_id: RoomId::from("r1"),
        });
        assert_eq!(r.pending_count(), 0);
        assert_eq!(r.displayed_state(), r.public_authoritative_state());
    }

    #[test]
    fn test_submit_invalid_op_records_nothing() {
        let mut r = reconciler();
        let result = r.submit(&p1(), BoardOp::TapCard {
            card_id: CardId::from("ghost"),
            tapped: true,
        });
        assert!(result.is_err());
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_concurrent_life_delta_is_not_reapplied() {
        let mut r = reconciler();
        let intent = r
            .submit(&p1(), BoardOp::UpdatePlayer {
                player_id: p1(),
                update: PlayerUpdate::life_delta(-3),
            })
            .unwrap();
        assert_eq!(r.displayed_state().player(&p1()).unwrap().life, 37);

        // Our -3 lands together with a peer's -2
        let mut next = base();
        next.update_player(&p1(), &PlayerUpdate::life(35), &(-999..=999))
            .unwrap();
        r.set_authoritative_state(next, None);

        assert_eq!(r.displayed_state().player(&p1()).unwrap().life, 35);
        assert_eq!(r.status(&intent.id), Some(IntentStatus::Superseded));
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_concurrent_counter_delta_is_not_reapplied() {
        let mut r = reconciler();
        r.submit(&p1(), BoardOp::AddCounter {
            card_id: CardId::from("bear"),
            kind: "+1/+1".into(),
            delta: 1,
            color: None,
        })
        .unwrap();

        let mut next = base();
        next.add_counter(&CardId::from("bear"), "+1/+1", 2, None)
            .unwrap();
        r.set_authoritative_state(next, None);

        let bear = r.displayed_state().card(&CardId::from("bear")).unwrap().clone();
        assert_eq!(bear.counter("+1/+1"), 2);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_submit_by_non_controller_is_denied() {
        let mut r = reconciler();
        let result = r.submit(&PlayerId::from("p2"), BoardOp::TapCard {
            card_id: CardId::from("bear"),
            tapped: true,
        });
        assert!(matches!(result, Err(TabletopError::PermissionDenied(_))));
        assert_eq!(r.pending_count(), 0);
        assert!(!r.displayed_state().card(&CardId::from("bear")).unwrap().tapped);
    }

    #[test]
    fn test_replay_rejects_intent_after_control_changes() {
        let mut r = reconciler();
        let intent = r
            .submit(&p1(), BoardOp::TapCard {
                card_id: CardId::from("bear"),
                tapped: true,
            })
            .unwrap();

        let mut next = base();
        next.remove_card(&CardId::from("bear"));
        let mut stolen = Card::new("bear", CardIdentity::named("Bear"), "p1", "battlefield-p1");
        stolen.controller_id = PlayerId::from("p2");
        next.add_card(stolen, None).unwrap();
        r.set_authoritative_state(next, None);

        assert_eq!(r.status(&intent.id), Some(IntentStatus::Rejected));
        let failures = r.take_failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].reason.starts_with("permission revoked"));
        assert!(!r.displayed_state().card(&CardId::from("bear")).unwrap().tapped);
    }

    #[test]
    fn test_resolved_statuses_are_bounded() {
        let mut r = reconciler();
        let tap = BoardOp::TapCard {
            card_id: CardId::from("bear"),
            tapped: true,
        };
        let first = r.submit(&p1(), tap.clone()).unwrap();
        r.acknowledge(&first.id, true, None);
        let mut last = first.clone();
        for _ in 0..RESOLVED_CAPACITY {
            last = r.submit(&p1(), tap.clone()).unwrap();
            r.acknowledge(&last.id, true, None);
        }
        assert_eq!(r.status(&first.id), None);
        assert_eq!(r.status(&last.id), Some(IntentStatus::Acknowledged));
        assert_eq!(r.resolved.len(), RESOLVED_CAPACITY);
    }
}
