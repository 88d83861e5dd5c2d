//! One viewer's seat at one table
//!
//! `TableClient` wires the per-room pieces together for a single viewer:
//! direct board actions go through the [`MutationGateway`], server-mediated
//! actions become intents tracked by the [`IntentReconciler`], and inbound
//! overlays feed the [`PrivateOverlayMerger`]. Outbound frames collect in an
//! outbox the transport drains.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{TabletopError, TabletopResult};
use crate::gateway::{MutationGateway, MutationOutcome};
use crate::intent::{Intent, IntentReconciler, ReconcileFailure};
use crate::messages::{decode_inbound, ClientMessage, HelloAck, Inbound, RoomTokens};
use crate::ops::BoardOp;
use crate::overlay::PrivateOverlayMerger;
use crate::session::{SessionEvent, SessionRegistry};
use crate::types::{GameState, PlayerId, RoomId};

/// Server log events kept for display
const LOG_EVENT_CAPACITY: usize = 200;

pub struct TableClient {
    room_id: RoomId,
    viewer: PlayerId,
    gateway: MutationGateway,
    reconciler: IntentReconciler,
    merger: PrivateOverlayMerger,
    outbox: VecDeque<ClientMessage>,
    tokens: RoomTokens,
    capabilities: Vec<String>,
    log_events: VecDeque<(String, serde_json::Value)>,
}

impl TableClient {
    pub fn new(room_id: RoomId, viewer: PlayerId, config: &EngineConfig) -> Self {
        Self {
            gateway: MutationGateway::new(room_id.clone(), viewer.clone(), config.clone()),
            reconciler: IntentReconciler::new(room_id.clone(), config),
            merger: PrivateOverlayMerger::new(room_id.clone(), viewer.clone()),
            room_id,
            viewer,
            outbox: VecDeque::new(),
            tokens: RoomTokens::default(),
            capabilities: Vec::new(),
            log_events: VecDeque::new(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn viewer(&self) -> &PlayerId {
        &self.viewer
    }

    pub fn gateway(&self) -> &MutationGateway {
        &self.gateway
    }

    pub fn reconciler(&self) -> &IntentReconciler {
        &self.reconciler
    }

    pub fn merger(&self) -> &PrivateOverlayMerger {
        &self.merger
    }

    /// Queue the opening handshake
    pub fn hello(&mut self, token: Option<String>, capabilities: Vec<String>) {
        self.outbox.push_back(ClientMessage::Hello {
            room_id: self.room_id.clone(),
            token,
            capabilities,
        });
    }

    /// Run a board action directly against the replicated room document
    pub fn perform(&mut self, registry: &mut SessionRegistry, op: BoardOp) -> MutationOutcome {
        let outcome = self.gateway.execute(registry, op);
        match outcome {
            MutationOutcome::Committed => {
                self.refresh(registry);
            }
            MutationOutcome::AppliedLocally => {
                // The queued write is not in the document yet
                let local = self.gateway.local_state().clone();
                self.reconciler.set_authoritative_state(local, None);
            }
            MutationOutcome::Denied(_) | MutationOutcome::Rejected(_) => {}
        }
        outcome
    }

    /// Propose an action the server must carry out (anything that reveals
    /// hidden cards). The displayed state changes optimistically.
    ///
    /// Actions this viewer may not perform fail with
    /// [`TabletopError::PermissionDenied`] and send nothing.
    pub fn propose(&mut self, op: BoardOp) -> TabletopResult<Intent> {
        let intent = self.reconciler.submit(&self.viewer, op)?;
        self.outbox.push_back(ClientMessage::Intent {
            intent: intent.clone(),
        });
        Ok(intent)
    }

    /// Adopt the room document's current public state.
    ///
    /// Returns false when this peer has no session for the room.
    pub fn refresh(&mut self, registry: &SessionRegistry) -> bool {
        let Some(snapshot) = registry.snapshot(&self.room_id) else {
            return false;
        };
        self.gateway.reset_local(snapshot.clone());
        self.reconciler.set_authoritative_state(snapshot, None);
        true
    }

    /// Decode and handle one raw server frame
    pub fn handle_frame(&mut self, raw: &str) -> TabletopResult<()> {
        let inbound = decode_inbound(raw)?;
        self.handle_inbound(inbound)
    }

    /// Handle one validated server message.
    ///
    /// A stale overlay diff is not an error for the caller: the overlay is
    /// dropped and a resync request is queued instead.
    pub fn handle_inbound(&mut self, inbound: Inbound) -> TabletopResult<()> {
        match inbound {
            Inbound::Ack {
                intent_id,
                ok,
                error,
            } => {
                self.reconciler.acknowledge(&intent_id, ok, error.as_deref());
            }
            Inbound::Overlay(payload) => match self.merger.apply_payload(&payload) {
                Ok(applied) => {
                    debug!(
                        room_id = %self.room_id,
                        viewer = %self.viewer,
                        version = payload.overlay_version(),
                        applied,
                        "Overlay received"
                    );
                }
                Err(TabletopError::StaleOverlayVersion { expected, received }) => {
                    warn!(
                        room_id = %self.room_id,
                        ?expected,
                        received,
                        "Stale overlay diff; requesting resync"
                    );
                    self.merger.reset();
                    self.outbox.push_back(ClientMessage::OverlayResync {
                        room_id: self.room_id.clone(),
                        have_version: expected,
                    });
                }
                Err(e) => return Err(e),
            },
            Inbound::LogEvent { event_id, payload } => {
                if self.log_events.len() == LOG_EVENT_CAPACITY {
                    self.log_events.pop_front();
                }
                self.log_events.push_back((event_id, payload));
            }
            Inbound::RoomTokens(tokens) => {
                info!(room_id = %self.room_id, "Room tokens received");
                self.tokens = tokens;
            }
            Inbound::HelloAck(HelloAck {
                accepted_capabilities,
            }) => {
                self.capabilities = accepted_capabilities;
            }
        }
        Ok(())
    }

    /// Forward a session lifecycle event.
    ///
    /// A write the room document refused re-adopts its current state.
    pub fn handle_session_event(&mut self, registry: &SessionRegistry, event: &SessionEvent) {
        if matches!(event, SessionEvent::Destroyed { room_id } if room_id == &self.room_id) {
            self.merger.reset();
        }
        if self.gateway.handle_session_event(registry, event) {
            self.refresh(registry);
        }
        self.reconciler.handle_session_event(event);
    }

    /// What this viewer sees: authoritative state, pending intents replayed
    /// on top, private overlay folded in
    pub fn view(&self) -> GameState {
        self.merger.merge(self.reconciler.displayed_state())
    }

    /// Take every queued outbound frame
    pub fn drain_outbox(&mut self) -> Vec<ClientMessage> {
        self.outbox.drain(..).collect()
    }

    pub fn take_failures(&mut self) -> Vec<ReconcileFailure> {
        self.reconciler.take_failures()
    }

    pub fn tokens(&self) -> &RoomTokens {
        &self.tokens
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn log_events(&self) -> impl Iterator<Item = &(String, serde_json::Value)> {
        self.log_events.iter()
    }
}
