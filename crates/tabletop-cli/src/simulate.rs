//! Two-peer table simulation
//!
//! Alice and Bob each hold their own replica of the room document. A room
//! server holds a third replica plus every card identity. Document changes
//! travel between replicas through channel providers; wire messages travel
//! as JSON frames, the same way a socket would carry them.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use tabletop_core::messages::{HelloAck, RoomTokens};
use tabletop_core::overlay::{FullOverlay, OverlayCard, OverlayDiff, OVERLAY_SCHEMA_VERSION};
use tabletop_core::{
    create_join_token, verify_join_token, BoardOp, Card, CardId, CardIdentity, ChannelProvider,
    ClientMessage, EngineConfig, GameState, JoinTokenPayload, MutationGateway, MutationOutcome,
    Player, PlayerId, RoomId, ServerMessage, SessionRegistry, TableClient, TokenCache,
    VerifyOptions, Zone, ZoneId, ZoneKind,
};

const CAPABILITIES: &[&str] = &["privateOverlayDiff"];
const TABLE_ZONES: [ZoneKind; 4] = [
    ZoneKind::Library,
    ZoneKind::Hand,
    ZoneKind::Battlefield,
    ZoneKind::Graveyard,
];
const BASICS: [&str; 5] = ["Plains", "Island", "Swamp", "Mountain", "Forest"];

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub room_id: RoomId,
    pub deck_size: u32,
    pub opening_hand: u32,
    pub draws: u32,
    pub secret: String,
}

/// One viewer's picture of one player's hand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandView {
    pub owner: PlayerId,
    pub size: usize,
    pub known: usize,
}

#[derive(Debug, Clone)]
pub struct ViewerReport {
    pub viewer: PlayerId,
    pub hands: Vec<HandView>,
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub viewers: Vec<ViewerReport>,
    pub log_events: usize,
    /// Whether every replica ended with the same public board
    pub boards_agree: bool,
}

fn zone_id(kind: ZoneKind, player: &PlayerId) -> ZoneId {
    ZoneId::new(format!("{kind}-{player}"))
}

/// A registry attached to one in-process channel
struct Replica {
    registry: SessionRegistry,
    outbound: UnboundedReceiver<(RoomId, Vec<u8>)>,
}

impl Replica {
    fn open(room_id: &RoomId, config: &EngineConfig) -> Result<Self> {
        let mut registry = SessionRegistry::new(config.pending_mutation_max_age());
        registry.acquire(room_id)?;
        registry.set_active(Some(room_id.clone()));
        let (provider, outbound) = ChannelProvider::pair();
        registry.attach_provider(room_id, Box::new(provider));
        registry.mark_ready(room_id);
        Ok(Self { registry, outbound })
    }

    fn drain(&mut self) -> Vec<(RoomId, Vec<u8>)> {
        let mut changes = Vec::new();
        while let Ok(change) = self.outbound.try_recv() {
            changes.push(change);
        }
        changes
    }
}

/// What a viewer was last sent
struct SentOverlay {
    version: u64,
    cards: BTreeSet<CardId>,
}

/// Authoritative side: verifies tokens, executes intents, serves overlays
struct RoomServer {
    room_id: RoomId,
    config: EngineConfig,
    secret: Vec<u8>,
    replica: Replica,
    identities: BTreeMap<CardId, CardIdentity>,
    gateways: BTreeMap<PlayerId, MutationGateway>,
    joined: BTreeSet<PlayerId>,
    sent: BTreeMap<PlayerId, SentOverlay>,
    diff_capable: BTreeSet<PlayerId>,
    next_event: u64,
}

impl RoomServer {
    fn new(room_id: RoomId, config: EngineConfig, secret: &str) -> Result<Self> {
        let replica = Replica::open(&room_id, &config)?;
        Ok(Self {
            room_id,
            config,
            secret: secret.as_bytes().to_vec(),
            replica,
            identities: BTreeMap::new(),
            gateways: BTreeMap::new(),
            joined: BTreeSet::new(),
            sent: BTreeMap::new(),
            diff_capable: BTreeSet::new(),
            next_event: 0,
        })
    }

    fn issue_token(&self, nonce: &str) -> tabletop_core::TabletopResult<String> {
        let mut payload = JoinTokenPayload::expiring_in(self.room_id.clone(), Duration::from_secs(3600));
        payload.nonce = Some(nonce.to_string());
        create_join_token(&payload, &self.secret)
    }

    fn register_deck(&mut self, cards: impl IntoIterator<Item = (CardId, CardIdentity)>) {
        self.identities.extend(cards);
    }

    fn handle(&mut self, from: &PlayerId, message: ClientMessage) -> Result<Vec<(PlayerId, ServerMessage)>> {
        let mut replies = Vec::new();
        match message {
            ClientMessage::Hello {
                room_id,
                token,
                capabilities,
            } => {
                if room_id != self.room_id {
                    bail!("{from} said hello to unknown room {room_id}");
                }
                let options = VerifyOptions {
                    now_ms: None,
                    skew_ms: self.config.token_skew_ms,
                };
                verify_join_token(token.as_deref(), &self.secret, options)
                    .map_err(|e| anyhow!("{from} was refused: {e}"))?;

                let accepted: Vec<String> = capabilities
                    .into_iter()
                    .filter(|c| CAPABILITIES.contains(&c.as_str()))
                    .collect();
                if !accepted.is_empty() {
                    self.diff_capable.insert(from.clone());
                }
                self.joined.insert(from.clone());
                info!(player = %from, room_id = %self.room_id, "Player joined");
                replies.push((
                    from.clone(),
                    ServerMessage::HelloAck {
                        payload: HelloAck {
                            accepted_capabilities: accepted,
                        },
                    },
                ));
                replies.push((
                    from.clone(),
                    ServerMessage::RoomTokens {
                        payload: RoomTokens {
                            player_token: Some(self.issue_token(from.as_str())?),
                            spectator_token: None,
                        },
                    },
                ));
            }
            ClientMessage::Intent { intent } => {
                let gateway = self.gateways.entry(from.clone()).or_insert_with(|| {
                    MutationGateway::new(self.room_id.clone(), from.clone(), self.config.clone())
                });
                let label = intent.op.label();
                let (ok, error) = match gateway.execute(&mut self.replica.registry, intent.op) {
                    MutationOutcome::Committed => (true, None),
                    MutationOutcome::AppliedLocally => (false, Some("room not ready".to_string())),
                    MutationOutcome::Denied(reason) | MutationOutcome::Rejected(reason) => {
                        (false, Some(reason))
                    }
                };
                debug!(player = %from, intent_id = %intent.id, ok, "Intent executed");
                replies.push((
                    from.clone(),
                    ServerMessage::Ack {
                        intent_id: intent.id,
                        ok,
                        error,
                    },
                ));
                if ok {
                    self.next_event += 1;
                    let event = ServerMessage::LogEvent {
                        event_id: format!("evt-{}", self.next_event),
                        payload: serde_json::json!({ "actor": from, "action": label }),
                    };
                    for viewer in &self.joined {
                        replies.push((viewer.clone(), event.clone()));
                    }
                }
            }
            ClientMessage::OverlayResync { have_version, .. } => {
                warn!(player = %from, ?have_version, "Overlay resync requested");
                self.sent.remove(from);
            }
        }
        Ok(replies)
    }

    /// Cards whose identity `viewer` may know, in hidden zones
    fn visible_to(&self, state: &GameState, viewer: &PlayerId) -> Vec<OverlayCard> {
        state
            .zones
            .values()
            .filter(|zone| zone.kind.is_hidden())
            .flat_map(|zone| {
                zone.card_ids.iter().filter_map(move |id| {
                    let card = state.card(id)?;
                    let own_hand = zone.kind == ZoneKind::Hand && &zone.owner_id == viewer;
                    if !own_hand && !card.visibility.reveals_to(viewer) {
                        return None;
                    }
                    let identity = self.identities.get(id)?.clone();
                    Some(OverlayCard::new(id.clone(), zone.id.clone(), card.owner_id.clone(), identity))
                })
            })
            .collect()
    }

    /// Full or diff overlay for every joined viewer whose view changed
    fn overlay_updates(&mut self) -> Vec<(PlayerId, ServerMessage)> {
        let Some(state) = self.replica.registry.snapshot(&self.room_id) else {
            return Vec::new();
        };
        let viewers: Vec<PlayerId> = self.joined.iter().cloned().collect();
        let mut updates = Vec::new();
        for viewer in viewers {
            let cards = self.visible_to(&state, &viewer);
            let hand = zone_id(ZoneKind::Hand, &viewer);
            let mut orders = BTreeMap::new();
            if let Some(zone) = state.zone(&hand) {
                orders.insert(hand, zone.card_ids.clone());
            }
            let current: BTreeSet<CardId> = cards.iter().map(|c| c.id.clone()).collect();

            let message = match self.sent.get(&viewer) {
                Some(sent) if sent.cards == current => continue,
                Some(sent) if self.diff_capable.contains(&viewer) => ServerMessage::PrivateOverlayDiff {
                    payload: OverlayDiff {
                        base_overlay_version: sent.version,
                        overlay_version: sent.version + 1,
                        upserts: cards.into_iter().filter(|c| !sent.cards.contains(&c.id)).collect(),
                        removes: sent.cards.difference(&current).cloned().collect(),
                        zone_order_removals: Vec::new(),
                        zone_card_orders: orders,
                        meta: None,
                    },
                },
                sent => ServerMessage::PrivateOverlay {
                    payload: FullOverlay {
                        schema_version: OVERLAY_SCHEMA_VERSION,
                        overlay_version: sent.map_or(1, |s| s.version + 1),
                        room_id: self.room_id.clone(),
                        viewer_id: Some(viewer.clone()),
                        cards,
                        zone_card_orders: orders,
                        meta: None,
                    },
                },
            };
            let version = match &message {
                ServerMessage::PrivateOverlay { payload } => payload.overlay_version,
                ServerMessage::PrivateOverlayDiff { payload } => payload.overlay_version,
                _ => continue,
            };
            self.sent.insert(viewer.clone(), SentOverlay { version, cards: current });
            updates.push((viewer, message));
        }
        updates
    }
}

struct Peer {
    client: TableClient,
    replica: Replica,
    tokens: TokenCache,
}

/// The server and every peer, wired together
struct Table {
    server: RoomServer,
    peers: Vec<Peer>,
}

impl Table {
    /// Move document changes between replicas until none are in flight
    fn relay(&mut self) -> Result<usize> {
        let mut moved = 0;
        loop {
            // None marks the server as origin
            let mut batch: Vec<(Option<usize>, RoomId, Vec<u8>)> = self
                .server
                .replica
                .drain()
                .into_iter()
                .map(|(room, bytes)| (None, room, bytes))
                .collect();
            for (index, peer) in self.peers.iter_mut().enumerate() {
                batch.extend(peer.replica.drain().into_iter().map(|(room, bytes)| (Some(index), room, bytes)));
            }
            if batch.is_empty() {
                break;
            }
            for (origin, room_id, bytes) in batch {
                if origin.is_some() {
                    self.server.replica.registry.apply_remote(&room_id, &bytes)?;
                }
                for (index, peer) in self.peers.iter_mut().enumerate() {
                    if origin != Some(index) {
                        peer.replica.registry.apply_remote(&room_id, &bytes)?;
                    }
                }
                moved += 1;
            }
        }
        for peer in &mut self.peers {
            peer.client.refresh(&peer.replica.registry);
        }
        Ok(moved)
    }

    fn deliver(&mut self, to: &PlayerId, message: &ServerMessage) -> Result<()> {
        let frame = serde_json::to_string(message)?;
        let peer = self
            .peers
            .iter_mut()
            .find(|p| p.client.viewer() == to)
            .ok_or_else(|| anyhow!("no peer named {to}"))?;
        peer.client.handle_frame(&frame)?;
        Ok(())
    }

    /// Carry client messages to the server and replies back until quiet
    fn exchange(&mut self) -> Result<()> {
        loop {
            let mut outgoing = Vec::new();
            for peer in &mut self.peers {
                let from = peer.client.viewer().clone();
                for message in peer.client.drain_outbox() {
                    // Round-trip through JSON like a real socket
                    let frame = message.to_json()?;
                    outgoing.push((from.clone(), serde_json::from_str::<ClientMessage>(&frame)?));
                }
            }
            if outgoing.is_empty() {
                return Ok(());
            }
            let mut replies = Vec::new();
            for (from, message) in outgoing {
                replies.extend(self.server.handle(&from, message)?);
            }
            self.relay()?;
            replies.extend(self.server.overlay_updates());
            for (to, message) in replies {
                self.deliver(&to, &message)?;
            }
        }
    }

    async fn join(&mut self) -> Result<()> {
        let server = &self.server;
        for peer in &mut self.peers {
            let nonce = peer.client.viewer().to_string();
            let token = peer
                .tokens
                .get_or_fetch(move || async move { server.issue_token(&nonce) })
                .await?;
            peer.client
                .hello(Some(token), CAPABILITIES.iter().map(|c| c.to_string()).collect());
        }
        self.exchange()
    }

    /// Seat every peer, give each an empty table and a deck in its library
    fn seat(&mut self, deck_size: u32) -> Result<()> {
        let starting_life = self.server.config.starting_life;
        for peer in &mut self.peers {
            let me = peer.client.viewer().clone();
            let mut ops = vec![BoardOp::AddPlayer {
                player: Player::new(me.clone(), capitalize(me.as_str()), starting_life),
            }];
            ops.extend(TABLE_ZONES.iter().map(|&kind| BoardOp::AddZone {
                zone: Zone::new(zone_id(kind, &me), kind, me.clone()),
            }));

            let library = zone_id(ZoneKind::Library, &me);
            let deck: Vec<(CardId, CardIdentity)> = (0..deck_size)
                .map(|i| {
                    let name = BASICS[i as usize % BASICS.len()];
                    (CardId::new(format!("{me}-c{i}")), CardIdentity::named(name))
                })
                .collect();
            ops.extend(deck.iter().map(|(id, identity)| BoardOp::AddCard {
                card: Card::new(id.clone(), identity.clone(), me.clone(), library.clone()),
                index: None,
            }));
            self.server.register_deck(deck);

            for op in ops {
                let label = op.label();
                match peer.client.perform(&mut peer.replica.registry, op) {
                    MutationOutcome::Committed => {}
                    other => bail!("{me} could not {label}: {other:?}"),
                }
            }
        }
        self.relay()?;
        Ok(())
    }

    fn draw_all(&mut self, count: u32) -> Result<()> {
        for peer in &mut self.peers {
            let player_id = peer.client.viewer().clone();
            peer.client.propose(BoardOp::DrawCards { player_id, count })?;
        }
        self.exchange()?;
        for peer in &mut self.peers {
            for failure in peer.client.take_failures() {
                bail!("{} intent {} failed: {}", peer.client.viewer(), failure.intent_id, failure.reason);
            }
        }
        Ok(())
    }

    fn report(&self) -> SimulationReport {
        let server_board = self.server.replica.registry.snapshot(&self.server.room_id);
        let boards_agree = self
            .peers
            .iter()
            .all(|p| p.replica.registry.snapshot(&self.server.room_id) == server_board);

        let viewers = self
            .peers
            .iter()
            .map(|peer| {
                let view = peer.client.view();
                let hands = view
                    .players
                    .keys()
                    .map(|owner| {
                        let ids = view
                            .zone_of_kind(owner, ZoneKind::Hand)
                            .map(|zone| zone.card_ids.as_slice())
                            .unwrap_or_default();
                        let known = ids
                            .iter()
                            .filter_map(|id| view.card(id))
                            .filter(|card| card.identity.is_some())
                            .count();
                        HandView {
                            owner: owner.clone(),
                            size: ids.len(),
                            known,
                        }
                    })
                    .collect();
                ViewerReport {
                    viewer: peer.client.viewer().clone(),
                    hands,
                }
            })
            .collect();

        SimulationReport {
            viewers,
            log_events: self.peers.iter().map(|p| p.client.log_events().count()).sum(),
            boards_agree,
        }
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Run a two-peer game: join, seat, draw an opening hand, then draw more
pub async fn run(options: &SimulateOptions, config: &EngineConfig) -> Result<SimulationReport> {
    if options.opening_hand + options.draws > options.deck_size {
        bail!(
            "deck of {} cannot cover {} opening cards and {} draws",
            options.deck_size,
            options.opening_hand,
            options.draws
        );
    }

    let server = RoomServer::new(options.room_id.clone(), config.clone(), &options.secret)?;
    let mut peers = Vec::new();
    for name in ["alice", "bob"] {
        peers.push(Peer {
            client: TableClient::new(options.room_id.clone(), PlayerId::from(name), config),
            replica: Replica::open(&options.room_id, config)?,
            tokens: TokenCache::new(
                config.token_reuse_window(),
                Duration::from_millis(config.token_skew_ms),
            ),
        });
    }
    let mut table = Table { server, peers };

    table.join().await?;
    table.seat(options.deck_size)?;
    if options.opening_hand > 0 {
        table.draw_all(options.opening_hand)?;
    }
    for _ in 0..options.draws {
        table.draw_all(1)?;
    }
    info!(room_id = %options.room_id, "Simulation finished");
    Ok(table.report())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SimulateOptions {
        SimulateOptions {
            room_id: RoomId::from("sim"),
            deck_size: 12,
            opening_hand: 5,
            draws: 2,
            secret: "test-secret".into(),
        }
    }

    fn hand<'a>(report: &'a SimulationReport, viewer: &str, owner: &str) -> &'a HandView {
        report
            .viewers
            .iter()
            .find(|v| v.viewer.as_str() == viewer)
            .and_then(|v| v.hands.iter().find(|h| h.owner.as_str() == owner))
            .unwrap()
    }

    #[tokio::test]
    async fn test_each_viewer_knows_only_its_own_hand() {
        let report = run(&options(), &EngineConfig::default()).await.unwrap();

        assert!(report.boards_agree);
        assert_eq!(hand(&report, "alice", "alice"), &HandView { owner: "alice".into(), size: 7, known: 7 });
        assert_eq!(hand(&report, "alice", "bob").size, 7);
        assert_eq!(hand(&report, "alice", "bob").known, 0);
        assert_eq!(hand(&report, "bob", "bob").known, 7);
        assert_eq!(hand(&report, "bob", "alice").known, 0);
    }

    #[tokio::test]
    async fn test_every_draw_is_logged_to_every_viewer() {
        let report = run(&options(), &EngineConfig::default()).await.unwrap();
        // 3 draws per player, each broadcast to both viewers
        assert_eq!(report.log_events, 12);
    }

    #[tokio::test]
    async fn test_deck_too_small_is_refused() {
        let mut opts = options();
        opts.deck_size = 4;
        assert!(run(&opts, &EngineConfig::default()).await.is_err());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("alice"), "Alice");
        assert_eq!(capitalize(""), "");
    }
}
