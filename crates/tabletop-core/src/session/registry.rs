//! Session registry: per-room documents, ref-counting and transactions
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SessionRegistry                                                │
//! │  ├── sessions: HashMap<RoomId, Session>                         │
//! │  │   └── RoomDoc + ref count + provider + overlay fetch tasks   │
//! │  ├── active: Option<RoomId>                                     │
//! │  │   └── the one session mutations run against immediately     │
//! │  ├── pending: VecDeque<QueuedMutation>                          │
//! │  │   └── mutations waiting for their room to become active     │
//! │  └── event_tx: broadcast::Sender<SessionEvent>                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every queued mutation remembers the room it was written for. Flushing only
//! ever applies a mutation to that room, so switching the active session can
//! never redirect a queued change onto another table.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::events::{SessionEvent, SessionStatus};
use super::provider::NetworkProvider;
use crate::error::TabletopResult;
use crate::room::RoomDoc;
use crate::types::{GameState, PlayerId, RoomId};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A deferred write against a room document
pub type DocMutation = Box<dyn FnOnce(&mut RoomDoc) -> TabletopResult<()> + Send>;

struct QueuedMutation {
    room_id: RoomId,
    label: String,
    queued_at: Instant,
    mutation: DocMutation,
}

/// State for a single room
struct Session {
    doc: RoomDoc,
    ref_count: usize,
    status: SessionStatus,
    /// Set when the ref count drops to zero
    idle_since: Option<Instant>,
    provider: Option<Box<dyn NetworkProvider>>,
    /// In-flight work tied to this session (overlay fetches)
    tasks: Vec<JoinHandle<()>>,
    /// Label of the first mutation in the open transaction
    open_label: Option<String>,
}

/// Owner of every open room document on this peer
///
/// # Example
///
/// ```
/// use tabletop_core::session::SessionRegistry;
/// use tabletop_core::types::{Player, RoomId};
///
/// let mut registry = SessionRegistry::new(std::time::Duration::from_secs(30));
/// let room = RoomId::from("r1");
/// registry.acquire(&room).unwrap();
/// registry.set_active(Some(room.clone()));
///
/// let ran = registry.run_mutation(&room, "seat", |doc| {
///     doc.mutate(|state| {
///         state.upsert_player(Player::new("p1", "Alice", 40));
///         Ok(())
///     })
/// });
/// assert!(ran);
/// assert_eq!(registry.snapshot(&room).unwrap().players.len(), 1);
/// ```
pub struct SessionRegistry {
    sessions: HashMap<RoomId, Session>,
    active: Option<RoomId>,
    pending: VecDeque<QueuedMutation>,
    batch_depth: usize,
    dirty: BTreeSet<RoomId>,
    pending_max_age: Duration,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    /// Create a registry; queued mutations older than `pending_max_age` are
    /// discarded instead of flushed
    pub fn new(pending_max_age: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: HashMap::new(),
            active: None,
            pending: VecDeque::new(),
            batch_depth: 0,
            dirty: BTreeSet::new(),
            pending_max_age,
            event_tx,
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Take a reference to a room, creating its document on first use.
    ///
    /// Returns the new reference count.
    pub fn acquire(&mut self, room_id: &RoomId) -> TabletopResult<usize> {
        if let Some(session) = self.sessions.get_mut(room_id) {
            session.ref_count += 1;
            session.idle_since = None;
            debug!(%room_id, ref_count = session.ref_count, "Session acquired");
            return Ok(session.ref_count);
        }

        let doc = RoomDoc::new()?;
        self.sessions.insert(
            room_id.clone(),
            Session {
                doc,
                ref_count: 1,
                status: SessionStatus::Ready,
                idle_since: None,
                provider: None,
                tasks: Vec::new(),
                open_label: None,
            },
        );
        info!(%room_id, "Session created");
        let _ = self.event_tx.send(SessionEvent::Created {
            room_id: room_id.clone(),
        });
        Ok(1)
    }

    /// Drop a reference. The session stays alive until evicted or destroyed.
    ///
    /// Returns the remaining count, or None for an unknown room.
    pub fn release(&mut self, room_id: &RoomId) -> Option<usize> {
        let session = self.sessions.get_mut(room_id)?;
        session.ref_count = session.ref_count.saturating_sub(1);
        if session.ref_count == 0 {
            session.idle_since = Some(Instant::now());
        }
        let ref_count = session.ref_count;
        debug!(%room_id, ref_count, "Session released");
        let _ = self.event_tx.send(SessionEvent::Released {
            room_id: room_id.clone(),
            ref_count,
        });
        Some(ref_count)
    }

    /// Choose the session mutations run against; `None` clears it.
    ///
    /// Unknown rooms are ignored.
    pub fn set_active(&mut self, room_id: Option<RoomId>) {
        if let Some(id) = &room_id {
            if !self.sessions.contains_key(id) {
                debug!(room_id = %id, "Ignoring set_active for unknown session");
                return;
            }
        }
        if self.active == room_id {
            return;
        }
        self.active = room_id.clone();
        let _ = self.event_tx.send(SessionEvent::ActiveChanged { room_id });
    }

    pub fn active(&self) -> Option<&RoomId> {
        self.active.as_ref()
    }

    /// Attach the replication link; the session waits for [`Self::mark_ready`]
    /// (or [`Self::hydrate`]) before running mutations.
    pub fn attach_provider(&mut self, room_id: &RoomId, provider: Box<dyn NetworkProvider>) -> bool {
        let Some(session) = self.sessions.get_mut(room_id) else {
            return false;
        };
        if let Some(mut old) = session.provider.replace(provider) {
            old.detach();
        }
        session.status = SessionStatus::Hydrating;
        true
    }

    pub fn mark_ready(&mut self, room_id: &RoomId) -> bool {
        match self.sessions.get_mut(room_id) {
            Some(session) => {
                session.status = SessionStatus::Ready;
                true
            }
            None => false,
        }
    }

    /// Merge a full document received from a peer and mark the session ready
    pub fn hydrate(&mut self, room_id: &RoomId, saved: &[u8]) -> TabletopResult<bool> {
        let Some(session) = self.sessions.get_mut(room_id) else {
            return Ok(false);
        };
        let mut remote = RoomDoc::load(saved)?;
        session.doc.merge(&mut remote)?;
        session.status = SessionStatus::Ready;
        info!(%room_id, "Session hydrated");
        let _ = self.event_tx.send(SessionEvent::RemoteChanged {
            room_id: room_id.clone(),
            ops_applied: 0,
        });
        Ok(true)
    }

    /// Tie a background task to a session so teardown aborts it
    pub fn track_task(&mut self, room_id: &RoomId, handle: JoinHandle<()>) {
        match self.sessions.get_mut(room_id) {
            Some(session) => {
                session.tasks.retain(|t| !t.is_finished());
                session.tasks.push(handle);
            }
            None => handle.abort(),
        }
    }

    /// Tear a session down.
    ///
    /// If `departing` is the recorded host, the smallest remaining player id
    /// becomes host and that change is committed and shipped before the
    /// provider is detached. Queued mutations and tracked tasks for the room
    /// are discarded.
    pub fn destroy(&mut self, room_id: &RoomId, departing: Option<&PlayerId>) -> bool {
        if let Some(departing) = departing {
            self.reassign_host(room_id, departing);
        }

        let Some(mut session) = self.sessions.remove(room_id) else {
            debug!(%room_id, "Destroy for unknown session");
            return false;
        };

        if let Some(mut provider) = session.provider.take() {
            provider.detach();
        }
        for task in session.tasks.drain(..) {
            task.abort();
        }

        let before = self.pending.len();
        self.pending.retain(|q| &q.room_id != room_id);
        let dropped = before - self.pending.len();
        self.dirty.remove(room_id);
        if self.active.as_ref() == Some(room_id) {
            self.active = None;
            let _ = self.event_tx.send(SessionEvent::ActiveChanged { room_id: None });
        }

        info!(%room_id, dropped_mutations = dropped, "Session destroyed");
        let _ = self.event_tx.send(SessionEvent::Destroyed {
            room_id: room_id.clone(),
        });
        true
    }

    fn reassign_host(&mut self, room_id: &RoomId, departing: &PlayerId) {
        let Some(session) = self.sessions.get_mut(room_id) else {
            return;
        };
        let result = session.doc.mutate(|state| {
            if state.meta.host_id.as_ref() != Some(departing) {
                return Ok(None);
            }
            let next = state.next_host(departing);
            state.meta.host_id = next.clone();
            Ok(Some(next))
        });
        match result {
            Ok(Some(next)) => {
                info!(%room_id, previous = %departing, next = ?next, "Host reassigned");
                self.commit_room(room_id, "reassign host");
                let _ = self.event_tx.send(SessionEvent::HostReassigned {
                    room_id: room_id.clone(),
                    previous: departing.clone(),
                    next,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(%room_id, error = %e, "Host reassignment failed"),
        }
    }

    /// Destroy every unreferenced session idle for at least `ttl`
    pub fn evict_idle(&mut self, ttl: Duration) -> Vec<RoomId> {
        let now = Instant::now();
        let expired: Vec<RoomId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.ref_count == 0)
            .filter(|(_, s)| {
                s.idle_since
                    .map(|since| now.duration_since(since) >= ttl)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for room_id in &expired {
            debug!(%room_id, "Evicting idle session");
            self.destroy(room_id, None);
        }
        expired
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Run `f` against `room_id` if it is the active, ready session.
    ///
    /// Otherwise the mutation is queued for that room and `false` is
    /// returned. A mutation that runs but fails emits
    /// [`SessionEvent::MutationRejected`]; it wrote nothing when it went
    /// through [`RoomDoc::mutate`].
    pub fn run_mutation<F>(&mut self, room_id: &RoomId, label: &str, f: F) -> bool
    where
        F: FnOnce(&mut RoomDoc) -> TabletopResult<()> + Send + 'static,
    {
        if !self.can_run(room_id) {
            debug!(%room_id, label, "Queueing mutation; session not active");
            self.pending.push_back(QueuedMutation {
                room_id: room_id.clone(),
                label: label.to_string(),
                queued_at: Instant::now(),
                mutation: Box::new(f),
            });
            return false;
        }
        self.apply(room_id, label, Box::new(f));
        true
    }

    /// Run queued mutations for the active session in submission order.
    ///
    /// Stale entries (for any room) are dropped; entries for other rooms stay
    /// queued. Returns how many mutations ran.
    pub fn flush_pending(&mut self) -> usize {
        let now = Instant::now();
        let queued = std::mem::take(&mut self.pending);
        let mut applied = 0;

        self.batch_depth += 1;
        for entry in queued {
            if now.duration_since(entry.queued_at) > self.pending_max_age {
                warn!(room_id = %entry.room_id, label = %entry.label, "Dropping stale queued mutation");
                let _ = self.event_tx.send(SessionEvent::MutationDropped {
                    room_id: entry.room_id,
                    reason: format!("{} queued too long", entry.label),
                });
                continue;
            }
            if self.can_run(&entry.room_id) {
                self.apply(&entry.room_id, &entry.label, entry.mutation);
                applied += 1;
            } else {
                self.pending.push_back(entry);
            }
        }
        self.end_batch();

        if applied > 0 {
            debug!(applied, "Flushed queued mutations");
        }
        applied
    }

    /// Coalesce every mutation issued inside `f` into one transaction per
    /// room. Nested calls join the outermost batch.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.batch_depth += 1;
        let result = f(self);
        self.end_batch();
        result
    }

    fn end_batch(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth == 0 {
            let dirty = std::mem::take(&mut self.dirty);
            for room_id in dirty {
                let label = self
                    .sessions
                    .get_mut(&room_id)
                    .and_then(|s| s.open_label.take())
                    .unwrap_or_else(|| "batch".to_string());
                self.commit_room(&room_id, &label);
            }
        }
    }

    fn apply(&mut self, room_id: &RoomId, label: &str, mutation: DocMutation) {
        let Some(session) = self.sessions.get_mut(room_id) else {
            return;
        };
        if let Err(e) = mutation(&mut session.doc) {
            warn!(%room_id, label, error = %e, "Mutation rejected at apply time");
            let _ = self.event_tx.send(SessionEvent::MutationRejected {
                room_id: room_id.clone(),
                label: label.to_string(),
                reason: e.to_string(),
            });
        }
        session.open_label.get_or_insert_with(|| label.to_string());
        if self.batch_depth == 0 {
            session.open_label = None;
            self.commit_room(room_id, label);
        } else {
            self.dirty.insert(room_id.clone());
        }
    }

    fn commit_room(&mut self, room_id: &RoomId, label: &str) {
        let Some(session) = self.sessions.get_mut(room_id) else {
            return;
        };
        if !session.doc.commit(label) {
            return;
        }
        let changes = session.doc.generate_sync_message();
        if let Some(provider) = session.provider.as_mut() {
            provider.send_changes(room_id, &changes);
        }
        debug!(%room_id, label, bytes = changes.len(), "Committed transaction");
        let _ = self.event_tx.send(SessionEvent::Committed {
            room_id: room_id.clone(),
            change_bytes: changes.len(),
        });
    }

    /// Merge incremental changes from a peer.
    ///
    /// Returns the number of operations loaded; unknown rooms load nothing.
    pub fn apply_remote(&mut self, room_id: &RoomId, changes: &[u8]) -> TabletopResult<usize> {
        let Some(session) = self.sessions.get_mut(room_id) else {
            return Ok(0);
        };
        let ops_applied = session.doc.apply_sync_message(changes)?;
        debug!(%room_id, ops_applied, "Applied remote changes");
        let _ = self.event_tx.send(SessionEvent::RemoteChanged {
            room_id: room_id.clone(),
            ops_applied,
        });
        Ok(ops_applied)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Whether a mutation for `room_id` would run now instead of queueing
    pub fn can_run(&self, room_id: &RoomId) -> bool {
        self.active.as_ref() == Some(room_id)
            && self
                .sessions
                .get(room_id)
                .map(|s| s.status == SessionStatus::Ready)
                .unwrap_or(false)
    }

    /// Materialized public state of a room
    pub fn snapshot(&self, room_id: &RoomId) -> Option<GameState> {
        let session = self.sessions.get(room_id)?;
        match session.doc.snapshot() {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(%room_id, error = %e, "Failed to read room snapshot");
                None
            }
        }
    }

    /// Full saved document, for handing to a peer that is hydrating
    pub fn save(&mut self, room_id: &RoomId) -> Option<Vec<u8>> {
        self.sessions.get_mut(room_id).map(|s| s.doc.save())
    }

    pub fn ref_count(&self, room_id: &RoomId) -> Option<usize> {
        self.sessions.get(room_id).map(|s| s.ref_count)
    }

    pub fn status(&self, room_id: &RoomId) -> Option<SessionStatus> {
        self.sessions.get(room_id).map(|s| s.status)
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.sessions.contains_key(room_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Queued mutations waiting for `room_id`
    pub fn pending_for(&self, room_id: &RoomId) -> usize {
        self.pending.iter().filter(|q| &q.room_id == room_id).count()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        for session in self.sessions.values_mut() {
            for task in session.tasks.drain(..) {
                task.abort();
            }
        }
    }
}
