//! Network provider seam
//!
//! The concrete transport lives outside this crate. A provider receives the
//! incremental Automerge changes of every committed local transaction and is
//! detached when its session is destroyed.

use tokio::sync::mpsc;
use tracing::debug;

use crate::types::RoomId;

/// Outbound side of a room's replication link
pub trait NetworkProvider: Send {
    /// Ship incremental document changes to peers
    fn send_changes(&mut self, room_id: &RoomId, changes: &[u8]);

    /// Stop sending; called once when the session is torn down
    fn detach(&mut self);
}

/// Provider that forwards changes into an mpsc channel
///
/// Used to wire replicas together in-process (tests, the simulator) and as the
/// hand-off point to a transport task.
pub struct ChannelProvider {
    tx: Option<mpsc::UnboundedSender<(RoomId, Vec<u8>)>>,
}

impl ChannelProvider {
    pub fn new(tx: mpsc::UnboundedSender<(RoomId, Vec<u8>)>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Create a provider together with the receiving end of its channel
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<(RoomId, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }
}

impl NetworkProvider for ChannelProvider {
    fn send_changes(&mut self, room_id: &RoomId, changes: &[u8]) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send((room_id.clone(), changes.to_vec())).is_err() {
            debug!(%room_id, "Change receiver dropped; detaching provider");
            self.tx = None;
        }
    }

    fn detach(&mut self) {
        self.tx = None;
    }
}
