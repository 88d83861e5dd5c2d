//! Room documents - Automerge-backed public board state
//!
//! A room is one table. Each room is backed by an Automerge document that
//! provides CRDT conflict resolution for concurrent edits from every seated
//! peer.

pub mod doc;

pub use doc::RoomDoc;
