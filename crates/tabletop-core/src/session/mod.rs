//! Session layer: one replicated room document per table
//!
//! ## Overview
//!
//! The [`SessionRegistry`] owns every open [`crate::room::RoomDoc`] on this
//! peer, counts who is using each one, and is the only path by which local
//! mutations reach a document. Committed transactions are handed to the
//! room's [`NetworkProvider`]; changes from peers come back in through
//! [`SessionRegistry::apply_remote`].
//!
//! ```text
//! gateway ──run_mutation──▶ SessionRegistry ──commit──▶ NetworkProvider
//!                                 ▲
//!          transport ──apply_remote┘
//! ```

pub mod events;
pub mod provider;
pub mod registry;

pub use events::{SessionEvent, SessionStatus};
pub use provider::{ChannelProvider, NetworkProvider};
pub use registry::{DocMutation, SessionRegistry};
