//! Tabletop Sync Core Library
//!
//! Replicated card-game tables with per-viewer private information.
//!
//! ## Overview
//!
//! Every room is one Automerge document holding the *public* board: players,
//! zones, card records and reveal records. Identities of cards in hidden
//! zones never enter that document. Each viewer instead receives a private
//! overlay from the room server and folds it into the public snapshot
//! locally.
//!
//! ## Pieces
//!
//! - **SessionRegistry**: one document per room, reference counted, with a
//!   single active session and a queue for mutations issued while a session
//!   is still hydrating
//! - **MutationGateway**: permission check, domain rules, commit, audit
//! - **IntentReconciler**: optimistic intents replayed over each new
//!   authoritative snapshot
//! - **PrivateOverlayMerger**: folds full or diff overlays into the public
//!   view without touching public board fields
//! - **tokens / keys**: HMAC join tokens and per-room role keys
//!
//! ## Quick Start
//!
//! ```ignore
//! use tabletop_core::{BoardOp, EngineConfig, PlayerId, RoomId, SessionRegistry, TableClient};
//!
//! let config = EngineConfig::default();
//! let room = RoomId::from("r1");
//! let mut registry = SessionRegistry::new(config.pending_mutation_max_age());
//! registry.acquire(&room)?;
//! registry.set_active(Some(room.clone()));
//!
//! let mut alice = TableClient::new(room.clone(), PlayerId::from("alice"), &config);
//! alice.perform(&mut registry, BoardOp::AddPlayer { player: Player::new("alice", "Alice", 40) });
//! println!("{} players", alice.view().players.len());
//! ```

pub mod audit;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod intent;
pub mod keys;
pub mod logging;
pub mod messages;
pub mod ops;
pub mod overlay;
pub mod permissions;
pub mod room;
pub mod session;
pub mod tokens;
pub mod types;

// Re-exports
pub use audit::{AuditEntry, AuditLog, AuditOutcome};
pub use client::TableClient;
pub use config::EngineConfig;
pub use error::{TabletopError, TabletopResult, TokenError};
pub use gateway::{MutationGateway, MutationOutcome};
pub use intent::{Intent, IntentReconciler, IntentStatus, ReconcileFailure};
pub use keys::{RoleKey, RoleLink, RoomKeyStore, RoomKeys};
pub use messages::{decode_inbound, ClientMessage, Inbound, ServerMessage};
pub use ops::BoardOp;
pub use overlay::{OverlayPayload, PrivateOverlayMerger};
pub use permissions::PermissionResult;
pub use room::RoomDoc;
pub use session::{ChannelProvider, NetworkProvider, SessionEvent, SessionRegistry, SessionStatus};
pub use tokens::{create_join_token, verify_join_token, JoinTokenPayload, TokenCache, VerifyOptions};
pub use types::*;
