//! Viewer-scoped private overlays
//!
//! The public room document never carries identities of cards in hidden
//! zones. Each viewer receives a private overlay instead: a full payload on
//! (re)connect and incremental diffs afterwards. [`PrivateOverlayMerger`]
//! folds the overlay into the public snapshot to produce what that viewer
//! may see.

pub mod merger;
pub mod payload;

pub use merger::{spawn_overlay_fetch, PrivateOverlayMerger};
pub use payload::{FullOverlay, OverlayCard, OverlayDiff, OverlayPayload, OVERLAY_SCHEMA_VERSION};
