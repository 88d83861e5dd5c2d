//! Logging setup
//!
//! Console output goes through `tracing_subscriber::fmt`. Optionally each
//! peer also appends structured lines to its own JSONL file:
//!
//! ```text
//! logs/
//! ├── 2026-10-17_alice.jsonl
//! └── 2026-10-17_bob.jsonl
//! ```
//!
//! Events carrying a `room_id` field get it promoted to a top-level `room`
//! key, so one room's history across peers is a single query:
//!
//! ```bash
//! cat logs/*.jsonl | jq -s 'map(select(.room == "r1")) | sort_by(.ts)'
//! jq 'select(.level == "warn")' logs/*_alice.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

use std::path::{Path, PathBuf};

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::error::{TabletopError, TabletopResult};

pub use entry::LogEntry;
pub use layer::JsonlLayer;
pub use writer::{read_entries, read_room_entries, PeerLogWriter};

/// Where a peer's JSONL log goes
#[derive(Debug, Clone)]
pub struct JsonlTarget<'a> {
    pub dir: &'a Path,
    pub peer: &'a str,
}

/// Install the global subscriber.
///
/// `filter` is an `EnvFilter` directive string; `RUST_LOG` wins when set.
/// Returns the JSONL file path when one was requested.
pub fn init_logging(filter: &str, jsonl: Option<JsonlTarget<'_>>) -> TabletopResult<Option<PathBuf>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| TabletopError::Logging(e.to_string()))?;

    let jsonl_layer = jsonl
        .map(|target| JsonlLayer::new(target.dir, target.peer))
        .transpose()?;
    let path = jsonl_layer.as_ref().map(|l| l.log_path().to_path_buf());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(jsonl_layer)
        .try_init()
        .map_err(|e| TabletopError::Logging(e.to_string()))?;

    Ok(path)
}
