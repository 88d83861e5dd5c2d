//! Per-peer JSONL files
//!
//! Each peer appends to `<dir>/<date>_<peer>.jsonl`, so concurrent peers
//! never share a file handle.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::LogEntry;

pub struct PeerLogWriter {
    peer: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl PeerLogWriter {
    /// Open (or create) today's file for `peer` under `dir`
    pub fn new(dir: impl AsRef<Path>, peer: impl Into<String>) -> std::io::Result<Self> {
        let peer = peer.into();
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = dir.join(format!("{date}_{}.jsonl", sanitize(&peer)));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            peer,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line and flush it
    pub fn write(&self, entry: &LogEntry) -> std::io::Result<()> {
        let line = entry
            .to_json_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")?;
        writer.flush()
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for PeerLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

// Peer ids end up in file names
fn sanitize(peer: &str) -> String {
    peer.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Every entry from every `.jsonl` file in `dir`, ordered by timestamp.
///
/// Unparseable lines are skipped.
pub fn read_entries(dir: impl AsRef<Path>) -> std::io::Result<Vec<LogEntry>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for item in fs::read_dir(dir)? {
        let path = item?.path();
        if path.extension().is_some_and(|e| e == "jsonl") {
            let content = fs::read_to_string(&path)?;
            entries.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .filter_map(|line| LogEntry::from_json_line(line).ok()),
            );
        }
    }
    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}

/// Entries from all peers that concern `room_id`
pub fn read_room_entries(dir: impl AsRef<Path>, room_id: &str) -> std::io::Result<Vec<LogEntry>> {
    Ok(read_entries(dir)?
        .into_iter()
        .filter(|e| e.room.as_deref() == Some(room_id))
        .collect())
}
