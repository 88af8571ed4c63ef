//! Durable snapshot store.
//!
//! Each snapshot is one file named `{session_id}-{timestamp_millis}.sav`.
//! Session ids may themselves contain `-`, so the timestamp is always the
//! suffix after the last one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::SessionError;

const EXTENSION: &str = "sav";

/// One snapshot file on disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub session_id: String,
    pub timestamp: u64,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open the store, creating its directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SessionError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, session_id: &str, timestamp: u64) -> PathBuf {
        self.dir
            .join(format!("{}-{}.{}", session_id, timestamp, EXTENSION))
    }

    fn parse_name(name: &str) -> Option<(&str, u64)> {
        let stem = name.strip_suffix(".sav")?;
        let (id, ts) = stem.rsplit_once('-')?;
        if id.is_empty() || ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((id, ts.parse().ok()?))
    }

    /// All records for `session_id`, oldest first.
    pub fn records(&self, session_id: &str) -> Result<Vec<SnapshotRecord>, SessionError> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((id, timestamp)) = Self::parse_name(name) else {
                continue;
            };
            if id == session_id {
                records.push(SnapshotRecord {
                    session_id: id.to_string(),
                    timestamp,
                    path: entry.path(),
                });
            }
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    /// The most recent record for `session_id`, if any.
    pub fn latest(&self, session_id: &str) -> Result<Option<SnapshotRecord>, SessionError> {
        Ok(self.records(session_id)?.pop())
    }

    pub fn read(&self, record: &SnapshotRecord) -> Result<Vec<u8>, SessionError> {
        Ok(fs::read(&record.path)?)
    }

    /// Persist a snapshot as a new record.
    ///
    /// Data is written to a hidden temporary file and renamed into place, so
    /// a reader never sees a partial record. Existing records are never
    /// replaced; a colliding timestamp is moved forward one millisecond.
    pub fn write(
        &self,
        session_id: &str,
        timestamp: u64,
        data: &[u8],
    ) -> Result<SnapshotRecord, SessionError> {
        let mut timestamp = timestamp;
        while self.record_path(session_id, timestamp).exists() {
            timestamp += 1;
        }
        let path = self.record_path(session_id, timestamp);
        let tmp = self
            .dir
            .join(format!(".{}-{}.{}.tmp", session_id, timestamp, EXTENSION));

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!("Wrote snapshot {} ({} bytes)", path.display(), data.len());
        Ok(SnapshotRecord {
            session_id: session_id.to_string(),
            timestamp,
            path,
        })
    }

    /// Delete all but the `keep` newest records. Returns how many were removed.
    pub fn prune(&self, session_id: &str, keep: usize) -> Result<usize, SessionError> {
        let records = self.records(session_id)?;
        let excess = records.len().saturating_sub(keep);

        for record in &records[..excess] {
            fs::remove_file(&record.path)?;
        }
        if excess > 0 {
            info!("Pruned {} old snapshot(s) for {}", excess, session_id);
        }
        Ok(excess)
    }
}
