//! Usage recording.
//!
//! Every entry that is actually queued can be reported to a [`Recorder`],
//! for statistics about who requests what. Recording is fire-and-forget: it
//! runs on the blocking pool and failures only end up in the log.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{entry::Entry, error::Result, registry::SessionId, util::lock};

/// One queued request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub request_id: Uuid,
    pub session: SessionId,
    pub entry_id: String,
    pub title: String,
    pub locator: String,
    pub requester: Option<String>,

    /// Seconds since the Unix epoch.
    pub requested_at: i64,
}

impl UsageRecord {
    #[must_use]
    pub fn new(session: SessionId, entry: &Entry) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            session,
            entry_id: entry.id().to_string(),
            title: entry.title().to_owned(),
            locator: entry.locator().to_string(),
            requester: entry.requester().map(ToOwned::to_owned),
            requested_at: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

pub trait Recorder: Send + Sync + 'static {
    /// Stores one record. May block.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be stored.
    fn record(&self, record: &UsageRecord) -> Result<()>;
}

/// Appends records to a file, one JSON object per line.
#[derive(Debug)]
pub struct JsonLines {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLines {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("recording usage to {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Recorder for JsonLines {
    fn record(&self, record: &UsageRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        lock(&self.file).write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Records that `entry` was queued in `session`, without waiting for it.
pub(crate) fn record_in_background(
    recorder: &Arc<dyn Recorder>,
    session: SessionId,
    entry: &Entry,
) {
    let recorder = Arc::clone(recorder);
    let record = UsageRecord::new(session, entry);
    tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        match recorder.record(&record) {
            Ok(()) => trace!(
                "recorded request for {} in {:?}",
                record.title,
                start.elapsed()
            ),
            Err(e) => warn!("failed to record request for {}: {e}", record.title),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::tests::ready;

    #[test]
    fn records_are_json_lines() {
        let path = std::env::temp_dir().join(format!("jukebox-usage-{}.jsonl", Uuid::new_v4()));
        let recorder = JsonLines::open(&path).expect("open usage file");

        let first = UsageRecord::new(7, &ready("a"));
        let second = UsageRecord::new(7, &ready("b"));
        recorder.record(&first).expect("first record");
        recorder.record(&second).expect("second record");

        let contents = std::fs::read_to_string(&path).expect("read usage file");
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("valid json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["entry_id"], "a");
        assert_eq!(lines[1]["entry_id"], "b");
        assert_eq!(lines[0]["session"], 7);
        assert_ne!(lines[0]["request_id"], lines[1]["request_id"]);

        let _ = std::fs::remove_file(path);
    }
}
