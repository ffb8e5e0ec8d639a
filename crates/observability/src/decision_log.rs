use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

pub const DEFAULT_DECISION_FILE: &str = "decisions.jsonl";

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    ts: String,
    #[serde(flatten)]
    record: &'a T,
}

/// Append-only JSON Lines sink for pipeline decisions. The directory is created
/// on first write; write failures are logged and swallowed.
#[derive(Debug)]
pub struct DecisionLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DecisionLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_file(dir, DEFAULT_DECISION_FILE)
    }

    pub fn with_file(dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self {
            path: dir.as_ref().join(file_name),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&self, record: &T) {
        if let Err(err) = self.try_append(record) {
            warn!(path = %self.path.display(), error = %err, "failed to write decision record");
        }
    }

    pub fn try_append<T: Serialize>(&self, record: &T) -> io::Result<()> {
        let line = serde_json::to_string(&Line {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            record,
        })
        .map_err(io::Error::other)?;

        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}
