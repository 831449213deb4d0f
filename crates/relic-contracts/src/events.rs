use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use serde_json::{Map, Value};

use crate::reconstruction::now_utc_iso;

pub type EventPayload = Map<String, Value>;

/// Append-only session log (`events.jsonl`).
///
/// Every record carries `type`, `session_id` and `ts`; the caller's payload
/// is merged on top and wins on key clashes. Records are written as one
/// compact JSON object per line.
///
/// Clones share the open file, so generation workers on other threads log
/// through the same writer. [`EventWriter::disabled`] still assembles the
/// record but never touches disk.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: Option<PathBuf>,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::with_target(Some(path.into()), session_id.into())
    }

    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self::with_target(None, session_id.into())
    }

    fn with_target(path: Option<PathBuf>, session_id: String) -> Self {
        Self {
            shared: Arc::new(SessionLog {
                path,
                session_id,
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let record = self.record(event_type, payload);
        if let Some(path) = self.shared.path.as_deref() {
            let line = serde_json::to_string(&record)?;
            self.append(path, &line)
                .with_context(|| format!("failed appending to {}", path.display()))?;
        }
        Ok(record)
    }

    fn record(&self, event_type: &str, payload: EventPayload) -> Value {
        let mut record = EventPayload::new();
        record.insert("type".to_string(), Value::from(event_type));
        record.insert(
            "session_id".to_string(),
            Value::from(self.shared.session_id.as_str()),
        );
        record.insert("ts".to_string(), Value::from(now_utc_iso()));
        record.extend(payload);
        Value::Object(record)
    }

    fn append(&self, path: &Path, line: &str) -> anyhow::Result<()> {
        let mut slot = self
            .shared
            .file
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        if slot.is_none() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *slot = Some(OpenOptions::new().create(true).append(true).open(path)?);
        }
        if let Some(file) = slot.as_mut() {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}
