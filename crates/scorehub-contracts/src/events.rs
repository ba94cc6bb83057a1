use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

pub const PUBLISH_STARTED: &str = "publish_started";
pub const PHASE_COMPLETED: &str = "phase_completed";
pub const PUBLISH_COMPLETED: &str = "publish_completed";
pub const PUBLISH_FAILED: &str = "publish_failed";

/// Publish journal (`publishes.jsonl`): one entry per line, appended as a
/// publish moves through its phases. Each entry is keyed by `publish_id`
/// and stamped with `ts`; fields in the payload win over both.
///
/// Clones append to the same file under one lock.
#[derive(Debug, Clone)]
pub struct JournalWriter {
    shared: Arc<Journal>,
}

#[derive(Debug)]
struct Journal {
    path: PathBuf,
    appends: Mutex<()>,
}

impl JournalWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Journal {
                path: path.into(),
                appends: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Appends one entry and returns it as written.
    pub fn emit(
        &self,
        event_type: &str,
        publish_id: &str,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        let entry = journal_entry(event_type, publish_id, payload);
        self.append(&serde_json::to_string(&entry)?)?;
        Ok(Value::Object(entry))
    }

    fn append(&self, line: &str) -> anyhow::Result<()> {
        let path = &self.shared.path;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create journal directory {}", dir.display()))?;
        }
        let _appending = self
            .shared
            .appends
            .lock()
            .map_err(|_| anyhow::anyhow!("publish journal {} is unusable", path.display()))?;
        let mut journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open publish journal {}", path.display()))?;
        writeln!(journal, "{line}")?;
        Ok(())
    }
}

fn journal_entry(event_type: &str, publish_id: &str, payload: EventPayload) -> EventPayload {
    let mut entry = EventPayload::new();
    entry.insert("type".to_string(), event_type.into());
    entry.insert("publish_id".to_string(), publish_id.into());
    entry.insert("ts".to_string(), now_utc_iso().into());
    entry.extend(payload);
    entry
}

/// Reads every parseable journal line; malformed lines are skipped.
pub fn read_journal(path: &Path) -> anyhow::Result<Vec<Map<String, Value>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|row| row.as_object().cloned())
        .collect())
}

/// Publish ids that were started but never reached `publish_completed`,
/// in the order they were started. Failed publishes are included.
pub fn incomplete_publishes(path: &Path) -> anyhow::Result<Vec<String>> {
    let entries = read_journal(path)?;
    let completed: HashSet<&str> = entries
        .iter()
        .filter(|row| row.get("type").and_then(Value::as_str) == Some(PUBLISH_COMPLETED))
        .filter_map(|row| row.get("publish_id").and_then(Value::as_str))
        .collect();
    let mut seen = HashSet::new();
    Ok(entries
        .iter()
        .filter(|row| row.get("type").and_then(Value::as_str) == Some(PUBLISH_STARTED))
        .filter_map(|row| row.get("publish_id").and_then(Value::as_str))
        .filter(|id| !completed.contains(id) && seen.insert(*id))
        .map(str::to_string)
        .collect())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("publishes.jsonl");
        let writer = JournalWriter::new(&path);

        let mut payload = EventPayload::new();
        payload.insert("model".to_string(), Value::String("m".to_string()));
        let emitted = writer.emit(PUBLISH_STARTED, "p-1", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String(PUBLISH_STARTED.to_string()));
        assert_eq!(parsed["publish_id"], Value::String("p-1".to_string()));
        assert_eq!(parsed["model"], Value::String("m".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = JournalWriter::new(temp.path().join("nested").join("publishes.jsonl"));

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        let emitted = writer.emit(PHASE_COMPLETED, "p-1", payload)?;

        assert_eq!(emitted["type"], Value::String("override".to_string()));
        assert!(writer.path().exists());
        Ok(())
    }

    #[test]
    fn incomplete_publishes_lists_started_without_completion() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("publishes.jsonl");
        let writer = JournalWriter::new(&path);

        writer.emit(PUBLISH_STARTED, "ok", EventPayload::new())?;
        writer.emit(PUBLISH_COMPLETED, "ok", EventPayload::new())?;
        writer.emit(PUBLISH_STARTED, "failed", EventPayload::new())?;
        writer.emit(PUBLISH_FAILED, "failed", EventPayload::new())?;
        writer.emit(PUBLISH_STARTED, "crashed", EventPayload::new())?;
        writer.emit(PHASE_COMPLETED, "crashed", EventPayload::new())?;

        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(b"{not json\n")?;

        assert_eq!(incomplete_publishes(&path)?, vec!["failed", "crashed"]);
        assert_eq!(read_journal(&path)?.len(), 6);
        Ok(())
    }

    #[test]
    fn clones_append_whole_lines_to_one_journal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = JournalWriter::new(temp.path().join("publishes.jsonl"));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let writer = writer.clone();
                std::thread::spawn(move || -> anyhow::Result<()> {
                    for step in 0..25 {
                        let mut payload = EventPayload::new();
                        payload.insert("step".to_string(), Value::from(step));
                        writer.emit(PHASE_COMPLETED, &format!("p-{worker}"), payload)?;
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker
                .join()
                .map_err(|_| anyhow::anyhow!("journal worker panicked"))??;
        }

        let entries = read_journal(writer.path())?;
        assert_eq!(entries.len(), 100);
        assert_eq!(fs::read_to_string(writer.path())?.lines().count(), 100);
        Ok(())
    }

    #[test]
    fn missing_journal_reads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("absent.jsonl");
        assert!(read_journal(&path)?.is_empty());
        assert!(incomplete_publishes(&path)?.is_empty());
        Ok(())
    }
}
