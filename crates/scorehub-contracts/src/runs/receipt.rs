use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub publish_id: String,
    pub model_name: String,
    pub version: String,
    pub run_id: String,
    pub experiment_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
}

impl PublishReceipt {
    pub fn start(model_name: impl Into<String>) -> Self {
        Self {
            publish_id: Uuid::new_v4().to_string(),
            model_name: model_name.into(),
            version: String::new(),
            run_id: String::new(),
            experiment_id: String::new(),
            started_at: now_utc_iso(),
            finished_at: None,
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(now_utc_iso());
        self
    }

    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert(
            "schema_version".to_string(),
            Value::Number(RECEIPT_SCHEMA_VERSION.into()),
        );
        if let Ok(Value::Object(fields)) = serde_json::to_value(self) {
            payload.extend(fields);
        }
        payload
    }
}

pub fn write_receipt(path: &Path, receipt: &PublishReceipt) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(receipt.to_payload()))?,
    )?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{write_receipt, PublishReceipt, RECEIPT_SCHEMA_VERSION};

    #[test]
    fn start_assigns_unique_ids() {
        let a = PublishReceipt::start("m");
        let b = PublishReceipt::start("m");
        assert_ne!(a.publish_id, b.publish_id);
        assert!(a.finished_at.is_none());
        assert!(a.finish().finished_at.is_some());
    }

    #[test]
    fn write_receipt_generates_expected_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("receipts").join("receipt.json");

        let mut receipt = PublishReceipt::start("scoring-model-001");
        receipt.version = "3".to_string();
        receipt.run_id = "run-abc".to_string();
        receipt.experiment_id = "7".to_string();
        let receipt = receipt.finish();
        write_receipt(&path, &receipt)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["model_name"], json!("scoring-model-001"));
        assert_eq!(parsed["version"], json!("3"));
        assert_eq!(parsed["run_id"], json!("run-abc"));
        assert!(parsed.get("finished_at").and_then(Value::as_str).is_some());
        Ok(())
    }
}
