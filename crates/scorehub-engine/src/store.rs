use anyhow::{Context, Result};
use indexmap::IndexMap;
use scorehub_contracts::metadata::DatasetInfo;
use scorehub_contracts::models::{ModelSignature, ModelUri, ModelVersion, RegisteredModel};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Reserved run tag the tracking UI renders as the run description.
pub const NOTE_TAG: &str = "mlflow.note.content";

/// File names inside a logged model directory.
pub const MODEL_FILE: &str = "model.json";
pub const SIGNATURE_FILE: &str = "signature.json";
pub const INPUT_EXAMPLE_FILE: &str = "input_example.json";

/// Run artifact directory holding dataset records.
pub const DATASET_DIR: &str = "datasets";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub experiment_id: String,
    pub artifact_uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

/// A fitted artifact ready for upload, plus what was observed about it.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    pub artifact_path: String,
    pub flavor: String,
    pub payload: Value,
    pub signature: ModelSignature,
    pub input_example: Vec<Vec<f64>>,
}

impl ArtifactBundle {
    /// The `model.json` document. [`StoredArtifact::from_envelope`] reads it back.
    pub fn envelope(&self) -> Value {
        json!({
            "flavor": self.flavor,
            "model": self.payload,
        })
    }
}

/// An artifact as downloaded from the store, not yet decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub flavor: String,
    pub payload: Value,
}

impl StoredArtifact {
    pub fn from_envelope(envelope: &Value) -> Result<Self> {
        let flavor = envelope
            .get("flavor")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .context("artifact envelope missing 'flavor'")?;
        let payload = envelope
            .get("model")
            .cloned()
            .context("artifact envelope missing 'model'")?;
        Ok(Self {
            flavor: flavor.to_string(),
            payload,
        })
    }
}

/// Dataset lineage as logged against a run.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDescriptor {
    pub name: String,
    pub digest: String,
    pub source_type: String,
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl DatasetDescriptor {
    pub fn from_dataset(dataset: &DatasetInfo) -> Self {
        Self {
            name: dataset.name.clone(),
            digest: dataset_digest(&dataset.features, &dataset.targets),
            source_type: "artifact".to_string(),
            features: dataset.features.clone(),
            targets: dataset.targets.clone(),
        }
    }

    pub fn schema(&self) -> Value {
        let width = self.features.first().map(Vec::len).unwrap_or(0);
        json!({
            "features": {"type": "double", "shape": [-1, width]},
            "targets": {"type": "double", "shape": [-1]},
        })
    }

    pub fn profile(&self) -> Value {
        let elements: usize = self.features.iter().map(Vec::len).sum();
        let width = self.features.first().map(Vec::len).unwrap_or(0);
        json!({
            "features_shape": [self.features.len(), width],
            "features_size": elements,
            "targets_shape": [self.targets.len()],
            "targets_size": self.targets.len(),
        })
    }

    /// Run-relative path the records are uploaded to. Name characters outside
    /// `[A-Za-z0-9._-]` become `_`; the digest keeps same-named datasets apart.
    pub fn artifact_path(&self) -> String {
        let stem: String = self
            .name
            .chars()
            .map(|ch| match ch {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => ch,
                _ => '_',
            })
            .collect();
        format!("{DATASET_DIR}/{stem}-{}.json", self.digest)
    }

    /// The full feature matrix and targets, stored as a run artifact.
    pub fn records(&self) -> Value {
        json!({
            "features": self.features,
            "targets": self.targets,
        })
    }

    /// Source document for the lineage record. Only points at the records,
    /// so its size does not grow with the dataset.
    pub fn source(&self, records_uri: &str) -> Value {
        json!({ "uri": records_uri })
    }
}

fn dataset_digest(features: &[Vec<f64>], targets: &[f64]) -> String {
    let mut hasher = Sha256::new();
    for row in features {
        for value in row {
            hasher.update(value.to_le_bytes());
        }
        hasher.update(b"\n");
    }
    for value in targets {
        hasher.update(value.to_le_bytes());
    }
    hex::encode(hasher.finalize())[..8].to_string()
}

/// Operations the registry needs from a tracking/versioning backend.
///
/// Logging calls take the [`RunContext`] returned by `start_run` and are only
/// valid until `end_run` is called for it.
pub trait TrackingStore: Send + Sync {
    fn ensure_experiment(&self, name: &str) -> Result<String>;

    fn start_run(&self, experiment_id: &str, run_name: Option<&str>) -> Result<RunContext>;

    fn end_run(&self, run: &RunContext, status: RunStatus) -> Result<()>;

    fn set_tags(&self, run: &RunContext, tags: &IndexMap<String, String>) -> Result<()>;

    fn set_tag(&self, run: &RunContext, key: &str, value: &str) -> Result<()> {
        let mut tags = IndexMap::new();
        tags.insert(key.to_string(), value.to_string());
        self.set_tags(run, &tags)
    }

    fn log_metrics(&self, run: &RunContext, metrics: &IndexMap<String, f64>) -> Result<()>;

    fn log_params(&self, run: &RunContext, params: &IndexMap<String, String>) -> Result<()>;

    fn log_input(
        &self,
        run: &RunContext,
        dataset: &DatasetDescriptor,
        context: &str,
        tags: &IndexMap<String, String>,
    ) -> Result<()>;

    /// Uploads the artifact and registers it as a new version of
    /// `registered_model_name`. The store assigns the version number.
    fn log_model(
        &self,
        run: &RunContext,
        bundle: &ArtifactBundle,
        registered_model_name: &str,
    ) -> Result<ModelVersion>;

    /// Most recent first; empty when `name` is not registered.
    fn get_latest_versions(&self, name: &str) -> Result<Vec<ModelVersion>>;

    fn update_model_version(&self, name: &str, version: &str, description: &str) -> Result<()>;

    fn update_registered_model(&self, name: &str, description: &str) -> Result<()>;

    fn set_model_version_tag(&self, name: &str, version: &str, key: &str, value: &str)
        -> Result<()>;

    fn set_registered_model_tag(&self, name: &str, key: &str, value: &str) -> Result<()>;

    /// `Ok(None)` when the store has nothing at `uri`.
    fn load_model(&self, uri: &ModelUri) -> Result<Option<StoredArtifact>>;

    fn search_registered_models(&self) -> Result<Vec<RegisteredModel>>;
}

#[cfg(test)]
mod tests {
    use scorehub_contracts::metadata::DatasetInfo;
    use scorehub_contracts::models::ModelSignature;
    use serde_json::json;

    use super::{ArtifactBundle, DatasetDescriptor, StoredArtifact};

    #[test]
    fn envelope_round_trips_through_stored_artifact() -> anyhow::Result<()> {
        let bundle = ArtifactBundle {
            artifact_path: "m".to_string(),
            flavor: "linear-regressor".to_string(),
            payload: json!({"coefficients": [1.0], "intercept": 0.0}),
            signature: ModelSignature::infer(&[vec![1.0]], &[1.0], None),
            input_example: vec![vec![1.0]],
        };
        let stored = StoredArtifact::from_envelope(&bundle.envelope())?;
        assert_eq!(stored.flavor, "linear-regressor");
        assert_eq!(stored.payload, bundle.payload);
        Ok(())
    }

    #[test]
    fn envelope_requires_flavor_and_model() {
        assert!(StoredArtifact::from_envelope(&json!({"model": {}})).is_err());
        assert!(StoredArtifact::from_envelope(&json!({"flavor": " "})).is_err());
        assert!(StoredArtifact::from_envelope(&json!({"flavor": "x"})).is_err());
    }

    #[test]
    fn dataset_digest_is_stable_and_content_sensitive() {
        let dataset = DatasetInfo {
            name: "d".to_string(),
            features: vec![vec![0.0, 1.0], vec![2.0, 3.0]],
            targets: vec![0.0, 1.0],
            ..DatasetInfo::default()
        };
        let first = DatasetDescriptor::from_dataset(&dataset);
        let second = DatasetDescriptor::from_dataset(&dataset);
        assert_eq!(first.digest, second.digest);
        assert_eq!(first.digest.len(), 8);

        let mut changed = dataset.clone();
        changed.targets[1] = 0.0;
        assert_ne!(DatasetDescriptor::from_dataset(&changed).digest, first.digest);

        assert_eq!(first.profile()["features_shape"], json!([2, 2]));
        assert_eq!(first.schema()["features"]["shape"], json!([-1, 2]));
    }

    #[test]
    fn lineage_source_stays_small_for_large_datasets() {
        let dataset = DatasetInfo {
            name: "applicants/2024 q1".to_string(),
            features: (0..10_000)
                .map(|row| vec![f64::from(row) / 7.0, 0.25, 612.5, 3.0])
                .collect(),
            targets: (0..10_000).map(|row| f64::from(row % 2)).collect(),
            ..DatasetInfo::default()
        };
        let descriptor = DatasetDescriptor::from_dataset(&dataset);

        let path = descriptor.artifact_path();
        assert_eq!(path, format!("datasets/applicants_2024_q1-{}.json", descriptor.digest));
        let uri = format!("mlflow-artifacts:/0/run/artifacts/{path}");
        let source = descriptor.source(&uri).to_string();
        assert!(source.len() < 1024, "source is {} chars", source.len());
        assert!(source.contains(&path));

        let records = descriptor.records();
        assert_eq!(records["features"].as_array().map(Vec::len), Some(10_000));
        assert!(descriptor.schema().to_string().len() < 1024);
        assert!(descriptor.profile().to_string().len() < 1024);
    }
}
