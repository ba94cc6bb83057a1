use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Tags = IndexMap<String, String>;
pub type Metrics = IndexMap<String, f64>;
pub type Params = IndexMap<String, String>;

/// Number of leading dataset rows used for signature inference and stored as
/// the input example.
pub const SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("model name must not be empty")]
    EmptyModelName,
    #[error("dataset must contain at least one feature row")]
    EmptyDataset,
    #[error("dataset has {features} feature rows but {targets} targets")]
    TargetLengthMismatch { features: usize, targets: usize },
    #[error("dataset row {row} has {found} values, expected {expected}")]
    RaggedFeatures {
        row: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    #[serde(default = "default_split")]
    pub split: String,
}

impl DatasetInfo {
    /// Width of every feature row. Only meaningful once validated.
    pub fn n_features(&self) -> usize {
        self.features.first().map(Vec::len).unwrap_or(0)
    }

    pub fn n_rows(&self) -> usize {
        self.features.len()
    }

    pub fn sample(&self) -> &[Vec<f64>] {
        &self.features[..self.features.len().min(SAMPLE_ROWS)]
    }

    fn validate(&self) -> Result<(), MetadataError> {
        let Some(first) = self.features.first() else {
            return Err(MetadataError::EmptyDataset);
        };
        if self.targets.len() != self.features.len() {
            return Err(MetadataError::TargetLengthMismatch {
                features: self.features.len(),
                targets: self.targets.len(),
            });
        }
        let expected = first.len();
        if let Some((row, found)) = self
            .features
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|(_, len)| *len != expected)
        {
            return Err(MetadataError::RaggedFeatures {
                row,
                expected,
                found,
            });
        }
        Ok(())
    }
}

/// Everything a publish call records alongside the artifact.
///
/// Fields are private so that every instance, including ones deserialized
/// from JSON, went through [`ModelMetadata::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMetadata", into = "RawMetadata")]
pub struct ModelMetadata {
    model: ModelInfo,
    version: VersionInfo,
    run: RunInfo,
    dataset: DatasetInfo,
}

impl ModelMetadata {
    pub fn new(
        model: ModelInfo,
        version: VersionInfo,
        run: RunInfo,
        dataset: DatasetInfo,
    ) -> Result<Self, MetadataError> {
        if model.name.trim().is_empty() {
            return Err(MetadataError::EmptyModelName);
        }
        dataset.validate()?;
        Ok(Self {
            model,
            version,
            run,
            dataset,
        })
    }

    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    pub fn run(&self) -> &RunInfo {
        &self.run
    }

    pub fn dataset(&self) -> &DatasetInfo {
        &self.dataset
    }
}

#[derive(Serialize, Deserialize)]
struct RawMetadata {
    model: ModelInfo,
    #[serde(default)]
    version: VersionInfo,
    run: RunInfo,
    dataset: DatasetInfo,
}

impl TryFrom<RawMetadata> for ModelMetadata {
    type Error = MetadataError;

    fn try_from(raw: RawMetadata) -> Result<Self, Self::Error> {
        Self::new(raw.model, raw.version, raw.run, raw.dataset)
    }
}

impl From<ModelMetadata> for RawMetadata {
    fn from(metadata: ModelMetadata) -> Self {
        Self {
            model: metadata.model,
            version: metadata.version,
            run: metadata.run,
            dataset: metadata.dataset,
        }
    }
}

fn default_split() -> String {
    "train".to_string()
}
