use std::fmt;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use scorehub_contracts::features::FeatureVector;

use crate::artifact::Predictor;

/// A resolved `(name, version)` artifact, ready to score.
///
/// Each resolve produces its own handle; the decoded artifact is owned by it
/// alone.
pub struct ScoringHandle {
    name: String,
    version: Option<String>,
    model: Box<dyn Predictor>,
}

impl ScoringHandle {
    pub fn new(
        name: impl Into<String>,
        version: Option<String>,
        model: Box<dyn Predictor>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            model,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn flavor(&self) -> &str {
        self.model.flavor()
    }

    pub fn hyperparameters(&self) -> IndexMap<String, String> {
        self.model.hyperparameters()
    }

    /// Scores one vector. Shape checks are left to the artifact.
    pub fn predict<F: FeatureVector>(&self, features: &F) -> Result<f64> {
        let rows = [features.values()];
        let predictions = self
            .model
            .predict(&rows)
            .with_context(|| format!("prediction failed for {}", self.describe()))?;
        predictions
            .first()
            .copied()
            .with_context(|| format!("{} returned no prediction", self.describe()))
    }

    fn describe(&self) -> String {
        match &self.version {
            Some(version) => format!("{}/{version}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Debug for ScoringHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoringHandle")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("model", &self.model)
            .finish()
    }
}
