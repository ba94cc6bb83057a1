use std::collections::BTreeMap;
use std::fmt;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::StoredArtifact;

pub const LOGISTIC_CLASSIFIER: &str = "logistic-classifier";
pub const LINEAR_REGRESSOR: &str = "linear-regressor";

/// Capability interface of a fitted model. The registry and scoring handles
/// only ever talk to artifacts through this trait.
pub trait Predictor: Send + Sync {
    fn flavor(&self) -> &str;

    /// Row width the artifact was fitted on.
    fn n_features(&self) -> usize;

    /// One output per input row, in row order.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>>;

    fn hyperparameters(&self) -> IndexMap<String, String>;

    /// Serialized form stored under the envelope's `model` key.
    fn to_payload(&self) -> Result<Value>;
}

impl fmt::Debug for dyn Predictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predictor")
            .field("flavor", &self.flavor())
            .field("n_features", &self.n_features())
            .finish()
    }
}

pub type ArtifactDecoder = fn(&Value) -> Result<Box<dyn Predictor>>;

#[derive(Clone, Default)]
pub struct FlavorRegistry {
    decoders: BTreeMap<String, ArtifactDecoder>,
}

impl FlavorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, flavor: &str, decoder: ArtifactDecoder) {
        self.decoders.insert(flavor.to_string(), decoder);
    }

    pub fn names(&self) -> Vec<String> {
        self.decoders.keys().cloned().collect()
    }

    pub fn decode(&self, artifact: &StoredArtifact) -> Result<Box<dyn Predictor>> {
        let Some(decoder) = self.decoders.get(&artifact.flavor) else {
            bail!(
                "unknown artifact flavor '{}' (known: {})",
                artifact.flavor,
                self.names().join(", ")
            );
        };
        decoder(&artifact.payload)
            .with_context(|| format!("failed decoding '{}' artifact", artifact.flavor))
    }
}

impl fmt::Debug for FlavorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlavorRegistry")
            .field("flavors", &self.names())
            .finish()
    }
}

pub fn default_flavor_registry() -> FlavorRegistry {
    let mut flavors = FlavorRegistry::new();
    flavors.register(LOGISTIC_CLASSIFIER, |payload| {
        Ok(Box::new(LogisticClassifier::from_payload(payload)?))
    });
    flavors.register(LINEAR_REGRESSOR, |payload| {
        Ok(Box::new(LinearRegressor::from_payload(payload)?))
    });
    flavors
}

/// Binary classifier over a logistic link; predicts `1.0` when the positive
/// class probability reaches `threshold`, else `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticClassifier {
    pub weights: Vec<f64>,
    pub bias: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub params: IndexMap<String, String>,
}

impl LogisticClassifier {
    pub fn new(weights: Vec<f64>, bias: f64) -> Self {
        Self {
            weights,
            bias,
            threshold: default_threshold(),
            params: IndexMap::new(),
        }
    }

    pub fn from_payload(payload: &Value) -> Result<Self> {
        let model: Self = serde_json::from_value(payload.clone())
            .context("invalid logistic classifier payload")?;
        if model.weights.is_empty() {
            bail!("logistic classifier has no weights");
        }
        if !(0.0..=1.0).contains(&model.threshold) {
            bail!("logistic classifier threshold {} outside [0, 1]", model.threshold);
        }
        Ok(model)
    }

    pub fn probability(&self, row: &[f64]) -> Result<f64> {
        let z = linear_score(&self.weights, self.bias, row)?;
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

impl Predictor for LogisticClassifier {
    fn flavor(&self) -> &str {
        LOGISTIC_CLASSIFIER
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter()
            .map(|row| {
                let probability = self.probability(row)?;
                Ok(if probability >= self.threshold { 1.0 } else { 0.0 })
            })
            .collect()
    }

    fn hyperparameters(&self) -> IndexMap<String, String> {
        let mut params = self.params.clone();
        params.insert("threshold".to_string(), self.threshold.to_string());
        params.insert("n_features".to_string(), self.weights.len().to_string());
        params
    }

    fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Ordinary linear model; predicts the raw score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default)]
    pub params: IndexMap<String, String>,
}

impl LinearRegressor {
    pub fn new(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
            params: IndexMap::new(),
        }
    }

    pub fn from_payload(payload: &Value) -> Result<Self> {
        let model: Self = serde_json::from_value(payload.clone())
            .context("invalid linear regressor payload")?;
        if model.coefficients.is_empty() {
            bail!("linear regressor has no coefficients");
        }
        Ok(model)
    }
}

impl Predictor for LinearRegressor {
    fn flavor(&self) -> &str {
        LINEAR_REGRESSOR
    }

    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter()
            .map(|row| linear_score(&self.coefficients, self.intercept, row))
            .collect()
    }

    fn hyperparameters(&self) -> IndexMap<String, String> {
        let mut params = self.params.clone();
        params.insert(
            "n_features".to_string(),
            self.coefficients.len().to_string(),
        );
        params
    }

    fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn linear_score(weights: &[f64], bias: f64, row: &[f64]) -> Result<f64> {
    if row.len() != weights.len() {
        bail!(
            "X has {} features, but the model is expecting {} features as input",
            row.len(),
            weights.len()
        );
    }
    Ok(weights
        .iter()
        .zip(row)
        .map(|(weight, value)| weight * value)
        .sum::<f64>()
        + bias)
}

fn default_threshold() -> f64 {
    0.5
}
