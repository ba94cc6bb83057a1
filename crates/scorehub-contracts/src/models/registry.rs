use std::fmt;

use serde::{Deserialize, Serialize};

const URI_SCHEME: &str = "models:/";

/// Version-qualified reference to a registered model, `models:/{name}/{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelUri {
    name: String,
    version: String,
}

impl ModelUri {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for ModelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{URI_SCHEME}{}/{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    pub run_id: Option<String>,
    pub source: Option<String>,
    pub status: Option<String>,
}

impl ModelVersion {
    pub fn uri(&self) -> ModelUri {
        ModelUri::new(self.name.clone(), self.version.clone())
    }

    /// Numeric view of the version; stores assign integers but report strings.
    pub fn number(&self) -> Option<u64> {
        self.version.parse().ok()
    }
}
