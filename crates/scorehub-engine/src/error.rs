use std::fmt;

use scorehub_contracts::models::ModelUri;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Publish steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPhase {
    OpenRun,
    LogRun,
    LogModel,
    LogDataset,
    CloseRun,
    Enrich,
}

impl PublishPhase {
    pub const ALL: [PublishPhase; 6] = [
        Self::OpenRun,
        Self::LogRun,
        Self::LogModel,
        Self::LogDataset,
        Self::CloseRun,
        Self::Enrich,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenRun => "open-run",
            Self::LogRun => "log-run",
            Self::LogModel => "log-model",
            Self::LogDataset => "log-dataset",
            Self::CloseRun => "close-run",
            Self::Enrich => "enrich",
        }
    }
}

impl fmt::Display for PublishPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("artifact expects {expected} features but dataset rows have {found}")]
    Shape { expected: usize, found: usize },
    #[error("model '{uri}' not found")]
    NotFound { uri: ModelUri },
    #[error("publish of '{model}' failed during {phase}")]
    Publish {
        model: String,
        phase: PublishPhase,
        /// Version allocated before the failure, if any.
        version: Option<String>,
        #[source]
        source: BoxError,
    },
    #[error("artifact error")]
    Artifact(#[source] BoxError),
    #[error("tracking store error")]
    Store(#[source] BoxError),
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn phase(&self) -> Option<PublishPhase> {
        match self {
            Self::Publish { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    pub(crate) fn publish(
        model: &str,
        phase: PublishPhase,
        version: Option<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::Publish {
            model: model.to_string(),
            phase,
            version,
            source: source.into(),
        }
    }

    pub(crate) fn artifact(source: anyhow::Error) -> Self {
        Self::Artifact(source.into())
    }

    pub(crate) fn store(source: anyhow::Error) -> Self {
        Self::Store(source.into())
    }
}
