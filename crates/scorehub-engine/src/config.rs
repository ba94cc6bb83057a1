use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TRACKING_URI: &str = "http://localhost:5000";
pub const DEFAULT_EXPERIMENT: &str = "scoring-models";
const DEFAULT_TIMEOUT_S: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAuth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

/// Immutable settings owned by one registry instance.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub tracking_uri: String,
    pub experiment: String,
    pub journal_path: Option<PathBuf>,
    pub request_timeout: Duration,
    pub auth: StoreAuth,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tracking_uri: DEFAULT_TRACKING_URI.to_string(),
            experiment: DEFAULT_EXPERIMENT.to_string(),
            journal_path: None,
            request_timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_S),
            auth: StoreAuth::None,
        }
    }
}

impl RegistryConfig {
    pub fn new(tracking_uri: &str, experiment: &str) -> Self {
        Self {
            tracking_uri: normalize_uri(tracking_uri),
            experiment: experiment.trim().to_string(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let auth = if let Some(token) = get("MLFLOW_TRACKING_TOKEN") {
            StoreAuth::Bearer(token)
        } else if let Some(username) = get("MLFLOW_TRACKING_USERNAME") {
            StoreAuth::Basic {
                username,
                password: get("MLFLOW_TRACKING_PASSWORD").unwrap_or_default(),
            }
        } else {
            StoreAuth::None
        };

        let request_timeout = get("SCOREHUB_TIMEOUT_S")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .unwrap_or(DEFAULT_TIMEOUT_S);

        Self {
            tracking_uri: get("MLFLOW_TRACKING_URI")
                .map(|value| normalize_uri(&value))
                .unwrap_or_else(|| DEFAULT_TRACKING_URI.to_string()),
            experiment: get("SCOREHUB_EXPERIMENT")
                .unwrap_or_else(|| DEFAULT_EXPERIMENT.to_string()),
            journal_path: get("SCOREHUB_JOURNAL").map(PathBuf::from),
            request_timeout: Duration::from_secs_f64(request_timeout),
            auth,
        }
    }

    pub fn with_tracking_uri(mut self, tracking_uri: &str) -> Self {
        self.tracking_uri = normalize_uri(tracking_uri);
        self
    }

    pub fn with_experiment(mut self, experiment: &str) -> Self {
        self.experiment = experiment.trim().to_string();
        self
    }

    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }
}

pub(crate) fn normalize_uri(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
