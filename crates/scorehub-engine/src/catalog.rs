use std::sync::Arc;

use crate::error::RegistryError;
use crate::store::TrackingStore;

/// Read-only view over every model name the store knows.
#[derive(Clone)]
pub struct RegistryCatalog {
    store: Arc<dyn TrackingStore>,
}

impl RegistryCatalog {
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        Self { store }
    }

    /// Names in store order; each call queries the store again.
    pub fn list_all(&self) -> Result<Vec<String>, RegistryError> {
        let models = self
            .store
            .search_registered_models()
            .map_err(RegistryError::store)?;
        Ok(models.into_iter().map(|model| model.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scorehub_contracts::models::ModelSignature;
    use serde_json::json;

    use super::RegistryCatalog;
    use crate::memory::InMemoryTrackingStore;
    use crate::store::{ArtifactBundle, TrackingStore};

    #[test]
    fn list_all_reflects_store_at_call_time() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryTrackingStore::new());
        let catalog = RegistryCatalog::new(store.clone());
        assert!(catalog.list_all()?.is_empty());

        let experiment = store.ensure_experiment("e")?;
        let run = store.start_run(&experiment, None)?;
        let bundle = ArtifactBundle {
            artifact_path: "x".to_string(),
            flavor: "linear-regressor".to_string(),
            payload: json!({"coefficients": [1.0], "intercept": 0.0}),
            signature: ModelSignature::infer(&[vec![1.0]], &[1.0], None),
            input_example: vec![vec![1.0]],
        };
        store.log_model(&run, &bundle, "zeta")?;
        store.log_model(&run, &bundle, "alpha")?;

        assert_eq!(catalog.list_all()?, vec!["zeta", "alpha"]);
        Ok(())
    }

    #[test]
    fn store_failures_propagate() {
        let store = Arc::new(InMemoryTrackingStore::new());
        store.fail_on("search_registered_models");
        let err = RegistryCatalog::new(store).list_all().unwrap_err();
        assert_eq!(err.to_string(), "tracking store error");
    }
}
