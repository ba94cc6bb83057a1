use std::sync::Arc;

use anyhow::{anyhow, Result};
use scorehub_contracts::events::{
    EventPayload, JournalWriter, PHASE_COMPLETED, PUBLISH_COMPLETED, PUBLISH_FAILED,
    PUBLISH_STARTED,
};
use scorehub_contracts::features::{FeatureVector, ScoringFeatures};
use scorehub_contracts::metadata::{ModelMetadata, RunInfo};
use scorehub_contracts::models::{ModelSignature, ModelUri};
use scorehub_contracts::runs::PublishReceipt;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::artifact::{default_flavor_registry, FlavorRegistry, Predictor};
use crate::catalog::RegistryCatalog;
use crate::config::RegistryConfig;
use crate::error::{PublishPhase, RegistryError};
use crate::handle::ScoringHandle;
use crate::http::HttpTrackingStore;
use crate::store::{
    ArtifactBundle, DatasetDescriptor, RunContext, RunStatus, TrackingStore, NOTE_TAG,
};

// Phase in which a run-scoped step failed, plus the version if one exists.
type PhaseFailure = (PublishPhase, Option<String>, anyhow::Error);

/// Publishes artifacts to a tracking store and resolves them back into
/// scoring handles.
pub struct ModelRegistry {
    config: RegistryConfig,
    store: Arc<dyn TrackingStore>,
    flavors: Arc<FlavorRegistry>,
    journal: Option<JournalWriter>,
}

impl ModelRegistry {
    pub fn new(
        config: RegistryConfig,
        store: Arc<dyn TrackingStore>,
        flavors: FlavorRegistry,
    ) -> Self {
        let journal = config.journal_path.clone().map(JournalWriter::new);
        Self {
            config,
            store,
            flavors: Arc::new(flavors),
            journal,
        }
    }

    /// Registry over the tracking server named in `config`, with the built-in
    /// flavors.
    pub fn connect(config: RegistryConfig) -> Result<Self> {
        let store = HttpTrackingStore::new(&config)?;
        info!(
            tracking_uri = %store.endpoint(),
            experiment = %config.experiment,
            "registry connected"
        );
        Ok(Self::new(config, Arc::new(store), default_flavor_registry()))
    }

    pub fn flavors(&self) -> &FlavorRegistry {
        &self.flavors
    }

    pub fn catalog(&self) -> RegistryCatalog {
        RegistryCatalog::new(self.store.clone())
    }

    /// Runs the publish phases in order against the store.
    ///
    /// Not atomic: a failure leaves whatever earlier phases wrote, and the
    /// returned error names the phase.
    pub fn publish(
        &self,
        artifact: &dyn Predictor,
        metadata: &ModelMetadata,
    ) -> Result<PublishReceipt, RegistryError> {
        let dataset = metadata.dataset();
        if artifact.n_features() != dataset.n_features() {
            return Err(RegistryError::Shape {
                expected: artifact.n_features(),
                found: dataset.n_features(),
            });
        }
        let bundle = prepare_bundle(artifact, metadata)?;

        let model_name = metadata.model().name.as_str();
        let mut receipt = PublishReceipt::start(model_name);
        info!(model = model_name, publish_id = %receipt.publish_id, "publish started");
        self.record(
            PUBLISH_STARTED,
            &receipt.publish_id,
            json!({
                "model": model_name,
                "experiment": self.config.experiment,
                "run_name": metadata.run().name,
            }),
        );

        let run = match self.open_run(metadata.run()) {
            Ok(run) => run,
            Err(err) => return Err(self.fail(&receipt, PublishPhase::OpenRun, None, err)),
        };
        receipt.run_id = run.run_id.clone();
        receipt.experiment_id = run.experiment_id.clone();
        self.phase_completed(
            &receipt,
            PublishPhase::OpenRun,
            json!({"run_id": run.run_id, "experiment_id": run.experiment_id}),
        );

        let registered = match self.log_within_run(&run, metadata, &bundle, &receipt) {
            Ok(version) => version,
            Err((phase, version, err)) => {
                if let Err(close_err) = self.store.end_run(&run, RunStatus::Failed) {
                    warn!(
                        run_id = %run.run_id,
                        error = %format!("{close_err:#}"),
                        "failed to mark run as failed"
                    );
                }
                return Err(self.fail(&receipt, phase, version, err));
            }
        };

        if let Err(err) = self.store.end_run(&run, RunStatus::Finished) {
            return Err(self.fail(&receipt, PublishPhase::CloseRun, Some(registered), err));
        }
        self.phase_completed(
            &receipt,
            PublishPhase::CloseRun,
            json!({"status": RunStatus::Finished.as_str()}),
        );

        let version = match self.enrich(metadata, &registered) {
            Ok(version) => version,
            Err((version, err)) => {
                return Err(self.fail(&receipt, PublishPhase::Enrich, Some(version), err))
            }
        };
        if version != registered {
            warn!(
                model = model_name,
                registered = %registered,
                latest = %version,
                "latest version differs from the one just registered"
            );
        }
        self.phase_completed(&receipt, PublishPhase::Enrich, json!({"version": version}));

        receipt.version = version;
        let receipt = receipt.finish();
        info!(
            model = model_name,
            version = %receipt.version,
            run_id = %receipt.run_id,
            "publish completed"
        );
        self.record(
            PUBLISH_COMPLETED,
            &receipt.publish_id,
            Value::Object(receipt.to_payload()),
        );
        Ok(receipt)
    }

    pub fn resolve(&self, name: &str, version: &str) -> Result<ScoringHandle, RegistryError> {
        self.load(ModelUri::new(name, version), Some(version.to_string()))
    }

    pub fn resolve_latest(&self, name: &str) -> Result<ScoringHandle, RegistryError> {
        let latest = self
            .store
            .get_latest_versions(name)
            .map_err(RegistryError::store)?;
        let Some(head) = latest.into_iter().next() else {
            return Err(RegistryError::NotFound {
                uri: ModelUri::new(name, "latest"),
            });
        };
        if head.version.trim().is_empty() {
            return self.load(ModelUri::new(name, "latest"), None);
        }
        let uri = head.uri();
        self.load(uri, Some(head.version))
    }

    fn load(&self, uri: ModelUri, version: Option<String>) -> Result<ScoringHandle, RegistryError> {
        let Some(stored) = self.store.load_model(&uri).map_err(RegistryError::store)? else {
            return Err(RegistryError::NotFound { uri });
        };
        let model = self.flavors.decode(&stored).map_err(RegistryError::artifact)?;
        info!(uri = %uri, flavor = %model.flavor(), "model resolved");
        Ok(ScoringHandle::new(uri.name(), version, model))
    }

    fn open_run(&self, run: &RunInfo) -> Result<RunContext> {
        let experiment_id = self.store.ensure_experiment(&self.config.experiment)?;
        let run_name = Some(run.name.trim()).filter(|name| !name.is_empty());
        self.store.start_run(&experiment_id, run_name)
    }

    // Phases 2-4; the run is open for all of them.
    fn log_within_run(
        &self,
        run: &RunContext,
        metadata: &ModelMetadata,
        bundle: &ArtifactBundle,
        receipt: &PublishReceipt,
    ) -> Result<String, PhaseFailure> {
        let info = metadata.run();
        log_run(self.store.as_ref(), run, info).map_err(|err| (PublishPhase::LogRun, None, err))?;
        self.phase_completed(
            receipt,
            PublishPhase::LogRun,
            json!({
                "metrics": info.metrics.len(),
                "params": info.params.len(),
                "tags": info.tags.len(),
            }),
        );

        let model_name = metadata.model().name.as_str();
        let version = self
            .store
            .log_model(run, bundle, model_name)
            .map_err(|err| (PublishPhase::LogModel, None, err))?;
        self.phase_completed(
            receipt,
            PublishPhase::LogModel,
            json!({"version": version.version, "flavor": bundle.flavor}),
        );

        let dataset = metadata.dataset();
        let descriptor = DatasetDescriptor::from_dataset(dataset);
        self.store
            .log_input(run, &descriptor, &dataset.split, &dataset.tags)
            .map_err(|err| (PublishPhase::LogDataset, Some(version.version.clone()), err))?;
        self.phase_completed(
            receipt,
            PublishPhase::LogDataset,
            json!({
                "dataset": descriptor.name,
                "digest": descriptor.digest,
                "context": dataset.split,
                "rows": dataset.n_rows(),
            }),
        );
        Ok(version.version)
    }

    // Errors carry the version that exists in the store either way.
    fn enrich(
        &self,
        metadata: &ModelMetadata,
        registered: &str,
    ) -> Result<String, (String, anyhow::Error)> {
        let name = metadata.model().name.as_str();
        let latest = self
            .store
            .get_latest_versions(name)
            .map_err(|err| (registered.to_string(), err))?;
        let version = latest
            .into_iter()
            .next()
            .map(|row| row.version)
            .ok_or_else(|| {
                (
                    registered.to_string(),
                    anyhow!("store reported no versions for '{name}'"),
                )
            })?;

        let tag_with_version = |err: anyhow::Error| (version.clone(), err);
        self.store
            .update_model_version(name, &version, &metadata.version().description)
            .map_err(tag_with_version)?;
        self.store
            .update_registered_model(name, &metadata.model().description)
            .map_err(tag_with_version)?;
        for (key, value) in &metadata.version().tags {
            self.store
                .set_model_version_tag(name, &version, key, value)
                .map_err(tag_with_version)?;
        }
        for (key, value) in &metadata.model().tags {
            self.store
                .set_registered_model_tag(name, key, value)
                .map_err(tag_with_version)?;
        }
        Ok(version)
    }

    fn phase_completed(&self, receipt: &PublishReceipt, phase: PublishPhase, details: Value) {
        info!(model = %receipt.model_name, phase = %phase, "publish phase completed");
        let mut payload = map_object(details);
        payload.insert("phase".to_string(), Value::String(phase.as_str().to_string()));
        self.record(PHASE_COMPLETED, &receipt.publish_id, Value::Object(payload));
    }

    fn fail(
        &self,
        receipt: &PublishReceipt,
        phase: PublishPhase,
        version: Option<String>,
        err: anyhow::Error,
    ) -> RegistryError {
        let detail = format!("{err:#}");
        warn!(
            model = %receipt.model_name,
            phase = %phase,
            version = version.as_deref().unwrap_or(""),
            error = %detail,
            "publish failed"
        );
        self.record(
            PUBLISH_FAILED,
            &receipt.publish_id,
            json!({
                "model": receipt.model_name,
                "phase": phase.as_str(),
                "version": version,
                "run_id": Some(receipt.run_id.as_str()).filter(|id| !id.is_empty()),
                "error": detail,
            }),
        );
        RegistryError::publish(&receipt.model_name, phase, version, err)
    }

    fn record(&self, event_type: &str, publish_id: &str, payload: Value) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(err) = journal.emit(event_type, publish_id, map_object(payload)) {
            warn!(
                path = %journal.path().display(),
                error = %format!("{err:#}"),
                "failed writing publish journal"
            );
        }
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("config", &self.config)
            .field("flavors", &self.flavors)
            .field("journal", &self.journal)
            .finish()
    }
}

fn prepare_bundle(
    artifact: &dyn Predictor,
    metadata: &ModelMetadata,
) -> Result<ArtifactBundle, RegistryError> {
    let sample = metadata.dataset().sample().to_vec();
    let predictions = artifact.predict(&sample).map_err(RegistryError::artifact)?;
    // Column names are only known when rows have the domain vector's width.
    let names =
        (artifact.n_features() == ScoringFeatures::arity()).then_some(ScoringFeatures::NAMES);
    let signature = ModelSignature::infer(&sample, &predictions, names);
    Ok(ArtifactBundle {
        artifact_path: metadata.model().name.clone(),
        flavor: artifact.flavor().to_string(),
        payload: artifact.to_payload().map_err(RegistryError::artifact)?,
        signature,
        input_example: sample,
    })
}

fn log_run(store: &dyn TrackingStore, run: &RunContext, info: &RunInfo) -> Result<()> {
    store.set_tag(run, NOTE_TAG, &info.description)?;
    store.log_metrics(run, &info.metrics)?;
    store.log_params(run, &info.params)?;
    store.set_tags(run, &info.tags)
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}
