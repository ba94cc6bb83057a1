use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use scorehub_contracts::models::{ModelSignature, ModelUri, ModelVersion, RegisteredModel};
use serde_json::Value;
use uuid::Uuid;

use crate::store::{
    ArtifactBundle, DatasetDescriptor, RunContext, RunStatus, StoredArtifact, TrackingStore,
};

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub experiment_id: String,
    pub name: Option<String>,
    pub status: Option<RunStatus>,
    pub tags: IndexMap<String, String>,
    pub metrics: IndexMap<String, f64>,
    pub params: IndexMap<String, String>,
    pub inputs: Vec<LoggedInput>,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedInput {
    pub dataset_name: String,
    pub digest: String,
    pub context: String,
    pub tags: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionRecord {
    pub version: u64,
    pub run_id: String,
    pub description: String,
    pub tags: IndexMap<String, String>,
    pub envelope: Value,
    pub signature: ModelSignature,
    pub input_example: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelRecord {
    pub description: String,
    pub tags: IndexMap<String, String>,
    pub versions: Vec<VersionRecord>,
}

#[derive(Debug, Default)]
struct State {
    experiments: IndexMap<String, String>,
    runs: IndexMap<String, RunRecord>,
    models: IndexMap<String, ModelRecord>,
    calls: Vec<String>,
    failing: HashSet<String>,
}

/// Process-local [`TrackingStore`] with the same observable semantics as a
/// tracking server: per-name versions start at 1 and only grow.
///
/// Each trait call is appended to [`calls`](Self::calls) under its operation
/// name before it runs; operations named in [`fail_on`](Self::fail_on) fail
/// without touching state.
#[derive(Debug, Default)]
pub struct InMemoryTrackingStore {
    state: Mutex<State>,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, operation: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(operation.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.clear();
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.state
            .lock()
            .map(|state| state.runs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn model(&self, name: &str) -> Option<ModelRecord> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.models.get(name).cloned())
    }

    fn enter(&self, operation: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        state.calls.push(operation.to_string());
        if state.failing.contains(operation) {
            bail!("injected failure in {operation}");
        }
        Ok(state)
    }
}

fn open_run<'a>(state: &'a mut State, run: &RunContext) -> Result<&'a mut RunRecord> {
    let record = state
        .runs
        .get_mut(&run.run_id)
        .ok_or_else(|| anyhow!("run '{}' does not exist", run.run_id))?;
    if record.status.is_some() {
        bail!("run '{}' is already closed", run.run_id);
    }
    Ok(record)
}

fn registered<'a>(state: &'a mut State, name: &str) -> Result<&'a mut ModelRecord> {
    state
        .models
        .get_mut(name)
        .ok_or_else(|| anyhow!("registered model '{name}' does not exist"))
}

fn version_of<'a>(
    model: &'a mut ModelRecord,
    name: &str,
    version: &str,
) -> Result<&'a mut VersionRecord> {
    model
        .versions
        .iter_mut()
        .find(|row| row.version.to_string() == version)
        .ok_or_else(|| anyhow!("model version '{name}/{version}' does not exist"))
}

fn to_model_version(name: &str, row: &VersionRecord) -> ModelVersion {
    ModelVersion {
        name: name.to_string(),
        version: row.version.to_string(),
        run_id: Some(row.run_id.clone()),
        source: Some(format!("memory:/{}/{name}", row.run_id)),
        status: Some("READY".to_string()),
    }
}

impl TrackingStore for InMemoryTrackingStore {
    fn ensure_experiment(&self, name: &str) -> Result<String> {
        let mut state = self.enter("ensure_experiment")?;
        if let Some(id) = state.experiments.get(name) {
            return Ok(id.clone());
        }
        let id = state.experiments.len().to_string();
        state.experiments.insert(name.to_string(), id.clone());
        Ok(id)
    }

    fn start_run(&self, experiment_id: &str, run_name: Option<&str>) -> Result<RunContext> {
        let mut state = self.enter("start_run")?;
        if !state.experiments.values().any(|id| id == experiment_id) {
            bail!("experiment '{experiment_id}' does not exist");
        }
        let run_id = Uuid::new_v4().simple().to_string();
        state.runs.insert(
            run_id.clone(),
            RunRecord {
                run_id: run_id.clone(),
                experiment_id: experiment_id.to_string(),
                name: run_name.map(str::to_string),
                status: None,
                tags: IndexMap::new(),
                metrics: IndexMap::new(),
                params: IndexMap::new(),
                inputs: Vec::new(),
                models: Vec::new(),
            },
        );
        Ok(RunContext {
            artifact_uri: format!("memory:/{run_id}"),
            run_id,
            experiment_id: experiment_id.to_string(),
        })
    }

    fn end_run(&self, run: &RunContext, status: RunStatus) -> Result<()> {
        let mut state = self.enter("end_run")?;
        open_run(&mut state, run)?.status = Some(status);
        Ok(())
    }

    fn set_tags(&self, run: &RunContext, tags: &IndexMap<String, String>) -> Result<()> {
        let mut state = self.enter("set_tags")?;
        let record = open_run(&mut state, run)?;
        for (key, value) in tags {
            record.tags.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn log_metrics(&self, run: &RunContext, metrics: &IndexMap<String, f64>) -> Result<()> {
        let mut state = self.enter("log_metrics")?;
        let record = open_run(&mut state, run)?;
        for (key, value) in metrics {
            record.metrics.insert(key.clone(), *value);
        }
        Ok(())
    }

    fn log_params(&self, run: &RunContext, params: &IndexMap<String, String>) -> Result<()> {
        let mut state = self.enter("log_params")?;
        let record = open_run(&mut state, run)?;
        for (key, value) in params {
            // Params are write-once per run, like on a tracking server.
            if let Some(existing) = record.params.get(key) {
                if existing != value {
                    bail!("param '{key}' already logged with a different value");
                }
            }
            record.params.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn log_input(
        &self,
        run: &RunContext,
        dataset: &DatasetDescriptor,
        context: &str,
        tags: &IndexMap<String, String>,
    ) -> Result<()> {
        let mut state = self.enter("log_input")?;
        open_run(&mut state, run)?.inputs.push(LoggedInput {
            dataset_name: dataset.name.clone(),
            digest: dataset.digest.clone(),
            context: context.to_string(),
            tags: tags.clone(),
        });
        Ok(())
    }

    fn log_model(
        &self,
        run: &RunContext,
        bundle: &ArtifactBundle,
        registered_model_name: &str,
    ) -> Result<ModelVersion> {
        let mut state = self.enter("log_model")?;
        open_run(&mut state, run)?
            .models
            .push(bundle.artifact_path.clone());
        let model = state
            .models
            .entry(registered_model_name.to_string())
            .or_default();
        let next = model.versions.last().map(|row| row.version).unwrap_or(0) + 1;
        model.versions.push(VersionRecord {
            version: next,
            run_id: run.run_id.clone(),
            description: String::new(),
            tags: IndexMap::new(),
            envelope: bundle.envelope(),
            signature: bundle.signature.clone(),
            input_example: bundle.input_example.clone(),
        });
        let created = model
            .versions
            .last()
            .map(|row| to_model_version(registered_model_name, row))
            .ok_or_else(|| anyhow!("version was not recorded"))?;
        Ok(created)
    }

    fn get_latest_versions(&self, name: &str) -> Result<Vec<ModelVersion>> {
        let state = self.enter("get_latest_versions")?;
        Ok(state
            .models
            .get(name)
            .map(|model| {
                model
                    .versions
                    .iter()
                    .rev()
                    .map(|row| to_model_version(name, row))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn update_model_version(&self, name: &str, version: &str, description: &str) -> Result<()> {
        let mut state = self.enter("update_model_version")?;
        let model = registered(&mut state, name)?;
        version_of(model, name, version)?.description = description.to_string();
        Ok(())
    }

    fn update_registered_model(&self, name: &str, description: &str) -> Result<()> {
        let mut state = self.enter("update_registered_model")?;
        registered(&mut state, name)?.description = description.to_string();
        Ok(())
    }

    fn set_model_version_tag(
        &self,
        name: &str,
        version: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let mut state = self.enter("set_model_version_tag")?;
        let model = registered(&mut state, name)?;
        version_of(model, name, version)?
            .tags
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_registered_model_tag(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.enter("set_registered_model_tag")?;
        registered(&mut state, name)?
            .tags
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load_model(&self, uri: &ModelUri) -> Result<Option<StoredArtifact>> {
        let state = self.enter("load_model")?;
        let Some(model) = state.models.get(uri.name()) else {
            return Ok(None);
        };
        let envelope = if uri.version() == "latest" {
            model.versions.last()
        } else {
            model
                .versions
                .iter()
                .find(|row| row.version.to_string() == uri.version())
        };
        envelope
            .map(|row| StoredArtifact::from_envelope(&row.envelope))
            .transpose()
    }

    fn search_registered_models(&self) -> Result<Vec<RegisteredModel>> {
        let state = self.enter("search_registered_models")?;
        Ok(state
            .models
            .keys()
            .map(|name| RegisteredModel { name: name.clone() })
            .collect())
    }
}
