use anyhow::{bail, Context, Result};
use chrono::Utc;
use indexmap::IndexMap;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::StatusCode;
use scorehub_contracts::models::{ModelUri, ModelVersion, RegisteredModel};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::{normalize_uri, RegistryConfig, StoreAuth};
use crate::store::{
    ArtifactBundle, DatasetDescriptor, RunContext, RunStatus, StoredArtifact, TrackingStore,
    INPUT_EXAMPLE_FILE, MODEL_FILE, SIGNATURE_FILE,
};

const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";
const RESOURCE_ALREADY_EXISTS: &str = "RESOURCE_ALREADY_EXISTS";
const ARTIFACT_SCHEME: &str = "mlflow-artifacts:";
const DATASET_CONTEXT_TAG: &str = "mlflow.data.context";
const RUN_NAME_TAG: &str = "mlflow.runName";
const LOG_MODEL_HISTORY_TAG: &str = "mlflow.log-model.history";

// log-batch request limits enforced by the tracking server.
const MAX_METRICS_PER_BATCH: usize = 1000;
const MAX_PARAMS_PER_BATCH: usize = 100;
const MAX_TAGS_PER_BATCH: usize = 100;
const SEARCH_PAGE_SIZE: u32 = 100;

/// Error body returned by the tracking server, `{error_code, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "tracking server returned {status} ({}): {message}",
    .error_code.as_deref().unwrap_or("no error code")
)]
pub struct ApiError {
    pub status: u16,
    pub error_code: Option<String>,
    pub message: String,
}

impl ApiError {
    fn from_body(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error_code = parsed
            .as_ref()
            .and_then(|value| value.get("error_code"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let message = parsed
            .as_ref()
            .and_then(|value| value.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| truncate_text(body, 512));
        Self {
            status,
            error_code,
            message,
        }
    }
}

pub fn has_error_code(err: &anyhow::Error, code: &str) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ApiError>()
            .map(|api| api.error_code.as_deref() == Some(code))
            .unwrap_or(false)
    })
}

/// [`TrackingStore`] backed by an MLflow-compatible tracking server.
///
/// Artifacts go through the server's artifact proxy, so the server must be
/// started with artifact serving enabled.
#[derive(Debug, Clone)]
pub struct HttpTrackingStore {
    base: String,
    auth: StoreAuth,
    http: HttpClient,
}

impl HttpTrackingStore {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed building tracking HTTP client")?;
        Ok(Self {
            base: normalize_uri(&config.tracking_uri),
            auth: config.auth.clone(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    /// Points this instance at another tracking server. Other instances are
    /// unaffected.
    pub fn configure(&mut self, tracking_uri: &str) {
        self.base = normalize_uri(tracking_uri);
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{path}", self.base)
    }

    fn artifact_url(&self, path: &str) -> String {
        format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}",
            self.base,
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            StoreAuth::None => request,
            StoreAuth::Bearer(token) => request.bearer_auth(token),
            StoreAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }

    fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        debug!(target: "scorehub::store", call = what, "tracking request");
        let response = self
            .authorize(request)
            .send()
            .with_context(|| format!("tracking request failed ({what})"))?;
        response_json_or_error(what, response)
    }

    fn post(&self, path: &str, payload: &Value) -> Result<Value> {
        self.send(self.http.post(self.api(path)).json(payload), path)
    }

    fn patch(&self, path: &str, payload: &Value) -> Result<Value> {
        self.send(self.http.patch(self.api(path)).json(payload), path)
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.send(self.http.get(self.api(path)).query(query), path)
    }

    fn log_batch(
        &self,
        run: &RunContext,
        field: &str,
        rows: Vec<Value>,
        limit: usize,
    ) -> Result<()> {
        for chunk in rows.chunks(limit) {
            let mut payload = json!({ "run_id": run.run_id });
            payload[field] = Value::Array(chunk.to_vec());
            self.post("runs/log-batch", &payload)?;
        }
        Ok(())
    }

    fn upload(&self, path: &str, payload: &Value) -> Result<()> {
        let body = serde_json::to_vec_pretty(payload)?;
        let request = self
            .http
            .put(self.artifact_url(path))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        self.send(request, "artifacts/upload")
            .with_context(|| format!("artifact upload failed ({path})"))?;
        Ok(())
    }

    fn download(&self, path: &str) -> Result<Option<Value>> {
        let url = self.artifact_url(path);
        let response = self
            .authorize(self.http.get(&url))
            .send()
            .with_context(|| format!("artifact download failed ({path})"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed = response_json_or_error("artifacts/download", response)?;
        Ok(Some(parsed))
    }

    fn version_source(&self, uri: &ModelUri) -> Result<Option<String>> {
        if uri.version() == "latest" {
            let latest = self.get_latest_versions(uri.name())?;
            return Ok(latest.into_iter().next().and_then(|row| row.source));
        }
        let response = self.get(
            "model-versions/get",
            &[
                ("name", uri.name().to_string()),
                ("version", uri.version().to_string()),
            ],
        );
        match response {
            Ok(body) => {
                let row = body.get("model_version").unwrap_or(&Value::Null);
                Ok(parse_model_version(row)?.source)
            }
            Err(err) if has_error_code(&err, RESOURCE_DOES_NOT_EXIST) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl TrackingStore for HttpTrackingStore {
    fn ensure_experiment(&self, name: &str) -> Result<String> {
        match self.get("experiments/get-by-name", &[("experiment_name", name.to_string())]) {
            Ok(body) => body
                .pointer("/experiment/experiment_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .context("experiments/get-by-name response missing experiment_id"),
            Err(err) if has_error_code(&err, RESOURCE_DOES_NOT_EXIST) => {
                let body = self.post("experiments/create", &json!({ "name": name }))?;
                body.get("experiment_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .context("experiments/create response missing experiment_id")
            }
            Err(err) => Err(err),
        }
    }

    fn start_run(&self, experiment_id: &str, run_name: Option<&str>) -> Result<RunContext> {
        let mut payload = json!({
            "experiment_id": experiment_id,
            "start_time": Utc::now().timestamp_millis(),
        });
        if let Some(run_name) = run_name {
            payload["run_name"] = json!(run_name);
            payload["tags"] = json!([{ "key": RUN_NAME_TAG, "value": run_name }]);
        }
        let body = self.post("runs/create", &payload)?;
        let info = body
            .pointer("/run/info")
            .context("runs/create response missing run.info")?;
        let field = |key: &str| {
            info.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .with_context(|| format!("runs/create response missing run.info.{key}"))
        };
        Ok(RunContext {
            run_id: field("run_id")?,
            experiment_id: field("experiment_id")?,
            artifact_uri: field("artifact_uri")?,
        })
    }

    fn end_run(&self, run: &RunContext, status: RunStatus) -> Result<()> {
        self.post(
            "runs/update",
            &json!({
                "run_id": run.run_id,
                "status": status.as_str(),
                "end_time": Utc::now().timestamp_millis(),
            }),
        )?;
        Ok(())
    }

    fn set_tags(&self, run: &RunContext, tags: &IndexMap<String, String>) -> Result<()> {
        self.log_batch(run, "tags", key_value_rows(tags), MAX_TAGS_PER_BATCH)
    }

    fn log_metrics(&self, run: &RunContext, metrics: &IndexMap<String, f64>) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();
        let rows = metrics
            .iter()
            .map(|(key, value)| {
                json!({ "key": key, "value": value, "timestamp": timestamp, "step": 0 })
            })
            .collect();
        self.log_batch(run, "metrics", rows, MAX_METRICS_PER_BATCH)
    }

    fn log_params(&self, run: &RunContext, params: &IndexMap<String, String>) -> Result<()> {
        self.log_batch(run, "params", key_value_rows(params), MAX_PARAMS_PER_BATCH)
    }

    fn log_input(
        &self,
        run: &RunContext,
        dataset: &DatasetDescriptor,
        context: &str,
        tags: &IndexMap<String, String>,
    ) -> Result<()> {
        let records_path = dataset.artifact_path();
        let records_root = artifact_proxy_path(&run.artifact_uri)?;
        self.upload(&format!("{records_root}/{records_path}"), &dataset.records())?;
        let records_uri = format!("{}/{records_path}", run.artifact_uri.trim_end_matches('/'));

        let mut input_tags = vec![json!({ "key": DATASET_CONTEXT_TAG, "value": context })];
        input_tags.extend(key_value_rows(tags));
        let payload = json!({
            "run_id": run.run_id,
            "datasets": [{
                "tags": input_tags,
                "dataset": {
                    "name": dataset.name,
                    "digest": dataset.digest,
                    "source_type": dataset.source_type,
                    "source": dataset.source(&records_uri).to_string(),
                    "schema": dataset.schema().to_string(),
                    "profile": dataset.profile().to_string(),
                },
            }],
        });
        self.post("runs/log-inputs", &payload)?;
        Ok(())
    }

    fn log_model(
        &self,
        run: &RunContext,
        bundle: &ArtifactBundle,
        registered_model_name: &str,
    ) -> Result<ModelVersion> {
        let root = format!(
            "{}/{}",
            artifact_proxy_path(&run.artifact_uri)?,
            bundle.artifact_path
        );
        self.upload(&format!("{root}/{MODEL_FILE}"), &bundle.envelope())?;
        self.upload(
            &format!("{root}/{SIGNATURE_FILE}"),
            &serde_json::to_value(&bundle.signature)?,
        )?;
        self.upload(
            &format!("{root}/{INPUT_EXAMPLE_FILE}"),
            &json!({ "data": bundle.input_example }),
        )?;

        let history = json!([{
            "run_id": run.run_id,
            "artifact_path": bundle.artifact_path,
            "utc_time_created": Utc::now().to_rfc3339(),
            "flavors": { bundle.flavor.clone(): {} },
            "signature": bundle.signature,
        }]);
        self.set_tag(run, LOG_MODEL_HISTORY_TAG, &history.to_string())?;

        match self.post("registered-models/create", &json!({ "name": registered_model_name })) {
            Ok(_) => {}
            Err(err) if has_error_code(&err, RESOURCE_ALREADY_EXISTS) => {}
            Err(err) => return Err(err),
        }

        let source = format!(
            "{}/{}",
            run.artifact_uri.trim_end_matches('/'),
            bundle.artifact_path
        );
        let body = self.post(
            "model-versions/create",
            &json!({
                "name": registered_model_name,
                "source": source,
                "run_id": run.run_id,
            }),
        )?;
        parse_model_version(body.get("model_version").unwrap_or(&Value::Null))
    }

    fn get_latest_versions(&self, name: &str) -> Result<Vec<ModelVersion>> {
        let body = match self.post(
            "registered-models/get-latest-versions",
            &json!({ "name": name }),
        ) {
            Ok(body) => body,
            Err(err) if has_error_code(&err, RESOURCE_DOES_NOT_EXIST) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let rows = body
            .get("model_versions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let versions = rows
            .iter()
            .map(parse_model_version)
            .collect::<Result<Vec<_>>>()?;
        Ok(latest_first(versions))
    }

    fn update_model_version(&self, name: &str, version: &str, description: &str) -> Result<()> {
        self.patch(
            "model-versions/update",
            &json!({ "name": name, "version": version, "description": description }),
        )?;
        Ok(())
    }

    fn update_registered_model(&self, name: &str, description: &str) -> Result<()> {
        self.patch(
            "registered-models/update",
            &json!({ "name": name, "description": description }),
        )?;
        Ok(())
    }

    fn set_model_version_tag(
        &self,
        name: &str,
        version: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.post(
            "model-versions/set-tag",
            &json!({ "name": name, "version": version, "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn set_registered_model_tag(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.post(
            "registered-models/set-tag",
            &json!({ "name": name, "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn load_model(&self, uri: &ModelUri) -> Result<Option<StoredArtifact>> {
        let Some(source) = self.version_source(uri)? else {
            return Ok(None);
        };
        let path = format!("{}/{MODEL_FILE}", artifact_proxy_path(&source)?);
        let Some(envelope) = self.download(&path)? else {
            return Ok(None);
        };
        StoredArtifact::from_envelope(&envelope)
            .with_context(|| format!("invalid artifact at {uri}"))
            .map(Some)
    }

    fn search_registered_models(&self) -> Result<Vec<RegisteredModel>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("max_results", SEARCH_PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }
            let body = self.get("registered-models/search", &query)?;
            out.extend(parse_registered_models(&body));
            page_token = body
                .get("next_page_token")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                return Ok(out);
            }
        }
    }
}

fn response_json_or_error(what: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("tracking response body read failed ({what})"))?;
    if !status.is_success() {
        return Err(anyhow::Error::new(ApiError::from_body(status.as_u16(), &body))
            .context(format!("tracking request rejected ({what})")));
    }
    if body.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(&body)
        .with_context(|| format!("tracking server returned invalid JSON ({what})"))
}

fn key_value_rows(pairs: &IndexMap<String, String>) -> Vec<Value> {
    pairs
        .iter()
        .map(|(key, value)| json!({ "key": key, "value": value }))
        .collect()
}

/// Maps `mlflow-artifacts:/<path>` to the proxy-relative `<path>`.
fn artifact_proxy_path(uri: &str) -> Result<String> {
    let Some(rest) = uri.strip_prefix(ARTIFACT_SCHEME) else {
        bail!("unsupported artifact location '{uri}'; the tracking server must proxy artifacts");
    };
    let path = rest.trim_start_matches('/').trim_end_matches('/');
    if path.is_empty() {
        bail!("artifact location '{uri}' has no path");
    }
    Ok(path.to_string())
}

fn parse_model_version(value: &Value) -> Result<ModelVersion> {
    let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    let name = text("name").context("model version missing 'name'")?;
    // Some servers encode the version as a number.
    let version = text("version")
        .or_else(|| value.get("version").and_then(Value::as_u64).map(|v| v.to_string()))
        .context("model version missing 'version'")?;
    Ok(ModelVersion {
        name,
        version,
        run_id: text("run_id").filter(|id| !id.is_empty()),
        source: text("source"),
        status: text("status"),
    })
}

fn parse_registered_models(body: &Value) -> Vec<RegisteredModel> {
    body.get("registered_models")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get("name").and_then(Value::as_str))
                .map(|name| RegisteredModel {
                    name: name.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn latest_first(mut versions: Vec<ModelVersion>) -> Vec<ModelVersion> {
    versions.sort_by(|a, b| b.number().cmp(&a.number()));
    versions
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use indexmap::IndexMap;
    use scorehub_contracts::metadata::DatasetInfo;
    use serde_json::{json, Value};

    use super::{
        artifact_proxy_path, has_error_code, latest_first, parse_model_version,
        parse_registered_models, truncate_text, ApiError, HttpTrackingStore,
    };
    use crate::artifact::default_flavor_registry;
    use crate::config::RegistryConfig;
    use crate::error::RegistryError;
    use crate::registry::ModelRegistry;
    use crate::store::{DatasetDescriptor, RunContext, TrackingStore};

    const MISSING: &str = r#"{"error_code":"RESOURCE_DOES_NOT_EXIST","message":"not found"}"#;

    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        path: String,
        body: String,
    }

    type Requests = Arc<Mutex<Vec<Seen>>>;

    /// Answers every request on a local port with `routes(method, path)`,
    /// one connection per request.
    fn serve<F>(routes: F) -> anyhow::Result<(HttpTrackingStore, Requests)>
    where
        F: Fn(&str, &str) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        let requests: Requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    break;
                };
                let Some(seen) = read_request(&mut stream) else {
                    continue;
                };
                let (status, body) = routes(&seen.method, &seen.path);
                if let Ok(mut log) = log.lock() {
                    log.push(seen);
                }
                let response = format!(
                    "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        let store = HttpTrackingStore::new(&RegistryConfig::new(&base, "e"))?;
        Ok((store, requests))
    }

    fn read_request(stream: &mut TcpStream) -> Option<Seen> {
        let mut reader = BufReader::new(stream.try_clone().ok()?);
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let mut parts = line.split_whitespace();
        let method = parts.next()?.to_string();
        let target = parts.next()?;
        let path = target.split('?').next().unwrap_or(target).to_string();

        let mut length = 0;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).ok()?;
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).ok()?;
        Some(Seen {
            method,
            path,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    fn registry_over(store: HttpTrackingStore) -> ModelRegistry {
        ModelRegistry::new(
            RegistryConfig::default(),
            Arc::new(store),
            default_flavor_registry(),
        )
    }

    #[test]
    fn missing_version_resolves_to_not_found() -> anyhow::Result<()> {
        let (store, requests) = serve(|_, path| match path {
            "/api/2.0/mlflow/model-versions/get" => (404, MISSING.to_string()),
            _ => (500, "{}".to_string()),
        })?;
        let err = registry_over(store).resolve("nonexistent-model", "1").unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err:#}");

        let requests = requests.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
        Ok(())
    }

    #[test]
    fn missing_artifact_file_resolves_to_not_found() -> anyhow::Result<()> {
        let (store, requests) = serve(|_, path| match path {
            "/api/2.0/mlflow/model-versions/get" => (
                200,
                json!({"model_version": {
                    "name": "m",
                    "version": "1",
                    "source": "mlflow-artifacts:/0/r1/artifacts/m",
                }})
                .to_string(),
            ),
            _ => (404, "Not Found".to_string()),
        })?;
        let err = registry_over(store).resolve("m", "1").unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err:#}");

        let requests = requests.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(
            requests.last().map(|seen| seen.path.as_str()),
            Some("/api/2.0/mlflow-artifacts/artifacts/0/r1/artifacts/m/model.json")
        );
        Ok(())
    }

    #[test]
    fn unknown_model_has_no_latest_versions() -> anyhow::Result<()> {
        let route = |_: &str, path: &str| match path {
            "/api/2.0/mlflow/registered-models/get-latest-versions" => {
                (404, MISSING.to_string())
            }
            _ => (500, "{}".to_string()),
        };
        let (store, _) = serve(route)?;
        assert!(store.get_latest_versions("ghost")?.is_empty());

        let (store, _) = serve(route)?;
        let err = registry_over(store).resolve_latest("ghost").unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err:#}");
        Ok(())
    }

    #[test]
    fn server_errors_surface_as_store_errors() -> anyhow::Result<()> {
        let (store, _) = serve(|_, _| {
            (
                500,
                r#"{"error_code":"INTERNAL_ERROR","message":"database locked"}"#.to_string(),
            )
        })?;
        let err = registry_over(store).resolve("m", "1").unwrap_err();
        assert!(matches!(err, RegistryError::Store(_)), "unexpected error: {err:#}");
        assert!(!err.is_not_found());
        let mut details = Vec::new();
        let mut cause = std::error::Error::source(&err);
        while let Some(inner) = cause {
            details.push(inner.to_string());
            cause = inner.source();
        }
        assert!(details.iter().any(|detail| detail.contains("database locked")));
        Ok(())
    }

    #[test]
    fn log_input_uploads_records_and_references_them() -> anyhow::Result<()> {
        let (store, requests) = serve(|_, _| (200, "{}".to_string()))?;
        let dataset = DatasetInfo {
            name: "applicants".to_string(),
            features: (0..5_000).map(|row| vec![f64::from(row), 0.5, 700.0, 2.0]).collect(),
            targets: (0..5_000).map(|row| f64::from(row % 2)).collect(),
            ..DatasetInfo::default()
        };
        let descriptor = DatasetDescriptor::from_dataset(&dataset);
        let run = RunContext {
            run_id: "r1".to_string(),
            experiment_id: "0".to_string(),
            artifact_uri: "mlflow-artifacts:/0/r1/artifacts".to_string(),
        };
        store.log_input(&run, &descriptor, "train", &IndexMap::new())?;

        let requests = requests.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(requests.len(), 2);
        let upload = &requests[0];
        assert_eq!(upload.method, "PUT");
        assert_eq!(
            upload.path,
            format!(
                "/api/2.0/mlflow-artifacts/artifacts/0/r1/artifacts/{}",
                descriptor.artifact_path()
            )
        );
        let records: Value = serde_json::from_str(&upload.body)?;
        assert_eq!(records["targets"].as_array().map(Vec::len), Some(5_000));

        let inputs: Value = serde_json::from_str(&requests[1].body)?;
        assert_eq!(requests[1].path, "/api/2.0/mlflow/runs/log-inputs");
        let source = inputs["datasets"][0]["dataset"]["source"]
            .as_str()
            .unwrap_or_default();
        assert!(source.len() < 65_535);
        let source: Value = serde_json::from_str(source)?;
        assert_eq!(
            source["uri"],
            format!("mlflow-artifacts:/0/r1/artifacts/{}", descriptor.artifact_path())
        );
        Ok(())
    }

    #[test]
    fn api_error_decodes_error_body() {
        let err = ApiError::from_body(
            404,
            r#"{"error_code":"RESOURCE_DOES_NOT_EXIST","message":"name=x not found"}"#,
        );
        assert_eq!(err.error_code.as_deref(), Some("RESOURCE_DOES_NOT_EXIST"));
        assert_eq!(
            err.to_string(),
            "tracking server returned 404 (RESOURCE_DOES_NOT_EXIST): name=x not found"
        );

        let plain = ApiError::from_body(502, "Bad Gateway");
        assert_eq!(plain.error_code, None);
        assert_eq!(plain.message, "Bad Gateway");
    }

    #[test]
    fn error_code_is_found_through_context() {
        let err = anyhow::Error::new(ApiError::from_body(
            400,
            r#"{"error_code":"RESOURCE_ALREADY_EXISTS","message":"exists"}"#,
        ))
        .context("registered-models/create");
        assert!(has_error_code(&err, "RESOURCE_ALREADY_EXISTS"));
        assert!(!has_error_code(&err, "RESOURCE_DOES_NOT_EXIST"));
        assert!(!has_error_code(&anyhow::anyhow!("io"), "RESOURCE_ALREADY_EXISTS"));
    }

    #[test]
    fn artifact_proxy_path_strips_scheme() -> anyhow::Result<()> {
        assert_eq!(
            artifact_proxy_path("mlflow-artifacts:/3/abc/artifacts/scoring-model-001")?,
            "3/abc/artifacts/scoring-model-001"
        );
        assert!(artifact_proxy_path("s3://bucket/3/abc").is_err());
        assert!(artifact_proxy_path("mlflow-artifacts:/").is_err());
        Ok(())
    }

    #[test]
    fn model_versions_parse_and_sort_latest_first() -> anyhow::Result<()> {
        let rows = [
            json!({
                "name": "m",
                "version": "2",
                "run_id": "r2",
                "source": "mlflow-artifacts:/0/r2/artifacts/m",
            }),
            json!({"name": "m", "version": 10, "run_id": ""}),
            json!({"name": "m", "version": "9", "status": "READY"}),
        ];
        let parsed = rows
            .iter()
            .map(parse_model_version)
            .collect::<anyhow::Result<Vec<_>>>()?;
        assert_eq!(parsed[1].run_id, None);
        let sorted: Vec<String> = latest_first(parsed)
            .into_iter()
            .map(|row| row.version)
            .collect();
        assert_eq!(sorted, vec!["10", "9", "2"]);

        assert!(parse_model_version(&json!({"version": "1"})).is_err());
        Ok(())
    }

    #[test]
    fn registered_models_keep_server_order() {
        let body = json!({
            "registered_models": [{"name": "zeta"}, {"name": "alpha"}, {"latest_versions": []}],
            "next_page_token": "abc"
        });
        let names: Vec<String> = parse_registered_models(&body)
            .into_iter()
            .map(|row| row.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(parse_registered_models(&json!({})).is_empty());
    }

    #[test]
    fn configure_replaces_endpoint_on_one_instance_only() -> anyhow::Result<()> {
        let config = RegistryConfig::new("http://localhost:5000/", "e");
        let mut first = HttpTrackingStore::new(&config)?;
        let second = first.clone();
        first.configure("http://tracking.internal:8080/");
        first.configure("http://tracking.internal:8080/");
        assert_eq!(first.endpoint(), "http://tracking.internal:8080");
        assert_eq!(second.endpoint(), "http://localhost:5000");
        assert_eq!(
            first.api("runs/create"),
            "http://tracking.internal:8080/api/2.0/mlflow/runs/create"
        );
        assert_eq!(
            first.artifact_url("/0/r/artifacts/m/model.json"),
            concat!(
                "http://tracking.internal:8080",
                "/api/2.0/mlflow-artifacts/artifacts/0/r/artifacts/m/model.json"
            )
        );
        Ok(())
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("abcdef", 3), "abc...");
    }
}
