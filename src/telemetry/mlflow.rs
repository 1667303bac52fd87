//! MLflow tracking-server backend (REST API 2.0).
//! The experiment id is resolved once (created if missing); afterwards each
//! record is `runs/create` → `runs/log-batch` → `runs/update`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::info;

use super::{now_millis, RunStatus, TelemetryError, TelemetryRecord, TraceBackend};

/// MLflow rejects param values longer than this.
const MAX_PARAM_CHARS: usize = 6000;

pub struct MlflowBackend {
    http: reqwest::Client,
    base_url: String,
    experiment_name: String,
    experiment_id: OnceCell<String>,
}

impl MlflowBackend {
    pub fn new(
        base_url: impl Into<String>,
        experiment_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            experiment_name: experiment_name.into(),
            experiment_id: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{path}", self.base_url)
    }

    async fn experiment_id(&self) -> Result<&str, TelemetryError> {
        self.experiment_id
            .get_or_try_init(|| self.resolve_experiment())
            .await
            .map(String::as_str)
    }

    async fn resolve_experiment(&self) -> Result<String, TelemetryError> {
        let response = self
            .http
            .get(self.endpoint("experiments/get-by-name"))
            .query(&[("experiment_name", self.experiment_name.as_str())])
            .send()
            .await
            .map_err(transport)?;

        if response.status().is_success() {
            let found: GetExperimentResponse = read_json(response, "experiments/get-by-name").await?;
            return Ok(found.experiment.experiment_id);
        }
        if response.status().as_u16() != 404 {
            return Err(rejected("experiments/get-by-name", response).await);
        }

        let created: CreateExperimentResponse = self
            .post(
                "experiments/create",
                json!({ "name": self.experiment_name }),
            )
            .await?;
        info!(
            experiment = %self.experiment_name,
            experiment_id = %created.experiment_id,
            "created mlflow experiment"
        );
        Ok(created.experiment_id)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        body: Value,
    ) -> Result<T, TelemetryError> {
        let response = self
            .http
            .post(self.endpoint(operation))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejected(operation, response).await);
        }
        read_json(response, operation).await
    }
}

#[async_trait]
impl TraceBackend for MlflowBackend {
    async fn open_run(&self, record: &TelemetryRecord) -> Result<String, TelemetryError> {
        let experiment_id = self.experiment_id().await?;
        let created: CreateRunResponse = self
            .post(
                "runs/create",
                json!({
                    "experiment_id": experiment_id,
                    "start_time": now_millis(),
                    "tags": [
                        { "key": "source", "value": record.source.as_str() },
                        { "key": "target_lang", "value": record.target_lang },
                    ],
                }),
            )
            .await?;
        Ok(created.run.info.run_id)
    }

    async fn log_record(
        &self,
        run_id: &str,
        record: &TelemetryRecord,
    ) -> Result<(), TelemetryError> {
        let _: Value = self
            .post(
                "runs/log-batch",
                json!({
                    "run_id": run_id,
                    "params": [
                        { "key": "text", "value": truncate_param(&record.text) },
                        { "key": "translation", "value": truncate_param(&record.translation) },
                    ],
                    "metrics": [
                        {
                            "key": "latency",
                            "value": record.latency_ms,
                            "timestamp": now_millis(),
                            "step": 0,
                        },
                    ],
                }),
            )
            .await?;
        Ok(())
    }

    async fn close_run(&self, run_id: &str, status: RunStatus) -> Result<(), TelemetryError> {
        let _: Value = self
            .post(
                "runs/update",
                json!({
                    "run_id": run_id,
                    "status": status.as_str(),
                    "end_time": now_millis(),
                }),
            )
            .await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "mlflow"
    }
}

fn truncate_param(value: &str) -> String {
    value.chars().take(MAX_PARAM_CHARS).collect()
}

fn transport(e: reqwest::Error) -> TelemetryError {
    TelemetryError::Transport(e.to_string())
}

async fn rejected(operation: &'static str, response: reqwest::Response) -> TelemetryError {
    let status = response.status().as_u16();
    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect();
    TelemetryError::Rejected {
        operation,
        status,
        body,
    }
}

async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<T, TelemetryError> {
    response
        .json()
        .await
        .map_err(|e| TelemetryError::Malformed(format!("{operation}: {e}")))
}

// --- Response types ---

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentInfo,
}

#[derive(Deserialize)]
struct ExperimentInfo {
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: RunBody,
}

#[derive(Deserialize)]
struct RunBody {
    info: RunInfo,
}

#[derive(Deserialize)]
struct RunInfo {
    run_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_params_are_truncated_on_char_boundaries() {
        let long = "é".repeat(MAX_PARAM_CHARS + 10);
        let truncated = truncate_param(&long);
        assert_eq!(truncated.chars().count(), MAX_PARAM_CHARS);
        assert_eq!(truncate_param("short"), "short");
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let backend =
            MlflowBackend::new("http://mlflow:5000/", "exp", Duration::from_secs(1)).unwrap();
        assert_eq!(
            backend.endpoint("runs/create"),
            "http://mlflow:5000/api/2.0/mlflow/runs/create"
        );
    }
}
