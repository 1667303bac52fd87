//! Telemetry sink: one trace run per completed translation.
//! Always invoked from the deferred scheduler, never on the response path.
//! Every run is opened, logged and then closed on every exit path, including
//! when the backend errors or panics mid-log.

pub mod mlflow;
pub mod sqlite;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::{metric_names, MetricsRegistry};
use crate::translate::ResultSource;

pub use mlflow::MlflowBackend;
pub use sqlite::SqliteTraceStore;

/// A completed request handed to the sink. Ownership moves to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub text: String,
    pub translation: String,
    pub latency_ms: f64,
    pub target_lang: String,
    pub source: ResultSource,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry backend unreachable: {0}")]
    Transport(String),

    #[error("telemetry backend rejected {operation} ({status}): {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("telemetry backend response malformed: {0}")]
    Malformed(String),

    #[error("telemetry storage error: {0}")]
    Storage(String),

    #[error("telemetry backend panicked while logging")]
    Panicked,
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, record: TelemetryRecord) -> Result<(), TelemetryError>;

    fn backend(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// Tracing backend with an explicit run lifecycle.
#[async_trait]
pub trait TraceBackend: Send + Sync {
    /// Open a run and return its id.
    async fn open_run(&self, record: &TelemetryRecord) -> Result<String, TelemetryError>;

    async fn log_record(&self, run_id: &str, record: &TelemetryRecord)
        -> Result<(), TelemetryError>;

    async fn close_run(&self, run_id: &str, status: RunStatus) -> Result<(), TelemetryError>;

    fn backend(&self) -> &'static str;
}

/// Wraps a `TraceBackend` so each record is logged inside its own run that
/// is always closed.
pub struct SessionSink<B> {
    backend: B,
}

impl<B: TraceBackend> SessionSink<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn inner(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: TraceBackend> TelemetrySink for SessionSink<B> {
    async fn record(&self, record: TelemetryRecord) -> Result<(), TelemetryError> {
        let run_id = self.backend.open_run(&record).await?;

        let logged = std::panic::AssertUnwindSafe(self.backend.log_record(&run_id, &record))
            .catch_unwind()
            .await;

        let status = match logged {
            Ok(Ok(())) => RunStatus::Finished,
            _ => RunStatus::Failed,
        };
        let closed = self.backend.close_run(&run_id, status).await;

        match logged {
            Ok(Ok(())) => closed,
            Ok(Err(e)) => {
                if let Err(close_err) = closed {
                    warn!(run_id = %run_id, error = %close_err, "failed to close telemetry run");
                }
                Err(e)
            }
            Err(_) => {
                if let Err(close_err) = closed {
                    warn!(run_id = %run_id, error = %close_err, "failed to close telemetry run");
                }
                Err(TelemetryError::Panicked)
            }
        }
    }

    fn backend(&self) -> &'static str {
        self.backend.backend()
    }
}

/// Telemetry disabled: the record only reaches the debug log.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

#[async_trait]
impl TelemetrySink for NoopTelemetry {
    async fn record(&self, record: TelemetryRecord) -> Result<(), TelemetryError> {
        debug!(
            source = %record.source,
            target_lang = %record.target_lang,
            latency_ms = record.latency_ms,
            "telemetry disabled, record discarded"
        );
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "none"
    }
}

/// Hand one record to the sink. Errors and panics stop here and are only logged.
pub async fn deliver(
    sink: Arc<dyn TelemetrySink>,
    record: TelemetryRecord,
    metrics: Arc<MetricsRegistry>,
) {
    let span = metrics.span(metric_names::TELEMETRY_RECORD);
    let backend = sink.backend();
    let outcome = std::panic::AssertUnwindSafe(sink.record(record))
        .catch_unwind()
        .await;
    span.finish();

    match outcome {
        Ok(Ok(())) => debug!(backend, "telemetry recorded"),
        Ok(Err(e)) => warn!(backend, error = %e, "telemetry record dropped"),
        Err(_) => warn!(backend, "telemetry sink panicked, record dropped"),
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
